// API 错误类型

use crate::server::handlers::ApiResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;
use tracing::error;

/// HTTP 层错误
///
/// 所有处理器失败都收敛到这两类：客户端输入问题 400，其余 500。
/// 响应体沿用统一的 ApiResponse 信封，只暴露错误消息字符串
#[derive(Debug, Error)]
pub enum ApiError {
    /// 请求参数错误
    #[error("{0}")]
    BadRequest(String),

    /// 服务内部错误
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(e) => {
                error!("内部错误: {:#}", e);
                // 错误链只进日志，客户端只看到顶层消息
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let body = ApiResponse::<()>::error(status.as_u16() as i32, message);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_maps_to_400() {
        let response = ApiError::BadRequest("缺少下载链接".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_maps_to_500() {
        let response = ApiError::Internal(anyhow::anyhow!("启动失败")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
