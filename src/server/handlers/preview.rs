// 预览 API 处理器

use crate::extractor::ExtractorError;
use crate::job::PreviewRejection;
use crate::server::handlers::{session_echo, session_id_from, ApiResponse};
use crate::server::{ApiError, ApiResult, AppState};
use crate::session::ManifestItem;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

/// 预览请求
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    /// 下载链接
    pub source_ref: String,
}

/// 预览响应
#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    /// 标题（合集名或单条目标题）
    pub title: String,
    /// 条目总数
    pub total: usize,
    /// 条目清单
    pub manifest: Vec<ManifestItem>,
}

impl From<PreviewRejection> for ApiError {
    fn from(e: PreviewRejection) -> Self {
        match e {
            // 输入问题和解析失败都是客户端可修正的，映射到 400
            PreviewRejection::Input(e) => ApiError::BadRequest(e.to_string()),
            // 提取器进程起不来是服务端配置问题，映射到 500
            PreviewRejection::Extractor(e @ ExtractorError::Spawn(_)) => {
                ApiError::Internal(anyhow::anyhow!(e))
            }
            PreviewRejection::Extractor(e) => ApiError::BadRequest(e.to_string()),
        }
    }
}

/// POST /api/v1/preview
/// 轻量解析链接的条目清单，结果缓存供后续提交走快速路径
pub async fn preview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PreviewRequest>,
) -> ApiResult<(HeaderMap, Json<ApiResponse<PreviewResponse>>)> {
    let session_id = session_id_from(&headers);
    info!("API: 预览, session={}", session_id);

    let cache = state.orchestrator.preview(&session_id, &req.source_ref).await?;

    Ok((
        session_echo(&session_id),
        Json(ApiResponse::success(PreviewResponse {
            title: cache.title,
            total: cache.total,
            manifest: cache.manifest,
        })),
    ))
}
