// 任务 API 处理器

use crate::job::InputError;
use crate::server::handlers::ApiResponse;
use crate::server::{ApiError, ApiResult, AppState};
use crate::session::{JobKind, JobRequest, SessionSnapshot};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

/// 会话寻址请求头
pub const SESSION_HEADER: &str = "x-session-id";

/// 从请求头取会话 ID，缺失或为空时铸造新的 UUID v4
///
/// 铸造出的 ID 随响应头回传，客户端自行保存
pub fn session_id_from(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// 构造回传会话 ID 的响应头
pub fn session_echo(session_id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(session_id) {
        headers.insert(SESSION_HEADER, value);
    }
    headers
}

// ============================================
// 请求/响应结构
// ============================================

/// 提交任务请求
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    /// 下载链接
    pub source_ref: String,
    /// 任务类型（缺省为 video）
    #[serde(default)]
    pub kind: JobKind,
    /// 质量参数（音频 kbps / 视频最大高度；缺省按类型取默认值）
    pub quality: Option<String>,
}

/// 提交任务响应
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    /// 本次请求使用的会话 ID
    pub session_id: String,
}

/// 质量参数缺省值：音频 192 kbps，视频 1080p
fn default_quality(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Audio => "192",
        JobKind::Video => "1080",
    }
}

impl From<InputError> for ApiError {
    fn from(e: InputError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

// ============================================
// API 处理器
// ============================================

/// POST /api/v1/jobs
/// 提交下载任务（立即返回，不等待 worker）
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SubmitJobRequest>,
) -> ApiResult<(HeaderMap, Json<ApiResponse<SubmitJobResponse>>)> {
    let session_id = session_id_from(&headers);

    let quality = req
        .quality
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| default_quality(req.kind).to_string());

    state.orchestrator.submit_job(
        &session_id,
        JobRequest {
            source_ref: req.source_ref,
            kind: req.kind,
            quality,
        },
    )?;

    Ok((
        session_echo(&session_id),
        Json(ApiResponse::success(SubmitJobResponse {
            session_id: session_id.clone(),
        })),
    ))
}

/// GET /api/v1/jobs/status
/// 轮询会话状态（永不失败，未知会话返回默认就绪快照）
pub async fn get_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (HeaderMap, Json<ApiResponse<SessionSnapshot>>) {
    let session_id = session_id_from(&headers);
    let snapshot = state.orchestrator.get_status(&session_id);

    (
        session_echo(&session_id),
        Json(ApiResponse::success(snapshot)),
    )
}

/// POST /api/v1/jobs/cancel
/// 请求取消当前任务（设置标志，worker 在下次进度回调时观测到）
pub async fn cancel_job(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (HeaderMap, Json<ApiResponse<()>>) {
    let session_id = session_id_from(&headers);
    info!("API: 请求取消任务, session={}", session_id);

    state.orchestrator.request_cancel(&session_id);

    (session_echo(&session_id), Json(ApiResponse::success(())))
}

/// POST /api/v1/sessions/reset
/// 重置会话任务状态（历史记录保留）
pub async fn reset_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (HeaderMap, Json<ApiResponse<()>>) {
    let session_id = session_id_from(&headers);
    info!("API: 重置会话, session={}", session_id);

    state.orchestrator.reset_session(&session_id);

    (session_echo(&session_id), Json(ApiResponse::success(())))
}
