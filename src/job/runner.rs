// 任务编排器
//
// 每个会话同时最多一个任务。提交即重置会话状态并在独立的阻塞
// worker 上执行：解析元数据（有匹配的预览缓存则走快速路径）、
// 调用提取器抓取、把进度回调换算成会话状态。HTTP 层从不等待
// worker，提交后立即返回，状态靠轮询读取。
//
// 再次提交不排队：直接取代在途任务。旧 worker 继续运行，但它
// 持有的代数已失效，所有写入被存储层丢弃，不会污染新任务的状态

use crate::config::OutputConfig;
use crate::extractor::{
    ExtractorError, FetchOptions, MediaExtractor, ProgressDecision, ProgressEvent,
};
use crate::job::preview::PreviewResolver;
use crate::job::progress;
use crate::session::{
    JobKind, JobRecord, JobRequest, ManifestItem, PreviewCache, SessionSnapshot, SessionStore,
};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 提交/预览时的输入错误
///
/// 在边界同步上报，不派发 worker，不改动任务状态
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("缺少下载链接")]
    MissingSourceRef,
}

/// 预览被拒绝的原因
#[derive(Debug, Error)]
pub enum PreviewRejection {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
}

/// 任务编排器
pub struct JobOrchestrator {
    store: Arc<SessionStore>,
    extractor: Arc<dyn MediaExtractor>,
    previewer: PreviewResolver,
    output: OutputConfig,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        extractor: Arc<dyn MediaExtractor>,
        output: OutputConfig,
    ) -> Self {
        let previewer = PreviewResolver::new(extractor.clone());
        Self {
            store,
            extractor,
            previewer,
            output,
        }
    }

    /// 按任务类型生成输出模板（目录来自配置，命名由提取器展开）
    fn output_template(&self, kind: JobKind) -> String {
        let dir = match kind {
            JobKind::Audio => &self.output.audio_dir,
            JobKind::Video => &self.output.video_dir,
        };
        format!("{}/%(title)s.%(ext)s", dir.trim_end_matches('/'))
    }

    /// 提交任务
    ///
    /// 链接为空时同步拒绝。否则重置会话（history / known_items 保留）、
    /// 换新取消令牌，并在阻塞线程池上派发 worker，立即返回
    pub fn submit_job(&self, session_id: &str, request: JobRequest) -> Result<(), InputError> {
        if request.source_ref.trim().is_empty() {
            return Err(InputError::MissingSourceRef);
        }

        // 预览缓存要在重置前取出（重置会清掉它）
        let preview = self
            .store
            .matching_preview(session_id, &request.source_ref);

        let (generation, token) = self.store.begin_job(session_id);
        self.store
            .update(session_id, generation, |s| s.job.mark_processing());

        info!(
            "提交任务: session={}, gen={}, kind={:?}, 快速路径={}",
            session_id,
            generation,
            request.kind,
            preview.is_some()
        );

        let store = self.store.clone();
        let extractor = self.extractor.clone();
        let session_id = session_id.to_string();
        let template = self.output_template(request.kind);

        tokio::task::spawn_blocking(move || {
            run_job(
                store, extractor, session_id, generation, token, request, preview, template,
            );
        });

        Ok(())
    }

    /// 读取会话状态快照（未知会话返回默认 Ready 快照）
    pub fn get_status(&self, session_id: &str) -> SessionSnapshot {
        self.store.snapshot(session_id)
    }

    /// 请求取消当前任务
    ///
    /// 标志在每次进度回调时被检查，检测延迟由提取器的回调频率决定
    pub fn request_cancel(&self, session_id: &str) {
        self.store.request_cancel(session_id);
    }

    /// 重置会话（history / known_items 保留）
    pub fn reset_session(&self, session_id: &str) {
        self.store.reset(session_id);
    }

    /// 删除会话（状态和取消标志一并清理）
    pub fn delete_session(&self, session_id: &str) {
        self.store.delete(session_id);
    }

    /// 预览：轻量列出条目并缓存到会话，供快速路径使用
    pub async fn preview(
        &self,
        session_id: &str,
        source_ref: &str,
    ) -> Result<PreviewCache, PreviewRejection> {
        if source_ref.trim().is_empty() {
            return Err(InputError::MissingSourceRef.into());
        }

        let cache = self.previewer.resolve(source_ref).await?;
        self.store.store_preview(session_id, cache.clone());

        Ok(cache)
    }
}

/// worker 主体：解析 → 抓取 → 终态
///
/// 所有错误在这里收口转成终态加错误信息，绝不向上抛
#[allow(clippy::too_many_arguments)]
fn run_job(
    store: Arc<SessionStore>,
    extractor: Arc<dyn MediaExtractor>,
    session_id: String,
    generation: u64,
    token: CancellationToken,
    request: JobRequest,
    preview: Option<PreviewCache>,
    output_template: String,
) {
    // 元数据解析：预览缓存命中时跳过（纯延迟优化，最终结果不变）
    let (title, total, manifest) = match preview {
        Some(cache) => (cache.title, cache.total, cache.manifest),
        None => match extractor.resolve_metadata(&request.source_ref) {
            Ok(metadata) => {
                let manifest: Vec<ManifestItem> = metadata
                    .entries
                    .iter()
                    .map(|entry| ManifestItem {
                        label: entry.label.clone(),
                        duration: entry.duration,
                        completed: false,
                    })
                    .collect();
                (metadata.title, metadata.total, manifest)
            }
            Err(e) => {
                error!("元数据解析失败: session={}, error={}", session_id, e);
                store.update(&session_id, generation, |s| {
                    s.job.mark_error(format!("无法获取信息: {}", e))
                });
                return;
            }
        },
    };

    store.update(&session_id, generation, |s| {
        s.job.mark_starting(title, total, manifest)
    });

    if token.is_cancelled() {
        store.update(&session_id, generation, |s| s.job.mark_canceled());
        return;
    }

    let options = FetchOptions {
        kind: request.kind,
        quality: request.quality.clone(),
        output_template,
    };

    // 进度回调：每次事件先看取消标志，再把事件写进会话。
    // 写入带着本次任务的代数，被取代后自动失效
    let mut on_progress = |event: ProgressEvent| -> ProgressDecision {
        if token.is_cancelled() {
            return ProgressDecision::Abort;
        }

        match event {
            ProgressEvent::Downloading {
                percent,
                raw,
                label,
            } => {
                store.update(&session_id, generation, |s| {
                    progress::apply_downloading(s, percent, &raw, &label)
                });
            }
            ProgressEvent::ItemFinished { label } => {
                store.update(&session_id, generation, |s| {
                    progress::apply_item_finished(s, &label)
                });
            }
        }

        ProgressDecision::Continue
    };

    match extractor.fetch(&request.source_ref, &options, &mut on_progress) {
        Ok(()) => {
            let mut record = None;
            store.update(&session_id, generation, |s| {
                if !s.job.phase.is_terminal() {
                    s.job.mark_finished();
                }
                record = Some(JobRecord {
                    finished_at: chrono::Utc::now().timestamp(),
                    source_ref: request.source_ref.clone(),
                    kind: request.kind,
                    quality: request.quality.clone(),
                    title: s.job.title.clone(),
                    items_total: s.job.items_total,
                });
            });
            if let Some(record) = record {
                store.push_record(&session_id, generation, record);
            }
            info!("任务完成: session={}, gen={}", session_id, generation);
        }
        // 取消是独立的终态，绝不折叠进一般错误
        Err(ExtractorError::Canceled) => {
            store.update(&session_id, generation, |s| s.job.mark_canceled());
            info!("任务已取消: session={}, gen={}", session_id, generation);
        }
        Err(e) => {
            warn!("任务失败: session={}, error={}", session_id, e);
            store.update(&session_id, generation, |s| s.job.mark_error(e.to_string()));
        }
    }
}
