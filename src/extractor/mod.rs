// 提取器模块：外部媒体提取服务的统一接口

pub mod types;
pub mod ytdlp;

pub use types::{
    ExtractorError, FetchOptions, ProgressDecision, ProgressEvent, ResolvedEntry,
    ResolvedMetadata,
};
pub use ytdlp::YtDlpExtractor;

/// 媒体提取器接口
///
/// 对接外部提取服务：元数据解析和内容抓取都是阻塞调用，
/// 由调用方（worker）决定放在哪个线程上执行。
/// 进度回调在提取器所在线程同步触发，每次回调的返回值决定是否继续
pub trait MediaExtractor: Send + Sync {
    /// 解析元数据（只列出条目，不抓取内容）
    fn resolve_metadata(&self, source_ref: &str) -> Result<ResolvedMetadata, ExtractorError>;

    /// 抓取内容
    ///
    /// 每个低层事件同步触发一次 `on_progress`；回调返回
    /// [`ProgressDecision::Abort`] 时必须中止传输并返回
    /// [`ExtractorError::Canceled`]
    fn fetch(
        &self,
        source_ref: &str,
        options: &FetchOptions,
        on_progress: &mut dyn FnMut(ProgressEvent) -> ProgressDecision,
    ) -> Result<(), ExtractorError>;
}
