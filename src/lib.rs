// Media Fetch Rust Library
// 媒体抓取任务编排核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 会话与任务状态模块
pub mod session;

// 提取器模块
pub mod extractor;

// 任务编排模块
pub mod job;

// Web服务器模块
pub mod server;

// 导出常用类型
pub use config::AppConfig;
pub use extractor::{ExtractorError, MediaExtractor, YtDlpExtractor};
pub use job::{InputError, JobOrchestrator, PreviewRejection};
pub use server::AppState;
pub use session::{JobKind, JobPhase, JobRecord, JobState, SessionSnapshot, SessionStore};
