// 任务模块：编排、进度聚合、预览

pub mod preview;
pub mod progress;
pub mod runner;

pub use preview::PreviewResolver;
pub use runner::{InputError, JobOrchestrator, PreviewRejection};
