// 会话模块：会话数据模型 + 会话存储

pub mod store;
pub mod types;

pub use store::{SessionSlot, SessionStore};
pub use types::{
    JobKind, JobPhase, JobRecord, JobRequest, JobState, ManifestItem, PreviewCache, Session,
    SessionSnapshot,
};
