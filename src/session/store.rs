// 会话存储
//
// 所有会话状态的唯一持有者。每个会话一个槽位，槽位内包含：
// - 会话数据（读写锁保护，轮询读取的是完整快照，不会看到半更新状态）
// - 取消令牌（与会话同生共死，删除会话时一并清理）
// - 代数计数器（丢弃被取代 worker 的迟到写入）

use crate::session::types::{JobRecord, PreviewCache, Session, SessionSnapshot};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 会话槽位
pub struct SessionSlot {
    /// 会话数据
    session: RwLock<Session>,
    /// 当前任务的取消令牌（每次提交任务时换新，令牌是一次性的）
    cancel: Mutex<CancellationToken>,
    /// 任务代数
    ///
    /// 每次提交/重置时递增。worker 在派发时记下自己的代数，
    /// 之后的每次写入都带着它；代数落后的写入直接丢弃
    generation: AtomicU64,
}

impl SessionSlot {
    fn new(id: String) -> Self {
        Self {
            session: RwLock::new(Session::new(id)),
            cancel: Mutex::new(CancellationToken::new()),
            generation: AtomicU64::new(0),
        }
    }
}

/// 会话存储
pub struct SessionStore {
    slots: DashMap<String, Arc<SessionSlot>>,
    /// 每个会话的历史记录上限
    history_limit: usize,
}

impl SessionStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            slots: DashMap::new(),
            history_limit,
        }
    }

    /// 获取或创建会话槽位
    pub fn get_or_create(&self, id: &str) -> Arc<SessionSlot> {
        self.slots
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!("创建会话: {}", id);
                Arc::new(SessionSlot::new(id.to_string()))
            })
            .clone()
    }

    /// 获取会话槽位（不创建）
    pub fn get(&self, id: &str) -> Option<Arc<SessionSlot>> {
        self.slots.get(id).map(|e| e.clone())
    }

    /// 读取会话状态快照
    ///
    /// 未知会话返回默认的 Ready 快照，不隐式创建
    pub fn snapshot(&self, id: &str) -> SessionSnapshot {
        match self.get(id) {
            Some(slot) => slot.session.read().snapshot(),
            None => SessionSnapshot::default(),
        }
    }

    /// 开始新任务
    ///
    /// 重置会话的任务状态（history / known_items 保留），代数递增，
    /// 换上新的取消令牌。返回本次任务的代数和令牌。
    /// 被取代的旧 worker 继续运行，但它的代数已失效，写入会被丢弃。
    pub fn begin_job(&self, id: &str) -> (u64, CancellationToken) {
        let slot = self.get_or_create(id);
        let mut session = slot.session.write();

        let generation = slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
        session.reset_job();

        let token = CancellationToken::new();
        *slot.cancel.lock() = token.clone();

        (generation, token)
    }

    /// 读取与指定链接精确匹配的预览缓存
    pub fn matching_preview(&self, id: &str, source_ref: &str) -> Option<PreviewCache> {
        let slot = self.get(id)?;
        let session = slot.session.read();
        session
            .preview
            .as_ref()
            .filter(|p| p.source_ref == source_ref)
            .cloned()
    }

    /// 保存预览结果
    pub fn store_preview(&self, id: &str, cache: PreviewCache) {
        let slot = self.get_or_create(id);
        slot.session.write().preview = Some(cache);
    }

    /// 带代数检查的会话更新
    ///
    /// 整个闭包在会话写锁内执行，对轮询读取者原子可见。
    /// 代数不匹配时不执行闭包，返回 false。
    pub fn update<F>(&self, id: &str, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        let Some(slot) = self.get(id) else {
            return false;
        };

        let mut session = slot.session.write();
        if slot.generation.load(Ordering::SeqCst) != generation {
            debug!("丢弃过期 worker 的写入: session={}, gen={}", id, generation);
            return false;
        }

        f(&mut session);
        true
    }

    /// 追加历史记录（带代数检查，超出上限时淘汰最旧的）
    pub fn push_record(&self, id: &str, generation: u64, record: JobRecord) -> bool {
        let limit = self.history_limit;
        self.update(id, generation, |session| {
            session.history.push(record);
            while session.history.len() > limit {
                session.history.remove(0);
            }
        })
    }

    /// 重置会话的任务状态（显式接口）
    ///
    /// history / known_items 保留；代数递增使在途 worker 的写入失效
    pub fn reset(&self, id: &str) {
        let slot = self.get_or_create(id);
        let mut session = slot.session.write();

        slot.generation.fetch_add(1, Ordering::SeqCst);
        session.reset_job();
        *slot.cancel.lock() = CancellationToken::new();

        info!("会话已重置: {}", id);
    }

    /// 请求取消当前任务
    ///
    /// 无活跃任务时也可调用（预置标志位），下次提交任务时令牌换新
    pub fn request_cancel(&self, id: &str) {
        let slot = self.get_or_create(id);
        slot.cancel.lock().cancel();
        info!("收到取消请求: session={}", id);
    }

    /// 查询是否已请求取消
    pub fn is_cancel_requested(&self, id: &str) -> bool {
        match self.get(id) {
            Some(slot) => slot.cancel.lock().is_cancelled(),
            None => false,
        }
    }

    /// 删除会话
    ///
    /// 取消令牌随槽位一并销毁；在途 worker 收到取消信号后自行退出
    pub fn delete(&self, id: &str) {
        if let Some((_, slot)) = self.slots.remove(id) {
            slot.cancel.lock().cancel();
            info!("会话已删除: {}", id);
        }
    }

    /// 当前会话数量
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::{JobKind, JobPhase, ManifestItem};

    fn record(title: &str) -> JobRecord {
        JobRecord {
            finished_at: chrono::Utc::now().timestamp(),
            source_ref: "https://example.com/v".to_string(),
            kind: JobKind::Video,
            quality: "720".to_string(),
            title: title.to_string(),
            items_total: 1,
        }
    }

    #[test]
    fn test_snapshot_unknown_session_is_ready() {
        let store = SessionStore::new(10);
        let snapshot = store.snapshot("从未见过的会话");
        assert_eq!(snapshot.job.phase, JobPhase::Ready);
        assert!(snapshot.history.is_empty());
        // 读取不会隐式创建会话
        assert!(store.is_empty());
    }

    #[test]
    fn test_begin_job_preserves_history_and_known_items() {
        let store = SessionStore::new(10);
        let (gen, _token) = store.begin_job("s1");

        store.update("s1", gen, |s| {
            s.job.items_total = 3;
            s.job.items_completed = 2;
            s.job.overall_percent = 66.67;
            s.known_items.insert("视频A".to_string());
        });
        store.push_record("s1", gen, record("视频A"));

        let (gen2, _token) = store.begin_job("s1");
        assert_eq!(gen2, gen + 1);

        let slot = store.get("s1").unwrap();
        let session = slot.session.read();
        assert_eq!(session.job.phase, JobPhase::Ready);
        assert_eq!(session.job.items_total, 0);
        assert_eq!(session.job.items_completed, 0);
        assert_eq!(session.job.overall_percent, 0.0);
        assert_eq!(session.history.len(), 1);
        assert!(session.known_items.contains("视频A"));
    }

    #[test]
    fn test_stale_generation_write_is_dropped() {
        let store = SessionStore::new(10);
        let (gen1, _t1) = store.begin_job("s1");
        let (gen2, _t2) = store.begin_job("s1");

        // 新 worker 先写入
        assert!(store.update("s1", gen2, |s| s.job.title = "新任务".to_string()));

        // 被取代的旧 worker 迟到写入，必须被丢弃
        assert!(!store.update("s1", gen1, |s| s.job.title = "旧任务".to_string()));
        assert!(!store.push_record("s1", gen1, record("旧任务")));

        let snapshot = store.snapshot("s1");
        assert_eq!(snapshot.job.title, "新任务");
        assert!(snapshot.history.is_empty());
    }

    #[test]
    fn test_history_evicts_oldest() {
        let store = SessionStore::new(2);
        let (gen, _t) = store.begin_job("s1");

        store.push_record("s1", gen, record("一"));
        store.push_record("s1", gen, record("二"));
        store.push_record("s1", gen, record("三"));

        let snapshot = store.snapshot("s1");
        assert_eq!(snapshot.history.len(), 2);
        // 快照中最新的在前
        assert_eq!(snapshot.history[0].title, "三");
        assert_eq!(snapshot.history[1].title, "二");
    }

    #[test]
    fn test_cancel_prearm_is_cleared_at_job_start() {
        let store = SessionStore::new(10);

        // 无任务时预置取消标志
        store.request_cancel("s1");
        assert!(store.is_cancel_requested("s1"));

        // 提交任务换上新令牌，预置的标志不影响新任务
        let (_gen, token) = store.begin_job("s1");
        assert!(!token.is_cancelled());
        assert!(!store.is_cancel_requested("s1"));

        store.request_cancel("s1");
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_delete_drops_state_and_cancels_token() {
        let store = SessionStore::new(10);
        let (_gen, token) = store.begin_job("s1");

        store.delete("s1");
        assert!(store.get("s1").is_none());
        assert!(token.is_cancelled());
        assert_eq!(store.snapshot("s1").job.phase, JobPhase::Ready);
    }

    #[test]
    fn test_matching_preview_requires_exact_source_ref() {
        let store = SessionStore::new(10);
        store.store_preview(
            "s1",
            PreviewCache {
                source_ref: "https://example.com/list".to_string(),
                total: 3,
                title: "合集".to_string(),
                manifest: vec![ManifestItem {
                    label: "第一集".to_string(),
                    duration: None,
                    completed: false,
                }],
            },
        );

        assert!(store
            .matching_preview("s1", "https://example.com/list")
            .is_some());
        // 链接不完全一致则不命中
        assert!(store
            .matching_preview("s1", "https://example.com/list?x=1")
            .is_none());
        assert!(store.matching_preview("s2", "https://example.com/list").is_none());
    }
}
