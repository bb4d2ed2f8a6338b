// 应用状态

use crate::config::AppConfig;
use crate::extractor::YtDlpExtractor;
use crate::job::JobOrchestrator;
use crate::session::SessionStore;
use std::sync::Arc;

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Arc<AppConfig>,
    /// 任务编排器
    pub orchestrator: Arc<JobOrchestrator>,
}

impl AppState {
    /// 创建新的应用状态
    pub async fn new() -> anyhow::Result<Self> {
        // 加载配置（首次运行写出默认配置文件）
        let config = AppConfig::load_or_default(&crate::config::config_path()).await;
        config.validate()?;

        let store = Arc::new(SessionStore::new(config.history.max_records));
        let extractor = Arc::new(YtDlpExtractor::from_config(&config.extractor));
        let orchestrator = Arc::new(JobOrchestrator::new(
            store,
            extractor,
            config.output.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            orchestrator,
        })
    }
}
