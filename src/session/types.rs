// 会话与任务数据模型

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 任务阶段（状态机）
///
/// 初始为 Ready，终止于 Finished / Canceled / Error
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// 就绪（无任务）
    Ready,
    /// 处理中（解析元数据）
    Processing,
    /// 启动中（清单已就绪，等待首个条目开始传输）
    Starting,
    /// 下载中
    Downloading,
    /// 已完成
    Finished,
    /// 已取消
    Canceled,
    /// 出错
    Error,
}

impl JobPhase {
    /// 获取阶段的中文描述
    pub fn description(&self) -> &'static str {
        match self {
            JobPhase::Ready => "就绪",
            JobPhase::Processing => "处理中",
            JobPhase::Starting => "启动中",
            JobPhase::Downloading => "下载中",
            JobPhase::Finished => "已完成",
            JobPhase::Canceled => "已取消",
            JobPhase::Error => "出错",
        }
    }

    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Finished | JobPhase::Canceled | JobPhase::Error
        )
    }
}

/// 任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// 仅音频（mp3 后处理）
    Audio,
    /// 视频（默认）
    #[default]
    Video,
}

/// 提交任务请求
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// 下载链接（单条目或合集）
    pub source_ref: String,
    /// 任务类型
    pub kind: JobKind,
    /// 质量参数（音频为 kbps，视频为最大高度，原样透传给提取器）
    pub quality: String,
}

/// 清单条目（按发现顺序排列）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestItem {
    /// 条目标题
    pub label: String,
    /// 时长（秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// 是否已完成
    pub completed: bool,
}

/// 历史记录条目（任务成功完成时写入一次，之后不可变）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// 完成时间 (Unix timestamp)
    pub finished_at: i64,
    /// 下载链接
    pub source_ref: String,
    /// 任务类型
    pub kind: JobKind,
    /// 质量参数
    pub quality: String,
    /// 解析出的标题
    pub title: String,
    /// 条目总数
    pub items_total: usize,
}

/// 任务实时状态
///
/// 客户端轮询看到的就是此结构的快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    /// 当前阶段
    pub phase: JobPhase,
    /// 条目总数（单条目为 1，合集为 N；发现后只增不减）
    pub items_total: usize,
    /// 已完成条目数（单调不减）
    pub items_completed: usize,
    /// 当前传输条目的标题（完成后清空）
    pub current_item_label: String,
    /// 当前条目的原始进度字符串（已去除 ANSI 颜色码）
    pub current_item_raw_progress: String,
    /// 总体完成百分比 [0,100]，单任务内单调不减
    pub overall_percent: f64,
    /// 任务标题
    pub title: String,
    /// 条目清单
    pub manifest: Vec<ManifestItem>,
    /// 错误信息（仅 Error 阶段存在）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// 更新时间 (Unix timestamp)
    pub updated_at: i64,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            phase: JobPhase::Ready,
            items_total: 0,
            items_completed: 0,
            current_item_label: String::new(),
            current_item_raw_progress: String::new(),
            overall_percent: 0.0,
            title: String::new(),
            manifest: Vec::new(),
            error_message: None,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

impl JobState {
    /// 更新时间戳
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }

    /// 标记为处理中
    pub fn mark_processing(&mut self) {
        self.phase = JobPhase::Processing;
        self.touch();
    }

    /// 标记为启动中（清单已就绪）
    pub fn mark_starting(&mut self, title: String, total: usize, manifest: Vec<ManifestItem>) {
        self.phase = JobPhase::Starting;
        self.title = title;
        self.items_total = total;
        self.manifest = manifest;
        self.touch();
    }

    /// 标记为已完成
    pub fn mark_finished(&mut self) {
        self.phase = JobPhase::Finished;
        self.overall_percent = 100.0;
        self.current_item_label.clear();
        self.touch();
    }

    /// 标记为已取消（不携带错误信息）
    pub fn mark_canceled(&mut self) {
        self.phase = JobPhase::Canceled;
        self.error_message = None;
        self.current_item_label.clear();
        self.touch();
    }

    /// 标记为出错
    pub fn mark_error(&mut self, message: String) {
        self.phase = JobPhase::Error;
        self.error_message = Some(message);
        self.touch();
    }
}

/// 预览缓存
///
/// 提交相同链接时跳过重复解析（快速路径），链接必须精确相等才命中
#[derive(Debug, Clone)]
pub struct PreviewCache {
    /// 预览时的下载链接
    pub source_ref: String,
    /// 条目总数
    pub total: usize,
    /// 标题
    pub title: String,
    /// 条目清单
    pub manifest: Vec<ManifestItem>,
}

/// 会话：一个用户隔离的任务 + 历史状态
#[derive(Debug, Clone)]
pub struct Session {
    /// 会话 ID
    pub id: String,
    /// 当前任务状态（最多一个活跃任务）
    pub job: JobState,
    /// 已完成任务的历史记录（最旧的先淘汰）
    pub history: Vec<JobRecord>,
    /// 已完成条目标题集合（跨合集去重）
    pub known_items: HashSet<String>,
    /// 最近一次预览的结果
    pub preview: Option<PreviewCache>,
}

impl Session {
    pub fn new(id: String) -> Self {
        Self {
            id,
            job: JobState::default(),
            history: Vec::new(),
            known_items: HashSet::new(),
            preview: None,
        }
    }

    /// 重置会话的任务状态
    ///
    /// history 和 known_items 保留（产品决策），其余任务字段全部清零
    pub fn reset_job(&mut self) {
        self.job = JobState::default();
        self.preview = None;
    }

    /// 生成轮询快照
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut history = self.history.clone();
        history.reverse(); // 最新的在前
        SessionSnapshot {
            job: self.job.clone(),
            history,
        }
    }
}

/// 会话状态快照（轮询接口的响应体）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// 当前任务状态
    pub job: JobState,
    /// 历史记录（最新的在前）
    pub history: Vec<JobRecord>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            job: JobState::default(),
            history: Vec::new(),
        }
    }
}
