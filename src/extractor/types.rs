// 提取器接口类型

use crate::session::JobKind;
use thiserror::Error;

/// 提取器错误
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// 链接无法解析（提取器返回空结果或解析失败）
    #[error("无法解析链接: {0}")]
    Unresolvable(String),

    /// 传输被取消（回调返回 Abort 后由提取器抛出）
    ///
    /// 必须与普通传输错误区分：JobRunner 据此把任务标记为
    /// Canceled 而不是 Error
    #[error("传输已取消")]
    Canceled,

    /// 传输失败（取消以外的网络/服务故障）
    #[error("传输失败: {0}")]
    Transfer(String),

    /// 提取器进程启动失败
    #[error("提取器启动失败: {0}")]
    Spawn(String),
}

/// 低层进度事件
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// 当前条目传输中
    Downloading {
        /// 解析出的百分比 [0,100]
        percent: f64,
        /// 原始进度字符串（已去除 ANSI 颜色码并修剪空白）
        raw: String,
        /// 条目标题（可能为空，空不是错误）
        label: String,
    },
    /// 一个条目完成
    ItemFinished {
        /// 条目标题
        label: String,
    },
}

/// 进度回调的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressDecision {
    /// 继续传输
    Continue,
    /// 中止传输（取消请求已被观测到）
    Abort,
}

/// 抓取选项
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// 任务类型
    pub kind: JobKind,
    /// 质量参数（音频 kbps / 视频最大高度，原样透传）
    pub quality: String,
    /// 输出模板（目录 + %(title)s.%(ext)s 命名，由提取器展开）
    pub output_template: String,
}

/// 解析出的条目
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntry {
    /// 条目标题
    pub label: String,
    /// 时长（秒）
    pub duration: Option<f64>,
}

/// 元数据解析结果
#[derive(Debug, Clone)]
pub struct ResolvedMetadata {
    /// 标题（合集名或单条目标题）
    pub title: String,
    /// 条目总数（单条目为 1，合集为有效条目数）
    pub total: usize,
    /// 条目清单（单条目时只有一项）
    pub entries: Vec<ResolvedEntry>,
    /// 解析失败被跳过的条目数（不计入 total）
    pub skipped: usize,
}
