// yt-dlp 子进程提取器
//
// 网络抓取、转码、元数据解析全部发生在 yt-dlp 子进程内部，
// 这里只负责进程生命周期和按行解析 stdout

use crate::config::ExtractorConfig;
use crate::extractor::types::{
    ExtractorError, FetchOptions, ProgressDecision, ProgressEvent, ResolvedEntry, ResolvedMetadata,
};
use crate::extractor::MediaExtractor;
use crate::session::JobKind;
use regex::Regex;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap())
}

fn progress_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[download\]\s+([0-9]+(?:\.[0-9]+)?%)").unwrap())
}

fn already_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[download\]\s+(.+?) has already been downloaded").unwrap())
}

/// 去除 ANSI 颜色码
pub fn strip_ansi(text: &str) -> String {
    ansi_re().replace_all(text, "").to_string()
}

/// 从输出路径提取条目标题（去掉目录和扩展名）
fn label_from_path(path: &str) -> String {
    Path::new(path.trim())
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// stdout 单行解析结果
#[derive(Debug, Clone, PartialEq)]
enum OutputLine {
    /// 进度行：[download]  47.5% of ...
    Progress { percent: f64, raw: String },
    /// 目标文件行：[download] Destination: /path/to/file.mp4
    Destination { label: String },
    /// 已存在：[download] /path/to/file.mp4 has already been downloaded
    AlreadyDownloaded { label: String },
    /// 其他（忽略）
    Other,
}

/// 解析一行 yt-dlp 输出（先去除 ANSI 颜色码）
fn parse_output_line(line: &str) -> OutputLine {
    let line = strip_ansi(line);
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("[download] Destination: ") {
        return OutputLine::Destination {
            label: label_from_path(rest),
        };
    }

    if let Some(caps) = progress_re().captures(line) {
        let raw = caps[1].trim().to_string();
        if let Ok(percent) = raw.trim_end_matches('%').parse::<f64>() {
            return OutputLine::Progress { percent, raw };
        }
    }

    if let Some(caps) = already_re().captures(line) {
        return OutputLine::AlreadyDownloaded {
            label: label_from_path(&caps[1]),
        };
    }

    OutputLine::Other
}

/// 把逐行输出换算成进度事件
///
/// 跨行状态：当前条目标题 + 完成去重标志。同一个文件结束时会打出
/// 多条 100% 行（最后一次进度更新加一条汇总行），每个条目只发一次
/// ItemFinished，去重标志在下一条 Destination 行时复位
struct LineEventMapper {
    current_label: String,
    finished_emitted: bool,
}

impl LineEventMapper {
    fn new() -> Self {
        Self {
            current_label: String::new(),
            finished_emitted: false,
        }
    }

    fn map(&mut self, line: &str) -> Vec<ProgressEvent> {
        match parse_output_line(line) {
            OutputLine::Destination { label } => {
                self.current_label = label;
                self.finished_emitted = false;
                Vec::new()
            }
            OutputLine::Progress { percent, raw } => {
                let mut events = vec![ProgressEvent::Downloading {
                    percent,
                    raw,
                    label: self.current_label.clone(),
                }];
                // 单个条目传输到 100% 即视为该条目完成
                if percent >= 100.0 && !self.finished_emitted {
                    self.finished_emitted = true;
                    events.push(ProgressEvent::ItemFinished {
                        label: self.current_label.clone(),
                    });
                }
                events
            }
            OutputLine::AlreadyDownloaded { label } => {
                self.current_label = label.clone();
                self.finished_emitted = true;
                vec![ProgressEvent::ItemFinished { label }]
            }
            OutputLine::Other => Vec::new(),
        }
    }
}

/// 解析 --dump-single-json 的输出
///
/// 合集的 entries 数组逐条转换；解析失败的条目（null 或缺少标题）
/// 跳过并计数，不计入 total。没有 entries 时视为单条目
fn parse_dump_json(value: &serde_json::Value) -> ResolvedMetadata {
    let title = value
        .get("title")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string();

    match value.get("entries").and_then(|e| e.as_array()) {
        Some(raw_entries) => {
            let mut entries = Vec::new();
            let mut skipped = 0usize;

            for raw in raw_entries {
                let label = raw
                    .get("title")
                    .and_then(|t| t.as_str())
                    .or_else(|| raw.get("id").and_then(|i| i.as_str()));

                match label {
                    Some(label) if !label.is_empty() => entries.push(ResolvedEntry {
                        label: label.to_string(),
                        duration: raw.get("duration").and_then(|d| d.as_f64()),
                    }),
                    _ => skipped += 1,
                }
            }

            let total = entries.len();
            ResolvedMetadata {
                title,
                total,
                entries,
                skipped,
            }
        }
        None => {
            let duration = value.get("duration").and_then(|d| d.as_f64());
            let entries = vec![ResolvedEntry {
                label: title.clone(),
                duration,
            }];
            ResolvedMetadata {
                title,
                total: 1,
                entries,
                skipped: 0,
            }
        }
    }
}

/// 按任务类型构造格式参数
fn format_args(options: &FetchOptions) -> Vec<String> {
    match options.kind {
        JobKind::Audio => vec![
            "-f".to_string(),
            "bestaudio".to_string(),
            "-x".to_string(),
            "--audio-format".to_string(),
            "mp3".to_string(),
            "--audio-quality".to_string(),
            options.quality.clone(),
        ],
        JobKind::Video => vec![
            "-f".to_string(),
            format!(
                "bestvideo[height<={q}]+bestaudio/best[height<={q}]",
                q = options.quality
            ),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
        ],
    }
}

/// 子进程守卫：正常结束前 drop 说明 worker 被异常终止，杀掉子进程防止泄漏
struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// 正常路径：等待子进程退出
    fn wait(mut self) -> Result<std::process::ExitStatus, ExtractorError> {
        match self.child.take() {
            Some(mut child) => child.wait().map_err(|e| ExtractorError::Transfer(e.to_string())),
            None => Err(ExtractorError::Transfer("提取器进程已终止".to_string())),
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// yt-dlp 提取器
pub struct YtDlpExtractor {
    binary: String,
    extra_args: Vec<String>,
    resolve_timeout_secs: u64,
}

impl YtDlpExtractor {
    pub fn from_config(extractor: &ExtractorConfig) -> Self {
        Self {
            binary: extractor.binary.clone(),
            extra_args: extractor.extra_args.clone(),
            resolve_timeout_secs: extractor.resolve_timeout_secs,
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.resolve_timeout_secs > 0 {
            args.push("--socket-timeout".to_string());
            args.push(self.resolve_timeout_secs.to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl MediaExtractor for YtDlpExtractor {
    fn resolve_metadata(&self, source_ref: &str) -> Result<ResolvedMetadata, ExtractorError> {
        debug!("解析元数据: {}", source_ref);

        let output = Command::new(&self.binary)
            .arg("--flat-playlist")
            .arg("--dump-single-json")
            .arg("--no-warnings")
            .args(self.base_args())
            .arg("--")
            .arg(source_ref)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ExtractorError::Spawn(format!("{}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractorError::Unresolvable(
                stderr.lines().last().unwrap_or("未知错误").to_string(),
            ));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractorError::Unresolvable(format!("元数据解析失败: {}", e)))?;

        let metadata = parse_dump_json(&value);
        info!(
            "元数据解析完成: title={}, total={}, skipped={}",
            metadata.title, metadata.total, metadata.skipped
        );

        Ok(metadata)
    }

    fn fetch(
        &self,
        source_ref: &str,
        options: &FetchOptions,
        on_progress: &mut dyn FnMut(ProgressEvent) -> ProgressDecision,
    ) -> Result<(), ExtractorError> {
        info!("开始抓取: {} ({:?})", source_ref, options.kind);

        let child = Command::new(&self.binary)
            .arg("--newline")
            .arg("--no-colors")
            .arg("--no-warnings")
            .args(format_args(options))
            .arg("-o")
            .arg(&options.output_template)
            .args(self.base_args())
            .arg("--")
            .arg(source_ref)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExtractorError::Spawn(format!("{}: {}", self.binary, e)))?;

        let mut guard = ChildGuard::new(child);

        let stdout = guard
            .child
            .as_mut()
            .and_then(|c| c.stdout.take())
            .ok_or_else(|| ExtractorError::Spawn("无法读取提取器输出".to_string()))?;

        // stderr 单独排空，避免缓冲区写满时子进程阻塞
        let stderr = guard.child.as_mut().and_then(|c| c.stderr.take());
        let stderr_handle = std::thread::spawn(move || {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf);
            }
            buf
        });

        let mut mapper = LineEventMapper::new();

        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("读取提取器输出失败: {}", e);
                    break;
                }
            };

            for event in mapper.map(&line) {
                if on_progress(event) == ProgressDecision::Abort {
                    info!("回调请求中止，终止提取器进程");
                    guard.kill();
                    let _ = stderr_handle.join();
                    return Err(ExtractorError::Canceled);
                }
            }
        }

        let status = guard.wait()?;
        let stderr_text = stderr_handle.join().unwrap_or_default();

        if !status.success() {
            let message = stderr_text
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("提取器异常退出")
                .to_string();
            return Err(ExtractorError::Transfer(message));
        }

        info!("抓取完成: {}", source_ref);
        Ok(())
    }
}
