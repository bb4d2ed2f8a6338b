//! 日志系统配置
//!
//! 支持控制台输出和文件持久化，按文件大小滚动，只保留最新的 N 个文件

use crate::config::LogConfig;
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件前缀
const LOG_FILE_PREFIX: &str = "media-fetch-rust";

/// 活跃日志文件名（滚动时重命名为带时间戳的文件）
fn active_file_name() -> String {
    format!("{}.log", LOG_FILE_PREFIX)
}

/// 滚动归档文件名：media-fetch-rust.YYYY-MM-DD-HHMMSS.log
fn rotated_file_name() -> String {
    let timestamp = Local::now().format("%Y-%m-%d-%H%M%S");
    format!("{}.{}.log", LOG_FILE_PREFIX, timestamp)
}

/// 按大小滚动的日志写入器（内部状态）
struct RollingWriterInner {
    /// 日志目录路径
    log_dir: PathBuf,
    /// 当前文件句柄
    current_file: Option<File>,
    /// 单个文件最大大小（字节）
    max_file_size: u64,
    /// 保留文件数
    max_files: usize,
    /// 当前文件已写入的字节数
    current_size: u64,
}

impl RollingWriterInner {
    fn new(log_dir: PathBuf, max_file_size: u64, max_files: usize) -> io::Result<Self> {
        let mut writer = Self {
            log_dir,
            current_file: None,
            max_file_size,
            max_files,
            current_size: 0,
        };
        writer.open_active_file()?;
        Ok(writer)
    }

    /// 打开（或续写）活跃日志文件
    fn open_active_file(&mut self) -> io::Result<()> {
        let path = self.log_dir.join(active_file_name());

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.current_file = Some(file);

        Ok(())
    }

    /// 滚动：活跃文件重命名为带时间戳的归档文件，然后开新文件
    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.current_file.take() {
            file.flush()?;
        }

        let active = self.log_dir.join(active_file_name());
        let rotated = self.log_dir.join(rotated_file_name());
        fs::rename(&active, &rotated)?;

        self.open_active_file()?;
        cleanup_rotated_logs(&self.log_dir, self.max_files);

        Ok(())
    }

    fn write_data(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_file_size {
            self.rotate()?;
        }

        if let Some(file) = &mut self.current_file {
            let written = file.write(buf)?;
            self.current_size += written as u64;
            Ok(written)
        } else {
            Err(io::Error::new(io::ErrorKind::Other, "日志文件未打开"))
        }
    }

    fn flush_file(&mut self) -> io::Result<()> {
        if let Some(file) = &mut self.current_file {
            file.flush()?;
        }
        Ok(())
    }
}

/// 按大小滚动的日志写入器（线程安全包装）
///
/// 实现了 Write trait，可以作为日志输出目标
pub struct RollingWriter {
    inner: Arc<Mutex<RollingWriterInner>>,
}

impl RollingWriter {
    pub fn new(log_dir: PathBuf, max_file_size: u64, max_files: usize) -> io::Result<Self> {
        let inner = RollingWriterInner::new(log_dir, max_file_size, max_files)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }
}

impl Write for RollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        inner.write_data(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.flush_file()
    }
}

impl Clone for RollingWriter {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 默认环境过滤器：本 crate 用配置级别，HTTP 内部组件降噪
fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "media_fetch_rust={},tower_http=warn,hyper=warn",
            level
        ))
    })
}

/// 初始化日志系统
///
/// # Arguments
/// * `config` - 日志配置
///
/// # Returns
/// * `LogGuard` - 日志守卫，需要保持存活直到程序结束
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter = build_env_filter(&config.level);

    // 控制台输出层
    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_ansi(true);

    if config.enabled {
        // 确保日志目录存在
        if let Err(e) = fs::create_dir_all(&config.log_dir) {
            eprintln!("创建日志目录失败: {:?}, 错误: {}", config.log_dir, e);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .init();

            return LogGuard { _file_guard: None };
        }

        let writer = match RollingWriter::new(
            config.log_dir.clone(),
            config.max_file_size_mb * 1024 * 1024,
            config.max_files,
        ) {
            Ok(writer) => writer,
            Err(e) => {
                eprintln!("创建日志写入器失败: {}, 回退到仅控制台输出", e);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .init();
                return LogGuard { _file_guard: None };
            }
        };

        // 非阻塞写入器
        let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);

        // 文件输出层（不带 ANSI 颜色）
        let file_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
            .with_ansi(false)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!(
            "日志系统初始化完成: 目录={:?}, 级别={}, 单文件最大={}MB, 保留={}个",
            config.log_dir, config.level, config.max_file_size_mb, config.max_files
        );

        cleanup_rotated_logs(&config.log_dir, config.max_files);

        LogGuard {
            _file_guard: Some(file_guard),
        }
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        info!("日志系统初始化完成（仅控制台输出）");

        LogGuard { _file_guard: None }
    }
}

/// 清理多余的归档日志文件，只保留最新的 max_files 个
///
/// 活跃文件（media-fetch-rust.log）不参与计数和清理
fn cleanup_rotated_logs(log_dir: &Path, max_files: usize) {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return;
        }
    };

    let active = active_file_name();
    let mut rotated: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|s| s.to_str())
                .map(|name| {
                    name != active
                        && name.starts_with(LOG_FILE_PREFIX)
                        && name.ends_with(".log")
                })
                .unwrap_or(false)
        })
        .collect();

    if rotated.len() <= max_files {
        return;
    }

    // 归档文件名内嵌时间戳，按名称排序即按时间排序
    rotated.sort();

    let excess = rotated.len() - max_files;
    let mut deleted_count = 0;
    for path in rotated.into_iter().take(excess) {
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e);
        } else {
            deleted_count += 1;
        }
    }

    if deleted_count > 0 {
        info!("已清理 {} 个过期日志文件", deleted_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.level, "info");
        assert_eq!(config.max_file_size_mb, 50);
        assert_eq!(config.max_files, 10);
    }

    #[test]
    fn test_rolling_writer_rotates_at_size_limit() {
        let dir = TempDir::new().unwrap();
        // 最大 64 字节，写两次 48 字节触发一次滚动
        let mut writer = RollingWriter::new(dir.path().to_path_buf(), 64, 5).unwrap();

        writer.write_all(&[b'a'; 48]).unwrap();
        writer.write_all(&[b'b'; 48]).unwrap();
        writer.flush().unwrap();

        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(files.len(), 2); // 活跃文件 + 1 个归档

        let active = dir.path().join(active_file_name());
        assert!(active.exists());
        assert_eq!(fs::read(active).unwrap(), vec![b'b'; 48]);
    }

    #[test]
    fn test_cleanup_keeps_newest_files() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            let name = format!("{}.2026-01-0{}-120000.log", LOG_FILE_PREFIX, i + 1);
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        // 活跃文件不应参与清理
        fs::write(dir.path().join(active_file_name()), b"x").unwrap();

        cleanup_rotated_logs(dir.path(), 2);

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();

        assert_eq!(names.len(), 3);
        assert!(names.contains(&active_file_name()));
        assert!(names.iter().any(|n| n.contains("2026-01-04")));
        assert!(names.iter().any(|n| n.contains("2026-01-05")));
    }
}
