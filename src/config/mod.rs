// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 默认配置文件路径（可通过 MEDIA_FETCH_CONFIG 环境变量覆盖）
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 获取配置文件路径
pub fn config_path() -> String {
    std::env::var("MEDIA_FETCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 提取器配置
    #[serde(default)]
    pub extractor: ExtractorConfig,
    /// 输出目录配置
    #[serde(default)]
    pub output: OutputConfig,
    /// 历史记录配置
    #[serde(default)]
    pub history: HistoryConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS允许的源
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18990
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

/// 提取器配置
///
/// 外部提取器以子进程方式调用，网络抓取、转码、元数据解析全部
/// 发生在子进程内部，本服务只负责进程生命周期和输出解析
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// 提取器可执行文件路径
    #[serde(default = "default_extractor_binary")]
    pub binary: String,
    /// 附加命令行参数（追加到每次调用）
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// 元数据解析超时（秒，0 表示不限制，透传给提取器）
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,
}

fn default_extractor_binary() -> String {
    "yt-dlp".to_string()
}

fn default_resolve_timeout_secs() -> u64 {
    0
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            binary: default_extractor_binary(),
            extra_args: Vec::new(),
            resolve_timeout_secs: default_resolve_timeout_secs(),
        }
    }
}

/// 输出目录配置
///
/// 文件命名模板 %(title)s.%(ext)s 由提取器展开
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// 音频输出目录
    #[serde(default = "default_audio_dir")]
    pub audio_dir: String,
    /// 视频输出目录
    #[serde(default = "default_video_dir")]
    pub video_dir: String,
}

fn default_audio_dir() -> String {
    "~/Music/YT-Downloader".to_string()
}

fn default_video_dir() -> String {
    "~/Music".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            audio_dir: default_audio_dir(),
            video_dir: default_video_dir(),
        }
    }
}

/// 历史记录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// 每个会话保留的历史记录条数（超出后淘汰最旧的）
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

fn default_max_records() -> usize {
    50
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（MB，超过后滚动到带时间戳的新文件）
    #[serde(default = "default_log_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// 保留的日志文件数量（只保留最新的 N 个）
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size_mb() -> u64 {
    50
}

fn default_log_max_files() -> usize {
    10
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
            max_file_size_mb: default_log_max_file_size_mb(),
            max_files: default_log_max_files(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            extractor: ExtractorConfig::default(),
            output: OutputConfig::default(),
            history: HistoryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            anyhow::bail!("服务器监听地址不能为空");
        }

        if self.extractor.binary.trim().is_empty() {
            anyhow::bail!("提取器可执行文件路径不能为空");
        }

        if self.history.max_records == 0 {
            anyhow::bail!("历史记录条数必须大于0");
        }

        if self.log.max_files == 0 {
            anyhow::bail!("日志保留文件数必须大于0");
        }

        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate().context("配置文件验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败：配置验证未通过")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    ///
    /// 首次启动时写出默认配置文件，方便用户修改
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {}", e);
                let default_config = Self::default();

                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 18990);
        assert_eq!(config.extractor.binary, "yt-dlp");
        assert_eq!(config.output.audio_dir, "~/Music/YT-Downloader");
        assert_eq!(config.output.video_dir, "~/Music");
        assert_eq!(config.history.max_records, 50);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut config = AppConfig::default();
        config.server.port = 9000;
        config.extractor.extra_args = vec!["--proxy".to_string(), "socks5://127.0.0.1:1080".to_string()];
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.server.port, 9000);
        assert_eq!(loaded.extractor.extra_args.len(), 2);
        assert_eq!(loaded.history.max_records, config.history.max_records);
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.extractor.binary = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.history.max_records = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.host = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        // 配置文件只写了 server 段时，其余段用默认值补齐
        let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8080
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.extractor.binary, "yt-dlp");
        assert_eq!(config.log.max_file_size_mb, 50);
    }
}
