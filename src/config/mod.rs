//! 消息核心配置模块
//!
//! 该模块提供了完整的应用程序配置管理功能，包括：
//! - 配置文件加载和解析（单文件或目录合并）
//! - 环境特定配置覆盖
//! - 存储、网关、认证、目录服务等配置定义

use std::ffi::OsStr;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use toml::Value;
use tracing::warn;

mod manager;
pub use manager::ConfigManager;

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<MessagingAppConfig> = OnceLock::new();

/// 服务监听配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.address, self.port)
            .parse()
            .with_context(|| format!("invalid server address {}:{}", self.address, self.port))
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    pub level: String,
    /// 是否输出 JSON 格式
    pub json: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// 存储后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// PostgreSQL 连接 URL
    pub postgres_url: Option<String>,
    /// 最大连接数
    pub max_connections: u32,
    /// 启动时执行内置迁移
    pub run_migrations: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            postgres_url: None,
            max_connections: 16,
            run_migrations: true,
        }
    }
}

/// 消息领域配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// 单条消息最大字符数
    pub max_content_chars: usize,
    /// 历史消息单页上限
    pub history_page_limit: usize,
    /// 会话列表上限
    pub thread_list_limit: usize,
    /// 会话创建冲突后的重读次数
    pub resolve_retry_limit: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 4000,
            history_page_limit: 200,
            thread_list_limit: 100,
            resolve_retry_limit: 3,
        }
    }
}

/// 实时网关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// 输入状态自动失效时间（毫秒）
    pub typing_quiet_period_ms: u64,
    /// 每个连接的发送缓冲区大小
    pub outbound_buffer: usize,
    /// 连接建立后必须完成认证的时间（秒）
    pub auth_timeout_secs: u64,
    /// 无任何入站帧时的空闲超时（秒）
    pub idle_timeout_secs: u64,
    /// 服务端心跳间隔（秒）
    pub heartbeat_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            typing_quiet_period_ms: 5_000,
            outbound_buffer: 64,
            auth_timeout_secs: 10,
            idle_timeout_secs: 90,
            heartbeat_interval_secs: 30,
        }
    }
}

impl GatewayConfig {
    pub fn typing_quiet_period(&self) -> Duration {
        Duration::from_millis(self.typing_quiet_period_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// 认证配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// JWT HS256 密钥
    pub jwt_secret: String,
    /// 令牌发行方（可选校验）
    pub jwt_issuer: Option<String>,
    /// 过期时间容差（秒）
    pub leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "insecure-secret".to_string(),
            jwt_issuer: None,
            leeway_secs: 30,
        }
    }
}

/// 目录服务模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryMode {
    #[default]
    Static,
    Http,
}

/// 静态用户条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUserConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default = "default_true")]
    pub can_buy: bool,
    #[serde(default = "default_true")]
    pub can_sell: bool,
}

/// 静态房源条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryPropertyConfig {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
}

fn default_true() -> bool {
    true
}

/// 用户目录与房源目录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub mode: DirectoryMode,
    /// HTTP 模式下的目录服务地址
    pub base_url: Option<String>,
    pub request_timeout_ms: u64,
    pub users: Vec<DirectoryUserConfig>,
    pub properties: Vec<DirectoryPropertyConfig>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            mode: DirectoryMode::Static,
            base_url: None,
            request_timeout_ms: 2_000,
            users: Vec::new(),
            properties: Vec::new(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MessagingAppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub messaging: MessagingConfig,
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub directory: DirectoryConfig,
}

impl MessagingAppConfig {
    /// 校验配置的一致性
    pub fn validate(&self) -> Result<()> {
        if self.storage.backend == StorageBackend::Postgres && self.storage.postgres_url.is_none() {
            return Err(anyhow!("storage.backend = \"postgres\" requires storage.postgres_url"));
        }
        if self.directory.mode == DirectoryMode::Http && self.directory.base_url.is_none() {
            return Err(anyhow!("directory.mode = \"http\" requires directory.base_url"));
        }
        if self.messaging.max_content_chars == 0 {
            return Err(anyhow!("messaging.max_content_chars must be positive"));
        }
        if self.gateway.outbound_buffer == 0 {
            return Err(anyhow!("gateway.outbound_buffer must be positive"));
        }
        // 零时长会让心跳 interval panic，或在建立连接后立即超时
        for (name, value) in [
            ("gateway.typing_quiet_period_ms", self.gateway.typing_quiet_period_ms),
            ("gateway.auth_timeout_secs", self.gateway.auth_timeout_secs),
            ("gateway.idle_timeout_secs", self.gateway.idle_timeout_secs),
            ("gateway.heartbeat_interval_secs", self.gateway.heartbeat_interval_secs),
        ] {
            if value == 0 {
                return Err(anyhow!("{name} must be positive"));
            }
        }
        if self.auth.jwt_secret == AuthConfig::default().jwt_secret {
            warn!("auth.jwt_secret is the built-in default, do not use it in production");
        }
        Ok(())
    }

    /// 确保配置有默认值
    fn ensure_defaults(&mut self) {
        if self.server.address.is_empty() {
            self.server.address = "0.0.0.0".to_string();
        }
        if self.server.port == 0 {
            self.server.port = 8080;
        }
        if self.messaging.history_page_limit == 0 {
            self.messaging.history_page_limit = MessagingConfig::default().history_page_limit;
        }
        if self.messaging.thread_list_limit == 0 {
            self.messaging.thread_list_limit = MessagingConfig::default().thread_list_limit;
        }
    }
}

/// 加载配置
///
/// 优先使用 `ESTATE_CONFIG` 指定的路径，其次是参数路径，最后是默认候选
pub fn load_config(path: Option<&str>) -> &'static MessagingAppConfig {
    APP_CONFIG.get_or_init(|| load_config_uncached(path))
}

/// 获取应用配置
pub fn app_config() -> Option<&'static MessagingAppConfig> {
    APP_CONFIG.get()
}

/// 不经过全局缓存加载配置（测试和工具使用）
pub fn load_config_uncached(path: Option<&str>) -> MessagingAppConfig {
    let candidates: Vec<PathBuf> = match ConfigManager::config_path_override() {
        Some(p) => vec![PathBuf::from(p)],
        None => match path {
            Some(p) => vec![PathBuf::from(p)],
            None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
        },
    };

    let mut cfg = load_with_fallback(&candidates);
    // 加载环境特定配置
    if let Err(e) = ConfigManager::load_environment_config(&mut cfg) {
        warn!("failed to load environment config: {}", e);
    }
    ConfigManager::apply_env_overrides(&mut cfg);
    cfg
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> MessagingAppConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(mut cfg) => {
                cfg.ensure_defaults();
                return cfg;
            }
            Err(err) => {
                warn!("failed to load config from {}: {err}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    MessagingAppConfig::default()
}

/// 从源加载配置
pub fn load_config_from_source(path: &Path) -> Result<MessagingAppConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    let mut cfg = if metadata.is_dir() {
        load_config_from_directory(path)?
    } else {
        load_config_from_file(path)?
    };
    cfg.ensure_defaults();
    Ok(cfg)
}

/// 从文件加载配置
fn load_config_from_file(path: &Path) -> Result<MessagingAppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    let cfg: MessagingAppConfig = toml::from_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))?;
    Ok(cfg)
}

/// 从目录加载配置（base.toml + overrides/*.toml）
fn load_config_from_directory(path: &Path) -> Result<MessagingAppConfig> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("overrides"))?;

    let cfg: MessagingAppConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;

    Ok(cfg)
}

/// 合并目录中的配置
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

/// 加载 TOML 值
fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))?;
    Ok(value)
}

/// 合并值
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}
