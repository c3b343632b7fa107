//! 配置管理器 - 负责处理不同环境下的配置选择和覆盖
//!
//! 该模块提供了配置管理功能，包括：
//! - 根据环境变量选择配置路径
//! - 加载环境特定配置
//! - 环境变量覆盖单项配置

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;
use tracing::warn;

use super::{MessagingAppConfig, StorageBackend};

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 ESTATE_ENV 获取当前环境名称，
    /// 如果未设置则默认为 "development"
    pub fn get_environment() -> String {
        env::var("ESTATE_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// ESTATE_CONFIG 指定的配置路径
    pub fn config_path_override() -> Option<String> {
        env::var("ESTATE_CONFIG").ok().filter(|p| !p.is_empty())
    }

    /// 根据环境加载特定配置
    ///
    /// 加载 config/environments/{environment}.toml 文件中的配置，
    /// 并将其合并到基础配置中
    pub fn load_environment_config(base_config: &mut MessagingAppConfig) -> Result<()> {
        let env = Self::get_environment();
        let env_config_path = format!("config/environments/{}.toml", env);

        if !Path::new(&env_config_path).exists() {
            return Ok(());
        }

        let env_config_content = fs::read_to_string(&env_config_path)
            .with_context(|| format!("无法读取环境配置文件: {}", env_config_path))?;
        let env_config: Value = toml::from_str(&env_config_content)
            .with_context(|| format!("无效的环境配置格式: {}", env_config_path))?;

        // 以当前配置为底，覆盖环境配置
        let mut merged =
            Value::try_from(&*base_config).context("无法序列化当前配置")?;
        super::merge_value(&mut merged, env_config);
        *base_config = merged
            .try_into()
            .with_context(|| format!("无效的环境配置内容: {}", env_config_path))?;

        Ok(())
    }

    /// 使用环境变量覆盖单项配置
    pub fn apply_env_overrides(config: &mut MessagingAppConfig) {
        if let Ok(port) = env::var("ESTATE_SERVER_PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.server.port = port,
                Err(err) => warn!(%port, ?err, "ignoring invalid ESTATE_SERVER_PORT"),
            }
        }

        if let Ok(url) = env::var("ESTATE_POSTGRES_URL") {
            if !url.is_empty() {
                config.storage.postgres_url = Some(url);
                config.storage.backend = StorageBackend::Postgres;
            }
        }

        if let Ok(secret) = env::var("ESTATE_JWT_SECRET") {
            if !secret.is_empty() {
                config.auth.jwt_secret = secret;
            }
        }
    }
}
