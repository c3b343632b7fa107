//! Estate Messaging Core
//!
//! 买卖双方实时消息核心：会话解析、消息持久化、未读计数、在线连接扇出

pub mod application;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interface;
pub mod metrics;
pub mod service;
pub mod tracing;
pub mod utils;

pub use config::{ConfigManager, MessagingAppConfig, app_config, load_config};
pub use error::{ErrorCode, MessagingError, Result};
pub use service::{ApplicationBootstrap, ApplicationContext};
