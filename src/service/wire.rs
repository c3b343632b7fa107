//! Wire 风格的依赖注入模块
//!
//! 按依赖顺序构建全部组件，HTTP 与长连接共用同一个应用上下文

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::application::handlers::{MessagingCommandHandler, MessagingQueryHandler};
use crate::config::{DirectoryMode, GatewayConfig, MessagingAppConfig, StorageBackend};
use crate::domain::model::MessagingDomainConfig;
use crate::domain::repository::{
    EventPublisher, MessageRepository, PropertyCatalog, ThreadRepository, UserDirectory,
};
use crate::domain::service::{MessageDomainService, ThreadDomainService};
use crate::infrastructure::auth::TokenAuthenticator;
use crate::infrastructure::directory::{HttpDirectory, StaticDirectory};
use crate::infrastructure::persistence::{
    MemoryStore, PostgresMessageRepository, PostgresThreadRepository, run_migrations,
};
use crate::infrastructure::presence::{PresenceRegistry, TypingTracker};
use crate::metrics::{GatewayMetrics, MessagingMetrics};

/// 应用上下文 - 包含所有已初始化的服务
pub struct ApplicationContext {
    pub command_handler: Arc<MessagingCommandHandler>,
    pub query_handler: Arc<MessagingQueryHandler>,
    pub authenticator: Arc<TokenAuthenticator>,
    pub presence: Arc<PresenceRegistry>,
    pub gateway_config: GatewayConfig,
}

/// 外部依赖（存储与目录）
struct Adapters {
    thread_repo: Arc<dyn ThreadRepository>,
    message_repo: Arc<dyn MessageRepository>,
    user_directory: Arc<dyn UserDirectory>,
    property_catalog: Option<Arc<dyn PropertyCatalog>>,
}

/// 构建应用上下文
///
/// 类似 Go Wire 的 Initialize 函数，按照依赖顺序构建所有组件
pub async fn initialize(app_config: &MessagingAppConfig) -> Result<ApplicationContext> {
    app_config.validate()?;

    // 1. 存储
    let (thread_repo, message_repo): (Arc<dyn ThreadRepository>, Arc<dyn MessageRepository>) =
        match app_config.storage.backend {
            StorageBackend::Memory => {
                info!("using in-memory message store");
                let store = Arc::new(MemoryStore::new());
                let thread_repo: Arc<dyn ThreadRepository> = store.clone();
                let message_repo: Arc<dyn MessageRepository> = store;
                (thread_repo, message_repo)
            }
            StorageBackend::Postgres => {
                let url = app_config
                    .storage
                    .postgres_url
                    .as_deref()
                    .context("storage.postgres_url is required")?;
                let pool = Arc::new(
                    PgPoolOptions::new()
                        .max_connections(app_config.storage.max_connections)
                        .connect(url)
                        .await
                        .context("Failed to connect to PostgreSQL")?,
                );
                if app_config.storage.run_migrations {
                    run_migrations(&pool).await?;
                }
                info!("using PostgreSQL message store");
                let thread_repo: Arc<dyn ThreadRepository> =
                    Arc::new(PostgresThreadRepository::new(pool.clone()));
                let message_repo: Arc<dyn MessageRepository> =
                    Arc::new(PostgresMessageRepository::new(pool));
                (thread_repo, message_repo)
            }
        };

    // 2. 用户目录与房源目录
    let directory = &app_config.directory;
    let (user_directory, property_catalog): (
        Arc<dyn UserDirectory>,
        Option<Arc<dyn PropertyCatalog>>,
    ) = match directory.mode {
        DirectoryMode::Static => {
            let static_directory = Arc::new(StaticDirectory::from_config(directory));
            let catalog: Option<Arc<dyn PropertyCatalog>> = static_directory
                .has_properties()
                .then(|| static_directory.clone() as Arc<dyn PropertyCatalog>);
            (static_directory as Arc<dyn UserDirectory>, catalog)
        }
        DirectoryMode::Http => {
            let base_url = directory
                .base_url
                .as_deref()
                .context("directory.base_url is required")?;
            let http = Arc::new(HttpDirectory::new(
                base_url,
                Duration::from_millis(directory.request_timeout_ms),
            )?);
            let catalog: Arc<dyn PropertyCatalog> = http.clone();
            (http as Arc<dyn UserDirectory>, Some(catalog))
        }
    };

    Ok(assemble(
        app_config,
        Adapters {
            thread_repo,
            message_repo,
            user_directory,
            property_catalog,
        },
    ))
}

/// 使用内存存储与静态目录构建上下文（测试与本地开发）
pub fn initialize_in_memory(app_config: &MessagingAppConfig) -> ApplicationContext {
    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(StaticDirectory::from_config(&app_config.directory));
    let property_catalog: Option<Arc<dyn PropertyCatalog>> = directory
        .has_properties()
        .then(|| directory.clone() as Arc<dyn PropertyCatalog>);
    assemble(
        app_config,
        Adapters {
            thread_repo: store.clone(),
            message_repo: store,
            user_directory: directory,
            property_catalog,
        },
    )
}

fn assemble(app_config: &MessagingAppConfig, adapters: Adapters) -> ApplicationContext {
    let domain_config = MessagingDomainConfig::from(&app_config.messaging);
    let messaging_metrics = Arc::new(MessagingMetrics::new());
    let gateway_metrics = Arc::new(GatewayMetrics::new());

    // 在线表由进程显式持有，传给网关和处理器
    let presence = Arc::new(PresenceRegistry::new(gateway_metrics.clone()));
    let publisher: Arc<dyn EventPublisher> = presence.clone();
    let typing = Arc::new(TypingTracker::new(
        publisher.clone(),
        app_config.gateway.typing_quiet_period(),
        gateway_metrics,
    ));

    let thread_service = Arc::new(ThreadDomainService::new(
        adapters.thread_repo.clone(),
        adapters.user_directory.clone(),
        adapters.property_catalog.clone(),
        domain_config.clone(),
    ));
    let message_service = Arc::new(MessageDomainService::new(
        adapters.thread_repo,
        adapters.message_repo,
        domain_config,
    ));

    let command_handler = Arc::new(MessagingCommandHandler::new(
        thread_service,
        message_service.clone(),
        publisher,
        typing,
        messaging_metrics,
    ));
    let query_handler = Arc::new(MessagingQueryHandler::new(
        message_service,
        Some(adapters.user_directory),
        adapters.property_catalog,
    ));

    ApplicationContext {
        command_handler,
        query_handler,
        authenticator: Arc::new(TokenAuthenticator::new(&app_config.auth)),
        presence,
        gateway_config: app_config.gateway.clone(),
    }
}
