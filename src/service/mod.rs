use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

pub mod wire;

pub use wire::ApplicationContext;

use crate::config::MessagingAppConfig;
use crate::interface::http::router;

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    pub async fn run(app_config: &MessagingAppConfig) -> Result<()> {
        info!("Parsing server address...");
        let address: SocketAddr = app_config
            .server
            .socket_addr()
            .context("invalid messaging server address")?;

        // 使用 Wire 风格的依赖注入构建应用上下文
        let context = Arc::new(wire::initialize(app_config).await?);
        info!("ApplicationContext created successfully");

        Self::run_with_context(context, address).await
    }

    /// 运行服务（带应用上下文）
    pub async fn run_with_context(
        context: Arc<ApplicationContext>,
        address: SocketAddr,
    ) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind {address}"))?;
        info!(address = %address, "✅ messaging service is listening");

        axum::serve(listener, router(context))
            .with_graceful_shutdown(async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %err, "failed to listen for shutdown signal");
                }
                info!("shutdown signal received (Ctrl+C)");
            })
            .await
            .context("messaging server error")
    }
}
