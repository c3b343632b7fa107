use anyhow::Result;
use estate_messaging::ApplicationBootstrap;
use estate_messaging::config::load_config;
use estate_messaging::tracing::init_tracing_from_config;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let app_config = load_config(Some("config"));

    // 初始化日志系统
    init_tracing_from_config(Some(&app_config.logging));

    // 创建应用上下文并启动服务器
    ApplicationBootstrap::run(app_config).await
}
