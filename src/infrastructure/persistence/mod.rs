pub mod memory;
pub mod postgres_message_repository;
pub mod postgres_thread_repository;

pub use memory::MemoryStore;
pub use postgres_message_repository::PostgresMessageRepository;
pub use postgres_thread_repository::PostgresThreadRepository;

/// 执行内嵌的数据库迁移
pub async fn run_migrations(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    use anyhow::Context;
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run messaging migrations")?;
    tracing::info!("messaging migrations applied");
    Ok(())
}
