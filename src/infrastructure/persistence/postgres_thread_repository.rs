//! # PostgreSQL Thread Repository
//!
//! 会话唯一性由 (buyer_id, seller_id, COALESCE(property_id, '')) 唯一索引保证

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use crate::domain::model::{InsertOutcome, ParticipantRole, Thread, ThreadKey};
use crate::domain::repository::ThreadRepository;

pub(super) const THREAD_COLUMNS: &str = "id, buyer_id, seller_id, property_id, \
    buyer_unread_count, seller_unread_count, last_message_seq, last_message_id, \
    last_message_at, created_at";

pub(super) fn thread_from_row(row: &PgRow) -> Result<Thread> {
    let buyer_unread: i32 = row.try_get("buyer_unread_count")?;
    let seller_unread: i32 = row.try_get("seller_unread_count")?;
    Ok(Thread {
        id: row.try_get("id")?,
        buyer_id: row.try_get("buyer_id")?,
        seller_id: row.try_get("seller_id")?,
        property_id: row.try_get("property_id")?,
        buyer_unread_count: buyer_unread.max(0) as u32,
        seller_unread_count: seller_unread.max(0) as u32,
        last_message_seq: row.try_get("last_message_seq")?,
        last_message_id: row.try_get("last_message_id")?,
        last_message_at: row.try_get("last_message_at")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(super) fn unread_column(role: ParticipantRole) -> &'static str {
    match role {
        ParticipantRole::Buyer => "buyer_unread_count",
        ParticipantRole::Seller => "seller_unread_count",
    }
}

pub struct PostgresThreadRepository {
    pool: Arc<PgPool>,
}

impl PostgresThreadRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThreadRepository for PostgresThreadRepository {
    #[instrument(skip(self, thread), fields(thread_id = %thread.id))]
    async fn insert_if_absent(&self, thread: Thread) -> Result<InsertOutcome> {
        let sql = format!(
            "INSERT INTO chat_threads (id, buyer_id, seller_id, property_id, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT DO NOTHING \
             RETURNING {THREAD_COLUMNS}"
        );
        let inserted = sqlx::query(&sql)
            .bind(&thread.id)
            .bind(&thread.buyer_id)
            .bind(&thread.seller_id)
            .bind(&thread.property_id)
            .bind(thread.created_at)
            .fetch_optional(&*self.pool)
            .await
            .context("Failed to insert thread")?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Created(thread_from_row(&row)?));
        }

        debug!("thread key already taken, re-reading winner");
        Ok(match self.find_by_key(&thread.key()).await? {
            Some(existing) => InsertOutcome::Existing(existing),
            None => InsertOutcome::Conflict,
        })
    }

    #[instrument(skip(self))]
    async fn find_by_key(&self, key: &ThreadKey) -> Result<Option<Thread>> {
        let sql = format!(
            "SELECT {THREAD_COLUMNS} FROM chat_threads \
             WHERE buyer_id = $1 AND seller_id = $2 \
               AND COALESCE(property_id, '') = COALESCE($3, '')"
        );
        let row = sqlx::query(&sql)
            .bind(&key.buyer_id)
            .bind(&key.seller_id)
            .bind(&key.property_id)
            .fetch_optional(&*self.pool)
            .await
            .context("Failed to find thread by key")?;
        row.as_ref().map(thread_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        let sql = format!("SELECT {THREAD_COLUMNS} FROM chat_threads WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(thread_id)
            .fetch_optional(&*self.pool)
            .await
            .with_context(|| format!("Failed to load thread {thread_id}"))?;
        row.as_ref().map(thread_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Thread>> {
        let sql = format!(
            "SELECT {THREAD_COLUMNS} FROM chat_threads \
             WHERE buyer_id = $1 OR seller_id = $1 \
             ORDER BY last_message_at DESC NULLS LAST, created_at DESC \
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await
            .context("Failed to list threads for user")?;
        rows.iter().map(thread_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn reset_unread(
        &self,
        thread_id: &str,
        role: ParticipantRole,
    ) -> Result<Option<(Thread, u32)>> {
        let column = unread_column(role);
        let returning = THREAD_COLUMNS
            .split(", ")
            .map(|c| format!("t.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        // 行锁下读出旧值再清零
        let sql = format!(
            "WITH prev AS ( \
                 SELECT id, {column} AS previous FROM chat_threads WHERE id = $1 FOR UPDATE \
             ) \
             UPDATE chat_threads t SET {column} = 0 \
             FROM prev WHERE t.id = prev.id \
             RETURNING {returning}, prev.previous"
        );
        let row = sqlx::query(&sql)
            .bind(thread_id)
            .fetch_optional(&*self.pool)
            .await
            .with_context(|| format!("Failed to reset unread count of thread {thread_id}"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let previous: i32 = row.try_get("previous")?;
        Ok(Some((thread_from_row(&row)?, previous.max(0) as u32)))
    }
}
