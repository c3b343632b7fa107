//! # PostgreSQL Message Repository
//!
//! 追加消息在单个事务中完成：锁定会话行、分配序号、写入消息、更新会话

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use super::postgres_thread_repository::{THREAD_COLUMNS, thread_from_row, unread_column};
use crate::domain::model::{AppendOutcome, Message, NewMessage};
use crate::domain::repository::MessageRepository;
use crate::utils::{next_message_id_after, truncate_to_millis};

const MESSAGE_COLUMNS: &str = "id, thread_id, seq, sender_id, content, client_msg_id, created_at";

fn message_from_row(row: &PgRow) -> Result<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        thread_id: row.try_get("thread_id")?,
        seq: row.try_get("seq")?,
        sender_id: row.try_get("sender_id")?,
        content: row.try_get("content")?,
        client_msg_id: row.try_get("client_msg_id")?,
        created_at: row.try_get("created_at")?,
    })
}

pub struct PostgresMessageRepository {
    pool: Arc<PgPool>,
}

impl PostgresMessageRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PostgresMessageRepository {
    #[instrument(skip(self, new_message), fields(thread_id = %new_message.thread_id, sender_id = %new_message.sender_id))]
    async fn append(&self, new_message: NewMessage) -> Result<Option<AppendOutcome>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin append transaction")?;

        let lock_sql = format!("SELECT {THREAD_COLUMNS} FROM chat_threads WHERE id = $1 FOR UPDATE");
        let Some(row) = sqlx::query(&lock_sql)
            .bind(&new_message.thread_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to lock thread row")?
        else {
            return Ok(None);
        };
        let thread = thread_from_row(&row)?;

        if let Some(client_msg_id) = &new_message.client_msg_id {
            let dedup_sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM chat_messages \
                 WHERE thread_id = $1 AND sender_id = $2 AND client_msg_id = $3"
            );
            let existing = sqlx::query(&dedup_sql)
                .bind(&new_message.thread_id)
                .bind(&new_message.sender_id)
                .bind(client_msg_id)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to look up client message id")?;
            if let Some(row) = existing {
                let message = message_from_row(&row)?;
                tx.commit().await.context("Failed to finish dedup lookup")?;
                debug!(message_id = %message.id, "duplicate send");
                return Ok(Some(AppendOutcome::Duplicate { message, thread }));
            }
        }

        let now = truncate_to_millis(Utc::now());
        let created_at = thread.last_message_at.map_or(now, |last| last.max(now));
        let message = Message {
            id: next_message_id_after(created_at, thread.last_message_id.as_deref()),
            thread_id: new_message.thread_id,
            seq: thread.last_message_seq + 1,
            sender_id: new_message.sender_id,
            content: new_message.content,
            client_msg_id: new_message.client_msg_id,
            created_at,
        };

        sqlx::query(
            "INSERT INTO chat_messages (id, thread_id, seq, sender_id, content, client_msg_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&message.id)
        .bind(&message.thread_id)
        .bind(message.seq)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(&message.client_msg_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert message")?;

        let recipient = unread_column(new_message.sender_role.other());
        let update_sql = format!(
            "UPDATE chat_threads SET last_message_seq = $2, last_message_id = $3, \
             last_message_at = $4, {recipient} = {recipient} + 1 \
             WHERE id = $1 RETURNING {THREAD_COLUMNS}"
        );
        let row = sqlx::query(&update_sql)
            .bind(&message.thread_id)
            .bind(message.seq)
            .bind(&message.id)
            .bind(message.created_at)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to update thread after append")?;
        let thread = thread_from_row(&row)?;

        tx.commit().await.context("Failed to commit append")?;
        Ok(Some(AppendOutcome::Stored { message, thread }))
    }

    #[instrument(skip(self))]
    async fn list_messages(
        &self,
        thread_id: &str,
        after_seq: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages \
             WHERE thread_id = $1 AND seq > $2 \
             ORDER BY seq ASC LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(thread_id)
            .bind(after_seq.unwrap_or(0))
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await
            .with_context(|| format!("Failed to list messages of thread {thread_id}"))?;
        rows.iter().map(message_from_row).collect()
    }
}
