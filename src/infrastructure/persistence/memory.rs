//! # 内存会话与消息存储
//!
//! 单进程部署和测试使用。每个会话持有一把独立的异步锁，
//! 追加消息与未读数更新在同一把锁内完成；不同会话之间互不阻塞。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;

use crate::domain::model::{
    AppendOutcome, InsertOutcome, Message, NewMessage, ParticipantRole, Thread, ThreadKey,
    sort_threads_by_activity,
};
use crate::domain::repository::{MessageRepository, ThreadRepository};
use crate::utils::{next_message_id_after, truncate_to_millis};

/// 单个会话的全部状态
struct ThreadRecord {
    thread: Thread,
    messages: Vec<Message>,
    /// (sender_id, client_msg_id) -> messages 下标
    client_ids: HashMap<(String, String), usize>,
}

#[derive(Default)]
pub struct MemoryStore {
    threads: DashMap<String, Arc<Mutex<ThreadRecord>>>,
    keys: DashMap<ThreadKey, String>,
    /// user_id -> 参与的会话 ID
    by_user: DashMap<String, HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    // 克隆出 Arc 后立即释放分片锁，不跨 await 持有 DashMap 引用
    fn record(&self, thread_id: &str) -> Option<Arc<Mutex<ThreadRecord>>> {
        self.threads.get(thread_id).map(|r| Arc::clone(r.value()))
    }

    async fn snapshot(&self, thread_id: &str) -> Option<Thread> {
        let record = self.record(thread_id)?;
        let guard = record.lock().await;
        Some(guard.thread.clone())
    }
}

#[async_trait]
impl ThreadRepository for MemoryStore {
    async fn insert_if_absent(&self, thread: Thread) -> Result<InsertOutcome> {
        let existing_id = match self.keys.entry(thread.key()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let id = thread.id.clone();
                for participant in thread.participants() {
                    self.by_user
                        .entry(participant.to_string())
                        .or_default()
                        .insert(id.clone());
                }
                self.threads.insert(
                    id.clone(),
                    Arc::new(Mutex::new(ThreadRecord {
                        thread: thread.clone(),
                        messages: Vec::new(),
                        client_ids: HashMap::new(),
                    })),
                );
                entry.insert(id);
                return Ok(InsertOutcome::Created(thread));
            }
        };

        Ok(match self.snapshot(&existing_id).await {
            Some(existing) => InsertOutcome::Existing(existing),
            None => InsertOutcome::Conflict,
        })
    }

    async fn find_by_key(&self, key: &ThreadKey) -> Result<Option<Thread>> {
        let Some(id) = self.keys.get(key).map(|id| id.value().clone()) else {
            return Ok(None);
        };
        Ok(self.snapshot(&id).await)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        Ok(self.snapshot(thread_id).await)
    }

    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Thread>> {
        let ids: Vec<String> = self
            .by_user
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        let mut threads = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(thread) = self.snapshot(&id).await {
                threads.push(thread);
            }
        }
        sort_threads_by_activity(&mut threads);
        threads.truncate(limit);
        Ok(threads)
    }

    async fn reset_unread(
        &self,
        thread_id: &str,
        role: ParticipantRole,
    ) -> Result<Option<(Thread, u32)>> {
        let Some(record) = self.record(thread_id) else {
            return Ok(None);
        };
        let mut guard = record.lock().await;
        let previous = guard.thread.reset_unread(role);
        Ok(Some((guard.thread.clone(), previous)))
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn append(&self, new_message: NewMessage) -> Result<Option<AppendOutcome>> {
        let Some(record) = self.record(&new_message.thread_id) else {
            return Ok(None);
        };
        let mut guard = record.lock().await;
        let record = &mut *guard;

        let dedup_key = new_message
            .client_msg_id
            .clone()
            .map(|cid| (new_message.sender_id.clone(), cid));
        if let Some(index) = dedup_key.as_ref().and_then(|k| record.client_ids.get(k)) {
            return Ok(Some(AppendOutcome::Duplicate {
                message: record.messages[*index].clone(),
                thread: record.thread.clone(),
            }));
        }

        // 时间戳不早于上一条消息，保证 createdAt 与 id 的顺序一致
        let now = truncate_to_millis(Utc::now());
        let created_at = record
            .thread
            .last_message_at
            .map_or(now, |last| last.max(now));
        let message = Message {
            id: next_message_id_after(created_at, record.thread.last_message_id.as_deref()),
            thread_id: new_message.thread_id,
            seq: record.thread.last_message_seq + 1,
            sender_id: new_message.sender_id,
            content: new_message.content,
            client_msg_id: new_message.client_msg_id,
            created_at,
        };

        record.thread.apply_append(&message, new_message.sender_role);
        if let Some(key) = dedup_key {
            record.client_ids.insert(key, record.messages.len());
        }
        record.messages.push(message.clone());

        Ok(Some(AppendOutcome::Stored {
            message,
            thread: record.thread.clone(),
        }))
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        after_seq: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let Some(record) = self.record(thread_id) else {
            return Ok(Vec::new());
        };
        let guard = record.lock().await;
        // seq 从 1 开始连续，下标 = seq - 1
        let start = after_seq.unwrap_or(0).max(0) as usize;
        Ok(guard
            .messages
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect())
    }
}
