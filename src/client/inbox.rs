//! 会话列表视图：未读角标与按最近活跃排序

use crate::domain::model::{RealtimeEvent, ThreadSummary};

/// 应用事件后的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboxUpdate {
    Unchanged,
    Updated,
    /// 本地没有该会话，需要重新拉取列表
    NeedsRefresh { thread_id: String },
}

pub struct Inbox {
    user_id: String,
    threads: Vec<ThreadSummary>,
    /// 当前正在查看的会话，新消息不计入未读
    active_thread: Option<String>,
}

impl Inbox {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            threads: Vec::new(),
            active_thread: None,
        }
    }

    /// 用服务端列表（轮询或重连后）替换本地状态
    pub fn replace(&mut self, threads: Vec<ThreadSummary>) {
        self.threads = threads;
        self.sort();
    }

    pub fn threads(&self) -> &[ThreadSummary] {
        &self.threads
    }

    pub fn set_active(&mut self, thread_id: Option<&str>) {
        self.active_thread = thread_id.map(str::to_string);
        if let Some(thread_id) = thread_id {
            self.clear_unread(thread_id);
        }
    }

    /// 本地清零未读（调用 markRead 的同时）
    pub fn clear_unread(&mut self, thread_id: &str) {
        if let Some(summary) = self.threads.iter_mut().find(|t| t.thread_id == thread_id) {
            summary.unread_count = 0;
        }
    }

    pub fn total_unread(&self) -> u32 {
        self.threads.iter().map(|t| t.unread_count).sum()
    }

    pub fn apply_event(&mut self, event: &RealtimeEvent) -> InboxUpdate {
        let RealtimeEvent::NewMessage { thread_id, message } = event else {
            return InboxUpdate::Unchanged;
        };
        let Some(summary) = self.threads.iter_mut().find(|t| &t.thread_id == thread_id) else {
            return InboxUpdate::NeedsRefresh {
                thread_id: thread_id.clone(),
            };
        };
        if summary.last_message_id.as_deref() >= Some(message.id.as_str()) {
            // 重复或过期的事件
            return InboxUpdate::Unchanged;
        }

        summary.last_message_id = Some(message.id.clone());
        summary.last_message_at = Some(message.created_at);
        let viewing = self.active_thread.as_deref() == Some(thread_id.as_str());
        if message.sender_id != self.user_id && !viewing {
            summary.unread_count += 1;
        }
        self.sort();
        InboxUpdate::Updated
    }

    fn sort(&mut self) {
        self.threads
            .sort_by(|a, b| match (a.last_message_at, b.last_message_at) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => b.created_at.cmp(&a.created_at),
            });
    }
}
