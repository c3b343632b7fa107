//! 消息对账器
//!
//! 客户端从不把自己生成的临时 ID 当作最终 ID：乐观条目以 clientMsgId 关联，
//! 收到服务端带同一 clientMsgId 的消息时原地替换；已确认的消息按服务端 id 去重。

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::model::{Message, RealtimeEvent};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    /// 已在本地显示，等待服务端确认
    Pending,
    Confirmed,
    Failed { reason: String },
}

/// 本地消息视图条目
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalMessage {
    /// 服务端消息 ID，确认前为 None
    pub id: Option<String>,
    pub client_msg_id: Option<String>,
    pub thread_id: String,
    pub sender_id: String,
    pub content: String,
    pub seq: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub state: DeliveryState,
}

impl LocalMessage {
    fn confirmed(message: &Message) -> Self {
        Self {
            id: Some(message.id.clone()),
            client_msg_id: message.client_msg_id.clone(),
            thread_id: message.thread_id.clone(),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            seq: Some(message.seq),
            created_at: message.created_at,
            state: DeliveryState::Confirmed,
        }
    }
}

/// 需要发往服务端的请求
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub thread_id: String,
    pub content: String,
    pub client_msg_id: String,
}

#[derive(Default)]
struct ThreadView {
    messages: Vec<LocalMessage>,
    typing: HashMap<String, bool>,
    /// 对方最近一次标记已读的时间（本地时钟）
    read_by_counterpart_at: Option<DateTime<Utc>>,
}

impl ThreadView {
    /// 已确认的按 seq 排序，未确认的保持发送顺序排在最后
    fn normalize(&mut self) {
        self.messages.sort_by_key(|m| m.seq.unwrap_or(i64::MAX));
    }

    fn merge(&mut self, message: &Message, own_user_id: &str) -> bool {
        if self
            .messages
            .iter()
            .any(|m| m.id.as_deref() == Some(message.id.as_str()))
        {
            return false;
        }

        let optimistic = message.client_msg_id.as_deref().and_then(|cid| {
            self.messages.iter_mut().find(|m| {
                m.id.is_none()
                    && m.sender_id == own_user_id
                    && message.sender_id == own_user_id
                    && m.client_msg_id.as_deref() == Some(cid)
            })
        });

        match optimistic {
            Some(local) => *local = LocalMessage::confirmed(message),
            None => self.messages.push(LocalMessage::confirmed(message)),
        }
        self.normalize();
        true
    }
}

pub struct Reconciler {
    user_id: String,
    threads: HashMap<String, ThreadView>,
}

impl Reconciler {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            threads: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// 乐观发送：立即显示并生成关联标识
    pub fn begin_send(&mut self, thread_id: &str, content: &str) -> OutgoingMessage {
        let client_msg_id = format!("tmp-{}", uuid::Uuid::new_v4());
        let view = self.threads.entry(thread_id.to_string()).or_default();
        view.messages.push(LocalMessage {
            id: None,
            client_msg_id: Some(client_msg_id.clone()),
            thread_id: thread_id.to_string(),
            sender_id: self.user_id.clone(),
            content: content.to_string(),
            seq: None,
            created_at: Utc::now(),
            state: DeliveryState::Pending,
        });
        OutgoingMessage {
            thread_id: thread_id.to_string(),
            content: content.to_string(),
            client_msg_id,
        }
    }

    /// 合并服务端确认的消息（HTTP 发送返回或 newMessage 事件），返回是否有变化
    pub fn confirm(&mut self, message: &Message) -> bool {
        let own = self.user_id.clone();
        self.threads
            .entry(message.thread_id.clone())
            .or_default()
            .merge(message, &own)
    }

    /// 发送失败：保留条目供用户重试
    pub fn mark_failed(&mut self, thread_id: &str, client_msg_id: &str, reason: &str) -> bool {
        let Some(view) = self.threads.get_mut(thread_id) else {
            return false;
        };
        match view
            .messages
            .iter_mut()
            .find(|m| m.id.is_none() && m.client_msg_id.as_deref() == Some(client_msg_id))
        {
            Some(local) => {
                local.state = DeliveryState::Failed {
                    reason: reason.to_string(),
                };
                true
            }
            None => false,
        }
    }

    /// 重试失败的消息，沿用原 clientMsgId 以便服务端去重
    pub fn retry(&mut self, thread_id: &str, client_msg_id: &str) -> Option<OutgoingMessage> {
        let local = self
            .threads
            .get_mut(thread_id)?
            .messages
            .iter_mut()
            .find(|m| {
                m.id.is_none()
                    && m.client_msg_id.as_deref() == Some(client_msg_id)
                    && matches!(m.state, DeliveryState::Failed { .. })
            })?;
        local.state = DeliveryState::Pending;
        Some(OutgoingMessage {
            thread_id: thread_id.to_string(),
            content: local.content.clone(),
            client_msg_id: client_msg_id.to_string(),
        })
    }

    /// 应用实时事件
    pub fn apply_event(&mut self, event: &RealtimeEvent) -> bool {
        match event {
            RealtimeEvent::NewMessage { message, .. } => self.confirm(message),
            RealtimeEvent::UserTyping {
                thread_id,
                user_id,
                is_typing,
            } => {
                if *user_id == self.user_id {
                    return false;
                }
                let view = self.threads.entry(thread_id.clone()).or_default();
                view.typing.insert(user_id.clone(), *is_typing) != Some(*is_typing)
            }
            RealtimeEvent::MessagesRead { thread_id, user_id } => {
                if *user_id == self.user_id {
                    return false;
                }
                let view = self.threads.entry(thread_id.clone()).or_default();
                view.read_by_counterpart_at = Some(Utc::now());
                true
            }
        }
    }

    /// 用读接口返回的完整历史替换本地视图
    ///
    /// 重连后的补齐走这里；尚未确认的本地条目保留，已被服务端收录的乐观条目丢弃
    pub fn replace_history(&mut self, thread_id: &str, messages: &[Message]) {
        let view = self.threads.entry(thread_id.to_string()).or_default();
        let own = self.user_id.as_str();
        let unconfirmed: Vec<LocalMessage> = view
            .messages
            .drain(..)
            .filter(|m| m.id.is_none())
            .filter(|m| {
                !messages.iter().any(|server| {
                    server.sender_id == own && server.client_msg_id == m.client_msg_id
                })
            })
            .collect();

        view.messages = messages.iter().map(LocalMessage::confirmed).collect();
        view.messages.extend(unconfirmed);
        view.normalize();
    }

    pub fn messages(&self, thread_id: &str) -> &[LocalMessage] {
        self.threads
            .get(thread_id)
            .map(|v| v.messages.as_slice())
            .unwrap_or(&[])
    }

    /// 最后一条已确认消息的 seq，用于 afterSeq 增量拉取
    pub fn last_confirmed_seq(&self, thread_id: &str) -> Option<i64> {
        self.messages(thread_id).iter().filter_map(|m| m.seq).max()
    }

    pub fn is_typing(&self, thread_id: &str, user_id: &str) -> bool {
        self.threads
            .get(thread_id)
            .and_then(|v| v.typing.get(user_id).copied())
            .unwrap_or(false)
    }

    pub fn read_by_counterpart_at(&self, thread_id: &str) -> Option<DateTime<Utc>> {
        self.threads
            .get(thread_id)
            .and_then(|v| v.read_by_counterpart_at)
    }

    pub fn pending_count(&self, thread_id: &str) -> usize {
        self.messages(thread_id)
            .iter()
            .filter(|m| m.state == DeliveryState::Pending)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_message(id: &str, seq: i64, sender: &str, cid: Option<&str>) -> Message {
        Message {
            id: id.into(),
            thread_id: "t1".into(),
            seq,
            sender_id: sender.into(),
            content: format!("message {seq}"),
            client_msg_id: cid.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn echo_replaces_optimistic_entry() {
        let mut reconciler = Reconciler::new("buyer");
        let outgoing = reconciler.begin_send("t1", "Is this available?");
        assert_eq!(reconciler.pending_count("t1"), 1);

        let echo = server_message("01A", 1, "buyer", Some(&outgoing.client_msg_id));
        assert!(reconciler.confirm(&echo));
        // HTTP 返回与长连接回显都会到达，第二次是空操作
        assert!(!reconciler.apply_event(&RealtimeEvent::NewMessage {
            thread_id: "t1".into(),
            message: echo.clone(),
        }));

        let messages = reconciler.messages("t1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id.as_deref(), Some("01A"));
        assert_eq!(messages[0].state, DeliveryState::Confirmed);
        assert_eq!(reconciler.pending_count("t1"), 0);
    }

    #[test]
    fn matching_is_by_token_not_content() {
        let mut reconciler = Reconciler::new("buyer");
        let first = reconciler.begin_send("t1", "same text");
        let second = reconciler.begin_send("t1", "same text");

        reconciler.confirm(&server_message("01B", 1, "buyer", Some(&second.client_msg_id)));
        let messages = reconciler.messages("t1");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id.as_deref(), Some("01B"));
        assert_eq!(
            messages[1].client_msg_id.as_deref(),
            Some(first.client_msg_id.as_str())
        );
        assert_eq!(messages[1].state, DeliveryState::Pending);
    }

    #[test]
    fn incoming_messages_are_ordered_by_seq() {
        let mut reconciler = Reconciler::new("seller");
        reconciler.confirm(&server_message("01C", 2, "buyer", None));
        reconciler.confirm(&server_message("01B", 1, "buyer", None));
        let ids: Vec<_> = reconciler
            .messages("t1")
            .iter()
            .map(|m| m.id.clone().unwrap())
            .collect();
        assert_eq!(ids, ["01B", "01C"]);
        assert_eq!(reconciler.last_confirmed_seq("t1"), Some(2));
    }

    #[test]
    fn failed_send_can_be_retried_with_same_token() {
        let mut reconciler = Reconciler::new("buyer");
        let outgoing = reconciler.begin_send("t1", "hello");
        assert!(reconciler.mark_failed("t1", &outgoing.client_msg_id, "STORE_UNAVAILABLE"));

        let retry = reconciler.retry("t1", &outgoing.client_msg_id).unwrap();
        assert_eq!(retry, outgoing);
        assert_eq!(reconciler.pending_count("t1"), 1);
    }

    #[test]
    fn history_replacement_keeps_unsent_entries() {
        let mut reconciler = Reconciler::new("buyer");
        let delivered = reconciler.begin_send("t1", "delivered while offline");
        let unsent = reconciler.begin_send("t1", "still pending");

        reconciler.replace_history(
            "t1",
            &[
                server_message("01A", 1, "seller", None),
                server_message("01B", 2, "buyer", Some(&delivered.client_msg_id)),
            ],
        );

        let messages = reconciler.messages("t1");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].client_msg_id.as_deref(), Some(unsent.client_msg_id.as_str()));
        assert!(messages[2].id.is_none());
    }

    #[test]
    fn typing_and_read_events_from_counterpart() {
        let mut reconciler = Reconciler::new("buyer");
        assert!(reconciler.apply_event(&RealtimeEvent::UserTyping {
            thread_id: "t1".into(),
            user_id: "seller".into(),
            is_typing: true,
        }));
        assert!(reconciler.is_typing("t1", "seller"));

        // 自己的输入状态不展示
        assert!(!reconciler.apply_event(&RealtimeEvent::UserTyping {
            thread_id: "t1".into(),
            user_id: "buyer".into(),
            is_typing: true,
        }));

        assert!(reconciler.apply_event(&RealtimeEvent::MessagesRead {
            thread_id: "t1".into(),
            user_id: "seller".into(),
        }));
        assert!(reconciler.read_by_counterpart_at("t1").is_some());
    }
}
