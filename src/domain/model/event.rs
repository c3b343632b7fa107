//! 实时事件定义
//!
//! 这些事件由网关扇出到参与者的全部连接，序列化后即为下行帧

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Message;

/// 实时事件
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RealtimeEvent {
    #[serde(rename_all = "camelCase")]
    NewMessage { thread_id: String, message: Message },
    #[serde(rename_all = "camelCase")]
    UserTyping {
        thread_id: String,
        user_id: String,
        is_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    MessagesRead { thread_id: String, user_id: String },
}

impl RealtimeEvent {
    /// 事件类型名（用于日志与指标标签）
    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeEvent::NewMessage { .. } => "newMessage",
            RealtimeEvent::UserTyping { .. } => "userTyping",
            RealtimeEvent::MessagesRead { .. } => "messagesRead",
        }
    }

    pub fn thread_id(&self) -> &str {
        match self {
            RealtimeEvent::NewMessage { thread_id, .. }
            | RealtimeEvent::UserTyping { thread_id, .. }
            | RealtimeEvent::MessagesRead { thread_id, .. } => thread_id,
        }
    }
}

/// 输入状态（只存在于网关内存中）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypingSignal {
    pub thread_id: String,
    pub user_id: String,
    pub is_typing: bool,
    pub expires_at: Option<DateTime<Utc>>,
}
