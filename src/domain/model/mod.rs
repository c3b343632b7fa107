use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod event;

pub use event::{RealtimeEvent, TypingSignal};

/// 会话参与者角色（创建时固定）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Buyer,
    Seller,
}

impl ParticipantRole {
    pub fn other(&self) -> Self {
        match self {
            ParticipantRole::Buyer => ParticipantRole::Seller,
            ParticipantRole::Seller => ParticipantRole::Buyer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Buyer => "buyer",
            ParticipantRole::Seller => "seller",
        }
    }
}

/// 会话唯一键：(buyer_id, seller_id, property_id)
///
/// `property_id = None` 自身就是一个独立的键值
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub buyer_id: String,
    pub seller_id: String,
    pub property_id: Option<String>,
}

impl ThreadKey {
    pub fn new(
        buyer_id: impl Into<String>,
        seller_id: impl Into<String>,
        property_id: Option<String>,
    ) -> Self {
        Self {
            buyer_id: buyer_id.into().trim().to_string(),
            seller_id: seller_id.into().trim().to_string(),
            property_id: crate::utils::non_empty(property_id),
        }
    }
}

/// 买卖双方会话
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub property_id: Option<String>,
    pub buyer_unread_count: u32,
    pub seller_unread_count: u32,
    /// 最后一条消息的序号（无消息时为 0）
    pub last_message_seq: i64,
    pub last_message_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    /// 以零未读、无消息的初始状态创建会话
    pub fn new(id: String, key: ThreadKey, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            buyer_id: key.buyer_id,
            seller_id: key.seller_id,
            property_id: key.property_id,
            buyer_unread_count: 0,
            seller_unread_count: 0,
            last_message_seq: 0,
            last_message_id: None,
            last_message_at: None,
            created_at,
        }
    }

    pub fn key(&self) -> ThreadKey {
        ThreadKey {
            buyer_id: self.buyer_id.clone(),
            seller_id: self.seller_id.clone(),
            property_id: self.property_id.clone(),
        }
    }

    pub fn role_of(&self, user_id: &str) -> Option<ParticipantRole> {
        if self.buyer_id == user_id {
            Some(ParticipantRole::Buyer)
        } else if self.seller_id == user_id {
            Some(ParticipantRole::Seller)
        } else {
            None
        }
    }

    pub fn participant_id(&self, role: ParticipantRole) -> &str {
        match role {
            ParticipantRole::Buyer => &self.buyer_id,
            ParticipantRole::Seller => &self.seller_id,
        }
    }

    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        self.role_of(user_id)
            .map(|role| self.participant_id(role.other()))
    }

    pub fn unread_for(&self, role: ParticipantRole) -> u32 {
        match role {
            ParticipantRole::Buyer => self.buyer_unread_count,
            ParticipantRole::Seller => self.seller_unread_count,
        }
    }

    pub fn participants(&self) -> [&str; 2] {
        [&self.buyer_id, &self.seller_id]
    }

    /// 记录一条新消息：更新最后消息信息并为接收方未读数加一
    pub fn apply_append(&mut self, message: &Message, sender_role: ParticipantRole) {
        self.last_message_seq = message.seq;
        self.last_message_id = Some(message.id.clone());
        self.last_message_at = Some(message.created_at);
        match sender_role.other() {
            ParticipantRole::Buyer => self.buyer_unread_count += 1,
            ParticipantRole::Seller => self.seller_unread_count += 1,
        }
    }

    /// 清零指定角色的未读数，返回清零前的值
    pub fn reset_unread(&mut self, role: ParticipantRole) -> u32 {
        let counter = match role {
            ParticipantRole::Buyer => &mut self.buyer_unread_count,
            ParticipantRole::Seller => &mut self.seller_unread_count,
        };
        std::mem::take(counter)
    }
}

/// 已持久化的消息（创建后不可变）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    /// 会话内从 1 开始连续递增的序号
    pub seq: i64,
    pub sender_id: String,
    pub content: String,
    /// 客户端生成的关联标识，用于乐观消息去重
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 待追加的消息（内容已规范化，发送方角色已校验）
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub thread_id: String,
    pub sender_id: String,
    pub sender_role: ParticipantRole,
    pub content: String,
    pub client_msg_id: Option<String>,
}

/// 追加结果
#[derive(Clone, Debug)]
pub enum AppendOutcome {
    /// 新写入的消息及更新后的会话
    Stored { message: Message, thread: Thread },
    /// 相同 client_msg_id 已写入过，返回原消息，计数不变
    Duplicate { message: Message, thread: Thread },
}

impl AppendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            AppendOutcome::Stored { message, .. } | AppendOutcome::Duplicate { message, .. } => {
                message
            }
        }
    }

    pub fn thread(&self) -> &Thread {
        match self {
            AppendOutcome::Stored { thread, .. } | AppendOutcome::Duplicate { thread, .. } => {
                thread
            }
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Duplicate { .. })
    }
}

/// 会话创建结果
#[derive(Clone, Debug)]
pub enum InsertOutcome {
    Created(Thread),
    Existing(Thread),
    /// 唯一约束冲突，但胜出者暂不可见，需要重读
    Conflict,
}

/// 会话解析结果
#[derive(Clone, Debug)]
pub struct ResolvedThread {
    pub thread: Thread,
    pub created: bool,
}

/// 标记已读结果
#[derive(Clone, Debug)]
pub struct ReadReceipt {
    pub thread: Thread,
    pub reader_id: String,
    pub counterpart_id: String,
    /// 清零前的未读数
    pub cleared: u32,
}

/// 面向某个用户视角的会话摘要
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub thread_id: String,
    pub property_id: Option<String>,
    pub role: ParticipantRole,
    pub counterpart_id: String,
    pub unread_count: u32,
    pub last_message_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub property_title: Option<String>,
    pub counterpart_name: Option<String>,
}

impl ThreadSummary {
    /// 以 `user_id` 视角构建摘要，非参与者返回 None
    pub fn for_user(thread: &Thread, user_id: &str) -> Option<Self> {
        let role = thread.role_of(user_id)?;
        Some(Self {
            thread_id: thread.id.clone(),
            property_id: thread.property_id.clone(),
            role,
            counterpart_id: thread.participant_id(role.other()).to_string(),
            unread_count: thread.unread_for(role),
            last_message_id: thread.last_message_id.clone(),
            last_message_at: thread.last_message_at,
            created_at: thread.created_at,
            property_title: None,
            counterpart_name: None,
        })
    }
}

/// 会话列表排序：最后消息时间降序，无消息的会话排在最后（按创建时间降序）
pub fn sort_threads_by_activity(threads: &mut [Thread]) {
    threads.sort_by(|a, b| match (a.last_message_at, b.last_message_at) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.created_at.cmp(&a.created_at)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => b.created_at.cmp(&a.created_at),
    });
}

/// 历史消息分页
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    /// 下一页的起始序号（不含）
    pub next_after_seq: Option<i64>,
    pub has_more: bool,
}

/// 用户目录条目（仅用于校验与展示）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default = "default_true")]
    pub can_buy: bool,
    #[serde(default = "default_true")]
    pub can_sell: bool,
}

fn default_true() -> bool {
    true
}

/// 房源引用（仅用于校验与展示）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRef {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// 消息领域配置值对象（只包含领域相关的配置）
#[derive(Clone, Debug)]
pub struct MessagingDomainConfig {
    pub max_content_chars: usize,
    pub history_page_limit: usize,
    pub thread_list_limit: usize,
    pub resolve_retry_limit: usize,
}

impl Default for MessagingDomainConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 4000,
            history_page_limit: 200,
            thread_list_limit: 100,
            resolve_retry_limit: 3,
        }
    }
}

impl From<&crate::config::MessagingConfig> for MessagingDomainConfig {
    fn from(config: &crate::config::MessagingConfig) -> Self {
        Self {
            max_content_chars: config.max_content_chars,
            history_page_limit: config.history_page_limit,
            thread_list_limit: config.thread_list_limit,
            resolve_retry_limit: config.resolve_retry_limit,
        }
    }
}
