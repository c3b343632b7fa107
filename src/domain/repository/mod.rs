//! 仓储与外部依赖接口
//!
//! 领域层只依赖这些 trait，具体实现位于 infrastructure 层

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::model::{
    AppendOutcome, InsertOutcome, Message, NewMessage, ParticipantRole, PropertyRef,
    RealtimeEvent, Thread, ThreadKey, UserProfile,
};

/// 会话仓储接口（需要作为 trait 对象使用，保留 async-trait）
#[async_trait]
pub trait ThreadRepository: Send + Sync {
    /// 按唯一键原子地创建会话
    ///
    /// 已存在时返回 `Existing`；并发插入输给其他写入方且胜出者尚不可读时返回 `Conflict`
    async fn insert_if_absent(&self, thread: Thread) -> Result<InsertOutcome>;

    async fn find_by_key(&self, key: &ThreadKey) -> Result<Option<Thread>>;

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>>;

    /// 列出用户参与的会话（按最后消息时间降序，无消息的排在最后）
    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Thread>>;

    /// 清零某一方的未读数，返回更新后的会话和清零前的值；会话不存在返回 None
    async fn reset_unread(
        &self,
        thread_id: &str,
        role: ParticipantRole,
    ) -> Result<Option<(Thread, u32)>>;
}

/// 消息仓储接口
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 原子地写入消息并更新会话的最后消息与接收方未读数
    ///
    /// 会话不存在时返回 None
    async fn append(&self, message: NewMessage) -> Result<Option<AppendOutcome>>;

    /// 按序号升序读取 `after_seq` 之后的消息
    async fn list_messages(
        &self,
        thread_id: &str,
        after_seq: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Message>>;
}

/// 用户目录（身份与角色校验）
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>>;
}

/// 房源目录
#[async_trait]
pub trait PropertyCatalog: Send + Sync {
    async fn find_property(&self, property_id: &str) -> Result<Option<PropertyRef>>;
}

/// 单次扇出的投递统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub dropped: usize,
}

impl FanOutReport {
    pub fn merge(&mut self, other: FanOutReport) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
    }
}

/// 实时事件发布接口
///
/// 实现必须是非阻塞的：慢连接只会丢弃自己的事件，不得拖慢调用方
pub trait EventPublisher: Send + Sync {
    fn fan_out(&self, user_ids: &[&str], event: Arc<RealtimeEvent>) -> FanOutReport;
}
