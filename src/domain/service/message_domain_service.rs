//! 消息领域服务 - 发送、已读、历史与会话列表

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::domain::model::{
    AppendOutcome, HistoryPage, MessagingDomainConfig, NewMessage, ParticipantRole, ReadReceipt,
    Thread, sort_threads_by_activity,
};
use crate::domain::repository::{MessageRepository, ThreadRepository};
use crate::error::{MessagingError, Result};
use crate::try_store;
use crate::utils::{ContentCheck, non_empty, normalize_content};

pub struct MessageDomainService {
    thread_repo: Arc<dyn ThreadRepository>,
    message_repo: Arc<dyn MessageRepository>,
    config: MessagingDomainConfig,
}

impl MessageDomainService {
    pub fn new(
        thread_repo: Arc<dyn ThreadRepository>,
        message_repo: Arc<dyn MessageRepository>,
        config: MessagingDomainConfig,
    ) -> Self {
        Self {
            thread_repo,
            message_repo,
            config,
        }
    }

    pub fn config(&self) -> &MessagingDomainConfig {
        &self.config
    }

    /// 读取会话并确认 `user_id` 是参与者，返回会话和其角色
    pub async fn authorize(
        &self,
        thread_id: &str,
        user_id: &str,
    ) -> Result<(Thread, ParticipantRole)> {
        let thread = try_store!(self.thread_repo.get_thread(thread_id).await)
            .ok_or_else(|| MessagingError::ThreadNotFound(thread_id.to_string()))?;
        let role = thread
            .role_of(user_id)
            .ok_or_else(|| MessagingError::not_a_participant(thread_id, user_id))?;
        Ok((thread, role))
    }

    /// 发送消息
    ///
    /// 追加消息、更新最后消息时间与接收方未读数在存储层一次完成；
    /// 携带已用过的 client_msg_id 的重试返回原消息
    #[instrument(skip(self, content), fields(thread_id = %thread_id, sender_id = %sender_id))]
    pub async fn send(
        &self,
        thread_id: &str,
        sender_id: &str,
        content: &str,
        client_msg_id: Option<String>,
    ) -> Result<AppendOutcome> {
        let (_, sender_role) = self.authorize(thread_id, sender_id).await?;

        let content = match normalize_content(content, self.config.max_content_chars) {
            ContentCheck::Ok(content) => content,
            ContentCheck::Empty => return Err(MessagingError::EmptyContent),
            ContentCheck::TooLong { actual } => {
                return Err(MessagingError::ContentTooLong {
                    limit: self.config.max_content_chars,
                    actual,
                });
            }
        };

        let new_message = NewMessage {
            thread_id: thread_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_role,
            content,
            client_msg_id: non_empty(client_msg_id),
        };

        let outcome = try_store!(self.message_repo.append(new_message).await)
            .ok_or_else(|| MessagingError::ThreadNotFound(thread_id.to_string()))?;
        debug!(
            message_id = %outcome.message().id,
            seq = outcome.message().seq,
            duplicate = outcome.is_duplicate(),
            "message appended"
        );
        Ok(outcome)
    }

    /// 标记已读：只清零调用方自己的未读数，重复调用是空操作
    #[instrument(skip(self), fields(thread_id = %thread_id, user_id = %user_id))]
    pub async fn mark_read(&self, thread_id: &str, user_id: &str) -> Result<ReadReceipt> {
        let (_, role) = self.authorize(thread_id, user_id).await?;
        let (thread, cleared) = try_store!(self.thread_repo.reset_unread(thread_id, role).await)
            .ok_or_else(|| MessagingError::ThreadNotFound(thread_id.to_string()))?;
        let counterpart_id = thread.participant_id(role.other()).to_string();
        Ok(ReadReceipt {
            thread,
            reader_id: user_id.to_string(),
            counterpart_id,
            cleared,
        })
    }

    /// 按序号升序读取历史消息
    ///
    /// `limit` 为 0 或超过上限时按上限处理
    #[instrument(skip(self), fields(thread_id = %thread_id, user_id = %user_id))]
    pub async fn history(
        &self,
        thread_id: &str,
        user_id: &str,
        after_seq: Option<i64>,
        limit: Option<usize>,
    ) -> Result<HistoryPage> {
        self.authorize(thread_id, user_id).await?;

        let max = self.config.history_page_limit.max(1);
        let limit = limit.filter(|l| *l > 0).map_or(max, |l| l.min(max));

        let mut messages = try_store!(
            self.message_repo
                .list_messages(thread_id, after_seq, limit + 1)
                .await
        );
        let has_more = messages.len() > limit;
        messages.truncate(limit);
        let next_after_seq = messages.last().map(|m| m.seq).or(after_seq);

        Ok(HistoryPage {
            messages,
            next_after_seq,
            has_more,
        })
    }

    /// 用户参与的会话（最近活跃在前）
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_threads(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<Thread>> {
        let max = self.config.thread_list_limit.max(1);
        let limit = limit.filter(|l| *l > 0).map_or(max, |l| l.min(max));
        let mut threads = try_store!(self.thread_repo.list_for_user(user_id, limit).await);
        sort_threads_by_activity(&mut threads);
        threads.truncate(limit);
        Ok(threads)
    }

    pub async fn get_thread(&self, thread_id: &str, user_id: &str) -> Result<Thread> {
        self.authorize(thread_id, user_id)
            .await
            .map(|(thread, _)| thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ThreadKey;
    use crate::domain::repository::ThreadRepository;
    use crate::infrastructure::persistence::MemoryStore;
    use chrono::Utc;

    async fn setup() -> (MessageDomainService, String) {
        let store = Arc::new(MemoryStore::new());
        let thread = Thread::new(
            "t1".into(),
            ThreadKey::new("buyer", "seller", None),
            Utc::now(),
        );
        store.insert_if_absent(thread).await.unwrap();
        let config = MessagingDomainConfig {
            max_content_chars: 10,
            history_page_limit: 3,
            ..MessagingDomainConfig::default()
        };
        (
            MessageDomainService::new(store.clone(), store, config),
            "t1".to_string(),
        )
    }

    #[tokio::test]
    async fn send_updates_recipient_counter() {
        let (svc, thread_id) = setup().await;
        let outcome = svc.send(&thread_id, "buyer", "  hi ", None).await.unwrap();
        assert_eq!(outcome.message().content, "hi");
        assert_eq!(outcome.message().seq, 1);
        assert_eq!(outcome.thread().seller_unread_count, 1);
        assert_eq!(outcome.thread().buyer_unread_count, 0);
        assert_eq!(
            outcome.thread().last_message_at,
            Some(outcome.message().created_at)
        );
    }

    #[tokio::test]
    async fn send_validation_errors() {
        let (svc, thread_id) = setup().await;
        assert!(matches!(
            svc.send(&thread_id, "buyer", "   ", None).await,
            Err(MessagingError::EmptyContent)
        ));
        assert!(matches!(
            svc.send(&thread_id, "buyer", "this is far too long", None).await,
            Err(MessagingError::ContentTooLong { limit: 10, .. })
        ));
        assert!(matches!(
            svc.send(&thread_id, "stranger", "hi", None).await,
            Err(MessagingError::NotAParticipant { .. })
        ));
        assert!(matches!(
            svc.send("missing", "buyer", "hi", None).await,
            Err(MessagingError::ThreadNotFound(_))
        ));

        let page = svc.history(&thread_id, "buyer", None, None).await.unwrap();
        assert!(page.messages.is_empty());
    }

    #[tokio::test]
    async fn retried_send_is_deduplicated() {
        let (svc, thread_id) = setup().await;
        let first = svc
            .send(&thread_id, "buyer", "hi", Some("tmp-1".into()))
            .await
            .unwrap();
        let retry = svc
            .send(&thread_id, "buyer", "hi", Some("tmp-1".into()))
            .await
            .unwrap();
        assert!(!first.is_duplicate());
        assert!(retry.is_duplicate());
        assert_eq!(first.message().id, retry.message().id);
        assert_eq!(retry.thread().seller_unread_count, 1);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let (svc, thread_id) = setup().await;
        svc.send(&thread_id, "buyer", "one", None).await.unwrap();
        svc.send(&thread_id, "seller", "two", None).await.unwrap();

        let receipt = svc.mark_read(&thread_id, "seller").await.unwrap();
        assert_eq!(receipt.cleared, 1);
        assert_eq!(receipt.counterpart_id, "buyer");
        assert_eq!(receipt.thread.seller_unread_count, 0);
        assert_eq!(receipt.thread.buyer_unread_count, 1);

        let again = svc.mark_read(&thread_id, "seller").await.unwrap();
        assert_eq!(again.cleared, 0);
    }

    #[tokio::test]
    async fn history_pages_by_seq() {
        let (svc, thread_id) = setup().await;
        for i in 0..5 {
            svc.send(&thread_id, "buyer", &format!("m{i}"), None)
                .await
                .unwrap();
        }
        let first = svc.history(&thread_id, "seller", None, None).await.unwrap();
        assert_eq!(first.messages.len(), 3);
        assert!(first.has_more);
        assert_eq!(first.next_after_seq, Some(3));

        let rest = svc
            .history(&thread_id, "seller", first.next_after_seq, Some(10))
            .await
            .unwrap();
        let seqs: Vec<_> = rest.messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, [4, 5]);
        assert!(!rest.has_more);
    }
}
