use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::application::commands::{
    MarkReadCommand, ResolveThreadCommand, SendMessageCommand, TypingCommand,
};
use crate::application::queries::{GetThreadQuery, ListThreadsQuery, MessageHistoryQuery};
use crate::domain::model::{
    AppendOutcome, HistoryPage, Message, ReadReceipt, RealtimeEvent, ResolvedThread, Thread,
    ThreadKey, ThreadSummary,
};
use crate::domain::repository::{EventPublisher, PropertyCatalog, UserDirectory};
use crate::domain::service::{MessageDomainService, ThreadDomainService};
use crate::error::Result;
use crate::infrastructure::presence::TypingTracker;
use crate::metrics::MessagingMetrics;

/// 消息命令处理器
///
/// 先持久化再扇出；扇出失败只记录日志，不影响命令结果
pub struct MessagingCommandHandler {
    thread_service: Arc<ThreadDomainService>,
    message_service: Arc<MessageDomainService>,
    publisher: Arc<dyn EventPublisher>,
    typing: Arc<TypingTracker>,
    metrics: Arc<MessagingMetrics>,
}

impl MessagingCommandHandler {
    pub fn new(
        thread_service: Arc<ThreadDomainService>,
        message_service: Arc<MessageDomainService>,
        publisher: Arc<dyn EventPublisher>,
        typing: Arc<TypingTracker>,
        metrics: Arc<MessagingMetrics>,
    ) -> Self {
        Self {
            thread_service,
            message_service,
            publisher,
            typing,
            metrics,
        }
    }

    /// 处理会话解析命令
    pub async fn handle_resolve_thread(
        &self,
        command: ResolveThreadCommand,
    ) -> Result<ResolvedThread> {
        debug!(
            caller_id = %command.caller_id,
            buyer_id = %command.buyer_id,
            seller_id = %command.seller_id,
            "Handling resolve thread command"
        );

        let key = ThreadKey::new(command.buyer_id, command.seller_id, command.property_id);
        let resolved = self.thread_service.resolve(&command.caller_id, key).await?;

        let outcome = if resolved.created { "created" } else { "existing" };
        self.metrics
            .threads_resolved_total
            .with_label_values(&[outcome])
            .inc();
        Ok(resolved)
    }

    /// 处理发送消息命令
    ///
    /// 新消息推送给双方的全部连接（包括发送方自己的连接，作为回显）；
    /// 去重命中时重新推送原消息，便于重试的客户端完成对账
    pub async fn handle_send_message(&self, command: SendMessageCommand) -> Result<Message> {
        debug!(
            thread_id = %command.thread_id,
            sender_id = %command.sender_id,
            client_msg_id = ?command.client_msg_id,
            "Handling send message command"
        );

        let timer = self.metrics.send_duration_seconds.start_timer();
        let result = self
            .message_service
            .send(
                &command.thread_id,
                &command.sender_id,
                &command.content,
                command.client_msg_id,
            )
            .await;
        timer.observe_duration();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                let label = if err.is_retryable() { "failed" } else { "rejected" };
                self.metrics
                    .messages_sent_total
                    .with_label_values(&[label])
                    .inc();
                return Err(err);
            }
        };

        let label = if outcome.is_duplicate() {
            "deduplicated"
        } else {
            "stored"
        };
        self.metrics
            .messages_sent_total
            .with_label_values(&[label])
            .inc();

        let (message, thread) = match outcome {
            AppendOutcome::Stored { message, thread }
            | AppendOutcome::Duplicate { message, thread } => (message, thread),
        };

        let event = Arc::new(RealtimeEvent::NewMessage {
            thread_id: thread.id.clone(),
            message: message.clone(),
        });
        let report = self.publisher.fan_out(&thread.participants(), event);
        debug!(
            thread_id = %thread.id,
            message_id = %message.id,
            delivered = report.delivered,
            dropped = report.dropped,
            "newMessage fanned out"
        );

        Ok(message)
    }

    /// 处理标记已读命令
    ///
    /// 只有未读数确实被清零时才通知对方
    pub async fn handle_mark_read(&self, command: MarkReadCommand) -> Result<ReadReceipt> {
        debug!(
            thread_id = %command.thread_id,
            user_id = %command.user_id,
            "Handling mark read command"
        );

        let receipt = self
            .message_service
            .mark_read(&command.thread_id, &command.user_id)
            .await?;
        self.metrics.mark_read_total.inc();

        if receipt.cleared > 0 {
            let event = Arc::new(RealtimeEvent::MessagesRead {
                thread_id: receipt.thread.id.clone(),
                user_id: receipt.reader_id.clone(),
            });
            self.publisher
                .fan_out(&[receipt.counterpart_id.as_str()], event);
            info!(
                thread_id = %receipt.thread.id,
                user_id = %receipt.reader_id,
                cleared = receipt.cleared,
                "Thread marked read"
            );
        }
        Ok(receipt)
    }

    /// 处理输入状态命令，只通知对方
    pub async fn handle_typing(&self, command: TypingCommand) -> Result<()> {
        let (thread, role) = self
            .message_service
            .authorize(&command.thread_id, &command.user_id)
            .await?;
        let counterpart_id = thread.participant_id(role.other());
        self.typing.update(
            &thread.id,
            &command.user_id,
            counterpart_id,
            command.is_typing,
        );
        Ok(())
    }
}

/// 消息查询处理器
pub struct MessagingQueryHandler {
    message_service: Arc<MessageDomainService>,
    user_directory: Option<Arc<dyn UserDirectory>>,
    property_catalog: Option<Arc<dyn PropertyCatalog>>,
}

impl MessagingQueryHandler {
    pub fn new(
        message_service: Arc<MessageDomainService>,
        user_directory: Option<Arc<dyn UserDirectory>>,
        property_catalog: Option<Arc<dyn PropertyCatalog>>,
    ) -> Self {
        Self {
            message_service,
            user_directory,
            property_catalog,
        }
    }

    /// 处理会话列表查询
    ///
    /// 房源标题与对方昵称是尽力而为的展示信息，查询失败时留空
    pub async fn handle_list_threads(&self, query: ListThreadsQuery) -> Result<Vec<ThreadSummary>> {
        let threads = self
            .message_service
            .list_threads(&query.user_id, query.limit)
            .await?;

        let mut names: HashMap<String, Option<String>> = HashMap::new();
        let mut titles: HashMap<String, Option<String>> = HashMap::new();
        let mut summaries = Vec::with_capacity(threads.len());

        for thread in &threads {
            let Some(mut summary) = ThreadSummary::for_user(thread, &query.user_id) else {
                continue;
            };

            if !names.contains_key(&summary.counterpart_id) {
                let name = self.counterpart_name(&summary.counterpart_id).await;
                names.insert(summary.counterpart_id.clone(), name);
            }
            summary.counterpart_name = names
                .get(&summary.counterpart_id)
                .cloned()
                .flatten();

            if let Some(property_id) = summary.property_id.clone() {
                if !titles.contains_key(&property_id) {
                    let title = self.property_title(&property_id).await;
                    titles.insert(property_id.clone(), title);
                }
                summary.property_title = titles.get(&property_id).cloned().flatten();
            }

            summaries.push(summary);
        }
        Ok(summaries)
    }

    /// 处理单个会话查询
    pub async fn handle_get_thread(&self, query: GetThreadQuery) -> Result<Thread> {
        self.message_service
            .get_thread(&query.thread_id, &query.user_id)
            .await
    }

    /// 处理历史消息查询
    pub async fn handle_history(&self, query: MessageHistoryQuery) -> Result<HistoryPage> {
        self.message_service
            .history(&query.thread_id, &query.user_id, query.after_seq, query.limit)
            .await
    }

    async fn counterpart_name(&self, user_id: &str) -> Option<String> {
        let directory = self.user_directory.as_ref()?;
        match directory.find_user(user_id).await {
            Ok(profile) => profile.and_then(|p| p.display_name),
            Err(err) => {
                warn!(error = %err, %user_id, "user directory lookup failed");
                None
            }
        }
    }

    async fn property_title(&self, property_id: &str) -> Option<String> {
        let catalog = self.property_catalog.as_ref()?;
        match catalog.find_property(property_id).await {
            Ok(property) => property.and_then(|p| p.title),
            Err(err) => {
                warn!(error = %err, %property_id, "property catalog lookup failed");
                None
            }
        }
    }
}
