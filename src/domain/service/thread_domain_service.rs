//! 会话解析领域服务
//!
//! 将 (buyer, seller, property?) 三元组幂等地解析为唯一会话

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::domain::model::{InsertOutcome, MessagingDomainConfig, ResolvedThread, Thread, ThreadKey};
use crate::domain::repository::{PropertyCatalog, ThreadRepository, UserDirectory};
use crate::error::{MessagingError, Result};
use crate::try_store;
use crate::utils::{new_thread_id, truncate_to_millis};

pub struct ThreadDomainService {
    thread_repo: Arc<dyn ThreadRepository>,
    user_directory: Arc<dyn UserDirectory>,
    /// 未配置时跳过房源校验
    property_catalog: Option<Arc<dyn PropertyCatalog>>,
    config: MessagingDomainConfig,
}

impl ThreadDomainService {
    pub fn new(
        thread_repo: Arc<dyn ThreadRepository>,
        user_directory: Arc<dyn UserDirectory>,
        property_catalog: Option<Arc<dyn PropertyCatalog>>,
        config: MessagingDomainConfig,
    ) -> Self {
        Self {
            thread_repo,
            user_directory,
            property_catalog,
            config,
        }
    }

    /// 解析或创建会话
    ///
    /// 已存在的会话原样返回（不修改、不清零未读数）；
    /// 并发创建时输掉竞争的一方重读胜出者
    #[instrument(skip(self, key), fields(buyer_id = %key.buyer_id, seller_id = %key.seller_id, property_id = ?key.property_id))]
    pub async fn resolve(&self, caller_id: &str, key: ThreadKey) -> Result<ResolvedThread> {
        if key.buyer_id.is_empty() || key.seller_id.is_empty() {
            return Err(MessagingError::InvalidParticipants(
                "buyerId and sellerId are required".to_string(),
            ));
        }
        if key.buyer_id == key.seller_id {
            return Err(MessagingError::InvalidParticipants(
                "buyer and seller must be different users".to_string(),
            ));
        }
        if caller_id != key.buyer_id && caller_id != key.seller_id {
            return Err(MessagingError::NotAParticipant {
                thread_id: String::new(),
                user_id: caller_id.to_string(),
            });
        }

        self.validate_participants(&key).await?;

        if let Some(existing) = try_store!(self.thread_repo.find_by_key(&key).await) {
            debug!(thread_id = %existing.id, "thread already exists");
            return Ok(ResolvedThread {
                thread: existing,
                created: false,
            });
        }

        let candidate = Thread::new(new_thread_id(), key.clone(), truncate_to_millis(Utc::now()));
        match try_store!(self.thread_repo.insert_if_absent(candidate).await) {
            InsertOutcome::Created(thread) => {
                info!(thread_id = %thread.id, "thread created");
                Ok(ResolvedThread {
                    thread,
                    created: true,
                })
            }
            InsertOutcome::Existing(thread) => Ok(ResolvedThread {
                thread,
                created: false,
            }),
            InsertOutcome::Conflict => self.reread_winner(&key).await,
        }
    }

    /// 唯一约束冲突后重读胜出者
    async fn reread_winner(&self, key: &ThreadKey) -> Result<ResolvedThread> {
        let attempts = self.config.resolve_retry_limit.max(1);
        for attempt in 1..=attempts {
            if let Some(thread) = try_store!(self.thread_repo.find_by_key(key).await) {
                debug!(thread_id = %thread.id, attempt, "resolved concurrent creation");
                return Ok(ResolvedThread {
                    thread,
                    created: false,
                });
            }
            tokio::task::yield_now().await;
        }
        warn!(attempts, "winner of concurrent thread creation not visible");
        Err(MessagingError::store(anyhow::anyhow!(
            "thread key conflict could not be resolved after {attempts} attempts"
        )))
    }

    async fn validate_participants(&self, key: &ThreadKey) -> Result<()> {
        let buyer = try_store!(self.user_directory.find_user(&key.buyer_id).await)
            .ok_or_else(|| {
                MessagingError::InvalidParticipants(format!("unknown user {}", key.buyer_id))
            })?;
        let seller = try_store!(self.user_directory.find_user(&key.seller_id).await)
            .ok_or_else(|| {
                MessagingError::InvalidParticipants(format!("unknown user {}", key.seller_id))
            })?;

        if !buyer.can_buy {
            return Err(MessagingError::InvalidParticipants(format!(
                "user {} cannot act as buyer",
                buyer.id
            )));
        }
        if !seller.can_sell {
            return Err(MessagingError::InvalidParticipants(format!(
                "user {} cannot act as seller",
                seller.id
            )));
        }

        let (Some(catalog), Some(property_id)) = (&self.property_catalog, &key.property_id) else {
            return Ok(());
        };
        let property = try_store!(catalog.find_property(property_id).await).ok_or_else(|| {
            MessagingError::InvalidParticipants(format!("unknown property {property_id}"))
        })?;
        match property.owner_id.as_deref() {
            Some(owner) if owner != seller.id => Err(MessagingError::InvalidParticipants(format!(
                "user {} does not sell property {}",
                seller.id, property_id
            ))),
            _ => Ok(()),
        }
    }
}
