//! 输入状态跟踪
//!
//! 输入状态只存在于内存中。typing=true 在静默期内没有续期时自动回落为 false，
//! 同一 (thread, user) 以最近一次信号为准；连接断开时不主动清除。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use crate::domain::model::{RealtimeEvent, TypingSignal};
use crate::domain::repository::{EventPublisher, FanOutReport};
use crate::metrics::GatewayMetrics;

type TypingKey = (String, String);

#[derive(Clone, Debug)]
struct TypingEntry {
    generation: u64,
    counterpart_id: String,
    expires_at: chrono::DateTime<Utc>,
}

pub struct TypingTracker {
    publisher: Arc<dyn EventPublisher>,
    signals: Arc<DashMap<TypingKey, TypingEntry>>,
    generation: AtomicU64,
    quiet_period: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl TypingTracker {
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        quiet_period: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            publisher,
            signals: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            quiet_period,
            metrics,
        }
    }

    /// 更新输入状态并通知对方（只通知对方，不回显给自己）
    pub fn update(
        &self,
        thread_id: &str,
        user_id: &str,
        counterpart_id: &str,
        is_typing: bool,
    ) -> FanOutReport {
        let key = (thread_id.to_string(), user_id.to_string());

        if is_typing {
            let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
            let expires_at = Utc::now()
                + chrono::Duration::from_std(self.quiet_period).unwrap_or(chrono::Duration::zero());
            self.signals.insert(
                key.clone(),
                TypingEntry {
                    generation,
                    counterpart_id: counterpart_id.to_string(),
                    expires_at,
                },
            );
            self.schedule_expiry(key, generation);
        } else {
            self.signals.remove(&key);
        }

        self.publisher.fan_out(
            &[counterpart_id],
            Arc::new(RealtimeEvent::UserTyping {
                thread_id: thread_id.to_string(),
                user_id: user_id.to_string(),
                is_typing,
            }),
        )
    }

    /// 当前有效的输入状态
    pub fn current(&self, thread_id: &str, user_id: &str) -> Option<TypingSignal> {
        let key = (thread_id.to_string(), user_id.to_string());
        self.signals.get(&key).map(|entry| TypingSignal {
            thread_id: thread_id.to_string(),
            user_id: user_id.to_string(),
            is_typing: true,
            expires_at: Some(entry.expires_at),
        })
    }

    fn schedule_expiry(&self, key: TypingKey, generation: u64) {
        let signals = Arc::clone(&self.signals);
        let publisher = Arc::clone(&self.publisher);
        let metrics = Arc::clone(&self.metrics);
        let quiet_period = self.quiet_period;

        tokio::spawn(async move {
            tokio::time::sleep(quiet_period).await;
            // 期间有续期或显式 false 时 generation 已变化，什么也不做
            let Some(((thread_id, user_id), entry)) =
                signals.remove_if(&key, |_, entry| entry.generation == generation)
            else {
                return;
            };
            metrics.typing_expired_total.inc();
            debug!(%thread_id, %user_id, "typing signal expired");
            publisher.fan_out(
                &[entry.counterpart_id.as_str()],
                Arc::new(RealtimeEvent::UserTyping {
                    thread_id,
                    user_id,
                    is_typing: false,
                }),
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::presence::{ConnectionSender, PresenceRegistry};
    use tokio::sync::mpsc::Receiver;

    const QUIET: Duration = Duration::from_secs(5);

    fn setup() -> (TypingTracker, Receiver<Arc<RealtimeEvent>>) {
        let metrics = Arc::new(GatewayMetrics::new());
        let registry = Arc::new(PresenceRegistry::new(metrics.clone()));
        let (sender, rx) = ConnectionSender::channel(16);
        registry.register("seller", "c1", Arc::new(sender));
        (TypingTracker::new(registry, QUIET, metrics), rx)
    }

    fn typing_flag(event: &RealtimeEvent) -> bool {
        match event {
            RealtimeEvent::UserTyping { is_typing, .. } => *is_typing,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn typing_reverts_after_quiet_period() {
        let (tracker, mut rx) = setup();
        tracker.update("t1", "buyer", "seller", true);
        assert!(typing_flag(&rx.recv().await.unwrap()));
        assert!(tracker.current("t1", "buyer").is_some());

        let expired = tokio::time::timeout(QUIET * 2, rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!typing_flag(&expired));
        assert!(tracker.current("t1", "buyer").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn renewed_signal_postpones_expiry() {
        let (tracker, mut rx) = setup();
        tracker.update("t1", "buyer", "seller", true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        tracker.update("t1", "buyer", "seller", true);
        assert!(typing_flag(&rx.recv().await.unwrap()));
        assert!(typing_flag(&rx.recv().await.unwrap()));

        // 第一次信号的计时已到期，但已被续期
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
        assert!(tracker.current("t1", "buyer").is_some());

        let expired = tokio::time::timeout(QUIET, rx.recv()).await.unwrap().unwrap();
        assert!(!typing_flag(&expired));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_expiry() {
        let (tracker, mut rx) = setup();
        tracker.update("t1", "buyer", "seller", true);
        tracker.update("t1", "buyer", "seller", false);
        assert!(typing_flag(&rx.recv().await.unwrap()));
        assert!(!typing_flag(&rx.recv().await.unwrap()));

        tokio::time::sleep(QUIET * 2).await;
        assert!(rx.try_recv().is_err());
    }
}
