//! 在线连接注册表
//!
//! user_id -> {connection_id -> 下行通道}，纯内存，进程重启后由客户端重连重建。
//! 扇出时先在分片锁内复制出连接快照，再在锁外逐个投递；
//! 每个连接有自己的有界缓冲，慢连接只会丢弃自己的事件。

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::model::RealtimeEvent;
use crate::domain::repository::{EventPublisher, FanOutReport};
use crate::metrics::GatewayMetrics;

/// 单连接投递失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// 下行缓冲已满
    BufferFull,
    /// 连接已关闭
    Closed,
}

impl DeliveryError {
    pub fn as_label(&self) -> &'static str {
        match self {
            DeliveryError::BufferFull => "buffer_full",
            DeliveryError::Closed => "closed",
        }
    }
}

/// 连接的下行出口（不得阻塞）
pub trait EventSink: Send + Sync {
    fn try_deliver(&self, event: Arc<RealtimeEvent>) -> Result<(), DeliveryError>;
}

/// 基于有界 mpsc 的下行通道
#[derive(Clone)]
pub struct ConnectionSender {
    tx: mpsc::Sender<Arc<RealtimeEvent>>,
}

impl ConnectionSender {
    /// 创建通道，接收端交给连接的写循环
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Arc<RealtimeEvent>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ConnectionSender {
    fn try_deliver(&self, event: Arc<RealtimeEvent>) -> Result<(), DeliveryError> {
        self.tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

type ConnectionMap = HashMap<String, Arc<dyn EventSink>>;

pub struct PresenceRegistry {
    entries: DashMap<String, ConnectionMap>,
    metrics: Arc<GatewayMetrics>,
}

impl PresenceRegistry {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            entries: DashMap::new(),
            metrics,
        }
    }

    /// 注册连接；同一 connection_id 重复注册时替换旧的出口
    pub fn register(&self, user_id: &str, connection_id: &str, sink: Arc<dyn EventSink>) {
        let replaced = self
            .entries
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id.to_string(), sink)
            .is_some();
        if !replaced {
            self.metrics.active_connections.inc();
        }
        debug!(%user_id, %connection_id, "connection registered");
    }

    /// 注销连接；用户最后一个连接注销时移除整个条目
    pub fn unregister(&self, user_id: &str, connection_id: &str) -> bool {
        let removed = self
            .entries
            .get_mut(user_id)
            .map(|mut connections| connections.remove(connection_id).is_some())
            .unwrap_or(false);
        // 分片写锁已释放，再按条件删除空条目
        self.entries
            .remove_if(user_id, |_, connections| connections.is_empty());
        if removed {
            self.metrics.active_connections.dec();
            debug!(%user_id, %connection_id, "connection unregistered");
        }
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn online_users(&self) -> usize {
        self.entries.len()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }

    fn snapshot(&self, user_id: &str) -> Vec<(String, Arc<dyn EventSink>)> {
        self.entries
            .get(user_id)
            .map(|connections| {
                connections
                    .iter()
                    .map(|(id, sink)| (id.clone(), Arc::clone(sink)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl EventPublisher for PresenceRegistry {
    fn fan_out(&self, user_ids: &[&str], event: Arc<RealtimeEvent>) -> FanOutReport {
        let mut report = FanOutReport::default();
        let mut seen: Vec<&str> = Vec::with_capacity(user_ids.len());

        for user_id in user_ids {
            // 同一用户只投递一次
            if seen.contains(user_id) {
                continue;
            }
            seen.push(*user_id);

            for (connection_id, sink) in self.snapshot(user_id) {
                match sink.try_deliver(Arc::clone(&event)) {
                    Ok(()) => {
                        report.delivered += 1;
                        self.metrics
                            .events_delivered_total
                            .with_label_values(&[event.kind()])
                            .inc();
                    }
                    Err(reason) => {
                        report.dropped += 1;
                        self.metrics
                            .events_dropped_total
                            .with_label_values(&[reason.as_label()])
                            .inc();
                        warn!(
                            %user_id,
                            %connection_id,
                            event = event.kind(),
                            reason = reason.as_label(),
                            "dropped realtime event for connection"
                        );
                    }
                }
            }
        }
        report
    }
}
