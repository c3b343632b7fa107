//! # Prometheus 指标收集模块
//!
//! 为消息核心与实时网关提供统一的 Prometheus 指标收集能力。

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 消息核心指标
pub struct MessagingMetrics {
    /// 会话解析总数（outcome = created | existing）
    pub threads_resolved_total: IntCounterVec,
    /// 消息发送总数（result = stored | deduplicated | rejected | failed）
    pub messages_sent_total: IntCounterVec,
    /// 消息发送耗时（秒）
    pub send_duration_seconds: Histogram,
    /// 标记已读总数
    pub mark_read_total: IntCounter,
}

impl MessagingMetrics {
    pub fn new() -> Self {
        let threads_resolved_total = IntCounterVec::new(
            Opts::new("chat_threads_resolved_total", "Total number of thread resolutions"),
            &["outcome"],
        )
        .expect("Failed to create chat_threads_resolved_total metric");

        let messages_sent_total = IntCounterVec::new(
            Opts::new("chat_messages_sent_total", "Total number of send attempts"),
            &["result"],
        )
        .expect("Failed to create chat_messages_sent_total metric");

        let send_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "chat_send_duration_seconds",
                "Message append duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )
        .expect("Failed to create chat_send_duration_seconds metric");

        let mark_read_total = IntCounter::new("chat_mark_read_total", "Total number of mark-read calls")
            .expect("Failed to create chat_mark_read_total metric");

        // 注册指标，忽略重复注册错误（测试中会重复创建）
        let _ = REGISTRY.register(Box::new(threads_resolved_total.clone()));
        let _ = REGISTRY.register(Box::new(messages_sent_total.clone()));
        let _ = REGISTRY.register(Box::new(send_duration_seconds.clone()));
        let _ = REGISTRY.register(Box::new(mark_read_total.clone()));

        Self {
            threads_resolved_total,
            messages_sent_total,
            send_duration_seconds,
            mark_read_total,
        }
    }
}

impl Default for MessagingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 实时网关指标
pub struct GatewayMetrics {
    /// 当前活跃连接数
    pub active_connections: IntGauge,
    /// 已投递事件数（按事件类型）
    pub events_delivered_total: IntCounterVec,
    /// 丢弃事件数（reason = buffer_full | closed）
    pub events_dropped_total: IntCounterVec,
    /// 自动失效的输入状态数
    pub typing_expired_total: IntCounter,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let active_connections = IntGauge::new(
            "chat_gateway_active_connections",
            "Number of registered realtime connections",
        )
        .expect("Failed to create chat_gateway_active_connections metric");

        let events_delivered_total = IntCounterVec::new(
            Opts::new(
                "chat_gateway_events_delivered_total",
                "Events handed to connection outbound buffers",
            ),
            &["event"],
        )
        .expect("Failed to create chat_gateway_events_delivered_total metric");

        let events_dropped_total = IntCounterVec::new(
            Opts::new(
                "chat_gateway_events_dropped_total",
                "Events dropped for a single connection",
            ),
            &["reason"],
        )
        .expect("Failed to create chat_gateway_events_dropped_total metric");

        let typing_expired_total = IntCounter::new(
            "chat_typing_expired_total",
            "Typing signals reverted by the quiet period",
        )
        .expect("Failed to create chat_typing_expired_total metric");

        let _ = REGISTRY.register(Box::new(active_connections.clone()));
        let _ = REGISTRY.register(Box::new(events_delivered_total.clone()));
        let _ = REGISTRY.register(Box::new(events_dropped_total.clone()));
        let _ = REGISTRY.register(Box::new(typing_expired_total.clone()));

        Self {
            active_connections,
            events_delivered_total,
            events_dropped_total,
            typing_expired_total,
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 以 Prometheus 文本格式导出全部指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(?err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_are_exported() {
        let metrics = MessagingMetrics::new();
        metrics.threads_resolved_total.with_label_values(&["created"]).inc();
        metrics.mark_read_total.inc();

        let text = gather_text();
        assert!(text.contains("chat_threads_resolved_total"));
        assert!(text.contains("chat_mark_read_total"));
    }
}
