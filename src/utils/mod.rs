//! 工具函数模块
//!
//! 提供消息 ID 生成、时间戳转换、消息内容规范化等通用工具函数

use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use ulid::{Generator, Ulid};

/// 进程内单调 ULID 生成器
static ULID_GENERATOR: Lazy<Mutex<Generator>> = Lazy::new(|| Mutex::new(Generator::new()));

/// 基于给定时间生成单调递增的消息 ID
///
/// 同一毫秒内的多次调用按随机部分递增；随机部分溢出时退化为下一毫秒的新 ULID，
/// 保证返回值严格大于之前的所有值
pub fn next_message_id(at: DateTime<Utc>) -> String {
    let at: SystemTime = at.into();
    let mut generator = ULID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match generator.generate_from_datetime(at) {
        Ok(id) => id.to_string(),
        Err(_) => {
            let bumped = at + std::time::Duration::from_millis(1);
            generator
                .generate_from_datetime(bumped)
                .unwrap_or_else(|_| Ulid::from_datetime(bumped))
                .to_string()
        }
    }
}

/// 生成严格大于 `previous` 的消息 ID
///
/// 多实例部署时各进程的生成器互不可见，同一会话内以上一条消息 ID 为下界
pub fn next_message_id_after(at: DateTime<Utc>, previous: Option<&str>) -> String {
    let candidate = next_message_id(at);
    let Some(previous) = previous.and_then(|p| Ulid::from_string(p).ok()) else {
        return candidate;
    };
    match Ulid::from_string(&candidate) {
        Ok(id) if id > previous => candidate,
        _ => previous
            .increment()
            .map(|id| id.to_string())
            .unwrap_or(candidate),
    }
}

/// 生成新的会话 ID
pub fn new_thread_id() -> String {
    Ulid::new().to_string()
}

/// 生成新的连接 ID
pub fn new_connection_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 获取当前时间戳（毫秒）
pub fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 毫秒数转换为 DateTime
pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// 截断到毫秒精度（与 ULID 时间部分保持一致）
pub fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    millis_to_datetime(dt.timestamp_millis()).unwrap_or(dt)
}

/// 消息内容规范化结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentCheck {
    Ok(String),
    Empty,
    TooLong { actual: usize },
}

/// 去除首尾空白并按字符数校验长度
pub fn normalize_content(raw: &str, max_chars: usize) -> ContentCheck {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ContentCheck::Empty;
    }
    let actual = trimmed.chars().count();
    if actual > max_chars {
        return ContentCheck::TooLong { actual };
    }
    ContentCheck::Ok(trimmed.to_string())
}

/// 将空字符串规范化为 None
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_monotonic_within_a_millisecond() {
        let now = Utc::now();
        let ids: Vec<String> = (0..500).map(|_| next_message_id(now)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[test]
    fn message_id_orders_with_time() {
        let earlier = millis_to_datetime(1_700_000_000_000).unwrap();
        let later = millis_to_datetime(1_700_000_000_500).unwrap();
        let a = next_message_id(later);
        let b = next_message_id(earlier);
        // 单调生成器不会回退
        assert!(b > a);
    }

    #[test]
    fn message_id_stays_above_foreign_previous() {
        // 其他实例生成的、时间戳在未来的 ID
        let foreign = Ulid::from_datetime(
            (Utc::now() + chrono::Duration::seconds(60)).into(),
        )
        .to_string();
        let next = next_message_id_after(Utc::now(), Some(&foreign));
        assert!(next > foreign);
    }

    #[test]
    fn content_is_trimmed_and_bounded() {
        assert_eq!(normalize_content("  hi  ", 10), ContentCheck::Ok("hi".into()));
        assert_eq!(normalize_content(" \n\t ", 10), ContentCheck::Empty);
        assert_eq!(
            normalize_content("ééééé", 4),
            ContentCheck::TooLong { actual: 5 }
        );
        // 按字符而不是字节计数
        assert_eq!(normalize_content("éééé", 4), ContentCheck::Ok("éééé".into()));
    }

    #[test]
    fn blank_values_become_none() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some(" p1 ".into())), Some("p1".into()));
        assert_eq!(non_empty(None), None);
    }
}
