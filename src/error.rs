//! 消息核心错误模块
//!
//! - 统一对外暴露消息核心的错误分类 `MessagingError`
//! - 为基础设施层提供便捷的错误转换工具
//! - 为 HTTP 接口层提供统一的错误响应格式

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type Result<T, E = MessagingError> = std::result::Result<T, E>;

/// 消息核心错误
#[derive(Debug, Error)]
pub enum MessagingError {
    /// 参与者不存在、相同或角色不匹配
    #[error("invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("user {user_id} is not a participant of thread {thread_id}")]
    NotAParticipant { thread_id: String, user_id: String },

    #[error("message content is empty")]
    EmptyContent,

    #[error("message content has {actual} characters, limit is {limit}")]
    ContentTooLong { limit: usize, actual: usize },

    #[error("thread {0} not found")]
    ThreadNotFound(String),

    /// 存储不可用（可由调用方重试）
    #[error("store unavailable: {0:#}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// 请求体或帧格式错误
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// 稳定的错误码（对外协议的一部分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidParticipants,
    NotAParticipant,
    EmptyContent,
    ContentTooLong,
    ThreadNotFound,
    StoreUnavailable,
    Unauthenticated,
    InvalidRequest,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParticipants => "INVALID_PARTICIPANTS",
            ErrorCode::NotAParticipant => "NOT_A_PARTICIPANT",
            ErrorCode::EmptyContent => "EMPTY_CONTENT",
            ErrorCode::ContentTooLong => "CONTENT_TOO_LONG",
            ErrorCode::ThreadNotFound => "THREAD_NOT_FOUND",
            ErrorCode::StoreUnavailable => "STORE_UNAVAILABLE",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidParticipants
            | ErrorCode::EmptyContent
            | ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotAParticipant => StatusCode::FORBIDDEN,
            ErrorCode::ContentTooLong => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::ThreadNotFound => StatusCode::NOT_FOUND,
            ErrorCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }
}

impl MessagingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MessagingError::InvalidParticipants(_) => ErrorCode::InvalidParticipants,
            MessagingError::NotAParticipant { .. } => ErrorCode::NotAParticipant,
            MessagingError::EmptyContent => ErrorCode::EmptyContent,
            MessagingError::ContentTooLong { .. } => ErrorCode::ContentTooLong,
            MessagingError::ThreadNotFound(_) => ErrorCode::ThreadNotFound,
            MessagingError::StoreUnavailable(_) => ErrorCode::StoreUnavailable,
            MessagingError::Unauthenticated(_) => ErrorCode::Unauthenticated,
            MessagingError::InvalidRequest(_) => ErrorCode::InvalidRequest,
        }
    }

    /// 只有存储类错误可以重试，客户端错误原样返回
    pub fn is_retryable(&self) -> bool {
        matches!(self, MessagingError::StoreUnavailable(_))
    }

    pub fn not_a_participant(thread_id: &str, user_id: &str) -> Self {
        MessagingError::NotAParticipant {
            thread_id: thread_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    /// 将基础设施错误映射为 `StoreUnavailable`
    pub fn store(err: anyhow::Error) -> Self {
        MessagingError::StoreUnavailable(err)
    }

    /// 对外展示的错误信息（存储错误不暴露内部细节）
    pub fn public_message(&self) -> String {
        match self {
            MessagingError::StoreUnavailable(_) => {
                "message store is temporarily unavailable, retry later".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// 便捷宏：将返回 `anyhow::Result` 的基础设施调用转换为 `StoreUnavailable`
#[macro_export]
macro_rules! try_store {
    ($expr:expr) => {
        $expr.map_err($crate::error::MessagingError::store)?
    };
}

/// HTTP 错误响应体
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl From<&MessagingError> for ErrorBody {
    fn from(err: &MessagingError) -> Self {
        Self {
            code: err.code(),
            message: err.public_message(),
            retryable: err.is_retryable(),
        }
    }
}

impl IntoResponse for MessagingError {
    fn into_response(self) -> Response {
        let code = self.code();
        if self.is_retryable() {
            error!(error = %self, code = code.as_str(), "request failed on store");
        } else {
            warn!(error = %self, code = code.as_str(), "request rejected");
        }
        (code.http_status(), Json(ErrorBody::from(&self))).into_response()
    }
}
