//! # HTTP 客户端
//!
//! 请求/响应回退路径：长连接不可用时轮询，重连后按 afterSeq 补齐

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use super::reconciler::Reconciler;
use crate::domain::model::{HistoryPage, Message, Thread, ThreadSummary};
use crate::error::{ErrorBody, ErrorCode};
use crate::interface::http::dto::{
    MarkReadResponse, ResolveThreadRequest, ResolveThreadResponse, SendMessageRequest,
    SendMessageResponse, ThreadListResponse,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 服务端返回的结构化错误
    #[error("{code:?} ({status}): {message}")]
    Api {
        status: StatusCode,
        code: ErrorCode,
        message: String,
        retryable: bool,
    },

    #[error("unexpected response {status}: {body}")]
    Unexpected { status: StatusCode, body: String },
}

impl ClientError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 网络错误与服务端声明可重试的错误可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Api { retryable, .. } => *retryable,
            ClientError::Unexpected { status, .. } => status.is_server_error(),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

pub struct MessagingHttpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl MessagingHttpClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(error) => Err(ClientError::Api {
                status,
                code: error.code,
                message: error.message,
                retryable: error.retryable,
            }),
            Err(_) => Err(ClientError::Unexpected { status, body }),
        }
    }

    /// 解析或创建会话
    pub async fn resolve_thread(
        &self,
        buyer_id: &str,
        seller_id: &str,
        property_id: Option<&str>,
    ) -> ClientResult<ResolveThreadResponse> {
        let body = ResolveThreadRequest {
            buyer_id: buyer_id.to_string(),
            seller_id: seller_id.to_string(),
            property_id: property_id.map(str::to_string),
        };
        self.execute(self.client.post(self.url("/api/v1/threads")).json(&body))
            .await
    }

    pub async fn list_threads(&self, limit: Option<usize>) -> ClientResult<Vec<ThreadSummary>> {
        let mut request = self.client.get(self.url("/api/v1/threads"));
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        let response: ThreadListResponse = self.execute(request).await?;
        Ok(response.threads)
    }

    pub async fn get_thread(&self, thread_id: &str) -> ClientResult<Thread> {
        self.execute(
            self.client
                .get(self.url(&format!("/api/v1/threads/{thread_id}"))),
        )
        .await
    }

    pub async fn history(
        &self,
        thread_id: &str,
        after_seq: Option<i64>,
        limit: Option<usize>,
    ) -> ClientResult<HistoryPage> {
        let mut request = self
            .client
            .get(self.url(&format!("/api/v1/threads/{thread_id}/messages")));
        if let Some(after_seq) = after_seq {
            request = request.query(&[("afterSeq", after_seq)]);
        }
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        self.execute(request).await
    }

    pub async fn send_message(
        &self,
        thread_id: &str,
        content: &str,
        client_msg_id: Option<&str>,
    ) -> ClientResult<Message> {
        let body = SendMessageRequest {
            content: content.to_string(),
            client_msg_id: client_msg_id.map(str::to_string),
        };
        let response: SendMessageResponse = self
            .execute(
                self.client
                    .post(self.url(&format!("/api/v1/threads/{thread_id}/messages")))
                    .json(&body),
            )
            .await?;
        Ok(response.message)
    }

    pub async fn mark_read(&self, thread_id: &str) -> ClientResult<MarkReadResponse> {
        self.execute(
            self.client
                .post(self.url(&format!("/api/v1/threads/{thread_id}/read"))),
        )
        .await
    }

    /// 拉取完整历史并替换对账器中的会话视图（重连后补齐）
    pub async fn resync_thread(
        &self,
        reconciler: &mut Reconciler,
        thread_id: &str,
    ) -> ClientResult<usize> {
        let mut messages = Vec::new();
        let mut after_seq = None;
        loop {
            let page = self.history(thread_id, after_seq, None).await?;
            after_seq = page.next_after_seq;
            messages.extend(page.messages);
            if !page.has_more {
                break;
            }
        }
        debug!(%thread_id, count = messages.len(), "thread resynchronised");
        reconciler.replace_history(thread_id, &messages);
        Ok(messages.len())
    }

    /// 只拉取本地最后一条之后的新消息（轮询）
    pub async fn poll_thread(
        &self,
        reconciler: &mut Reconciler,
        thread_id: &str,
    ) -> ClientResult<usize> {
        let mut added = 0;
        let mut after_seq = reconciler.last_confirmed_seq(thread_id);
        loop {
            let page = self.history(thread_id, after_seq, None).await?;
            for message in &page.messages {
                if reconciler.confirm(message) {
                    added += 1;
                }
            }
            after_seq = page.next_after_seq;
            if !page.has_more {
                break;
            }
        }
        Ok(added)
    }
}
