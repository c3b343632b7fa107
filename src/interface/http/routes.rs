//! # REST 接口
//!
//! 请求/响应路径与长连接互相独立：长连接允许丢事件，这里的读接口必须单独正确。

use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use super::dto::{
    HealthResponse, HistoryParams, ListThreadsParams, MarkReadResponse, ResolveThreadRequest,
    ResolveThreadResponse, SendMessageRequest, SendMessageResponse, ThreadListResponse,
};
use super::extract::AuthenticatedUser;
use crate::application::commands::{MarkReadCommand, ResolveThreadCommand, SendMessageCommand};
use crate::application::queries::{GetThreadQuery, ListThreadsQuery, MessageHistoryQuery};
use crate::domain::model::{HistoryPage, Thread};
use crate::error::{MessagingError, Result};
use crate::interface::ws::ws_handler;
use crate::service::ApplicationContext;

/// 构建全部路由
pub fn router(context: Arc<ApplicationContext>) -> Router {
    Router::new()
        .route("/api/v1/threads", post(resolve_thread).get(list_threads))
        .route("/api/v1/threads/{thread_id}", get(get_thread))
        .route(
            "/api/v1/threads/{thread_id}/messages",
            get(message_history).post(send_message),
        )
        .route("/api/v1/threads/{thread_id}/read", post(mark_read))
        .route("/api/v1/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(CorsLayer::permissive())
        .with_state(context)
}

/// 请求 span 只记录路径：长连接的 `?token=` 不能进入日志
fn request_span(request: &Request<Body>) -> Span {
    tracing::debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        version = ?request.version(),
    )
}

fn query_params<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| MessagingError::InvalidRequest(rejection.body_text()))
}

fn json_body<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| MessagingError::InvalidRequest(rejection.body_text()))
}

/// POST /api/v1/threads
async fn resolve_thread(
    State(context): State<Arc<ApplicationContext>>,
    AuthenticatedUser(caller_id): AuthenticatedUser,
    body: std::result::Result<Json<ResolveThreadRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ResolveThreadResponse>)> {
    let request = json_body(body)?;
    let resolved = context
        .command_handler
        .handle_resolve_thread(ResolveThreadCommand {
            caller_id,
            buyer_id: request.buyer_id,
            seller_id: request.seller_id,
            property_id: request.property_id,
        })
        .await?;

    let status = if resolved.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(ResolveThreadResponse {
            thread_id: resolved.thread.id.clone(),
            created: resolved.created,
            thread: resolved.thread,
        }),
    ))
}

/// GET /api/v1/threads
async fn list_threads(
    State(context): State<Arc<ApplicationContext>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    params: std::result::Result<Query<ListThreadsParams>, QueryRejection>,
) -> Result<Json<ThreadListResponse>> {
    let params = query_params(params)?;
    let threads = context
        .query_handler
        .handle_list_threads(ListThreadsQuery {
            user_id,
            limit: params.limit,
        })
        .await?;
    Ok(Json(ThreadListResponse { threads }))
}

/// GET /api/v1/threads/{thread_id}
async fn get_thread(
    State(context): State<Arc<ApplicationContext>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(thread_id): Path<String>,
) -> Result<Json<Thread>> {
    let thread = context
        .query_handler
        .handle_get_thread(GetThreadQuery { thread_id, user_id })
        .await?;
    Ok(Json(thread))
}

/// GET /api/v1/threads/{thread_id}/messages?afterSeq=&limit=
async fn message_history(
    State(context): State<Arc<ApplicationContext>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(thread_id): Path<String>,
    params: std::result::Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<HistoryPage>> {
    let params = query_params(params)?;
    let page = context
        .query_handler
        .handle_history(MessageHistoryQuery {
            thread_id,
            user_id,
            after_seq: params.after_seq,
            limit: params.limit,
        })
        .await?;
    Ok(Json(page))
}

/// POST /api/v1/threads/{thread_id}/messages
async fn send_message(
    State(context): State<Arc<ApplicationContext>>,
    AuthenticatedUser(sender_id): AuthenticatedUser,
    Path(thread_id): Path<String>,
    body: std::result::Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SendMessageResponse>)> {
    let request = json_body(body)?;
    let message = context
        .command_handler
        .handle_send_message(SendMessageCommand {
            thread_id,
            sender_id,
            content: request.content,
            client_msg_id: request.client_msg_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(SendMessageResponse { message })))
}

/// POST /api/v1/threads/{thread_id}/read
async fn mark_read(
    State(context): State<Arc<ApplicationContext>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(thread_id): Path<String>,
) -> Result<Json<MarkReadResponse>> {
    let receipt = context
        .command_handler
        .handle_mark_read(MarkReadCommand { thread_id, user_id })
        .await?;
    let role = receipt
        .thread
        .role_of(&receipt.reader_id)
        .ok_or_else(|| MessagingError::not_a_participant(&receipt.thread.id, &receipt.reader_id))?;
    Ok(Json(MarkReadResponse {
        thread_id: receipt.thread.id,
        role,
        cleared: receipt.cleared,
    }))
}

/// GET /health
async fn health(State(context): State<Arc<ApplicationContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: context.presence.connection_count(),
        online_users: context.presence.online_users(),
    })
}

/// GET /metrics
async fn metrics() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::gather_text(),
    )
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn request_span_omits_query_string() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let request = Request::builder()
            .uri("/api/v1/ws?token=eyJhbGciOiJIUzI1NiJ9.secret.sig")
            .body(Body::empty())
            .unwrap();
        tracing::subscriber::with_default(subscriber, || {
            let span = request_span(&request);
            let _entered = span.enter();
            tracing::debug!("upgrade requested");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("/api/v1/ws"));
        assert!(!output.contains("token"));
        assert!(!output.contains("secret"));
    }
}
