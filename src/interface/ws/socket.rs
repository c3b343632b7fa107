//! WebSocket 接入与单连接收发循环
//!
//! 每个连接一个任务：读循环等待客户端帧，写方向只等待自己的下行缓冲。

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tracing::{debug, warn};

use super::frames::{ControlFrame, ServerFrame};
use super::session::{ConnectionSession, FrameOutcome};
use crate::error::MessagingError;
use crate::infrastructure::auth::bearer_token;
use crate::infrastructure::presence::ConnectionSender;
use crate::service::ApplicationContext;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// GET /api/v1/ws
///
/// token 可以来自 Authorization 头、`?token=` 或首个 authenticate 帧
pub async fn ws_handler(
    State(context): State<Arc<ApplicationContext>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
        .or(params.token);

    ws.on_upgrade(move |socket| run_connection(socket, context, token))
}

type SocketSink = futures::stream::SplitSink<WebSocket, WsMessage>;

async fn send_frame(sink: &mut SocketSink, frame: ServerFrame) -> bool {
    sink.send(WsMessage::Text(frame.encode().into())).await.is_ok()
}

/// 发送应答；需要关闭连接时返回 false
async fn apply_outcome(sink: &mut SocketSink, outcome: FrameOutcome) -> bool {
    if let Some(reply) = outcome.reply {
        if !send_frame(sink, reply.into()).await {
            return false;
        }
    }
    !outcome.close
}

async fn run_connection(socket: WebSocket, context: Arc<ApplicationContext>, token: Option<String>) {
    let config = context.gateway_config.clone();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (sender, mut outbound) = ConnectionSender::channel(config.outbound_buffer);
    let mut session = ConnectionSession::new(context, Arc::new(sender));
    debug!(connection_id = %session.connection_id(), "connection opened");

    if let Some(token) = token {
        let outcome = session.authenticate(&token);
        if !apply_outcome(&mut ws_tx, outcome).await {
            let _ = ws_tx.send(WsMessage::Close(None)).await;
            return;
        }
    }

    let auth_deadline = Instant::now() + config.auth_timeout();
    let idle_timeout = config.idle_timeout();
    let mut last_inbound = Instant::now();
    let mut heartbeat = interval(config.heartbeat_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = sleep_until(auth_deadline), if !session.is_authenticated() => {
                let err = MessagingError::Unauthenticated("authentication timed out".to_string());
                let _ = send_frame(&mut ws_tx, ControlFrame::error(&err, None).into()).await;
                break;
            }
            _ = sleep_until(last_inbound + idle_timeout) => {
                debug!(connection_id = %session.connection_id(), "idle timeout");
                break;
            }
            _ = heartbeat.tick() => {
                if ws_tx.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            Some(event) = outbound.recv() => {
                let text = serde_json::to_string(event.as_ref()).unwrap_or_default();
                if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            inbound = ws_rx.next() => {
                let message = match inbound {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => {
                        warn!(error = %err, connection_id = %session.connection_id(), "socket error");
                        break;
                    }
                    None => break,
                };
                last_inbound = Instant::now();
                match message {
                    WsMessage::Text(text) => {
                        let outcome = session.handle_text(text.as_str()).await;
                        if !apply_outcome(&mut ws_tx, outcome).await {
                            break;
                        }
                    }
                    WsMessage::Binary(_) => {
                        let err = MessagingError::InvalidRequest("binary frames are not supported".to_string());
                        let outcome = session.reject_frame(err);
                        if !apply_outcome(&mut ws_tx, outcome).await {
                            break;
                        }
                    }
                    WsMessage::Close(_) => break,
                    // axum 自动回复 Ping；Pong 只用于刷新活跃时间
                    WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                }
            }
        }
    }

    session.close();
    let _ = ws_tx.send(WsMessage::Close(None)).await;
}
