//! 单连接状态机
//!
//! Connecting -> Authenticated -> Active -> Closed。
//! 与具体传输解耦：socket 循环只负责收发帧，所有判定都在这里完成。

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::frames::{ClientFrame, ControlFrame, decode_client_frame};
use crate::application::commands::{MarkReadCommand, SendMessageCommand, TypingCommand};
use crate::error::MessagingError;
use crate::infrastructure::presence::EventSink;
use crate::service::ApplicationContext;
use crate::utils::new_connection_id;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// 握手完成，身份未确认，不信任任何事件
    Connecting,
    /// 身份已绑定并已注册到在线表
    Authenticated,
    Active,
    Closed,
}

/// 处理一帧后的结果
#[derive(Debug, Default, PartialEq)]
pub struct FrameOutcome {
    pub reply: Option<ControlFrame>,
    pub close: bool,
}

impl FrameOutcome {
    fn none() -> Self {
        Self::default()
    }

    fn reply(frame: ControlFrame) -> Self {
        Self {
            reply: Some(frame),
            close: false,
        }
    }

    fn reject(err: &MessagingError, client_msg_id: Option<String>) -> Self {
        Self::reply(ControlFrame::error(err, client_msg_id))
    }

    fn fatal(err: &MessagingError) -> Self {
        Self {
            reply: Some(ControlFrame::error(err, None)),
            close: true,
        }
    }
}

pub struct ConnectionSession {
    context: Arc<ApplicationContext>,
    connection_id: String,
    sink: Arc<dyn EventSink>,
    state: ConnectionState,
    user_id: Option<String>,
}

impl ConnectionSession {
    pub fn new(context: Arc<ApplicationContext>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            context,
            connection_id: new_connection_id(),
            sink,
            state: ConnectionState::Connecting,
            user_id: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Authenticated | ConnectionState::Active
        )
    }

    /// 处理一帧文本
    pub async fn handle_text(&mut self, text: &str) -> FrameOutcome {
        match decode_client_frame(text) {
            Ok(frame) => self.handle_frame(frame).await,
            Err(err) => self.reject_frame(err),
        }
    }

    /// 无法处理的帧：认证前一律按未认证关闭连接
    pub fn reject_frame(&mut self, err: MessagingError) -> FrameOutcome {
        if self.is_authenticated() {
            FrameOutcome::reject(&err, None)
        } else {
            self.fail(MessagingError::Unauthenticated(err.to_string()))
        }
    }

    pub async fn handle_frame(&mut self, frame: ClientFrame) -> FrameOutcome {
        match self.state {
            ConnectionState::Closed => FrameOutcome {
                reply: None,
                close: true,
            },
            ConnectionState::Connecting => match frame {
                ClientFrame::Authenticate { token } => self.authenticate(&token),
                _ => self.fail(MessagingError::Unauthenticated(
                    "authenticate before sending other frames".to_string(),
                )),
            },
            ConnectionState::Authenticated | ConnectionState::Active => {
                self.state = ConnectionState::Active;
                self.dispatch(frame).await
            }
        }
    }

    /// 绑定身份并注册到在线表
    pub fn authenticate(&mut self, token: &str) -> FrameOutcome {
        if self.state != ConnectionState::Connecting {
            return FrameOutcome::reject(
                &MessagingError::InvalidRequest("connection already authenticated".to_string()),
                None,
            );
        }

        let user_id = match self.context.authenticator.authenticate(token) {
            Ok(user_id) => user_id,
            Err(err) => return self.fail(err),
        };

        self.context
            .presence
            .register(&user_id, &self.connection_id, Arc::clone(&self.sink));
        self.state = ConnectionState::Authenticated;
        self.user_id = Some(user_id.clone());
        info!(%user_id, connection_id = %self.connection_id, "connection authenticated");

        FrameOutcome::reply(ControlFrame::Authenticated {
            user_id,
            connection_id: self.connection_id.clone(),
        })
    }

    async fn dispatch(&mut self, frame: ClientFrame) -> FrameOutcome {
        let Some(user_id) = self.user_id.clone() else {
            return self.fail(MessagingError::Unauthenticated("no identity".to_string()));
        };
        let commands = &self.context.command_handler;

        match frame {
            ClientFrame::Authenticate { .. } => FrameOutcome::reject(
                &MessagingError::InvalidRequest("connection already authenticated".to_string()),
                None,
            ),
            ClientFrame::SendMessage {
                thread_id,
                content,
                client_msg_id,
            } => {
                let command = SendMessageCommand {
                    thread_id,
                    sender_id: user_id,
                    content,
                    client_msg_id: client_msg_id.clone(),
                };
                // 成功时不单独应答，回显由 newMessage 扇出完成
                match commands.handle_send_message(command).await {
                    Ok(_) => FrameOutcome::none(),
                    Err(err) => {
                        debug!(error = %err, connection_id = %self.connection_id, "send rejected");
                        FrameOutcome::reject(&err, client_msg_id)
                    }
                }
            }
            ClientFrame::Typing {
                thread_id,
                is_typing,
            } => {
                let command = TypingCommand {
                    thread_id,
                    user_id,
                    is_typing,
                };
                match commands.handle_typing(command).await {
                    Ok(()) => FrameOutcome::none(),
                    Err(err) => FrameOutcome::reject(&err, None),
                }
            }
            ClientFrame::MarkRead { thread_id } => {
                let command = MarkReadCommand { thread_id, user_id };
                match commands.handle_mark_read(command).await {
                    Ok(_) => FrameOutcome::none(),
                    Err(err) => FrameOutcome::reject(&err, None),
                }
            }
            ClientFrame::Ping => FrameOutcome::reply(ControlFrame::Pong),
        }
    }

    fn fail(&mut self, err: MessagingError) -> FrameOutcome {
        warn!(error = %err, connection_id = %self.connection_id, "closing connection");
        self.close();
        FrameOutcome::fatal(&err)
    }

    /// 注销连接；未过期的输入状态保留，自然过期
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let Some(user_id) = &self.user_id {
            self.context
                .presence
                .unregister(user_id, &self.connection_id);
            info!(%user_id, connection_id = %self.connection_id, "connection closed");
        }
        self.state = ConnectionState::Closed;
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close();
    }
}
