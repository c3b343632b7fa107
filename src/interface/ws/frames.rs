//! 长连接帧定义（JSON 文本帧，按 `type` 区分）

use serde::{Deserialize, Serialize};

use crate::domain::model::RealtimeEvent;
use crate::error::{ErrorCode, MessagingError};

/// 客户端 -> 服务端
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    Authenticate {
        token: String,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        thread_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Typing { thread_id: String, is_typing: bool },
    #[serde(rename_all = "camelCase")]
    MarkRead { thread_id: String },
    Ping,
}

/// 服务端控制帧（事件之外的下行帧）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlFrame {
    #[serde(rename_all = "camelCase")]
    Authenticated {
        user_id: String,
        connection_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
    Pong,
}

impl ControlFrame {
    pub fn error(err: &MessagingError, client_msg_id: Option<String>) -> Self {
        ControlFrame::Error {
            code: err.code(),
            message: err.public_message(),
            client_msg_id,
        }
    }
}

/// 服务端 -> 客户端的任意帧（客户端解码用）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Event(RealtimeEvent),
    Control(ControlFrame),
}

impl ServerFrame {
    pub fn encode(&self) -> String {
        // 这些类型的序列化不会失败
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<RealtimeEvent> for ServerFrame {
    fn from(event: RealtimeEvent) -> Self {
        ServerFrame::Event(event)
    }
}

impl From<ControlFrame> for ServerFrame {
    fn from(frame: ControlFrame) -> Self {
        ServerFrame::Control(frame)
    }
}

/// 解码客户端帧
pub fn decode_client_frame(text: &str) -> Result<ClientFrame, MessagingError> {
    serde_json::from_str(text)
        .map_err(|err| MessagingError::InvalidRequest(format!("malformed frame: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_client_frames() {
        let frame = decode_client_frame(
            r#"{"type":"sendMessage","threadId":"t1","content":"hi","clientMsgId":"c1"}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::SendMessage {
                thread_id: "t1".into(),
                content: "hi".into(),
                client_msg_id: Some("c1".into()),
            }
        );
        assert_eq!(decode_client_frame(r#"{"type":"ping"}"#).unwrap(), ClientFrame::Ping);
        assert!(matches!(
            decode_client_frame(r#"{"type":"typing","threadId":"t1"}"#),
            Err(MessagingError::InvalidRequest(_))
        ));
    }

    #[test]
    fn error_frame_shape() {
        let frame: ServerFrame =
            ControlFrame::error(&MessagingError::EmptyContent, Some("c1".into())).into();
        let value: serde_json::Value = serde_json::from_str(&frame.encode()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "EMPTY_CONTENT");
        assert_eq!(value["clientMsgId"], "c1");
    }

    #[test]
    fn server_frames_decode_back() {
        let raw = json!({"type": "messagesRead", "threadId": "t1", "userId": "s"}).to_string();
        let frame: ServerFrame = serde_json::from_str(&raw).unwrap();
        assert!(matches!(frame, ServerFrame::Event(RealtimeEvent::MessagesRead { .. })));

        let raw = json!({"type": "pong"}).to_string();
        let frame: ServerFrame = serde_json::from_str(&raw).unwrap();
        assert_eq!(frame, ServerFrame::Control(ControlFrame::Pong));
    }
}
