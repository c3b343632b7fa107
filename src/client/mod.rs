//! 客户端对账
//!
//! UI 侧使用：乐观发送与服务端回显按 clientMsgId 合并、会话列表未读维护、
//! 长连接不可用时的 HTTP 轮询回退

pub mod http;
pub mod inbox;
pub mod reconciler;

pub use http::{ClientError, MessagingHttpClient};
pub use inbox::{Inbox, InboxUpdate};
pub use reconciler::{DeliveryState, LocalMessage, OutgoingMessage, Reconciler};
