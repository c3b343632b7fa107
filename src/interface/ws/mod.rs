//! 实时网关

pub mod frames;
pub mod session;
mod socket;

pub use frames::{ClientFrame, ControlFrame, ServerFrame};
pub use session::{ConnectionSession, ConnectionState, FrameOutcome};
pub use socket::ws_handler;
