mod registry;
mod typing;

pub use registry::{ConnectionSender, DeliveryError, EventSink, PresenceRegistry};
pub use typing::TypingTracker;
