//! OneBot channel: wire types, gateway session and liveness supervision

mod adapter;
mod liveness;
mod message;
mod onebot;

pub use adapter::{LinkProbe, MessageSink};
pub use liveness::{LinkStatus, LivenessSupervisor, LoggingObserver, StatusObserver, StatusSnapshot};
pub use message::{
    ChatEvent, ConversationKey, GroupMessage, MessageKind, MessageSegment, OutboundAction,
    PrivateMessage, ReplyTarget,
};
pub use onebot::{GatewaySession, SessionSnapshot, SessionState};
