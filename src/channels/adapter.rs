//! Seams between the gateway session and its consumers

use super::message::OutboundAction;
use crate::error::Result;
use async_trait::async_trait;

/// Outbound side of a chat channel, as seen by the message router
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Deliver one action frame to the gateway
    async fn send_action(&self, action: OutboundAction) -> Result<()>;
}

/// Liveness view of a connection, as seen by the liveness supervisor
#[async_trait]
pub trait LinkProbe: Send + Sync {
    /// Whether the connection currently believes it is up
    async fn is_connected(&self) -> bool;

    /// Lightweight transport-level check (a WebSocket ping)
    async fn probe(&self) -> Result<()>;
}
