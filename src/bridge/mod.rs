//! Bridge assembly and lifecycle

mod server;

pub use server::{Bridge, BridgeBuilder, BridgeState, BridgeStatus, RetrySettings};
