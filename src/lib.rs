//! QQBridge - QQ to Claude Code CLI message bridge
//!
//! QQBridge connects to a OneBot v11 gateway (NapCat, go-cqhttp, ...) over
//! WebSocket, forwards chat messages addressed to the bot to the Claude Code
//! CLI, and sends the answers back to the originating conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌───────────────────┐  payload  ┌──────────────────┐
//! │   OneBot     │ ────────► │  Message Router   │ ────────► │ Retrying Invoker │
//! │   gateway    │ ◄──────── │  - in-flight set  │ ◄──────── │  - backoff       │
//! └──────┬───────┘  actions  │  - filtering      │  result   └────────┬─────────┘
//!        │                   │  - chunking       │                    │
//!        │ ws                └───────────────────┘           ┌────────▼─────────┐
//! ┌──────▼───────┐                                           │ Process Invoker  │
//! │   Gateway    │ ◄──── probe ──── Liveness Supervisor      │  claude -p ...   │
//! │   Session    │                  (online / offline)       └──────────────────┘
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`channels`]: OneBot wire types, gateway session, liveness supervision
//! - [`session`]: in-flight dedup and message routing
//! - [`agent`]: Claude Code CLI invocation with retries
//! - [`bridge`]: assembly and start/stop lifecycle
//! - [`config`]: configuration management

pub mod agent;
pub mod bridge;
pub mod channels;
pub mod config;
pub mod error;
pub mod session;

pub use bridge::{Bridge, BridgeBuilder, BridgeState, BridgeStatus};
pub use config::BridgeConfig;
pub use error::{Error, Result};
