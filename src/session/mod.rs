//! Conversation handling: in-flight dedup and message routing

mod inflight;
mod router;
mod text;

pub use inflight::{InFlightGuard, InFlightSet};
pub use router::{MessageRouter, RouteOutcome};
pub use text::{format_cost, format_error, match_command_prefix, split_chunks, ERROR_MARKER};
