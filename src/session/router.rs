//! Message routing: dedup, filtering, invocation and chunked replies

use super::inflight::InFlightSet;
use super::text::{format_cost, format_error, match_command_prefix, split_chunks};
use crate::agent::Invoke;
use crate::channels::{ChatEvent, MessageSink, ReplyTarget};
use crate::config::BotConfig;
use crate::error::Result;
use std::sync::Arc;

/// What happened to one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Not a chat event
    Ignored,
    /// Conversation already has a request in flight
    Duplicate,
    /// Filtered out, nothing sent
    Dropped,
    /// Answer delivered
    Replied,
    /// Error reply delivered, or handling failed
    Failed,
}

/// Routing decision for an accepted event
#[derive(Debug, PartialEq)]
enum Decision {
    Drop(&'static str),
    /// Command prefix with nothing after it
    Usage(String),
    Invoke(String),
}

/// Routes chat events to the invoker and replies through the sink
pub struct MessageRouter {
    sink: Arc<dyn MessageSink>,
    invoker: Arc<dyn Invoke>,
    config: BotConfig,
    in_flight: InFlightSet,
}

impl MessageRouter {
    pub fn new(sink: Arc<dyn MessageSink>, invoker: Arc<dyn Invoke>, config: BotConfig) -> Self {
        Self {
            sink,
            invoker,
            config,
            in_flight: InFlightSet::new(),
        }
    }

    /// Number of conversations currently being processed
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Decode and route one gateway frame
    pub async fn handle_frame(&self, frame: serde_json::Value) -> RouteOutcome {
        match ChatEvent::from_frame(&frame) {
            Some(event) => self.on_event(event).await,
            None => RouteOutcome::Ignored,
        }
    }

    /// Route one chat event. Never fails; errors are logged.
    pub async fn on_event(&self, event: ChatEvent) -> RouteOutcome {
        let key = event.conversation_key();
        let Some(_guard) = self.in_flight.try_acquire(key.clone()) else {
            tracing::debug!(conversation = %key, "Conversation busy, dropping event");
            return RouteOutcome::Duplicate;
        };

        match self.process(&event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    conversation = %key,
                    reply_to = %event.reply_target(),
                    error = %e,
                    "Failed to handle chat event"
                );
                RouteOutcome::Failed
            }
        }
    }

    async fn process(&self, event: &ChatEvent) -> Result<RouteOutcome> {
        let target = event.reply_target();
        let payload = match self.decide(event) {
            Decision::Drop(reason) => {
                tracing::debug!(reply_to = %target, reason, "Dropping chat event");
                return Ok(RouteOutcome::Dropped);
            }
            Decision::Usage(prefix) => {
                let hint = format!("empty command, usage: {} <your question>", prefix);
                self.send_reply(target, &format_error(&hint)).await?;
                return Ok(RouteOutcome::Failed);
            }
            Decision::Invoke(payload) => payload,
        };

        tracing::info!(
            reply_to = %target,
            user_id = event.user_id(),
            chars = payload.chars().count(),
            "Forwarding message to Claude"
        );

        if !self.config.ack_message.is_empty() {
            self.send(target, self.config.ack_message.clone()).await?;
        }

        let result = self.invoker.invoke(&payload).await;
        if result.success {
            let mut reply = result.text;
            if result.cost > 0.0 {
                reply.push_str(&format_cost(result.cost));
            }
            self.send_reply(target, &reply).await?;
            tracing::info!(
                reply_to = %target,
                retries = result.retry_count,
                cost = result.cost,
                "Reply delivered"
            );
            Ok(RouteOutcome::Replied)
        } else {
            tracing::warn!(
                reply_to = %target,
                retries = result.retry_count,
                error = %result.error,
                "Claude call failed"
            );
            self.send_reply(target, &format_error(&result.error)).await?;
            Ok(RouteOutcome::Failed)
        }
    }

    fn decide(&self, event: &ChatEvent) -> Decision {
        match event {
            ChatEvent::Private(message) => {
                if self.config.ignore_temp_session && message.sub_type != "friend" {
                    return Decision::Drop("temporary session");
                }
            }
            ChatEvent::Group(message) => {
                if !message.to_me {
                    return Decision::Drop("not addressed to bot");
                }
            }
        }

        let text = event.text();
        if text.is_empty() {
            return Decision::Drop("empty text");
        }

        if let Some((prefix, rest)) = match_command_prefix(&text, &self.config.command_prefix) {
            if rest.is_empty() {
                return Decision::Usage(prefix.to_string());
            }
            return Decision::Invoke(rest.to_string());
        }

        match event {
            ChatEvent::Private(_) if !self.config.auto_reply_private => {
                Decision::Drop("auto reply disabled")
            }
            _ => Decision::Invoke(text),
        }
    }

    /// Send `text` in order, in chunks of `max_message_length` characters,
    /// pausing `chunk_delay` between chunks
    async fn send_reply(&self, target: ReplyTarget, text: &str) -> Result<()> {
        let chunks = split_chunks(text, self.config.max_message_length);
        if chunks.is_empty() {
            tracing::warn!(reply_to = %target, "Empty reply, nothing to send");
            return Ok(());
        }

        let delay = self.config.chunk_delay();
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            self.send(target, chunk.to_string()).await?;
        }
        Ok(())
    }

    async fn send(&self, target: ReplyTarget, message: String) -> Result<()> {
        self.sink.send_action(target.into_action(message)).await
    }
}
