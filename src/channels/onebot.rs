//! OneBot gateway session
//!
//! Owns the single WebSocket connection to the OneBot gateway (NapCat and
//! friends). The session reconnects forever while running: callers never see
//! a connect failure, only frames arriving on the channel passed to
//! [`GatewaySession::run`].

use super::adapter::{LinkProbe, MessageSink};
use super::message::OutboundAction;
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the close handshake when dropping a connection
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Session state
// =============================================================================

/// Connection state shared by the session and the liveness supervisor.
///
/// Every field is a single atomic or a short critical section, so no caller
/// ever holds a lock across an await point.
#[derive(Debug, Default)]
pub struct SessionState {
    connected: AtomicBool,
    consecutive_failures: AtomicU32,
    last_heartbeat: RwLock<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`SessionState`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connected: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn record_heartbeat(&self) {
        let mut last = self
            .last_heartbeat
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Utc::now());
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self
            .last_heartbeat
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count one more failure; returns the new count
    pub fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Clear the failure count; returns the previous count
    pub fn reset_failures(&self) -> u32 {
        self.consecutive_failures.swap(0, Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connected: self.is_connected(),
            last_heartbeat: self.last_heartbeat(),
            consecutive_failures: self.consecutive_failures(),
        }
    }
}

// =============================================================================
// Gateway session
// =============================================================================

struct Heartbeat {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Long-lived WebSocket session to the OneBot gateway
pub struct GatewaySession {
    url: String,
    reconnect_interval: Duration,
    connect_timeout: Duration,
    ping_interval: Duration,
    write_timeout: Duration,
    running: AtomicBool,
    cancel: CancellationToken,
    state: Arc<SessionState>,
    writer: Mutex<Option<WsWriter>>,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl GatewaySession {
    /// Create a session for `url` with default timings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            running: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            state: Arc::new(SessionState::new()),
            writer: Mutex::new(None),
            heartbeat: Mutex::new(None),
        }
    }

    /// Create a session from the bridge configuration
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.network.onebot_ws_url.clone())
            .with_reconnect_interval(config.network.reconnect_interval())
            .with_connect_timeout(config.network.connect_timeout())
            .with_ping_interval(config.heartbeat.ping_interval())
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Longest a single frame write may stall before the socket is dropped
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Shared connection state
    pub fn state(&self) -> Arc<SessionState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True iff the session believes it is connected and still holds an
    /// open socket.
    pub async fn is_connected(&self) -> bool {
        self.state.is_connected() && self.writer.lock().await.is_some()
    }

    /// Connect, listen, and reconnect until [`disconnect`](Self::disconnect).
    ///
    /// Each decoded JSON frame is forwarded to `frames`.
    pub async fn run(self: Arc<Self>, frames: mpsc::Sender<serde_json::Value>) {
        while self.is_running() {
            let Some(reader) = self.connect().await else {
                break;
            };
            self.listen(reader, &frames).await;
            self.teardown().await;

            if self.is_running() {
                tracing::info!(url = %self.url, "Reconnecting to OneBot gateway");
            }
        }
        tracing::debug!(url = %self.url, "Gateway session loop exited");
    }

    /// Retry the handshake every `reconnect_interval` until it succeeds.
    ///
    /// Returns `None` only when the session is cancelled.
    async fn connect(self: &Arc<Self>) -> Option<WsReader> {
        loop {
            if !self.is_running() {
                return None;
            }
            self.state.set_connected(false);

            tracing::info!(url = %self.url, "Connecting to OneBot gateway");
            let attempt = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()));
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                outcome = attempt => outcome,
            };

            match outcome {
                Ok(Ok((stream, _response))) => {
                    let (writer, reader) = stream.split();
                    *self.writer.lock().await = Some(writer);
                    self.state.set_connected(true);
                    self.state.record_heartbeat();
                    self.spawn_heartbeat().await;
                    tracing::info!(url = %self.url, "Connected to OneBot gateway");
                    return Some(reader);
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        url = %self.url,
                        error = %e,
                        retry_in_secs = self.reconnect_interval.as_secs_f64(),
                        "OneBot connection failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        url = %self.url,
                        timeout_secs = self.connect_timeout.as_secs_f64(),
                        retry_in_secs = self.reconnect_interval.as_secs_f64(),
                        "OneBot connection timed out"
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.reconnect_interval) => {}
            }
        }
    }

    /// Read frames until the connection drops or the session is cancelled.
    async fn listen(&self, mut reader: WsReader, frames: &mpsc::Sender<serde_json::Value>) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return,
                next = reader.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => self.dispatch(text.as_bytes(), frames).await,
                Some(Ok(Message::Binary(bytes))) => self.dispatch(&bytes, frames).await,
                Some(Ok(Message::Pong(_))) => self.state.record_heartbeat(),
                Some(Ok(Message::Close(frame))) => {
                    tracing::warn!(close_frame = ?frame, "OneBot connection closed by peer");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "OneBot connection error");
                    return;
                }
                None => {
                    tracing::warn!("OneBot connection closed");
                    return;
                }
            }
        }
    }

    async fn dispatch(&self, raw: &[u8], frames: &mpsc::Sender<serde_json::Value>) {
        match serde_json::from_slice::<serde_json::Value>(raw) {
            Ok(frame) => {
                if frames.send(frame).await.is_err() {
                    tracing::debug!("Frame receiver dropped, discarding frame");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to decode gateway frame");
            }
        }
    }

    /// Drop the current connection: flag, heartbeat, socket.
    async fn teardown(&self) {
        self.state.set_connected(false);
        self.stop_heartbeat().await;
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            // A peer that stopped reading never completes the close handshake
            if tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await.is_err() {
                tracing::debug!("Close handshake timed out, dropping socket");
            }
        }
    }

    /// Stop the session: no further reconnects, heartbeat cancelled, socket
    /// closed. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.cancel.cancel();
        self.teardown().await;
        if was_running {
            tracing::info!(url = %self.url, "OneBot session disconnected");
        }
    }

    /// Serialize `frame` as JSON and write it to the socket.
    pub async fn send<T: Serialize + ?Sized>(&self, frame: &T) -> Result<()> {
        let payload = serde_json::to_string(frame)?;
        self.write(Message::Text(payload.clone())).await?;
        tracing::debug!(frame = %payload, "Sent frame to OneBot gateway");
        Ok(())
    }

    async fn write(&self, message: Message) -> Result<()> {
        self.write_until(message, &self.cancel).await
    }

    /// Write one frame, giving up when `cancel` fires or the write stalls
    /// past `write_timeout`. The writer lock is released on every path.
    async fn write_until(&self, message: Message, cancel: &CancellationToken) -> Result<()> {
        let mut guard = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            guard = self.writer.lock() => guard,
        };
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::Connection("WebSocket is not connected".to_string()))?;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            outcome = tokio::time::timeout(self.write_timeout, writer.send(message)) => outcome,
        };

        let failure = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => format!("WebSocket write failed: {}", e),
            Err(_) => format!(
                "WebSocket write timed out after {}s",
                self.write_timeout.as_secs_f64()
            ),
        };
        // The socket is unusable after a failed or stalled write
        self.state.set_connected(false);
        *guard = None;
        Err(Error::Connection(failure))
    }

    async fn spawn_heartbeat(self: &Arc<Self>) {
        self.stop_heartbeat().await;

        let cancel = self.cancel.child_token();
        let session = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(session.ping_interval) => {}
                }
                match session.write_until(Message::Ping(Vec::new()), &token).await {
                    Ok(()) => {
                        session.state.record_heartbeat();
                        tracing::debug!("Heartbeat ping sent");
                    }
                    Err(_) if token.is_cancelled() => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Heartbeat failed, stopping heartbeat task");
                        break;
                    }
                }
            }
        });

        *self.heartbeat.lock().await = Some(Heartbeat { cancel, handle });
    }

    async fn stop_heartbeat(&self) {
        let heartbeat = self.heartbeat.lock().await.take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.cancel.cancel();
            let _ = heartbeat.handle.await;
        }
    }
}

fn cancelled() -> Error {
    Error::Connection("WebSocket session is shutting down".to_string())
}

#[async_trait]
impl MessageSink for GatewaySession {
    async fn send_action(&self, action: OutboundAction) -> Result<()> {
        self.send(&action).await
    }
}

#[async_trait]
impl LinkProbe for GatewaySession {
    async fn is_connected(&self) -> bool {
        GatewaySession::is_connected(self).await
    }

    async fn probe(&self) -> Result<()> {
        self.write(Message::Ping(b"probe".to_vec())).await
    }
}
