//! Liveness supervision for the gateway link
//!
//! Periodically probes the session and reports Online/Offline transitions to
//! registered observers. A single failed probe never flips the status; only
//! `failure_threshold` consecutive failures (or the session reporting itself
//! disconnected) take the link offline.

use super::adapter::LinkProbe;
use super::onebot::SessionState;
use crate::config::HeartbeatConfig;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Link status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Online,
    Offline,
}

/// Snapshot delivered to observers on every transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub online: bool,
    pub consecutive_failures: u32,
    pub timestamp: DateTime<Utc>,
}

/// Receives link status transitions
#[async_trait]
pub trait StatusObserver: Send + Sync {
    async fn notify(&self, status: StatusSnapshot) -> Result<()>;
}

/// Observer that writes every transition to the log
pub struct LoggingObserver;

#[async_trait]
impl StatusObserver for LoggingObserver {
    async fn notify(&self, status: StatusSnapshot) -> Result<()> {
        if status.online {
            tracing::info!(at = %status.timestamp, "OneBot link is online");
        } else {
            tracing::warn!(
                failures = status.consecutive_failures,
                at = %status.timestamp,
                "OneBot link is offline"
            );
        }
        Ok(())
    }
}

/// Periodic prober for a [`LinkProbe`]
pub struct LivenessSupervisor {
    probe: Arc<dyn LinkProbe>,
    state: Arc<SessionState>,
    observers: Vec<Arc<dyn StatusObserver>>,
    interval: Duration,
    probe_timeout: Duration,
    failure_threshold: u32,
    online: AtomicBool,
    cancel: CancellationToken,
}

impl LivenessSupervisor {
    pub fn new(
        probe: Arc<dyn LinkProbe>,
        state: Arc<SessionState>,
        config: &HeartbeatConfig,
    ) -> Self {
        Self {
            probe,
            state,
            observers: Vec::new(),
            interval: config.check_interval(),
            probe_timeout: config.probe_timeout(),
            failure_threshold: config.failure_threshold.max(1),
            online: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        }
    }

    /// Register an observer; call before [`run`](Self::run).
    pub fn with_observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn status(&self) -> LinkStatus {
        if self.online.load(Ordering::SeqCst) {
            LinkStatus::Online
        } else {
            LinkStatus::Offline
        }
    }

    /// Stop the probe loop, including mid-sleep
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Sleep, probe, repeat until cancelled.
    pub async fn run(&self) {
        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            threshold = self.failure_threshold,
            "Liveness supervisor started"
        );
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.check() => {}
            }
        }
        tracing::info!("Liveness supervisor stopped");
    }

    /// Run one probe cycle; returns the transition it caused, if any.
    pub async fn check(&self) -> Option<LinkStatus> {
        if !self.probe.is_connected().await {
            let failures = self.state.record_failure();
            tracing::debug!(failures, "Gateway session reports disconnected");
            return self.transition(LinkStatus::Offline);
        }

        let outcome = match tokio::time::timeout(self.probe_timeout, self.probe.probe()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!(
                "probe timed out after {}s",
                self.probe_timeout.as_secs_f64()
            )),
        };

        match outcome {
            Ok(()) => {
                self.state.record_heartbeat();
                let previous = self.state.reset_failures();
                if previous > 0 {
                    tracing::info!(previous_failures = previous, "Heartbeat probe recovered");
                }
                self.transition(LinkStatus::Online)
            }
            Err(e) => {
                let failures = self.state.record_failure();
                tracing::warn!(
                    failures,
                    threshold = self.failure_threshold,
                    error = %e,
                    "Heartbeat probe failed"
                );
                if failures >= self.failure_threshold {
                    self.transition(LinkStatus::Offline)
                } else {
                    None
                }
            }
        }
    }

    /// Compare-and-set the status; notify observers only on change.
    fn transition(&self, to: LinkStatus) -> Option<LinkStatus> {
        let online = to == LinkStatus::Online;
        if self
            .online
            .compare_exchange(!online, online, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let snapshot = StatusSnapshot {
            online,
            consecutive_failures: self.state.consecutive_failures(),
            timestamp: Utc::now(),
        };
        self.dispatch(snapshot);
        Some(to)
    }

    /// Each observer runs in its own task: a slow or failing observer never
    /// blocks the probe loop.
    fn dispatch(&self, snapshot: StatusSnapshot) {
        for observer in &self.observers {
            let observer = Arc::clone(observer);
            let snapshot = snapshot.clone();
            tokio::spawn(async move {
                if let Err(e) = observer.notify(snapshot).await {
                    tracing::warn!(error = %e, "Status observer failed");
                }
            });
        }
    }
}
