//! Bridge lifecycle: wires session, router, invoker and supervisor together

use crate::agent::{ProcessInvoker, ProcessRunner, RetryStats, RetryingInvoker};
use crate::channels::{
    GatewaySession, LinkStatus, LivenessSupervisor, LoggingObserver, SessionSnapshot,
    StatusObserver,
};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::session::MessageRouter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};

/// Inbound frames buffered between the socket reader and the dispatcher
const FRAME_BUFFER: usize = 1000;

/// Pause between stop and start on restart
const RESTART_PAUSE: Duration = Duration::from_secs(1);

/// Bridge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    /// Not started
    Stopped,
    /// Starting up
    Starting,
    /// Running
    Running,
    /// Shutting down
    Stopping,
}

/// Retry configuration for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_secs: f64,
    pub max_backoff_secs: f64,
    pub cli_timeout_secs: u64,
    pub stats: RetryStats,
}

/// Point-in-time view of the bridge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeStatus {
    pub state: BridgeState,
    /// Liveness supervisor verdict (false when stopped)
    pub online: bool,
    pub session: SessionSnapshot,
    pub in_flight: usize,
    pub retry: RetrySettings,
}

/// Everything that lives for one start/stop cycle
struct Runtime {
    session: Arc<GatewaySession>,
    router: Arc<MessageRouter>,
    supervisor: Arc<LivenessSupervisor>,
    tasks: Vec<JoinHandle<()>>,
}

/// QQ to Claude Code bridge
pub struct Bridge {
    config: BridgeConfig,
    state: Arc<RwLock<BridgeState>>,
    invoker: Arc<RetryingInvoker>,
    observers: RwLock<Vec<Arc<dyn StatusObserver>>>,
    runtime: Mutex<Option<Runtime>>,
}

impl Bridge {
    /// Create a bridge that invokes the Claude Code CLI from `config`
    pub fn new(config: BridgeConfig) -> Result<Self> {
        BridgeBuilder::new().config(config).build()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub async fn state(&self) -> BridgeState {
        *self.state.read().await
    }

    /// Shared invoker, also usable outside the chat flow
    pub fn invoker(&self) -> &Arc<RetryingInvoker> {
        &self.invoker
    }

    /// Register a status observer. Takes effect on the next start.
    pub async fn subscribe(&self, observer: Arc<dyn StatusObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Start the session loop, frame dispatcher and liveness supervisor.
    ///
    /// Returns without waiting for the first connection.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != BridgeState::Stopped {
            return Err(Error::Bridge("Bridge already running".to_string()));
        }
        *state = BridgeState::Starting;
        drop(state);

        tracing::info!(url = %self.config.network.onebot_ws_url, "Starting QQ bridge");

        let session = Arc::new(GatewaySession::from_config(&self.config));
        let router = Arc::new(MessageRouter::new(
            session.clone(),
            self.invoker.clone(),
            self.config.bot.clone(),
        ));

        let mut supervisor =
            LivenessSupervisor::new(session.clone(), session.state(), &self.config.heartbeat)
                .with_observer(Arc::new(LoggingObserver));
        for observer in self.observers.read().await.iter() {
            supervisor = supervisor.with_observer(observer.clone());
        }
        let supervisor = Arc::new(supervisor);

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_BUFFER);
        let tasks = vec![
            tokio::spawn(session.clone().run(frame_tx)),
            tokio::spawn(dispatch_frames(frame_rx, router.clone())),
            tokio::spawn({
                let supervisor = supervisor.clone();
                async move { supervisor.run().await }
            }),
        ];

        *self.runtime.lock().await = Some(Runtime {
            session,
            router,
            supervisor,
            tasks,
        });
        *self.state.write().await = BridgeState::Running;

        tracing::info!("QQ bridge started");
        Ok(())
    }

    /// Stop everything started by [`start`](Self::start) and wait for it to
    /// finish. Safe to call repeatedly.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != BridgeState::Running {
            return Ok(());
        }
        *state = BridgeState::Stopping;
        drop(state);

        tracing::info!("Stopping QQ bridge");

        if let Some(runtime) = self.runtime.lock().await.take() {
            runtime.supervisor.cancel();
            // Closing the session ends the frame stream, which ends the
            // dispatcher and aborts its in-flight handlers
            runtime.session.disconnect().await;
            for task in runtime.tasks {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "Bridge task ended abnormally");
                }
            }
        }

        *self.state.write().await = BridgeState::Stopped;
        tracing::info!("QQ bridge stopped");
        Ok(())
    }

    /// Stop, pause briefly, start again
    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        tokio::time::sleep(RESTART_PAUSE).await;
        self.start().await
    }

    pub async fn status(&self) -> BridgeStatus {
        let state = *self.state.read().await;
        let (online, session, in_flight) = match self.runtime.lock().await.as_ref() {
            Some(runtime) => (
                runtime.supervisor.status() == LinkStatus::Online,
                runtime.session.state().snapshot(),
                runtime.router.in_flight(),
            ),
            None => (false, SessionSnapshot::default(), 0),
        };

        let backoff = self.invoker.backoff();
        BridgeStatus {
            state,
            online,
            session,
            in_flight,
            retry: RetrySettings {
                max_retries: self.invoker.max_retries(),
                initial_backoff_secs: backoff.initial().as_secs_f64(),
                max_backoff_secs: backoff.max().as_secs_f64(),
                cli_timeout_secs: self.config.claude.timeout,
                stats: self.invoker.stats(),
            },
        }
    }
}

/// Route each frame on its own task until the frame stream ends
async fn dispatch_frames(mut frames: mpsc::Receiver<serde_json::Value>, router: Arc<MessageRouter>) {
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    let router = router.clone();
                    handlers.spawn(async move {
                        router.handle_frame(frame).await;
                    });
                }
                None => break,
            },
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Chat event handler panicked");
                    }
                }
            }
        }
    }

    if !handlers.is_empty() {
        tracing::info!(pending = handlers.len(), "Cancelling in-flight chat events");
    }
    handlers.shutdown().await;
}

/// Builder for [`Bridge`]
pub struct BridgeBuilder {
    config: BridgeConfig,
    observers: Vec<Arc<dyn StatusObserver>>,
    runner: Option<Arc<dyn ProcessRunner>>,
}

impl BridgeBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
            observers: Vec::new(),
            runner: None,
        }
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the OneBot WebSocket URL
    pub fn onebot_url(mut self, url: impl Into<String>) -> Self {
        self.config.network.onebot_ws_url = url.into();
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Replace the CLI process runner (defaults to [`ProcessInvoker`])
    pub fn runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn build(self) -> Result<Bridge> {
        self.config.validate()?;

        let runner: Arc<dyn ProcessRunner> = match self.runner {
            Some(runner) => runner,
            None => Arc::new(ProcessInvoker::from_config(&self.config)),
        };
        let invoker = Arc::new(RetryingInvoker::from_config(runner, &self.config.claude));

        Ok(Bridge {
            config: self.config,
            state: Arc::new(RwLock::new(BridgeState::Stopped)),
            invoker,
            observers: RwLock::new(self.observers),
            runtime: Mutex::new(None),
        })
    }
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
