// Dispatcher: one alignment + tick loop that signals a worker once per minute

use super::clock::{Clock, SystemClock};
use crate::errors::DispatchError;
use crate::gateway::{WorkerGateway, WorkerReply, WorkerSignal};
use crate::telemetry;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Timing parameters for a dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Period between triggers once aligned
    pub tick_interval: Duration,
    /// Upper bound for a single dispatch; kept above `tick_interval`
    pub dispatch_timeout: Duration,
    /// Wall-clock boundary the first trigger snaps to
    pub alignment: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            dispatch_timeout: Duration::from_secs(65),
            alignment: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Aligning,
    Running,
    ShuttingDown,
    Stopped,
}

/// Time from `now` until the next `alignment` boundary on the UNIX epoch.
///
/// Exactly on a boundary, this is a full period: the current boundary has
/// already passed.
pub fn alignment_delay(now: DateTime<Utc>, alignment: Duration) -> Duration {
    let period = i64::try_from(alignment.as_micros()).unwrap_or(i64::MAX);
    if period <= 0 {
        return Duration::ZERO;
    }

    let elapsed_in_period = now.timestamp_micros().rem_euclid(period);
    Duration::from_micros((period - elapsed_in_period) as u64)
}

/// A zero tick interval cannot drive a periodic timer; fall back to the default
fn normalize_config(mut config: DispatcherConfig, name: &str) -> DispatcherConfig {
    if config.tick_interval.is_zero() {
        let fallback = DispatcherConfig::default().tick_interval;
        warn!(
            dispatcher = name,
            fallback_secs = fallback.as_secs(),
            "tick_interval of zero is not supported, using default"
        );
        config.tick_interval = fallback;
    }
    config
}

/// Owns one background loop that triggers the worker on every tick.
///
/// The loop starts as soon as the dispatcher is constructed and runs until
/// `shutdown` is called (or the dispatcher is dropped). Dispatch failures are
/// logged and never end the loop.
pub struct Dispatcher {
    id: Uuid,
    name: String,
    config: DispatcherConfig,
    worker: Arc<dyn WorkerGateway>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_once: OnceCell<()>,
    state: Arc<watch::Sender<DispatcherState>>,
}

impl Dispatcher {
    /// Construct a dispatcher and start its loop on the current runtime
    pub fn start(
        name: impl Into<String>,
        worker: Arc<dyn WorkerGateway>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        Self::start_with_clock(name, worker, config, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        name: impl Into<String>,
        worker: Arc<dyn WorkerGateway>,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        let name = name.into();
        let config = normalize_config(config, &name);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (state, _) = watch::channel(DispatcherState::Aligning);
        let state = Arc::new(state);

        let tick_loop = TickLoop {
            id,
            name: name.clone(),
            config: config.clone(),
            worker: worker.clone(),
            clock,
            state: state.clone(),
        };
        let task = tokio::spawn(tick_loop.run(shutdown_rx));

        info!(dispatcher = %name, dispatcher_id = %id, "Dispatcher started");

        Arc::new(Self {
            id,
            name,
            config,
            worker,
            shutdown_tx,
            task: Mutex::new(Some(task)),
            shutdown_once: OnceCell::new(),
            state,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn worker(&self) -> &Arc<dyn WorkerGateway> {
        &self.worker
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == DispatcherState::Stopped
    }

    /// Stop the loop and wait until its task has exited.
    ///
    /// No trigger fires after this returns. Repeated or concurrent calls are
    /// cheap: the shutdown runs once and every caller waits for it.
    #[instrument(skip(self), fields(dispatcher = %self.name, dispatcher_id = %self.id))]
    pub async fn shutdown(&self) {
        self.shutdown_once
            .get_or_init(|| async {
                info!("Shutting down dispatcher");
                self.state.send_replace(DispatcherState::ShuttingDown);

                // The loop may already be gone if its task panicked
                let _ = self.shutdown_tx.send(());

                if let Some(task) = self.task.lock().await.take() {
                    if let Err(e) = task.await {
                        error!(error = %e, "Dispatcher loop ended abnormally");
                    }
                }

                self.state.send_replace(DispatcherState::Stopped);
                info!("Dispatcher shut down");
            })
            .await;
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

struct TickLoop {
    id: Uuid,
    name: String,
    config: DispatcherConfig,
    worker: Arc<dyn WorkerGateway>,
    clock: Arc<dyn Clock>,
    state: Arc<watch::Sender<DispatcherState>>,
}

impl TickLoop {
    #[instrument(skip_all, fields(dispatcher = %self.name, dispatcher_id = %self.id))]
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let delay = alignment_delay(self.clock.now(), self.config.alignment);
        let aligned_at = Instant::now() + delay;

        info!(sleep_ms = delay.as_millis() as u64, "Aligned to next minute");

        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested during alignment");
                    return;
                }
                _ = sleep_until(aligned_at) => {}
            }
        }

        self.state.send_replace(DispatcherState::Running);

        // The :00 second mark
        self.trigger().await;

        // Ticks are measured from the alignment instant and never realigned
        let mut ticker = interval_at(
            aligned_at + self.config.tick_interval,
            self.config.tick_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Shutting down ticker loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.trigger().await;
                }
            }
        }
    }

    async fn trigger(&self) {
        debug!("Tick received, requesting worker");

        let deadline = self.config.dispatch_timeout;
        let started = Instant::now();

        // Bounded here as well in case the gateway ignores its deadline
        let outcome = match timeout(deadline, self.worker.send(deadline, WorkerSignal::Tick)).await
        {
            Ok(result) => result.and_then(WorkerReply::into_result),
            Err(_) => Err(DispatchError::Timeout(deadline)),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                debug!(elapsed_ms = elapsed.as_millis() as u64, "Worker acknowledged tick");
                telemetry::record_trigger_success(&self.name, elapsed);
            }
            Err(e) => {
                error!(error = %e, reason = e.kind(), "Failed to request worker");
                telemetry::record_trigger_failure(&self.name, e.kind(), elapsed);
            }
        }
    }
}
