use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::store::{BACKGROUND_TASK_KEY, KeyValueStore, StoreError, get_typed, set_typed};
use crate::timer::engine::TimerEngine;

pub const TIMER_TASK_ID: &str = "TIMER_TASK";
pub const DEFAULT_MINIMUM_INTERVAL_SECS: u64 = 60;
const STOP_CHECK_SLICE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerOptions {
    pub minimum_interval_seconds: u64,
    pub persist_across_restart: bool,
    pub run_on_boot: bool,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            minimum_interval_seconds: DEFAULT_MINIMUM_INTERVAL_SECS,
            persist_across_restart: true,
            run_on_boot: true,
        }
    }
}

/// Result handed back to whatever runs the background task, as a hint for
/// how useful the invocation was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    NoNewData,
    NewData,
    Failed,
}

impl PollOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PollOutcome::NoNewData => "NoNewData",
            PollOutcome::NewData => "NewData",
            PollOutcome::Failed => "Failed",
        }
    }
}

/// One registration slot for the periodic expiry check. Registering an
/// already registered task replaces it.
pub trait BackgroundPoller: Send + Sync {
    fn register(&self, task_id: &str, options: &PollerOptions) -> Result<(), StoreError>;
    fn unregister(&self, task_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRegistration {
    pub task_id: String,
    #[serde(flatten)]
    pub options: PollerOptions,
    pub registered_at_ms: i64,
}

/// Keeps the registration in the shared store so a separate `daemon` or
/// `poll` process can find it after the foreground process has exited.
pub struct StoreTaskRegistry {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl StoreTaskRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn registration(&self) -> Result<Option<TaskRegistration>, StoreError> {
        get_typed(self.store.as_ref(), BACKGROUND_TASK_KEY)
    }
}

impl BackgroundPoller for StoreTaskRegistry {
    fn register(&self, task_id: &str, options: &PollerOptions) -> Result<(), StoreError> {
        let registration = TaskRegistration {
            task_id: task_id.to_string(),
            options: *options,
            registered_at_ms: self.clock.now_ms(),
        };
        set_typed(self.store.as_ref(), BACKGROUND_TASK_KEY, &registration)?;
        debug!(
            task_id,
            interval_secs = options.minimum_interval_seconds,
            "background task registered"
        );
        Ok(())
    }

    fn unregister(&self, task_id: &str) -> Result<(), StoreError> {
        match self.registration() {
            Ok(Some(existing)) if existing.task_id != task_id => {
                debug!(
                    task_id,
                    registered = %existing.task_id,
                    "unregister skipped for other task"
                );
                Ok(())
            }
            Ok(None) => Ok(()),
            Ok(Some(_)) | Err(StoreError::Decode { .. }) => {
                self.store.remove(BACKGROUND_TASK_KEY)?;
                debug!(task_id, "background task unregistered");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DaemonStats {
    pub polls: u64,
    pub fired: u64,
    pub failed: u64,
}

/// Runs the registered background task until `stop` is set.
///
/// Each iteration re-reads the registration, so a `cancel` in another
/// process idles the loop and a later `start` wakes it up again. Polls are
/// spaced by `poll_interval` but never closer than the registered minimum.
/// The loop never unregisters anything, including after a failed poll. A
/// malformed registration still counts as registered.
pub fn run_poll_daemon(
    engine: &TimerEngine,
    registry: &StoreTaskRegistry,
    poll_interval: Duration,
    stop: &AtomicBool,
) -> DaemonStats {
    let mut stats = DaemonStats::default();
    while !stop.load(Ordering::Relaxed) {
        let minimum_interval_secs = match registry.registration() {
            Ok(Some(registration)) => Some(registration.options.minimum_interval_seconds),
            Ok(None) => {
                debug!("no background task registered");
                None
            }
            // A broken record must not stall expiry; poll with the defaults.
            Err(StoreError::Decode { source, .. }) => {
                warn!(error = %source, "background task registration is malformed; polling anyway");
                Some(DEFAULT_MINIMUM_INTERVAL_SECS)
            }
            Err(err) => {
                warn!(error = %err, "could not read background task registration");
                stats.failed += 1;
                None
            }
        };

        let interval = match minimum_interval_secs {
            Some(minimum) => {
                let outcome = engine.poll();
                stats.polls += 1;
                match outcome {
                    PollOutcome::NewData => stats.fired += 1,
                    PollOutcome::Failed => stats.failed += 1,
                    PollOutcome::NoNewData => {}
                }
                info!(outcome = outcome.as_str(), "background poll finished");
                poll_interval.max(Duration::from_secs(minimum))
            }
            None => poll_interval,
        };
        sleep_unless_stopped(interval, stop);
    }
    stats
}

pub fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(deadline.saturating_duration_since(now).min(STOP_CHECK_SLICE));
    }
}
