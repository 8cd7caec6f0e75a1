use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::notify::{ExpiryNotification, Notifier, random_notification};
use crate::store::{KeyValueStore, StoreError, TIMER_STATE_KEY, get_typed, set_typed};
use crate::timer::model::{Category, DisplayState, TimerState, remaining_seconds};
use crate::timer::poller::{BackgroundPoller, PollOutcome, PollerOptions, TIMER_TASK_ID};

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("could not save the timer: {0}")]
    Persist(StoreError),
    #[error("could not read the timer: {0}")]
    Read(StoreError),
    #[error("could not clear the timer: {0}")]
    Clear(StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredExpiry {
    pub category: Category,
    pub notification: ExpiryNotification,
    pub delivered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryOutcome {
    Fired(FiredExpiry),
    NotYetDue(DisplayState),
    AlreadyHandled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerStatus {
    Idle,
    Running(DisplayState),
    Expired(FiredExpiry),
}

#[derive(Debug, Clone, Copy)]
struct CountdownView {
    category: Category,
    end_time_epoch_ms: i64,
    seconds_remaining: u64,
}

impl CountdownView {
    fn display(&self) -> DisplayState {
        DisplayState {
            category: self.category,
            seconds_remaining: self.seconds_remaining,
            end_time_epoch_ms: self.end_time_epoch_ms,
        }
    }
}

/// Owns the single countdown.
///
/// The persisted [`TimerState`] is the only source of truth. The view held
/// here is a display cache that each tick rebuilds from the absolute
/// deadline, so it never drifts however long ticks were suspended. Several
/// engines may run over one store (a foreground window and a background
/// poller); whichever sees the deadline first notifies and deletes the state,
/// and the others find it gone.
///
/// The read, notify and delete steps of [`TimerEngine::on_expiry`] are not
/// atomic across processes. Two contexts expiring in the same instant can
/// both notify. Store writes are also unlocked across processes: a `start`
/// landing between another process's read and rewrite of the store file is
/// lost. Both windows are accepted rather than locking the store.
pub struct TimerEngine {
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
    poller: Arc<dyn BackgroundPoller>,
    clock: Arc<dyn Clock>,
    poller_options: PollerOptions,
    view: Option<CountdownView>,
}

impl TimerEngine {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
        poller: Arc<dyn BackgroundPoller>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            poller,
            clock,
            poller_options: PollerOptions::default(),
            view: None,
        }
    }

    pub fn with_poller_options(mut self, options: PollerOptions) -> Self {
        self.poller_options = options;
        self
    }

    /// Persists a new deadline (replacing any running timer), registers the
    /// background check and starts the foreground view. Zero minutes is a
    /// valid timer that expires on the first tick or poll.
    pub fn start(
        &mut self,
        category: Category,
        duration_minutes: u32,
        owner_name: Option<&str>,
    ) -> Result<DisplayState, TimerError> {
        let now = self.clock.now_ms();
        let state = TimerState::starting_at(category, owner_name, now, duration_minutes);
        if let Err(err) = set_typed(self.store.as_ref(), TIMER_STATE_KEY, &state) {
            error!(category = %category, error = %err, "failed to persist timer");
            self.view = None;
            return Err(TimerError::Persist(err));
        }

        if let Err(err) = self.poller.register(TIMER_TASK_ID, &self.poller_options) {
            warn!(error = %err, "background check not registered; expiry relies on the foreground");
        }

        let display = self.show(&state, now);
        info!(
            category = %category,
            minutes = duration_minutes,
            end_time_ms = state.end_time_epoch_ms,
            "timer started"
        );
        Ok(display)
    }

    pub fn cancel(&mut self) -> Result<(), TimerError> {
        self.view = None;
        let removed = self.store.remove(TIMER_STATE_KEY);
        self.release_poller();
        if let Err(err) = removed {
            error!(error = %err, "failed to delete timer on cancel");
            return Err(TimerError::Clear(err));
        }
        info!("timer cancelled");
        Ok(())
    }

    /// Reconciles the view with the store when a foreground surface appears
    /// or regains focus. A deadline that passed while nobody was looking is
    /// expired right away instead of waiting for the next poll.
    pub fn resume(&mut self) -> Result<TimerStatus, TimerError> {
        let now = self.clock.now_ms();
        let state = match self.read_state() {
            Ok(state) => state,
            Err(err) => {
                self.view = None;
                error!(error = %err, "failed to read timer on resume");
                return Err(TimerError::Read(err));
            }
        };

        match state {
            None => {
                self.view = None;
                Ok(TimerStatus::Idle)
            }
            Some(state) if state.is_expired(now) => self.settle_expiry(),
            Some(state) => {
                if let Err(err) = self.poller.register(TIMER_TASK_ID, &self.poller_options) {
                    warn!(error = %err, "could not refresh background check registration");
                }
                let shown = self.show(&state, now);
                let seconds_remaining = shown.seconds_remaining;
                debug!(seconds_remaining, "timer resumed");
                Ok(TimerStatus::Running(shown))
            }
        }
    }

    /// One foreground tick. Re-reads the stored timer each time, so changes
    /// made by another context show up on the next tick.
    pub fn tick(&mut self) -> Result<TimerStatus, TimerError> {
        if self.view.is_none() {
            return Ok(TimerStatus::Idle);
        }

        let now = self.clock.now_ms();
        let state = match self.read_state() {
            Ok(state) => state,
            Err(err) => {
                self.view = None;
                error!(error = %err, "failed to read timer on tick");
                return Err(TimerError::Read(err));
            }
        };

        match state {
            None => {
                debug!("timer cleared elsewhere");
                self.view = None;
                self.release_poller();
                Ok(TimerStatus::Idle)
            }
            Some(state) if state.is_expired(now) => self.settle_expiry(),
            Some(state) => Ok(TimerStatus::Running(self.show(&state, now))),
        }
    }

    /// Shared by the foreground and the background poll. Safe to call any
    /// number of times: only the call that finds an expired state notifies.
    pub fn on_expiry(&self) -> Result<ExpiryOutcome, TimerError> {
        let now = self.clock.now_ms();
        let Some(state) = self.read_state().map_err(TimerError::Read)? else {
            debug!("no timer stored; expiry already handled");
            return Ok(ExpiryOutcome::AlreadyHandled);
        };

        if !state.is_expired(now) {
            return Ok(ExpiryOutcome::NotYetDue(DisplayState {
                category: state.category,
                seconds_remaining: state.seconds_remaining(now),
                end_time_epoch_ms: state.end_time_epoch_ms,
            }));
        }

        let notification = random_notification(state.category, state.owner_name.as_deref());
        let delivered = match self.notifier.dispatch(&notification) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "expiry notification failed; clearing timer anyway");
                false
            }
        };

        if let Err(err) = self.store.remove(TIMER_STATE_KEY) {
            error!(error = %err, "failed to delete expired timer");
            return Err(TimerError::Clear(err));
        }

        info!(category = %state.category, delivered, "wait period over");
        Ok(ExpiryOutcome::Fired(FiredExpiry {
            category: state.category,
            notification,
            delivered,
        }))
    }

    /// Background task body. Runs without any view state.
    pub fn poll(&self) -> PollOutcome {
        match self.on_expiry() {
            Ok(ExpiryOutcome::Fired(_)) => PollOutcome::NewData,
            Ok(ExpiryOutcome::NotYetDue(_) | ExpiryOutcome::AlreadyHandled) => {
                PollOutcome::NoNewData
            }
            Err(err) => {
                error!(error = %err, "background poll failed");
                PollOutcome::Failed
            }
        }
    }

    pub fn display_state(&self) -> Option<DisplayState> {
        self.view.map(|view| view.display())
    }

    fn show(&mut self, state: &TimerState, now: i64) -> DisplayState {
        let view = CountdownView {
            category: state.category,
            end_time_epoch_ms: state.end_time_epoch_ms,
            seconds_remaining: state.seconds_remaining(now),
        };
        self.view = Some(view);
        view.display()
    }

    fn settle_expiry(&mut self) -> Result<TimerStatus, TimerError> {
        let outcome = match self.on_expiry() {
            Ok(outcome) => outcome,
            Err(err) => {
                self.view = None;
                return Err(err);
            }
        };

        match outcome {
            ExpiryOutcome::Fired(fired) => {
                self.view = None;
                self.release_poller();
                Ok(TimerStatus::Expired(fired))
            }
            ExpiryOutcome::AlreadyHandled => {
                self.view = None;
                self.release_poller();
                Ok(TimerStatus::Idle)
            }
            // Another context replaced the timer; follow the stored one.
            ExpiryOutcome::NotYetDue(display) => {
                self.view = Some(CountdownView {
                    category: display.category,
                    end_time_epoch_ms: display.end_time_epoch_ms,
                    seconds_remaining: display.seconds_remaining,
                });
                Ok(TimerStatus::Running(display))
            }
        }
    }

    fn release_poller(&self) {
        if let Err(err) = self.poller.unregister(TIMER_TASK_ID) {
            warn!(error = %err, "failed to unregister background check");
        }
    }

    fn read_state(&self) -> Result<Option<TimerState>, StoreError> {
        match get_typed::<TimerState>(self.store.as_ref(), TIMER_STATE_KEY) {
            Ok(state) => Ok(state),
            Err(StoreError::Decode { source, .. }) => {
                warn!(error = %source, "discarding unreadable timer state");
                self.store.remove(TIMER_STATE_KEY)?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
