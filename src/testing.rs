//! In-memory doubles for the engine's collaborators.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use serde_json::Value;

use crate::clock::Clock;
use crate::notify::{ExpiryNotification, NotifyError, Notifier};
use crate::store::{KeyValueStore, StoreError};
use crate::timer::poller::{BackgroundPoller, PollerOptions};

fn simulated(message: &str) -> StoreError {
    StoreError::Io {
        path: PathBuf::from("memory"),
        source: io::Error::other(message.to_string()),
    }
}

pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, delta_secs: i64) {
        self.advance_ms(delta_secs * 1_000);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
    failing_reads: AtomicBool,
    failing_writes: AtomicBool,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.entries.lock().expect("store lock").len()
    }

    pub fn raw(&self, key: &str) -> Option<Value> {
        self.entries.lock().expect("store lock").get(key).cloned()
    }

    pub fn fail_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(simulated("simulated write failure"));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(simulated("simulated read failure"));
        }
        Ok(self.raw(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.check_write()?;
        self.entries
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_write()?;
        self.entries
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.check_write()?;
        self.entries.lock().map_err(|_| StoreError::Poisoned)?.clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<ExpiryNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().expect("notifier lock").len()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Notifier for RecordingNotifier {
    fn dispatch(&self, notification: &ExpiryNotification) -> Result<(), NotifyError> {
        // Attempts are recorded even when delivery fails.
        self.sent
            .lock()
            .expect("notifier lock")
            .push(notification.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Backend("simulated failure".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPoller {
    registered: Mutex<Option<(String, PollerOptions)>>,
    register_calls: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingPoller {
    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self) -> bool {
        self.registered.lock().expect("poller lock").is_some()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl BackgroundPoller for RecordingPoller {
    fn register(&self, task_id: &str, options: &PollerOptions) -> Result<(), StoreError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(simulated("scheduler refused"));
        }
        *self.registered.lock().expect("poller lock") = Some((task_id.to_string(), *options));
        Ok(())
    }

    fn unregister(&self, task_id: &str) -> Result<(), StoreError> {
        let mut registered = self.registered.lock().expect("poller lock");
        if registered.as_ref().is_some_and(|(id, _)| id == task_id) {
            *registered = None;
        }
        Ok(())
    }
}
