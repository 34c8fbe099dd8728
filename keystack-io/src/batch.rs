//! Delivery batching on a reactor timer.
//!
//! Without a binding every item is delivered as soon as it is pushed. Once
//! attached to an [`IoBinding`], items queue up and a periodic timer
//! delivers them in push order, each distinct item once per tick.

use keystack_plugin_host::{IoBinding, IoError, TimerId, TimerOperation};
use keystack_types::{Key, KeySet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Tick used when `user/flush/interval` is missing or not a positive number
/// of milliseconds.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Reads `user/flush/interval` (milliseconds) from a plugin configuration.
pub fn flush_interval(config: &KeySet) -> Duration {
    config
        .resolve_str("user/flush/interval")
        .and_then(Key::string)
        .and_then(|ms| ms.parse::<u64>().ok())
        .filter(|&ms| ms > 0)
        .map_or(DEFAULT_FLUSH_INTERVAL, Duration::from_millis)
}

type Attachment = Option<(Arc<dyn IoBinding>, TimerId)>;

pub struct Batch<T> {
    deliver: Box<dyn Fn(T) + Send + Sync>,
    pending: Mutex<Vec<T>>,
    reactor: Mutex<Attachment>,
}

impl<T: PartialEq + Send + 'static> Batch<T> {
    pub fn new(deliver: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Box::new(deliver),
            pending: Mutex::new(Vec::new()),
            reactor: Mutex::new(None),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Vec<T>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reactor(&self) -> MutexGuard<'_, Attachment> {
        self.reactor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_attached(&self) -> bool {
        self.reactor().is_some()
    }

    /// Number of items waiting for the next tick.
    pub fn queued(&self) -> usize {
        self.pending().len()
    }

    /// Delivers `item` now when detached, otherwise queues it unless an
    /// equal item is already waiting.
    pub fn push(&self, item: T) {
        {
            let reactor = self.reactor();
            if reactor.is_some() {
                let mut pending = self.pending();
                if !pending.contains(&item) {
                    pending.push(item);
                }
                return;
            }
        }
        (self.deliver)(item);
    }

    /// Delivers everything queued. Returns the number of items delivered.
    pub fn flush(&self) -> usize {
        let drained: Vec<T> = self.pending().drain(..).collect();
        let count = drained.len();
        for item in drained {
            (self.deliver)(item);
        }
        count
    }

    /// Starts delivering on a timer of `binding` every `interval`. A
    /// previous attachment is detached first.
    pub fn attach(
        self: &Arc<Self>,
        binding: Arc<dyn IoBinding>,
        interval: Duration,
    ) -> Result<TimerId, IoError> {
        self.detach();
        let batch = Arc::downgrade(self);
        let id = binding.add_timer(TimerOperation::new(interval, move || {
            if let Some(batch) = batch.upgrade() {
                batch.flush();
            }
        }))?;
        debug!(timer = %id, ?interval, "batch attached to reactor");
        *self.reactor() = Some((binding, id));
        Ok(id)
    }

    /// Removes the timer and delivers what is still queued. Later pushes
    /// are delivered immediately.
    pub fn detach(&self) {
        let attached = self.reactor().take();
        if let Some((binding, id)) = attached {
            if let Err(e) = binding.remove_timer(id) {
                debug!(timer = %id, error = %e, "batch timer already gone");
            }
        }
        self.flush();
    }
}

impl<T> Drop for Batch<T> {
    fn drop(&mut self) {
        let attached = self
            .reactor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((binding, id)) = attached {
            if binding.remove_timer(id).is_err() {
                debug!(timer = %id, "batch timer already gone");
            }
        }
    }
}
