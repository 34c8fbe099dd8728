//! Tokio-backed reactor binding.
//!
//! [`TokioBinding`] runs each enabled timer as a task on a tokio runtime.

use keystack_plugin_host::{IoBinding, IoError, TimerId, TimerOperation};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

struct TimerSlot {
    operation: TimerOperation,
    task: Option<JoinHandle<()>>,
}

impl TimerSlot {
    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub struct TokioBinding {
    handle: Handle,
    next_id: AtomicU64,
    timers: Mutex<HashMap<TimerId, TimerSlot>>,
    closed: AtomicBool,
}

impl TokioBinding {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            next_id: AtomicU64::new(0),
            timers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Binds to the runtime the caller is running on.
    pub fn current() -> Result<Self, IoError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| IoError::NoRuntime)
    }

    /// Number of registered timers, enabled or not.
    pub fn timer_count(&self) -> usize {
        self.timers().len()
    }

    /// Current schedule of a registered timer.
    pub fn timer(&self, id: TimerId) -> Option<TimerOperation> {
        self.timers().get(&id).map(|slot| slot.operation.clone())
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<TimerId, TimerSlot>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_open(&self) -> Result<(), IoError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IoError::Closed);
        }
        Ok(())
    }

    fn start(&self, id: TimerId, operation: &TimerOperation) -> Result<Option<JoinHandle<()>>, IoError> {
        if operation.interval().is_zero() {
            return Err(IoError::ZeroInterval);
        }
        if !operation.is_enabled() {
            debug!(timer = %id, "timer registered disabled");
            return Ok(None);
        }

        let interval = operation.interval();
        let callback = operation.callback();
        let task = self.handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                callback();
            }
        });
        debug!(timer = %id, interval_ms = interval.as_millis() as u64, "timer started");
        Ok(Some(task))
    }
}

impl IoBinding for TokioBinding {
    fn add_timer(&self, timer: TimerOperation) -> Result<TimerId, IoError> {
        self.check_open()?;
        let id = TimerId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let task = self.start(id, &timer)?;
        self.timers().insert(
            id,
            TimerSlot {
                operation: timer,
                task,
            },
        );
        Ok(id)
    }

    fn update_timer(&self, id: TimerId, timer: TimerOperation) -> Result<(), IoError> {
        self.check_open()?;
        let mut timers = self.timers();
        let slot = timers.get_mut(&id).ok_or(IoError::UnknownTimer(id))?;
        let task = self.start(id, &timer)?;
        slot.stop();
        slot.operation = timer;
        slot.task = task;
        Ok(())
    }

    fn remove_timer(&self, id: TimerId) -> Result<(), IoError> {
        let mut slot = self.timers().remove(&id).ok_or(IoError::UnknownTimer(id))?;
        slot.stop();
        debug!(timer = %id, "timer removed");
        Ok(())
    }

    fn cleanup(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut timers = self.timers();
        for slot in timers.values_mut() {
            slot.stop();
        }
        debug!(timers = timers.len(), "binding cleaned up");
        timers.clear();
    }
}

impl Drop for TokioBinding {
    fn drop(&mut self) {
        for slot in self.timers().values_mut() {
            slot.stop();
        }
    }
}
