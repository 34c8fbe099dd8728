//! I/O reactor binding contract.
//!
//! Transports that need to wake up periodically register timers through an
//! [`IoBinding`] instead of talking to an event loop directly. The store
//! hands its binding to plugins exporting `setIoBinding`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("unknown timer {0}")]
    UnknownTimer(TimerId),

    #[error("timer interval must be non-zero")]
    ZeroInterval,

    #[error("no runtime is running")]
    NoRuntime,

    #[error("binding has been cleaned up")]
    Closed,
}

pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// A periodic callback and its schedule.
#[derive(Clone)]
pub struct TimerOperation {
    interval: Duration,
    enabled: bool,
    callback: TimerCallback,
}

impl TimerOperation {
    /// An enabled timer firing every `interval`, first after one interval.
    pub fn new(interval: Duration, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            interval,
            enabled: true,
            callback: Arc::new(callback),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn callback(&self) -> TimerCallback {
        Arc::clone(&self.callback)
    }
}

impl fmt::Debug for TimerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerOperation")
            .field("interval", &self.interval)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event loop abstraction used by transports.
pub trait IoBinding: Send + Sync {
    fn add_timer(&self, timer: TimerOperation) -> Result<TimerId, IoError>;

    /// Replaces the schedule of an existing timer.
    fn update_timer(&self, id: TimerId, timer: TimerOperation) -> Result<(), IoError>;

    fn remove_timer(&self, id: TimerId) -> Result<(), IoError>;

    /// Stops every timer. The binding accepts no new timers afterwards.
    fn cleanup(&self);
}
