use crate::time::UnixNanos;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Injected wall-clock source. Stability matters more than monotonicity:
/// target ranges derived from two reads in the same run must agree on order.
pub type NowFn = Arc<dyn Fn() -> UnixNanos + Send + Sync>;

pub fn system_now() -> UnixNanos {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    UnixNanos::from_nanos(since_epoch.as_nanos() as i64)
}

#[derive(Clone)]
pub struct ClockOptions {
    now_fn: NowFn,
}

impl ClockOptions {
    pub fn new() -> Self {
        Self {
            now_fn: Arc::new(system_now),
        }
    }

    pub fn with_now_fn(mut self, now_fn: NowFn) -> Self {
        self.now_fn = now_fn;
        self
    }

    pub fn now_fn(&self) -> NowFn {
        self.now_fn.clone()
    }

    pub fn now(&self) -> UnixNanos {
        (self.now_fn)()
    }
}

impl Default for ClockOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClockOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockOptions").finish_non_exhaustive()
    }
}
