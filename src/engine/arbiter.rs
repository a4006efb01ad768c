use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Process-wide decode serialization.
///
/// Decode libraries are not safe to call from several threads at once, even
/// though every engine owns its own worker. All engines that share one
/// `DecodeArbiter` (clones share the same region) therefore decode strictly
/// one at a time. There is no fairness guarantee between waiting workers.
///
/// Create one arbiter at startup and hand a clone to every engine. Tests
/// create their own so that they do not contend with each other.
#[derive(Clone, Default)]
pub struct DecodeArbiter {
    region: Arc<Mutex<()>>,
}

impl DecodeArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` inside the region, blocking until it is free.
    ///
    /// Returns the value of `f` and how long the caller waited to enter.
    /// Must be called from a plain thread, never from inside an async task.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> (R, Duration) {
        let waiting = Instant::now();
        let _guard = self.region.blocking_lock();
        let waited = waiting.elapsed();
        (f(), waited)
    }

    /// Whether some worker is inside the region right now
    pub fn is_busy(&self) -> bool {
        self.region.try_lock().is_err()
    }

    /// Whether both handles guard the same region
    pub fn shares_region_with(&self, other: &DecodeArbiter) -> bool {
        Arc::ptr_eq(&self.region, &other.region)
    }
}

impl fmt::Debug for DecodeArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeArbiter")
            .field("busy", &self.is_busy())
            .finish()
    }
}
