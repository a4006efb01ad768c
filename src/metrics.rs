// Decode metrics module
//
// Lightweight counters shared by every engine that is handed the same Arc

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Loader metrics
///
/// Uses atomic operations so workers and owners can record without locks.
/// One instance can be shared by many engines and logged on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Number of `start` calls
    pub requests_started: AtomicU64,

    /// Decodes that produced an image (delivered or not)
    pub decodes_succeeded: AtomicU64,

    /// Decodes that failed or panicked
    pub decodes_failed: AtomicU64,

    /// Results thrown away because their request was stopped or superseded
    pub results_discarded: AtomicU64,

    /// Requests whose source could not be resolved
    pub sources_unavailable: AtomicU64,

    /// Total time spent inside decode functions in milliseconds
    pub total_decode_time_ms: AtomicU64,

    /// Total time workers waited for the decode arbiter in milliseconds
    pub total_arbiter_wait_ms: AtomicU64,

    /// Events delivered to at least one subscriber
    pub events_emitted: AtomicU64,

    /// Events sent while nobody was subscribed
    pub events_unobserved: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_started: AtomicU64::new(0),
            decodes_succeeded: AtomicU64::new(0),
            decodes_failed: AtomicU64::new(0),
            results_discarded: AtomicU64::new(0),
            sources_unavailable: AtomicU64::new(0),
            total_decode_time_ms: AtomicU64::new(0),
            total_arbiter_wait_ms: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            events_unobserved: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_request_started(&self) {
        self.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_succeeded(&self) {
        self.decodes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failed(&self) {
        self.decodes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result_discarded(&self) {
        self.results_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_unavailable(&self) {
        self.sources_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_time(&self, duration: Duration) {
        self.total_decode_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_arbiter_wait(&self, duration: Duration) {
        self.total_arbiter_wait_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_event_emitted(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_unobserved(&self) {
        self.events_unobserved.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average decode time in milliseconds over all finished decodes
    pub fn avg_decode_time_ms(&self) -> f64 {
        let total = self.total_decode_time_ms.load(Ordering::Relaxed);
        let count = self.decodes_succeeded.load(Ordering::Relaxed)
            + self.decodes_failed.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Loader Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Requests: {} started, {} unresolvable",
            self.requests_started.load(Ordering::Relaxed),
            self.sources_unavailable.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Decodes: {} succeeded, {} failed, {} discarded",
            self.decodes_succeeded.load(Ordering::Relaxed),
            self.decodes_failed.load(Ordering::Relaxed),
            self.results_discarded.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Total decode time: {:.2}s (avg: {:.2}ms), arbiter wait: {:.2}s",
            self.total_decode_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_decode_time_ms(),
            self.total_arbiter_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0
        );
        tracing::info!(
            "Events: {} emitted, {} unobserved",
            self.events_emitted.load(Ordering::Relaxed),
            self.events_unobserved.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.requests_started.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.decodes_failed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_decode_outcomes() {
        let metrics = Metrics::new();

        metrics.record_decode_succeeded();
        metrics.record_decode_succeeded();
        metrics.record_decode_failed();
        metrics.record_result_discarded();

        assert_eq!(metrics.decodes_succeeded.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.decodes_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.results_discarded.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_record_decode_time() {
        let metrics = Metrics::new();

        metrics.record_decode_succeeded();
        metrics.record_decode_time(Duration::from_millis(100));
        metrics.record_decode_failed();
        metrics.record_decode_time(Duration::from_millis(200));

        assert_eq!(metrics.total_decode_time_ms.load(Ordering::Relaxed), 300);
        assert_eq!(metrics.avg_decode_time_ms(), 150.0);
    }

    #[test]
    fn test_avg_decode_time_without_decodes() {
        assert_eq!(Metrics::new().avg_decode_time_ms(), 0.0);
    }

    #[test]
    fn test_uptime() {
        let metrics = Metrics::new();
        thread::sleep(Duration::from_millis(10));
        assert!(metrics.uptime().as_millis() >= 10);
    }

    #[test]
    fn test_event_and_request_counters() {
        let metrics = Metrics::new();

        metrics.record_request_started();
        metrics.record_source_unavailable();
        metrics.record_event_emitted();
        metrics.record_event_unobserved();
        metrics.record_arbiter_wait(Duration::from_millis(7));

        assert_eq!(metrics.requests_started.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.sources_unavailable.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.events_emitted.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.events_unobserved.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_arbiter_wait_ms.load(Ordering::Relaxed), 7);
    }
}
