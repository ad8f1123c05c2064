use pipeline::{PipelineError, PipelineRun, UsageMetrics};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

pub struct Metrics {
    // Counters
    total_runs: AtomicUsize,
    successful_runs: AtomicUsize,
    irrelevant_runs: AtomicUsize,
    failed_runs: AtomicUsize,
    invalid_requests: AtomicUsize,
    cancelled_runs: AtomicUsize,
    verification_fallbacks: AtomicUsize,
    cache_hits: AtomicUsize,

    // Usage
    total_tokens: AtomicU64,
    total_cost_cents: AtomicU64,

    // Timing (in microseconds)
    total_run_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_runs: AtomicUsize::new(0),
            successful_runs: AtomicUsize::new(0),
            irrelevant_runs: AtomicUsize::new(0),
            failed_runs: AtomicUsize::new(0),
            invalid_requests: AtomicUsize::new(0),
            cancelled_runs: AtomicUsize::new(0),
            verification_fallbacks: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            total_tokens: AtomicU64::new(0),
            total_cost_cents: AtomicU64::new(0),
            total_run_time_us: AtomicU64::new(0),
        })
    }

    fn record_usage(&self, usage: &UsageMetrics) {
        self.total_tokens.fetch_add(usage.total_tokens, Ordering::Relaxed);
        self.total_cost_cents
            .fetch_add((usage.cost * 100.0).round() as u64, Ordering::Relaxed);
    }

    fn record_time(&self, duration: Duration) {
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        self.total_run_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a finished run, batch or streamed, successful or not.
    pub fn record_run(&self, outcome: &Result<PipelineRun, PipelineError>, duration: Duration) {
        self.record_time(duration);
        match outcome {
            Ok(run) => {
                self.successful_runs.fetch_add(1, Ordering::Relaxed);
                if !run.verified {
                    self.verification_fallbacks.fetch_add(1, Ordering::Relaxed);
                }
                self.record_usage(&run.usage);
            }
            Err(e) => {
                let counter = match e {
                    PipelineError::Irrelevant { .. } => &self.irrelevant_runs,
                    PipelineError::InvalidRequest(_) => &self.invalid_requests,
                    PipelineError::Cancelled { .. } => &self.cancelled_runs,
                    _ => &self.failed_runs,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                if let Some(usage) = e.usage() {
                    self.record_usage(usage);
                }
            }
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let runs = self.total_runs.load(Ordering::Relaxed);
        let total_us = self.total_run_time_us.load(Ordering::Relaxed) as f64;
        MetricsSnapshot {
            total_runs: runs,
            successful_runs: self.successful_runs.load(Ordering::Relaxed),
            irrelevant_runs: self.irrelevant_runs.load(Ordering::Relaxed),
            failed_runs: self.failed_runs.load(Ordering::Relaxed),
            invalid_requests: self.invalid_requests.load(Ordering::Relaxed),
            cancelled_runs: self.cancelled_runs.load(Ordering::Relaxed),
            verification_fallbacks: self.verification_fallbacks.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            total_cost: self.total_cost_cents.load(Ordering::Relaxed) as f64 / 100.0,
            avg_run_time_ms: if runs > 0 {
                total_us / runs as f64 / 1000.0 // Convert to ms
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub irrelevant_runs: usize,
    pub failed_runs: usize,
    pub invalid_requests: usize,
    pub cancelled_runs: usize,
    pub verification_fallbacks: usize,
    pub cache_hits: usize,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub avg_run_time_ms: f64,
}
