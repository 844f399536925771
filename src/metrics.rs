//! Per-capability execution metrics
//!
//! In-process counters in the same spirit as a telemetry collector: one
//! coarse lock, monotonic updates, a flattened human-readable snapshot.
//! Counts are never rolled back.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// Lifetime counters for one capability name
#[derive(Debug, Clone, Default)]
pub struct CapabilityMetrics {
    pub name: String,
    pub call_count: u64,
    pub total_duration: Duration,
    pub error_count: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub last_called_at: Option<DateTime<Utc>>,
}

/// Flattened, report-friendly view of one capability's metrics
#[derive(Debug, Clone)]
pub struct CapabilityStats {
    pub name: String,
    pub call_count: u64,
    pub average_duration: Duration,
    pub error_count: u64,
    pub cache_hit_rate: f64,
}

impl fmt::Display for CapabilityStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} calls, avg {}ms, {} errors, {:.0}% cache hits",
            self.name,
            self.call_count,
            self.average_duration.as_millis(),
            self.error_count,
            self.cache_hit_rate * 100.0,
        )
    }
}

/// Collector for all capability metrics
#[derive(Default)]
pub struct MetricsRegistry {
    metrics: Mutex<HashMap<String, CapabilityMetrics>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hit. Counts as a call; no execution happened.
    pub fn record_cache_hit(&self, name: &str) {
        self.update(name, |m| {
            m.call_count += 1;
            m.cache_hits += 1;
            m.last_called_at = Some(Utc::now());
        });
    }

    /// Record a successful fresh execution (a cache miss by definition).
    pub fn record_success(&self, name: &str, duration: Duration) {
        self.update(name, |m| {
            m.call_count += 1;
            m.cache_misses += 1;
            m.total_duration += duration;
            m.last_called_at = Some(Utc::now());
        });
    }

    /// Record a failed execution. Failures never touch the cache counters.
    pub fn record_failure(&self, name: &str, duration: Duration) {
        self.update(name, |m| {
            m.call_count += 1;
            m.error_count += 1;
            m.total_duration += duration;
            m.last_called_at = Some(Utc::now());
        });
    }

    /// Metrics for one capability, if it has been called
    pub fn get(&self, name: &str) -> Option<CapabilityMetrics> {
        self.metrics
            .lock()
            .ok()
            .and_then(|m| m.get(name).cloned())
    }

    /// Flattened stats for every capability, sorted by name
    pub fn snapshot(&self) -> Vec<CapabilityStats> {
        let metrics = match self.metrics.lock() {
            Ok(m) => m,
            Err(_) => return Vec::new(),
        };

        let mut stats: Vec<CapabilityStats> = metrics
            .values()
            .map(|m| {
                let executed = m.call_count.saturating_sub(m.cache_hits);
                let average_duration = if executed == 0 {
                    Duration::ZERO
                } else {
                    m.total_duration / executed as u32
                };
                let lookups = m.cache_hits + m.cache_misses;
                let cache_hit_rate = if lookups == 0 {
                    0.0
                } else {
                    m.cache_hits as f64 / lookups as f64
                };
                CapabilityStats {
                    name: m.name.clone(),
                    call_count: m.call_count,
                    average_duration,
                    error_count: m.error_count,
                    cache_hit_rate,
                }
            })
            .collect();

        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Human-readable status report
    pub fn report(&self) -> String {
        let stats = self.snapshot();
        if stats.is_empty() {
            return "No capability calls recorded.".to_string();
        }
        stats
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut CapabilityMetrics)) {
        if let Ok(mut metrics) = self.metrics.lock() {
            let entry = metrics
                .entry(name.to_string())
                .or_insert_with(|| CapabilityMetrics {
                    name: name.to_string(),
                    ..Default::default()
                });
            f(entry);
        }
    }
}
