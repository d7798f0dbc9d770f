//! Execution profiling
//!
//! Per-run counters keyed by runnable name:
//! - Call count
//! - Error count
//! - Cumulative wall time

use dashmap::DashMap;
use std::fmt::Write as _;
use std::time::Duration;

/// Counters for a single runnable name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileEntry {
    /// Completed invocations
    pub calls: u64,
    /// Invocations that returned an error
    pub errors: u64,
    /// Cumulative wall time
    pub total_time: Duration,
}

impl ProfileEntry {
    /// Mean wall time per call
    #[must_use]
    pub fn mean_time(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        let calls = u32::try_from(self.calls).unwrap_or(u32::MAX);
        self.total_time / calls
    }
}

/// Execution profile of a root run
///
/// Shared by every context derived from the root; there is no process-wide
/// registry.
#[derive(Debug, Default)]
pub struct ExecutionProfile {
    entries: DashMap<String, ProfileEntry>,
}

impl ExecutionProfile {
    /// Create empty profile
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation
    pub fn record(&self, name: &str, elapsed: Duration, failed: bool) {
        let mut entry = self.entries.entry(name.to_string()).or_default();
        entry.calls += 1;
        entry.total_time += elapsed;
        if failed {
            entry.errors += 1;
        }
    }

    /// Counters for one runnable name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ProfileEntry> {
        self.entries.get(name).map(|entry| *entry)
    }

    /// Number of distinct runnable names recorded
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All counters, sorted by name
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, ProfileEntry)> {
        let mut entries: Vec<(String, ProfileEntry)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Render counters as a text table
    #[must_use]
    pub fn report(&self) -> String {
        let snapshot = self.snapshot();
        let width = snapshot
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0)
            .max("runnable".len());

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<width$}  {:>8}  {:>8}  {:>12}  {:>12}",
            "runnable", "calls", "errors", "total_ms", "mean_ms"
        );
        for (name, entry) in &snapshot {
            let _ = writeln!(
                out,
                "{:<width$}  {:>8}  {:>8}  {:>12.3}  {:>12.3}",
                name,
                entry.calls,
                entry.errors,
                entry.total_time.as_secs_f64() * 1000.0,
                entry.mean_time().as_secs_f64() * 1000.0,
            );
        }
        out
    }

    /// Clear all counters
    pub fn reset(&self) {
        self.entries.clear();
    }
}
