//! Process-wide run and stage statistics
//!
//! Counters are atomics; timing samples and per-stage tables sit behind
//! mutexes and are bounded so a long-lived process does not grow them
//! without limit.

use crate::pipeline::RunState;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Samples kept per timing series
const MAX_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

pub struct MetricsCollector {
    runs_started: AtomicU64,
    runs_in_flight: AtomicU64,
    max_in_flight: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    runs_timed_out: AtomicU64,
    runs_cancelled: AtomicU64,

    run_times: Mutex<VecDeque<u64>>,
    stage_stats: Mutex<HashMap<String, StageStats>>,

    started_at: AtomicU64,
}

#[derive(Debug, Default)]
struct StageStats {
    invocations: u64,
    failures: u64,
    times: VecDeque<u64>,
    last_completed: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_in_flight: AtomicU64::new(0),
            max_in_flight: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_timed_out: AtomicU64::new(0),
            runs_cancelled: AtomicU64::new(0),
            run_times: Mutex::new(VecDeque::new()),
            stage_stats: Mutex::new(HashMap::new()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    pub fn run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        let now = self.runs_in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_in_flight.fetch_max(now, Ordering::Relaxed);
    }

    /// Record a run reaching `terminal`. Non-terminal states are ignored.
    pub fn run_finished(&self, terminal: &RunState, duration: Duration) {
        let counter = match terminal {
            RunState::Succeeded => &self.runs_succeeded,
            RunState::Failed { .. } => &self.runs_failed,
            RunState::TimedOut { .. } => &self.runs_timed_out,
            RunState::Cancelled { .. } => &self.runs_cancelled,
            RunState::NotStarted | RunState::Running { .. } => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        // Saturate so a stray call cannot wrap the gauge
        let _ = self
            .runs_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));

        if let Ok(mut times) = self.run_times.lock() {
            push_bounded(&mut times, duration.as_millis() as u64);
        }
    }

    pub fn stage_completed(&self, stage: &str, duration: Duration, success: bool) {
        if let Ok(mut stats) = self.stage_stats.lock() {
            let entry = stats.entry(stage.to_string()).or_default();
            entry.invocations += 1;
            if !success {
                entry.failures += 1;
            }
            entry.last_completed = current_timestamp();
            push_bounded(&mut entry.times, duration.as_millis() as u64);
        }
    }

    /// Clear everything (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.runs_started,
            &self.runs_in_flight,
            &self.max_in_flight,
            &self.runs_succeeded,
            &self.runs_failed,
            &self.runs_timed_out,
            &self.runs_cancelled,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut times) = self.run_times.lock() {
            times.clear();
        }
        if let Ok(mut stats) = self.stage_stats.lock() {
            stats.clear();
        }
        self.started_at.store(current_timestamp(), Ordering::Relaxed);
    }

    /// Summarize one stage's samples (pure function)
    fn stage_snapshot(stats: &StageStats) -> StageSnapshot {
        let sorted = sorted(&stats.times);
        let success_rate = if stats.invocations == 0 {
            0.0
        } else {
            (stats.invocations - stats.failures) as f64 / stats.invocations as f64
        };

        StageSnapshot {
            invocations: stats.invocations,
            failures: stats.failures,
            success_rate,
            avg_time_ms: mean(&sorted),
            p95_time_ms: percentile(&sorted, 95.0),
            last_completed: stats.last_completed,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();

        let run_times = self
            .run_times
            .lock()
            .map(|t| sorted(&t))
            .unwrap_or_default();

        let stages = self
            .stage_stats
            .lock()
            .map(|stats| {
                stats
                    .iter()
                    .map(|(name, s)| (name.clone(), Self::stage_snapshot(s)))
                    .collect()
            })
            .unwrap_or_default();

        MetricsSnapshot {
            runs: RunMetrics {
                started: self.runs_started.load(Ordering::Relaxed),
                in_flight: self.runs_in_flight.load(Ordering::Relaxed),
                max_in_flight: self.max_in_flight.load(Ordering::Relaxed),
                succeeded: self.runs_succeeded.load(Ordering::Relaxed),
                failed: self.runs_failed.load(Ordering::Relaxed),
                timed_out: self.runs_timed_out.load(Ordering::Relaxed),
                cancelled: self.runs_cancelled.load(Ordering::Relaxed),
                avg_time_ms: mean(&run_times),
                p50_time_ms: percentile(&run_times, 50.0),
                p95_time_ms: percentile(&run_times, 95.0),
                p99_time_ms: percentile(&run_times, 99.0),
            },
            stages,
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub runs: RunMetrics,
    /// Keyed by stage name
    pub stages: BTreeMap<String, StageSnapshot>,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub started: u64,
    pub in_flight: u64,
    pub max_in_flight: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub avg_time_ms: f64,
    pub p50_time_ms: f64,
    pub p95_time_ms: f64,
    pub p99_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub invocations: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_time_ms: f64,
    pub p95_time_ms: f64,
    pub last_completed: u64,
}

fn push_bounded(samples: &mut VecDeque<u64>, value: u64) {
    samples.push_back(value);
    while samples.len() > MAX_SAMPLES {
        samples.pop_front();
    }
}

fn sorted(samples: &VecDeque<u64>) -> Vec<u64> {
    let mut v: Vec<u64> = samples.iter().copied().collect();
    v.sort_unstable();
    v
}

fn mean(data: &[u64]) -> f64 {
    if data.is_empty() {
        0.0
    } else {
        data.iter().sum::<u64>() as f64 / data.len() as f64
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Linear-interpolated percentile over sorted data
fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let rank = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[rank.floor() as usize] as f64;
    let upper = sorted_data[rank.ceil() as usize] as f64;
    lower + (upper - lower) * rank.fract()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_run_counters_by_terminal_state() {
        let collector = MetricsCollector::new();

        for terminal in [
            RunState::Succeeded,
            RunState::Failed { stage_index: 1 },
            RunState::TimedOut { stage_index: 0 },
            RunState::Cancelled { stage_index: 2 },
        ] {
            collector.run_started();
            collector.run_finished(&terminal, Duration::from_millis(100));
        }

        let snap = collector.snapshot();
        assert_eq!(snap.runs.started, 4);
        assert_eq!(snap.runs.in_flight, 0);
        assert_eq!(snap.runs.succeeded, 1);
        assert_eq!(snap.runs.failed, 1);
        assert_eq!(snap.runs.timed_out, 1);
        assert_eq!(snap.runs.cancelled, 1);
        assert!((snap.runs.avg_time_ms - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_non_terminal_finish_is_ignored() {
        let collector = MetricsCollector::new();
        collector.run_started();
        collector.run_finished(&RunState::Running { stage_index: 0 }, Duration::ZERO);

        let snap = collector.snapshot();
        assert_eq!(snap.runs.in_flight, 1);
        assert_eq!(snap.runs.succeeded + snap.runs.failed, 0);
    }

    #[test]
    fn test_in_flight_never_wraps() {
        let collector = MetricsCollector::new();
        collector.run_finished(&RunState::Succeeded, Duration::ZERO);
        assert_eq!(collector.snapshot().runs.in_flight, 0);
    }

    #[test]
    fn test_stage_stats() {
        let collector = MetricsCollector::new();
        collector.stage_completed("Analyzer", Duration::from_millis(200), true);
        collector.stage_completed("Analyzer", Duration::from_millis(400), false);
        collector.stage_completed("Reviewer", Duration::from_millis(50), true);

        let snap = collector.snapshot();
        let analyzer = &snap.stages["Analyzer"];
        assert_eq!(analyzer.invocations, 2);
        assert_eq!(analyzer.failures, 1);
        assert_eq!(analyzer.success_rate, 0.5);
        assert!((analyzer.avg_time_ms - 300.0).abs() < f64::EPSILON);
        assert_eq!(snap.stages["Reviewer"].failures, 0);
    }

    #[test]
    fn test_max_in_flight_tracks_peak() {
        let collector = Arc::new(MetricsCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&collector);
                thread::spawn(move || c.run_started())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = collector.snapshot();
        assert_eq!(snap.runs.in_flight, 8);
        assert_eq!(snap.runs.max_in_flight, 8);
    }

    #[test]
    fn test_samples_are_bounded() {
        let collector = MetricsCollector::new();
        for i in 0..1500u64 {
            collector.stage_completed("A", Duration::from_millis(i), true);
        }
        let stats = collector.stage_stats.lock().unwrap();
        assert_eq!(stats["A"].times.len(), MAX_SAMPLES);
        assert_eq!(stats["A"].times.front(), Some(&500));
    }

    #[test]
    fn test_percentile_calculation() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert!((percentile(&data, 50.0) - 5.5).abs() < 0.01);
        assert!((percentile(&data, 95.0) - 9.55).abs() < 0.01);
        assert_eq!(percentile(&data, 0.0), 1.0);
        assert_eq!(percentile(&data, 100.0), 10.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_reset_and_serialize() {
        let collector = MetricsCollector::new();
        collector.run_started();
        collector.stage_completed("A", Duration::from_millis(1), true);
        collector.reset();

        let snap = collector.snapshot();
        assert_eq!(snap.runs.started, 0);
        assert!(snap.stages.is_empty());

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["runs"]["in_flight"], 0);
    }
}
