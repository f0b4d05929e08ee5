//! Staleness scoring
//!
//! A process's staleness is a weighted blend of three clamped terms:
//!
//! - inactivity: minutes since last focus over `max_inactivity_minutes`
//! - memory: resident gigabytes over `max_memory_gigabytes`
//! - idleness: `1 - cpu/100`, so an idle-but-resident process scores higher
//!   than one doing work
//!
//! Foreground and protected processes always score exactly 0. Weights are
//! not required to sum to 1; each term is clamped before weighting and the
//! total is clamped again, so any configuration yields a value in `[0, 1]`.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock};
use super::config::ScoringConfig;
use super::process::TrackedProcess;

/// Five-level staleness classification over half-open score bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StalenessLevel {
    /// [0.0, 0.2)
    Active,
    /// [0.2, 0.4)
    Recent,
    /// [0.4, 0.6)
    Idle,
    /// [0.6, 0.8)
    Stale,
    /// [0.8, 1.0]
    VeryStale,
}

impl StalenessLevel {
    pub fn from_score(score: f64) -> Self {
        let score = clamp01(score);
        if score < 0.2 {
            StalenessLevel::Active
        } else if score < 0.4 {
            StalenessLevel::Recent
        } else if score < 0.6 {
            StalenessLevel::Idle
        } else if score < 0.8 {
            StalenessLevel::Stale
        } else {
            StalenessLevel::VeryStale
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StalenessLevel::Active => "Active",
            StalenessLevel::Recent => "Recent",
            StalenessLevel::Idle => "Idle",
            StalenessLevel::Stale => "Stale",
            StalenessLevel::VeryStale => "Very Stale",
        }
    }
}

impl fmt::Display for StalenessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Clamp to `[0, 1]`; NaN becomes 0.
pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// `value / limit` clamped. A non-positive or non-finite limit saturates any
/// positive measurement.
fn ratio(value: f64, limit: f64) -> f64 {
    if limit.is_finite() && limit > 0.0 {
        clamp01(value / limit)
    } else if value > 0.0 {
        1.0
    } else {
        0.0
    }
}

fn weight(w: f64) -> f64 {
    if w.is_finite() {
        w
    } else {
        0.0
    }
}

/// Pure staleness score of `process` at `now`.
pub fn staleness_score(process: &TrackedProcess, config: &ScoringConfig, now: DateTime<Utc>) -> f64 {
    if process.is_foreground || process.is_protected() {
        return 0.0;
    }

    let inactive_minutes = process.inactive_for(now).num_milliseconds() as f64 / 60_000.0;
    let inactivity = ratio(inactive_minutes, config.max_inactivity_minutes);
    let memory = ratio(process.memory_gb(), config.max_memory_gigabytes);
    let cpu = 1.0 - clamp01(process.cpu_percent / 100.0);

    let total = weight(config.inactivity_weight) * inactivity
        + weight(config.memory_weight) * memory
        + weight(config.cpu_weight) * cpu;

    clamp01(total)
}

/// A process with its evaluated score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredProcess {
    pub process: TrackedProcess,
    pub score: f64,
    pub level: StalenessLevel,
    /// Seconds since the process last had focus
    pub inactive_secs: i64,
}

impl ScoredProcess {
    pub fn inactive_for(&self) -> Duration {
        Duration::seconds(self.inactive_secs)
    }

    fn cmp_rank(&self, other: &Self) -> Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.process.last_active_at.cmp(&other.process.last_active_at))
            .then_with(|| other.process.memory_bytes.cmp(&self.process.memory_bytes))
            .then_with(|| self.process.seq.cmp(&other.process.seq))
    }
}

/// Scores processes against the injected clock.
#[derive(Clone)]
pub struct StalenessScorer {
    clock: Arc<dyn Clock>,
}

impl StalenessScorer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn score(&self, process: &TrackedProcess, config: &ScoringConfig) -> f64 {
        staleness_score(process, config, self.clock.now())
    }

    pub fn classify(&self, score: f64) -> StalenessLevel {
        StalenessLevel::from_score(score)
    }

    pub fn is_flaggable(&self, process: &TrackedProcess, config: &ScoringConfig) -> bool {
        self.score(process, config) >= config.stale_threshold
    }

    pub fn evaluate(&self, process: &TrackedProcess, config: &ScoringConfig) -> ScoredProcess {
        self.evaluate_at(process, config, self.clock.now())
    }

    fn evaluate_at(&self, process: &TrackedProcess, config: &ScoringConfig, now: DateTime<Utc>) -> ScoredProcess {
        let score = staleness_score(process, config, now);
        ScoredProcess {
            process: process.clone(),
            score,
            level: StalenessLevel::from_score(score),
            inactive_secs: process.inactive_for(now).num_seconds(),
        }
    }

    /// Score every process against one instant and sort: score descending,
    /// then longer inactivity, then larger memory, then insertion order.
    pub fn rank(&self, processes: &[TrackedProcess], config: &ScoringConfig) -> Vec<ScoredProcess> {
        let now = self.clock.now();
        let mut scored: Vec<ScoredProcess> = processes
            .iter()
            .map(|p| self.evaluate_at(p, config, now))
            .collect();
        scored.sort_by(|a, b| a.cmp_rank(b));
        scored
    }

    /// Ranked processes whose score reaches the threshold.
    pub fn flagged(&self, processes: &[TrackedProcess], config: &ScoringConfig) -> Vec<ScoredProcess> {
        self.rank(processes, config)
            .into_iter()
            .filter(|s| s.score >= config.stale_threshold)
            .collect()
    }

    /// Sum of `memory_bytes` over the given processes that reach the threshold.
    pub fn reclaimable_bytes(&self, processes: &[TrackedProcess], config: &ScoringConfig) -> u64 {
        let now = self.clock.now();
        processes
            .iter()
            .filter(|p| staleness_score(p, config, now) >= config.stale_threshold)
            .map(|p| p.memory_bytes)
            .sum()
    }
}

impl Default for StalenessScorer {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}
