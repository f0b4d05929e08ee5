//! Cleanup coordination
//!
//! Turns scored candidates into graceful quit requests. Protected processes
//! are filtered twice: they score 0 and never become candidates, and
//! `execute_cleanup` skips them again in case the caller holds a stale
//! selection. A failure for one process never aborts the batch.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::config::{AppSweepConfig, ScoringConfig};
use super::process::{ProcessKey, TrackedProcess};
use super::scorer::{ScoredProcess, StalenessScorer};
use crate::platform::ProcessTerminator;

/// Per-process result of a cleanup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleanupStatus {
    /// Quit request sent; exit is observed later via the registry
    Requested,
    /// Dry-run mode, nothing sent
    DryRun,
    SkippedProtected,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub id: ProcessKey,
    pub display_name: String,
    pub memory_bytes: u64,
    pub status: CleanupStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub outcomes: Vec<CleanupOutcome>,
}

impl CleanupReport {
    /// Number of processes a quit request was successfully sent to.
    pub fn requested_count(&self) -> usize {
        self.count(|s| matches!(s, CleanupStatus::Requested))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, CleanupStatus::SkippedProtected))
    }

    pub fn failures(&self) -> Vec<&CleanupOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CleanupStatus::Failed(_)))
            .collect()
    }

    /// Memory held by processes that were asked to quit.
    pub fn requested_bytes(&self) -> u64 {
        self.outcomes
            .iter()
            .filter(|o| o.status == CleanupStatus::Requested)
            .map(|o| o.memory_bytes)
            .sum()
    }

    fn count(&self, f: impl Fn(&CleanupStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(&o.status)).count()
    }
}

/// Ranked, flaggable candidates with the caller's current selection.
///
/// Everything starts selected; the caller narrows it down.
#[derive(Debug, Clone, Default)]
pub struct CleanupSelection {
    candidates: Vec<ScoredProcess>,
    selected: HashSet<ProcessKey>,
}

impl CleanupSelection {
    pub fn new(candidates: Vec<ScoredProcess>) -> Self {
        let selected = candidates.iter().map(|c| c.process.id.clone()).collect();
        Self { candidates, selected }
    }

    pub fn candidates(&self) -> &[ScoredProcess] {
        &self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn is_selected(&self, key: &ProcessKey) -> bool {
        self.selected.contains(key)
    }

    pub fn select(&mut self, key: &ProcessKey) -> bool {
        if self.candidates.iter().any(|c| &c.process.id == key) {
            self.selected.insert(key.clone())
        } else {
            false
        }
    }

    pub fn deselect(&mut self, key: &ProcessKey) -> bool {
        self.selected.remove(key)
    }

    pub fn select_none(&mut self) {
        self.selected.clear();
    }

    /// Keep only candidates whose identity is in `identities` (case-insensitive).
    pub fn retain_identities(&mut self, identities: &[String]) {
        let wanted: HashSet<String> = identities.iter().map(|s| s.to_lowercase()).collect();
        let candidates = &self.candidates;
        self.selected.retain(|key| {
            candidates
                .iter()
                .any(|c| &c.process.id == key && wanted.contains(&c.process.executable_identity))
        });
    }

    /// Selected processes, in rank order.
    pub fn selected_processes(&self) -> Vec<TrackedProcess> {
        self.candidates
            .iter()
            .filter(|c| self.selected.contains(&c.process.id))
            .map(|c| c.process.clone())
            .collect()
    }

    pub fn selected_bytes(&self) -> u64 {
        self.candidates
            .iter()
            .filter(|c| self.selected.contains(&c.process.id))
            .map(|c| c.process.memory_bytes)
            .sum()
    }
}

/// Converts a scored candidate set into graceful quit requests.
pub struct CleanupCoordinator {
    terminator: Arc<dyn ProcessTerminator>,
    scorer: StalenessScorer,
    dry_run: bool,
    max_per_run: usize,
}

impl CleanupCoordinator {
    pub fn new(terminator: Arc<dyn ProcessTerminator>, scorer: StalenessScorer) -> Self {
        Self {
            terminator,
            scorer,
            dry_run: false,
            max_per_run: usize::MAX,
        }
    }

    pub fn from_config(terminator: Arc<dyn ProcessTerminator>, scorer: StalenessScorer, config: &AppSweepConfig) -> Self {
        Self::new(terminator, scorer)
            .with_dry_run(config.dry_run)
            .with_max_per_run(config.max_per_run)
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_max_per_run(mut self, max: usize) -> Self {
        self.max_per_run = max;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Ranked processes at or above the stale threshold, all pre-selected.
    pub fn prepare_candidates(&self, processes: &[TrackedProcess], config: &ScoringConfig) -> CleanupSelection {
        CleanupSelection::new(self.scorer.flagged(processes, config))
    }

    /// Ask every selected, unprotected process to quit.
    ///
    /// Does not wait for or verify exit.
    pub fn execute_cleanup(&self, selected: &[TrackedProcess]) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut attempted = 0usize;

        for process in selected {
            let status = if process.is_system_protected || process.is_user_protected {
                warn!("Skipping protected {}", process.id);
                CleanupStatus::SkippedProtected
            } else if attempted >= self.max_per_run {
                CleanupStatus::Failed("per-run limit reached".to_string())
            } else if self.dry_run {
                attempted += 1;
                info!("[dry run] Would quit {} ({:.0} MB)", process.display_name, process.memory_mb());
                CleanupStatus::DryRun
            } else {
                attempted += 1;
                match self.terminator.request_quit(process) {
                    Ok(()) => {
                        info!("Requested quit of {} ({:.0} MB)", process.display_name, process.memory_mb());
                        CleanupStatus::Requested
                    }
                    Err(e) => {
                        warn!("Could not quit {}: {}", process.display_name, e);
                        CleanupStatus::Failed(e.to_string())
                    }
                }
            };

            report.outcomes.push(CleanupOutcome {
                id: process.id.clone(),
                display_name: process.display_name.clone(),
                memory_bytes: process.memory_bytes,
                status,
            });
        }

        report
    }
}
