//! Periodic resource sampling
//!
//! The scheduler is an explicit `Stopped -> Running -> Stopped` state
//! machine. Each pass snapshots the registry, samples every entry on the
//! blocking pool, and writes results back through the registry's own lock,
//! so a process terminated mid-pass simply drops its write.
//!
//! Cancellation is cooperative: `stop()` prevents new passes and waits for
//! an in-flight pass to finish writing back.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::registry::ProcessRegistry;
use crate::platform::ResourceSampler;

/// Shortest accepted polling interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Result of one polling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub sampled: usize,
    pub written: usize,
    /// Samples whose entry disappeared before write-back
    pub dropped: usize,
}

enum Control {
    Stopped {
        interval: Duration,
    },
    Running {
        interval: Duration,
        stop_tx: watch::Sender<bool>,
        task: JoinHandle<()>,
    },
}

/// Drives the resource sampler against every registry entry.
pub struct PollingScheduler {
    registry: Arc<ProcessRegistry>,
    sampler: Arc<dyn ResourceSampler>,
    control: Mutex<Control>,
    running: AtomicBool,
    passes: Arc<AtomicU64>,
}

impl PollingScheduler {
    pub fn new(registry: Arc<ProcessRegistry>, sampler: Arc<dyn ResourceSampler>) -> Self {
        Self {
            registry,
            sampler,
            control: Mutex::new(Control::Stopped { interval: Duration::from_secs(30) }),
            running: AtomicBool::new(false),
            passes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Number of completed passes since construction.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    pub async fn interval(&self) -> Duration {
        match &*self.control.lock().await {
            Control::Stopped { interval } | Control::Running { interval, .. } => *interval,
        }
    }

    /// Transition to `Running`: run one pass immediately, then repeat every
    /// `interval`. A no-op with a warning when already running.
    pub async fn start(&self, interval: Duration) {
        let mut control = self.control.lock().await;
        if matches!(*control, Control::Running { .. }) {
            warn!("Polling scheduler already running, ignoring start");
            return;
        }

        let interval = clamp_interval(interval);
        self.pass().await;

        let (stop_tx, task) = self.spawn_loop(interval);
        *control = Control::Running { interval, stop_tx, task };
        self.running.store(true, Ordering::SeqCst);
        info!("Polling scheduler started ({:?} interval)", interval);
    }

    /// Transition to `Stopped`. Waits for an in-flight pass to complete.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        let Control::Running { interval, .. } = &*control else {
            return;
        };
        let stopped = Control::Stopped { interval: *interval };

        if let Control::Running { stop_tx, task, .. } = std::mem::replace(&mut *control, stopped) {
            let _ = stop_tx.send(true);
            if let Err(e) = task.await {
                warn!("Polling task ended abnormally: {}", e);
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Polling scheduler stopped");
    }

    /// Change the interval. While running, the timer restarts with the new
    /// period under the control lock, so callers never observe a stopped
    /// scheduler and no extra pass fires.
    pub async fn set_interval(&self, interval: Duration) {
        let interval = clamp_interval(interval);
        let mut control = self.control.lock().await;

        match std::mem::replace(&mut *control, Control::Stopped { interval }) {
            Control::Stopped { .. } => {
                debug!("Polling interval set to {:?} (stopped)", interval);
            }
            Control::Running { interval: current, stop_tx, task } => {
                if current == interval {
                    *control = Control::Running { interval, stop_tx, task };
                    return;
                }
                let _ = stop_tx.send(true);
                if let Err(e) = task.await {
                    warn!("Polling task ended abnormally: {}", e);
                }
                let (stop_tx, task) = self.spawn_loop(interval);
                *control = Control::Running { interval, stop_tx, task };
                info!("Polling interval changed {:?} -> {:?}", current, interval);
            }
        }
    }

    /// Run a single pass now, independent of the timer.
    pub async fn pass(&self) -> PassReport {
        let report = run_pass(&self.registry, &self.sampler).await;
        self.passes.fetch_add(1, Ordering::SeqCst);
        report
    }

    fn spawn_loop(&self, interval: Duration) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            self.registry.clone(),
            self.sampler.clone(),
            interval,
            stop_rx,
            self.passes.clone(),
        ));
        (stop_tx, task)
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_INTERVAL {
        warn!("Polling interval {:?} too short, using {:?}", interval, MIN_INTERVAL);
        MIN_INTERVAL
    } else {
        interval
    }
}

async fn run_loop(
    registry: Arc<ProcessRegistry>,
    sampler: Arc<dyn ResourceSampler>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
    passes: Arc<AtomicU64>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                // the stop signal is only observed between passes
                run_pass(&registry, &sampler).await;
                passes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// Sample every entry of the current snapshot and write back to live entries.
pub async fn run_pass(registry: &Arc<ProcessRegistry>, sampler: &Arc<dyn ResourceSampler>) -> PassReport {
    let targets: Vec<_> = registry
        .snapshot()
        .into_iter()
        .map(|p| (p.id.clone(), p.seq(), p.process_id))
        .collect();
    if targets.is_empty() {
        return PassReport::default();
    }

    let sampler = sampler.clone();
    let samples = match tokio::task::spawn_blocking(move || {
        targets
            .into_iter()
            .map(|(key, seq, pid)| (key, seq, sampler.sample(pid)))
            .collect::<Vec<_>>()
    })
    .await
    {
        Ok(samples) => samples,
        Err(e) => {
            warn!("Sampling pass failed: {}", e);
            return PassReport::default();
        }
    };

    let mut report = PassReport { sampled: samples.len(), ..Default::default() };
    for (key, seq, sample) in &samples {
        if registry.apply_sample(key, *seq, sample) {
            report.written += 1;
        } else {
            report.dropped += 1;
        }
    }
    debug!(
        "Polling pass: {} sampled, {} written, {} dropped",
        report.sampled, report.written, report.dropped
    );
    report
}
