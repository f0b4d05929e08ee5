//! Lifecycle notifications by observation
//!
//! Desktops rarely push launch/terminate/focus notifications to an
//! unprivileged process, so the watcher polls the enumerator and focus
//! tracker on a short period and turns the difference between consecutive
//! observations into [`LifecycleEvent`]s for the registry's event loop.
//!
//! Within one observation events are emitted as: terminations, launches,
//! activation, hides, unhides. Terminations go first so a pid reused by a
//! new executable is removed before it is re-added.
//!
//! A round whose enumeration fails produces no events at all. After an
//! admission policy change the watcher is asked to resync: the next round
//! re-announces every running app so the registry can admit the ones it
//! dropped earlier. Launches of tracked apps are no-ops there.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::registry::LifecycleEvent;
use crate::platform::{AppDescriptor, AppEnumerator, FocusTracker};

/// One look at the desktop.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub apps: Vec<AppDescriptor>,
    pub active: Option<u32>,
    pub hidden: HashSet<u32>,
}

/// Diffs consecutive observations into lifecycle events.
#[derive(Debug, Default)]
pub struct LifecycleWatcher {
    known: HashMap<u32, String>,
    active: Option<u32>,
    hidden: HashSet<u32>,
    resync: bool,
}

impl LifecycleWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record applications already in the registry so they are not
    /// re-announced as launches. Focus and hidden state stay unknown and are
    /// reported on the first diff.
    pub fn seed(&mut self, apps: &[AppDescriptor]) {
        self.known = apps.iter().map(|a| (a.pid, a.identity.clone())).collect();
        self.active = None;
        self.hidden.clear();
    }

    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    /// Re-announce every running app, its focus and hidden state on the
    /// next diff.
    pub fn request_resync(&mut self) {
        self.resync = true;
    }

    /// Events that move the previous observation to this one.
    pub fn diff(&mut self, observation: &Observation) -> Vec<LifecycleEvent> {
        let current: HashMap<u32, &AppDescriptor> = observation.apps.iter().map(|a| (a.pid, a)).collect();
        let resync = std::mem::take(&mut self.resync);
        let mut events = Vec::new();

        let mut gone: Vec<u32> = self
            .known
            .iter()
            .filter(|&(pid, identity)| match current.get(pid) {
                Some(desc) => &desc.identity != identity,
                None => true,
            })
            .map(|(pid, _)| *pid)
            .collect();
        gone.sort_unstable();
        for pid in &gone {
            self.known.remove(pid);
            events.push(LifecycleEvent::Terminated(*pid));
        }

        for desc in &observation.apps {
            let new = !self.known.contains_key(&desc.pid);
            if new {
                self.known.insert(desc.pid, desc.identity.clone());
            }
            if new || resync {
                events.push(LifecycleEvent::Launched(desc.clone()));
            }
        }

        let active = observation.active.filter(|pid| self.known.contains_key(pid));
        if let Some(pid) = active {
            if resync || self.active != Some(pid) || gone.contains(&pid) {
                events.push(LifecycleEvent::Activated(pid));
            }
        }
        self.active = active;

        let hidden: HashSet<u32> = observation
            .hidden
            .iter()
            .copied()
            .filter(|pid| self.known.contains_key(pid))
            .collect();
        let mut newly_hidden: Vec<u32> = hidden
            .iter()
            .filter(|&&pid| resync || !self.hidden.contains(&pid) || gone.contains(&pid))
            .copied()
            .collect();
        newly_hidden.sort_unstable();
        events.extend(newly_hidden.into_iter().map(LifecycleEvent::Hidden));

        let mut unhidden: Vec<u32> = self
            .hidden
            .iter()
            .filter(|&&pid| !hidden.contains(&pid) && self.known.contains_key(&pid) && !gone.contains(&pid))
            .copied()
            .collect();
        unhidden.sort_unstable();
        events.extend(unhidden.into_iter().map(LifecycleEvent::Unhidden));
        self.hidden = hidden;

        events
    }

    /// Observe every `period` and forward events until `stop` flips or the
    /// receiver goes away. Setting `resync` requests a resync before the
    /// next round.
    pub fn spawn(
        mut self,
        enumerator: Arc<dyn AppEnumerator>,
        focus: Arc<dyn FocusTracker>,
        period: Duration,
        events: mpsc::UnboundedSender<LifecycleEvent>,
        resync: Arc<AtomicBool>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(50)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let enumerator = enumerator.clone();
                        let focus = focus.clone();
                        let observation = match tokio::task::spawn_blocking(move || observe(&*enumerator, &*focus)).await {
                            Ok(Some(observation)) => observation,
                            Ok(None) => {
                                debug!("Enumeration unavailable, skipping lifecycle round");
                                continue;
                            }
                            Err(e) => {
                                warn!("Lifecycle observation failed: {}", e);
                                continue;
                            }
                        };

                        if resync.swap(false, Ordering::SeqCst) {
                            self.request_resync();
                        }

                        for event in self.diff(&observation) {
                            debug!("Lifecycle event: {:?}", event);
                            if events.send(event).is_err() {
                                debug!("Registry event loop gone, stopping watcher");
                                return;
                            }
                        }
                    }
                }
            }
            debug!("Lifecycle watcher stopped");
        })
    }
}

/// Query the platform once. Blocking. `None` when the app list is
/// unavailable; focus is not queried then.
pub fn observe(enumerator: &dyn AppEnumerator, focus: &dyn FocusTracker) -> Option<Observation> {
    Some(Observation {
        apps: enumerator.running_apps()?,
        active: focus.active_pid(),
        hidden: focus.hidden_pids(),
    })
}
