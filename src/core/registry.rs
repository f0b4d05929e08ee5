//! Live registry of tracked applications
//!
//! The registry is the single source of truth for "what is running". It is
//! mutated only through lifecycle events (launch, activate, terminate,
//! hide/unhide), a full rescan, and metric write-back from the polling
//! scheduler. All of these go through one mutex, so a termination that is
//! processed first always wins over a later write-back for the same process.
//!
//! OS notifications are delivered as [`LifecycleEvent`]s on an mpsc channel
//! drained by [`spawn_event_loop`], keeping every mutation on one consumer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::config::AppSweepConfig;
use super::process::{ProcessKey, TrackedProcess};
use super::protection::is_system_protected;
use crate::platform::{AppDescriptor, AppEnumerator, ResourceSample};

/// OS process lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Launched(AppDescriptor),
    Activated(u32),
    Terminated(u32),
    Hidden(u32),
    Unhidden(u32),
}

/// Which applications the registry admits and protects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryPolicy {
    /// Identities never tracked (lower-cased)
    pub excluded: HashSet<String>,
    /// Track denylisted system applications instead of dropping them
    pub track_system_apps: bool,
    /// Identities the user protected from cleanup (lower-cased)
    pub user_protected: HashSet<String>,
}

impl RegistryPolicy {
    pub fn from_config(config: &AppSweepConfig) -> Self {
        Self {
            excluded: config.excluded_set(),
            track_system_apps: config.track_system_apps,
            user_protected: config.protected_set(),
        }
    }
}

/// Outcome of a full rescan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescanSummary {
    pub added: usize,
    pub kept: usize,
    pub removed: usize,
}

struct RegistryState {
    entries: HashMap<ProcessKey, TrackedProcess>,
    foreground: Option<ProcessKey>,
    next_seq: u64,
    policy: RegistryPolicy,
}

impl RegistryState {
    fn key_for_pid(&self, pid: u32) -> Option<ProcessKey> {
        self.entries.keys().find(|k| k.pid == pid).cloned()
    }

    /// `Some(is_system)` when the identity may be tracked.
    fn admit(&self, identity: &str) -> Option<bool> {
        if self.policy.excluded.contains(identity) {
            return None;
        }
        let system = is_system_protected(identity);
        if system && !self.policy.track_system_apps {
            return None;
        }
        Some(system)
    }

    fn insert(&mut self, desc: &AppDescriptor, identity: String, system: bool, clock: &dyn Clock) -> ProcessKey {
        let mut entry = TrackedProcess::new(desc.pid, identity, desc.display_name.clone(), clock.now(), desc.launched_at);
        entry.is_system_protected = system;
        entry.is_user_protected = self.policy.user_protected.contains(&entry.executable_identity);
        self.next_seq += 1;
        entry.seq = self.next_seq;

        let key = entry.id.clone();
        self.entries.insert(key.clone(), entry);
        key
    }

    fn remove(&mut self, key: &ProcessKey) -> Option<TrackedProcess> {
        let removed = self.entries.remove(key);
        if self.foreground.as_ref() == Some(key) {
            self.foreground = None;
        }
        removed
    }
}

/// Mutex-guarded registry of running applications.
pub struct ProcessRegistry {
    state: Mutex<RegistryState>,
    enumerator: Arc<dyn AppEnumerator>,
    clock: Arc<dyn Clock>,
    own_pid: u32,
}

impl ProcessRegistry {
    pub fn new(enumerator: Arc<dyn AppEnumerator>, clock: Arc<dyn Clock>, policy: RegistryPolicy) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                entries: HashMap::new(),
                foreground: None,
                next_seq: 0,
                policy,
            }),
            enumerator,
            clock,
            own_pid: std::process::id(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enumerate running applications and reconcile.
    ///
    /// Blocks on OS queries; call from a blocking context. When the
    /// enumeration fails the registry is left untouched.
    pub fn rescan(&self) -> RescanSummary {
        match self.enumerator.running_apps() {
            Some(apps) => self.reconcile(&apps),
            None => {
                warn!("Application enumeration unavailable, registry unchanged");
                RescanSummary::default()
            }
        }
    }

    /// Reconcile against a full list of running applications: matched entries
    /// keep their metrics, unmatched apps become new entries, and entries no
    /// longer running are dropped.
    pub fn reconcile(&self, apps: &[AppDescriptor]) -> RescanSummary {
        let mut state = self.lock();
        let mut summary = RescanSummary::default();
        let mut seen = HashSet::new();

        for desc in apps {
            if desc.pid == self.own_pid {
                continue;
            }
            let identity = desc.identity.to_lowercase();
            let key = ProcessKey::new(identity.clone(), desc.pid);
            if state.entries.contains_key(&key) {
                summary.kept += 1;
                seen.insert(key);
                continue;
            }
            let Some(system) = state.admit(&identity) else {
                continue;
            };
            let key = state.insert(desc, identity, system, self.clock.as_ref());
            summary.added += 1;
            seen.insert(key);
        }

        let gone: Vec<ProcessKey> = state
            .entries
            .keys()
            .filter(|k| !seen.contains(*k))
            .cloned()
            .collect();
        for key in gone {
            debug!("Rescan dropped {}, no longer running", key);
            state.remove(&key);
            summary.removed += 1;
        }

        info!(
            "Rescan: {} added, {} kept, {} removed",
            summary.added, summary.kept, summary.removed
        );
        summary
    }

    /// Track a newly launched application. Replays for an already-tracked
    /// identity+pid are no-ops. Returns whether an entry was created.
    pub fn on_launch(&self, desc: &AppDescriptor) -> bool {
        if desc.pid == self.own_pid {
            return false;
        }
        let identity = desc.identity.to_lowercase();
        let mut state = self.lock();

        if state.entries.contains_key(&ProcessKey::new(identity.clone(), desc.pid)) {
            return false;
        }
        let Some(system) = state.admit(&identity) else {
            debug!("Ignoring launch of excluded app {} ({})", identity, desc.pid);
            return false;
        };
        let key = state.insert(desc, identity, system, self.clock.as_ref());
        info!("Tracking {}", key);
        true
    }

    /// Mark `pid` as the single foreground process and refresh its
    /// `last_active_at`. Unknown pids are ignored.
    pub fn on_activate(&self, pid: u32) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();

        let Some(key) = state.key_for_pid(pid) else {
            debug!("Activation for untracked pid {}", pid);
            return false;
        };
        for entry in state.entries.values_mut() {
            entry.is_foreground = entry.id == key;
        }
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.touch(now);
        }
        state.foreground = Some(key);
        true
    }

    /// Remove the entry for `pid`. Idempotent under duplicate delivery.
    pub fn on_terminate(&self, pid: u32) -> Option<TrackedProcess> {
        let mut state = self.lock();
        let Some(key) = state.key_for_pid(pid) else {
            debug!("Termination for untracked pid {}", pid);
            return None;
        };
        let removed = state.remove(&key);
        info!("Stopped tracking {}", key);
        removed
    }

    pub fn on_hide(&self, pid: u32) -> bool {
        self.set_hidden(pid, true)
    }

    pub fn on_unhide(&self, pid: u32) -> bool {
        self.set_hidden(pid, false)
    }

    fn set_hidden(&self, pid: u32, hidden: bool) -> bool {
        let mut state = self.lock();
        let Some(key) = state.key_for_pid(pid) else {
            debug!("Hide/unhide for untracked pid {}", pid);
            return false;
        };
        match state.entries.get_mut(&key) {
            Some(entry) => {
                entry.is_hidden = hidden;
                true
            }
            None => false,
        }
    }

    /// Dispatch one lifecycle event.
    pub fn apply(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Launched(desc) => {
                self.on_launch(desc);
            }
            LifecycleEvent::Activated(pid) => {
                self.on_activate(*pid);
            }
            LifecycleEvent::Terminated(pid) => {
                self.on_terminate(*pid);
            }
            LifecycleEvent::Hidden(pid) => {
                self.on_hide(*pid);
            }
            LifecycleEvent::Unhidden(pid) => {
                self.on_unhide(*pid);
            }
        }
    }

    /// Write a metrics sample back to the live entry.
    ///
    /// The write only lands if the entry with this key and insertion
    /// sequence still exists; otherwise it is dropped.
    pub fn apply_sample(&self, key: &ProcessKey, seq: u64, sample: &ResourceSample) -> bool {
        let mut state = self.lock();
        match state.entries.get_mut(key) {
            Some(entry) if entry.seq == seq => {
                entry.apply_sample(sample);
                true
            }
            _ => {
                debug!("Dropping metrics for {}, no longer tracked", key);
                false
            }
        }
    }

    /// Point-in-time copy of all entries in insertion order.
    pub fn snapshot(&self) -> Vec<TrackedProcess> {
        let state = self.lock();
        let mut entries: Vec<TrackedProcess> = state.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    pub fn active_process(&self) -> Option<TrackedProcess> {
        let state = self.lock();
        state
            .foreground
            .as_ref()
            .and_then(|key| state.entries.get(key))
            .cloned()
    }

    pub fn get(&self, key: &ProcessKey) -> Option<TrackedProcess> {
        self.lock().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply the user's protected set to existing and future entries.
    pub fn set_user_protected(&self, identities: HashSet<String>) {
        let mut state = self.lock();
        for entry in state.entries.values_mut() {
            entry.is_user_protected = identities.contains(&entry.executable_identity);
        }
        state.policy.user_protected = identities;
    }

    /// Replace the admission policy. Newly excluded entries are dropped.
    pub fn set_policy(&self, policy: RegistryPolicy) {
        let mut state = self.lock();
        let dropped: Vec<ProcessKey> = state
            .entries
            .values()
            .filter(|e| {
                policy.excluded.contains(&e.executable_identity)
                    || (e.is_system_protected && !policy.track_system_apps)
            })
            .map(|e| e.id.clone())
            .collect();
        for key in dropped {
            debug!("Policy change dropped {}", key);
            state.remove(&key);
        }
        for entry in state.entries.values_mut() {
            entry.is_user_protected = policy.user_protected.contains(&entry.executable_identity);
        }
        state.policy = policy;
    }

    pub fn policy(&self) -> RegistryPolicy {
        self.lock().policy.clone()
    }
}

/// Drain lifecycle events into the registry, one at a time, until every
/// sender is dropped.
pub fn spawn_event_loop(
    registry: Arc<ProcessRegistry>,
    mut events: mpsc::UnboundedReceiver<LifecycleEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            registry.apply(&event);
        }
        debug!("Lifecycle event channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::testing::FakeEnumerator;
    use chrono::{Duration, Utc};

    fn registry_with(apps: Vec<AppDescriptor>) -> (Arc<ProcessRegistry>, Arc<ManualClock>, Arc<FakeEnumerator>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let enumerator = Arc::new(FakeEnumerator::new(apps));
        let registry = Arc::new(ProcessRegistry::new(
            enumerator.clone(),
            clock.clone(),
            RegistryPolicy::default(),
        ));
        (registry, clock, enumerator)
    }

    fn foreground_count(registry: &ProcessRegistry) -> usize {
        registry.snapshot().iter().filter(|p| p.is_foreground).count()
    }

    #[test]
    fn test_launch_is_idempotent() {
        let (registry, _, _) = registry_with(vec![]);
        let desc = AppDescriptor::new(100, "firefox");

        assert!(registry.on_launch(&desc));
        let before = registry.snapshot();
        assert!(!registry.on_launch(&desc));
        assert_eq!(registry.snapshot(), before);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_terminate_unknown_is_noop() {
        let (registry, _, _) = registry_with(vec![]);
        registry.on_launch(&AppDescriptor::new(100, "firefox"));
        let before = registry.snapshot();

        assert!(registry.on_terminate(999).is_none());
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn test_terminate_removes_and_clears_foreground() {
        let (registry, _, _) = registry_with(vec![]);
        registry.on_launch(&AppDescriptor::new(100, "firefox"));
        registry.on_activate(100);
        assert!(registry.active_process().is_some());

        let removed = registry.on_terminate(100).unwrap();
        assert_eq!(removed.process_id, 100);
        assert!(registry.active_process().is_none());
        assert!(registry.is_empty());
        // duplicate delivery
        assert!(registry.on_terminate(100).is_none());
    }

    #[test]
    fn test_foreground_exclusive() {
        let (registry, clock, _) = registry_with(vec![]);
        for (pid, name) in [(1000, "a"), (1001, "b"), (1002, "c")] {
            registry.on_launch(&AppDescriptor::new(pid, name));
        }

        for pid in [1000, 1002, 1001, 4242, 1000, 1000, 1002] {
            clock.advance(Duration::seconds(5));
            registry.on_activate(pid);
            assert!(foreground_count(&registry) <= 1);
        }
        assert_eq!(registry.active_process().unwrap().process_id, 1002);
    }

    #[test]
    fn test_activate_advances_last_active() {
        let (registry, clock, _) = registry_with(vec![]);
        registry.on_launch(&AppDescriptor::new(100, "code"));
        let launched = registry.snapshot()[0].last_active_at;

        clock.advance(Duration::minutes(10));
        assert!(registry.on_activate(100));
        let active = registry.active_process().unwrap();
        assert_eq!(active.last_active_at, launched + Duration::minutes(10));

        // a clock that steps backwards never moves last_active_at back
        clock.advance(Duration::minutes(-30));
        registry.on_activate(100);
        assert_eq!(registry.active_process().unwrap().last_active_at, active.last_active_at);
    }

    #[test]
    fn test_activate_unknown_keeps_state() {
        let (registry, _, _) = registry_with(vec![]);
        registry.on_launch(&AppDescriptor::new(100, "code"));
        registry.on_activate(100);

        assert!(!registry.on_activate(555));
        assert_eq!(registry.active_process().unwrap().process_id, 100);
    }

    #[test]
    fn test_hide_unhide() {
        let (registry, _, _) = registry_with(vec![]);
        registry.on_launch(&AppDescriptor::new(100, "code"));

        assert!(registry.on_hide(100));
        assert!(registry.snapshot()[0].is_hidden);
        assert!(registry.on_unhide(100));
        assert!(!registry.snapshot()[0].is_hidden);
        assert!(!registry.on_hide(5));
    }

    #[test]
    fn test_system_apps_dropped_by_default() {
        let (registry, _, _) = registry_with(vec![]);
        assert!(!registry.on_launch(&AppDescriptor::new(50, "gnome-shell")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_system_apps_tracked_when_enabled() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let policy = RegistryPolicy { track_system_apps: true, ..Default::default() };
        let registry = ProcessRegistry::new(Arc::new(FakeEnumerator::default()), clock, policy);

        assert!(registry.on_launch(&AppDescriptor::new(50, "gnome-shell")));
        assert!(registry.snapshot()[0].is_system_protected);
    }

    #[test]
    fn test_excluded_apps_ignored() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let policy = RegistryPolicy {
            excluded: ["obs".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let registry = ProcessRegistry::new(Arc::new(FakeEnumerator::default()), clock, policy);

        assert!(!registry.on_launch(&AppDescriptor::new(70, "OBS")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_user_protection_applies_to_existing_and_new() {
        let (registry, _, _) = registry_with(vec![]);
        registry.on_launch(&AppDescriptor::new(100, "slack"));

        registry.set_user_protected(["slack".to_string(), "zoom".to_string()].into_iter().collect());
        assert!(registry.snapshot()[0].is_user_protected);

        registry.on_launch(&AppDescriptor::new(101, "zoom"));
        assert!(registry.snapshot().iter().all(|p| p.is_user_protected));

        registry.set_user_protected(HashSet::new());
        assert!(registry.snapshot().iter().all(|p| !p.is_user_protected));
    }

    #[test]
    fn test_rescan_preserves_metrics_and_drops_gone() {
        let (registry, _, enumerator) = registry_with(vec![
            AppDescriptor::new(100, "firefox"),
            AppDescriptor::new(200, "code"),
        ]);
        let summary = registry.rescan();
        assert_eq!(summary, RescanSummary { added: 2, kept: 0, removed: 0 });

        let key = ProcessKey::new("firefox", 100);
        let seq = registry.get(&key).unwrap().seq();
        let sample = ResourceSample { memory_bytes: 4096, cpu_percent: 2.0, window_count: 1 };
        assert!(registry.apply_sample(&key, seq, &sample));

        enumerator.set(vec![
            AppDescriptor::new(100, "firefox"),
            AppDescriptor::new(300, "gimp"),
        ]);
        let summary = registry.rescan();
        assert_eq!(summary, RescanSummary { added: 1, kept: 1, removed: 1 });
        assert_eq!(registry.get(&key).unwrap().memory_bytes, 4096);
        assert!(registry.get(&ProcessKey::new("code", 200)).is_none());
    }

    #[test]
    fn test_failed_rescan_keeps_entries() {
        let (registry, _, enumerator) = registry_with(vec![AppDescriptor::new(100, "firefox")]);
        registry.rescan();

        enumerator.set_unavailable();
        assert_eq!(registry.rescan(), RescanSummary::default());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rescan_uses_launch_time() {
        let launched = Utc::now() - Duration::hours(3);
        let (registry, _, _) = registry_with(vec![AppDescriptor::new(100, "firefox").with_launched_at(launched)]);
        registry.rescan();
        let entry = &registry.snapshot()[0];
        assert_eq!(entry.launched_at, launched);
        assert!(entry.last_active_at > launched);
    }

    #[test]
    fn test_write_back_after_terminate_is_dropped() {
        let (registry, _, _) = registry_with(vec![]);
        registry.on_launch(&AppDescriptor::new(100, "firefox"));
        let entry = registry.snapshot().remove(0);

        registry.on_terminate(100);
        let sample = ResourceSample { memory_bytes: 1, cpu_percent: 1.0, window_count: 1 };
        assert!(!registry.apply_sample(&entry.id, entry.seq(), &sample));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_write_back_ignores_relaunched_same_key() {
        let (registry, _, _) = registry_with(vec![]);
        let desc = AppDescriptor::new(100, "firefox");
        registry.on_launch(&desc);
        let stale = registry.snapshot().remove(0);

        registry.on_terminate(100);
        registry.on_launch(&desc);

        let sample = ResourceSample { memory_bytes: 99, cpu_percent: 1.0, window_count: 1 };
        assert!(!registry.apply_sample(&stale.id, stale.seq(), &sample));
        assert_eq!(registry.snapshot()[0].memory_bytes, 0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let (registry, _, _) = registry_with(vec![]);
        registry.on_launch(&AppDescriptor::new(100, "firefox"));
        let snapshot = registry.snapshot();
        registry.on_terminate(100);
        assert_eq!(snapshot.len(), 1);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_set_policy_drops_newly_excluded() {
        let (registry, _, _) = registry_with(vec![]);
        registry.on_launch(&AppDescriptor::new(100, "firefox"));
        registry.on_launch(&AppDescriptor::new(101, "code"));

        registry.set_policy(RegistryPolicy {
            excluded: ["code".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].executable_identity, "firefox");
    }

    #[tokio::test]
    async fn test_event_loop_applies_in_order() {
        let (registry, _, _) = registry_with(vec![]);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_event_loop(registry.clone(), rx);

        tx.send(LifecycleEvent::Activated(100)).unwrap();
        tx.send(LifecycleEvent::Launched(AppDescriptor::new(100, "firefox"))).unwrap();
        tx.send(LifecycleEvent::Launched(AppDescriptor::new(101, "code"))).unwrap();
        tx.send(LifecycleEvent::Activated(101)).unwrap();
        tx.send(LifecycleEvent::Hidden(100)).unwrap();
        tx.send(LifecycleEvent::Terminated(101)).unwrap();
        drop(tx);
        handle.await.unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].is_hidden);
        // activation raced ahead of the launch and was dropped
        assert!(!snapshot[0].is_foreground);
        assert!(registry.active_process().is_none());
    }
}
