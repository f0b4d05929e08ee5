//! AppSweep engine
//!
//! Composition root: owns the registry, the polling scheduler, the
//! lifecycle watcher, the registry event loop and a configuration reload
//! task, and exposes the operations the CLI needs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::cleanup::{CleanupCoordinator, CleanupReport, CleanupSelection, CleanupStatus};
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::{AppSweepConfig, ConfigProvider};
use crate::core::process::ProcessKey;
use crate::core::registry::{spawn_event_loop, ProcessRegistry, RegistryPolicy, RescanSummary};
use crate::core::scheduler::{PassReport, PollingScheduler};
use crate::core::scorer::{ScoredProcess, StalenessScorer};
use crate::core::watcher::LifecycleWatcher;
use crate::platform::Platform;

/// How often the reload task asks the config provider for changes.
pub const CONFIG_RELOAD_INTERVAL: Duration = Duration::from_secs(2);

/// Cleanup performed while watching.
#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    pub dry_run: bool,
    /// Restrict to these identities; empty means all candidates
    pub only: Vec<String>,
}

struct BackgroundTasks {
    stop_tx: watch::Sender<bool>,
    watcher: JoinHandle<()>,
    event_loop: JoinHandle<()>,
    reload: JoinHandle<()>,
}

/// Tracks applications, keeps their metrics fresh and turns stale ones into
/// cleanup candidates.
pub struct AppSweepEngine {
    platform: Platform,
    provider: Arc<dyn ConfigProvider>,
    registry: Arc<ProcessRegistry>,
    scheduler: Arc<PollingScheduler>,
    scorer: StalenessScorer,
    applied: Arc<StdMutex<AppSweepConfig>>,
    /// Set when the admission policy changes; consumed by the watcher
    resync: Arc<AtomicBool>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl AppSweepEngine {
    pub fn new(platform: Platform, provider: Arc<dyn ConfigProvider>) -> Self {
        Self::with_clock(platform, provider, Arc::new(SystemClock))
    }

    pub fn with_clock(platform: Platform, provider: Arc<dyn ConfigProvider>, clock: Arc<dyn Clock>) -> Self {
        let config = provider.current();
        for warning in config.validate() {
            warn!("Config: {}", warning);
        }

        let registry = Arc::new(ProcessRegistry::new(
            platform.enumerator.clone(),
            clock.clone(),
            RegistryPolicy::from_config(&config),
        ));
        let scheduler = Arc::new(PollingScheduler::new(registry.clone(), platform.sampler.clone()));

        Self {
            platform,
            provider,
            registry,
            scheduler,
            scorer: StalenessScorer::new(clock),
            applied: Arc::new(StdMutex::new(config)),
            resync: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &PollingScheduler {
        &self.scheduler
    }

    pub fn scorer(&self) -> &StalenessScorer {
        &self.scorer
    }

    /// The configuration currently in effect.
    pub fn config(&self) -> AppSweepConfig {
        lock_config(&self.applied).clone()
    }

    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    /// Rescan, start the event loop and watcher, then start polling.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            warn!("Engine already running, ignoring start");
            return;
        }

        self.reload_config().await;
        let config = self.config();

        let enumerator = self.platform.enumerator.clone();
        let apps = match tokio::task::spawn_blocking(move || enumerator.running_apps()).await {
            Ok(Some(apps)) => apps,
            Ok(None) => {
                warn!("Initial enumeration unavailable, the watcher will pick applications up");
                Vec::new()
            }
            Err(e) => {
                warn!("Initial enumeration failed: {}", e);
                Vec::new()
            }
        };
        let summary = self.registry.reconcile(&apps);
        info!("Tracking {} applications", summary.added + summary.kept);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let event_loop = spawn_event_loop(self.registry.clone(), event_rx);

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut watcher = LifecycleWatcher::new();
        watcher.seed(&apps);
        self.resync.store(false, Ordering::SeqCst);
        let watcher = watcher.spawn(
            self.platform.enumerator.clone(),
            self.platform.focus.clone(),
            config.lifecycle_poll(),
            event_tx,
            self.resync.clone(),
            stop_rx.clone(),
        );

        self.scheduler.start(config.polling_interval()).await;

        let reload = tokio::spawn(reload_loop(
            self.provider.clone(),
            self.registry.clone(),
            self.scheduler.clone(),
            self.applied.clone(),
            self.resync.clone(),
            stop_rx,
        ));

        *tasks = Some(BackgroundTasks {
            stop_tx,
            watcher,
            event_loop,
            reload,
        });
        info!("Engine started");
    }

    /// Stop polling and background tasks. Waits for each to finish.
    pub async fn shutdown(&self) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return;
        };

        self.scheduler.stop().await;
        let _ = tasks.stop_tx.send(true);
        for (name, handle) in [
            ("watcher", tasks.watcher),
            ("reload", tasks.reload),
            ("event loop", tasks.event_loop),
        ] {
            if let Err(e) = handle.await {
                warn!("{} task ended abnormally: {}", name, e);
            }
        }
        info!("Engine stopped");
    }

    /// One rescan and one sampling pass, outside the timers.
    pub async fn refresh_once(&self) -> (RescanSummary, PassReport) {
        let registry = self.registry.clone();
        let summary = tokio::task::spawn_blocking(move || registry.rescan())
            .await
            .unwrap_or_else(|e| {
                warn!("Rescan failed: {}", e);
                RescanSummary::default()
            });
        let report = self.scheduler.pass().await;
        (summary, report)
    }

    /// Every tracked process, ranked.
    pub fn ranked(&self) -> Vec<ScoredProcess> {
        self.scorer.rank(&self.registry.snapshot(), &self.config().scoring)
    }

    /// Flaggable processes, ranked and pre-selected.
    pub fn candidates(&self) -> CleanupSelection {
        let config = self.config();
        self.coordinator(&config)
            .prepare_candidates(&self.registry.snapshot(), &config.scoring)
    }

    pub fn reclaimable_bytes(&self) -> u64 {
        self.scorer
            .reclaimable_bytes(&self.registry.snapshot(), &self.config().scoring)
    }

    /// Ask the selected processes to quit.
    pub async fn cleanup(&self, selection: &CleanupSelection, dry_run: bool) -> CleanupReport {
        let config = self.config();
        let coordinator = self.coordinator(&config).with_dry_run(dry_run || config.dry_run);
        let selected = selection.selected_processes();
        if coordinator.is_dry_run() {
            info!("Dry run over {} selected applications", selected.len());
        }

        tokio::task::spawn_blocking(move || coordinator.execute_cleanup(&selected))
            .await
            .unwrap_or_else(|e| {
                warn!("Cleanup task failed: {}", e);
                CleanupReport::default()
            })
    }

    /// Ask current candidates to quit, skipping the processes in `asked`.
    ///
    /// Requested and dry-run processes are added to `asked`, so each is
    /// handled once; failures stay eligible for the next sweep. `None` when
    /// nothing was selected.
    pub async fn sweep(&self, options: &SweepOptions, asked: &mut HashSet<ProcessKey>) -> Option<CleanupReport> {
        let mut selection = self.candidates();
        if !options.only.is_empty() {
            selection.retain_identities(&options.only);
        }
        for key in asked.iter() {
            selection.deselect(key);
        }
        if selection.selected_processes().is_empty() {
            return None;
        }

        let report = self.cleanup(&selection, options.dry_run).await;
        asked.extend(
            report
                .outcomes
                .iter()
                .filter(|o| matches!(o.status, CleanupStatus::Requested | CleanupStatus::DryRun))
                .map(|o| o.id.clone()),
        );
        Some(report)
    }

    /// Pull the provider's current configuration and apply what changed.
    pub async fn reload_config(&self) -> bool {
        let provider = self.provider.clone();
        match tokio::task::spawn_blocking(move || provider.current()).await {
            Ok(config) => apply_config(&self.registry, &self.scheduler, &self.applied, &self.resync, config).await,
            Err(e) => {
                warn!("Config reload failed: {}", e);
                false
            }
        }
    }

    fn coordinator(&self, config: &AppSweepConfig) -> CleanupCoordinator {
        CleanupCoordinator::from_config(self.platform.terminator.clone(), self.scorer.clone(), config)
    }
}

fn lock_config(config: &StdMutex<AppSweepConfig>) -> std::sync::MutexGuard<'_, AppSweepConfig> {
    config.lock().unwrap_or_else(|e| e.into_inner())
}

/// Returns whether anything changed.
async fn apply_config(
    registry: &ProcessRegistry,
    scheduler: &PollingScheduler,
    applied: &StdMutex<AppSweepConfig>,
    resync: &AtomicBool,
    config: AppSweepConfig,
) -> bool {
    let previous = {
        let mut applied = lock_config(applied);
        if *applied == config {
            return false;
        }
        std::mem::replace(&mut *applied, config.clone())
    };

    for warning in config.validate() {
        warn!("Config: {}", warning);
    }

    let policy = RegistryPolicy::from_config(&config);
    let current = registry.policy();
    if current != policy {
        // apps dropped under the old policy are only re-admitted by a resync
        let admission_changed =
            current.excluded != policy.excluded || current.track_system_apps != policy.track_system_apps;
        registry.set_policy(policy);
        if admission_changed {
            resync.store(true, Ordering::SeqCst);
        }
        info!("Applied protected/excluded application changes");
    }
    if previous.polling_interval_secs != config.polling_interval_secs {
        scheduler.set_interval(config.polling_interval()).await;
    }
    if previous.lifecycle_poll_ms != config.lifecycle_poll_ms {
        info!("lifecycle_poll_ms change takes effect on restart");
    }
    debug!("Configuration applied");
    true
}

async fn reload_loop(
    provider: Arc<dyn ConfigProvider>,
    registry: Arc<ProcessRegistry>,
    scheduler: Arc<PollingScheduler>,
    applied: Arc<StdMutex<AppSweepConfig>>,
    resync: Arc<AtomicBool>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(CONFIG_RELOAD_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let provider = provider.clone();
                if let Ok(config) = tokio::task::spawn_blocking(move || provider.current()).await {
                    apply_config(&registry, &scheduler, &applied, &resync, config).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::config::StaticConfig;
    use crate::core::testing::{FakeEnumerator, FakeFocus, FakeSampler, FakeTerminator};
    use crate::platform::{AppDescriptor, ResourceSample};
    use chrono::Utc;

    struct Harness {
        engine: AppSweepEngine,
        enumerator: Arc<FakeEnumerator>,
        terminator: Arc<FakeTerminator>,
        provider: Arc<StaticConfig>,
        clock: Arc<ManualClock>,
    }

    fn test_config() -> AppSweepConfig {
        AppSweepConfig {
            lifecycle_poll_ms: 50,
            polling_interval_secs: 60,
            ..Default::default()
        }
    }

    fn harness(apps: Vec<AppDescriptor>) -> Harness {
        let enumerator = Arc::new(FakeEnumerator::new(apps));
        let sampler = Arc::new(FakeSampler::default());
        sampler.set(
            100,
            ResourceSample { memory_bytes: 2 * 1024 * 1024 * 1024, cpu_percent: 0.0, window_count: 1 },
        );
        sampler.set(
            200,
            ResourceSample { memory_bytes: 512 * 1024 * 1024, cpu_percent: 5.0, window_count: 1 },
        );
        let terminator = Arc::new(FakeTerminator::default());
        let platform = Platform {
            enumerator: enumerator.clone(),
            focus: Arc::new(FakeFocus::default()),
            sampler,
            terminator: terminator.clone(),
        };
        let provider = Arc::new(StaticConfig::new(test_config()));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = AppSweepEngine::with_clock(platform, provider.clone(), clock.clone());
        Harness { engine, enumerator, terminator, provider, clock }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let h = harness(vec![AppDescriptor::new(100, "gimp"), AppDescriptor::new(200, "evince")]);

        h.engine.start().await;
        assert!(h.engine.is_running().await);
        assert!(h.engine.scheduler().is_running());
        assert_eq!(h.engine.registry().len(), 2);

        // the immediate pass wrote the sample back
        let gimp = h.engine.registry().snapshot().into_iter().find(|p| p.process_id == 100).unwrap();
        assert_eq!(gimp.memory_bytes, 2 * 1024 * 1024 * 1024);

        h.engine.start().await;
        assert_eq!(h.engine.scheduler().passes(), 1);

        h.engine.shutdown().await;
        assert!(!h.engine.is_running().await);
        assert!(!h.engine.scheduler().is_running());
    }

    #[tokio::test]
    async fn test_watcher_feeds_registry() {
        let h = harness(vec![AppDescriptor::new(100, "gimp")]);
        h.engine.start().await;

        h.enumerator.set(vec![AppDescriptor::new(100, "gimp"), AppDescriptor::new(300, "vlc")]);
        assert!(wait_for(|| h.engine.registry().len() == 2).await);

        h.enumerator.set(vec![AppDescriptor::new(300, "vlc")]);
        assert!(wait_for(|| h.engine.registry().len() == 1).await);

        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_applies_changes() {
        let h = harness(vec![AppDescriptor::new(100, "gimp")]);
        h.engine.start().await;
        assert!(!h.engine.reload_config().await);

        h.provider.replace(AppSweepConfig {
            polling_interval_secs: 5,
            protected_apps: vec!["GIMP".to_string()],
            ..test_config()
        });
        assert!(h.engine.reload_config().await);
        assert_eq!(h.engine.scheduler().interval().await, Duration::from_secs(5));
        assert!(h.engine.registry().snapshot()[0].is_user_protected);

        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_readmits_unexcluded_app() {
        let h = harness(vec![AppDescriptor::new(100, "gimp"), AppDescriptor::new(300, "vlc")]);
        h.provider.replace(AppSweepConfig {
            excluded_apps: vec!["vlc".to_string()],
            ..test_config()
        });
        h.engine.start().await;
        assert_eq!(h.engine.registry().len(), 1);

        h.provider.replace(test_config());
        assert!(h.engine.reload_config().await);
        assert!(wait_for(|| h.engine.registry().len() == 2).await);
        assert!(h
            .engine
            .registry()
            .snapshot()
            .iter()
            .any(|p| p.executable_identity == "vlc"));

        // excluding again drops it without waiting for the watcher
        h.provider.replace(AppSweepConfig {
            excluded_apps: vec!["vlc".to_string()],
            ..test_config()
        });
        assert!(h.engine.reload_config().await);
        assert_eq!(h.engine.registry().len(), 1);

        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_while_watching() {
        let h = harness(vec![AppDescriptor::new(100, "gimp"), AppDescriptor::new(200, "evince")]);
        h.engine.start().await;
        let mut asked = HashSet::new();

        // nothing is stale right after start
        assert!(h.engine.sweep(&SweepOptions::default(), &mut asked).await.is_none());

        h.clock.advance(chrono::Duration::hours(2));
        let only_gimp = SweepOptions { dry_run: false, only: vec!["GIMP".to_string()] };
        let report = h.engine.sweep(&only_gimp, &mut asked).await.unwrap();
        assert_eq!(report.requested_count(), 1);
        assert_eq!(h.terminator.requested(), vec![100]);

        // already asked, not asked again
        assert!(h.engine.sweep(&only_gimp, &mut asked).await.is_none());

        h.terminator.refuse(200);
        let report = h.engine.sweep(&SweepOptions::default(), &mut asked).await.unwrap();
        assert_eq!(report.failures().len(), 1);
        assert!(!asked.contains(&ProcessKey::new("evince", 200)));
        assert_eq!(h.terminator.requested(), vec![100]);

        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_enumeration_keeps_registry() {
        let h = harness(vec![AppDescriptor::new(100, "gimp"), AppDescriptor::new(200, "evince")]);
        h.engine.start().await;
        assert_eq!(h.engine.registry().len(), 2);

        h.enumerator.set_unavailable();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.engine.registry().len(), 2);

        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_candidates_and_cleanup() {
        let h = harness(vec![AppDescriptor::new(100, "gimp"), AppDescriptor::new(200, "evince")]);
        h.engine.refresh_once().await;
        assert!(h.engine.candidates().is_empty());

        h.clock.advance(chrono::Duration::hours(2));
        let selection = h.engine.candidates();
        let ids: Vec<u32> = selection.candidates().iter().map(|c| c.process.process_id).collect();
        assert_eq!(ids, vec![100, 200]);
        assert_eq!(h.engine.reclaimable_bytes(), (2048 + 512) * 1024 * 1024);

        let dry = h.engine.cleanup(&selection, true).await;
        assert!(dry.outcomes.iter().all(|o| o.status == CleanupStatus::DryRun));
        assert!(h.terminator.requested().is_empty());

        let report = h.engine.cleanup(&selection, false).await;
        assert_eq!(report.requested_count(), 2);
        assert_eq!(h.terminator.requested(), vec![100, 200]);
    }
}
