//! In-memory platform fakes for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::core::process::TrackedProcess;
use crate::platform::{
    AppDescriptor, AppEnumerator, FocusTracker, PlatformError, PlatformResult, ProcessTerminator,
    ResourceSample, ResourceSampler,
};

#[derive(Default)]
pub struct FakeEnumerator {
    apps: Mutex<Vec<AppDescriptor>>,
    unavailable: AtomicBool,
}

impl FakeEnumerator {
    pub fn new(apps: Vec<AppDescriptor>) -> Self {
        Self { apps: Mutex::new(apps), unavailable: AtomicBool::new(false) }
    }

    pub fn set(&self, apps: Vec<AppDescriptor>) {
        *self.apps.lock().unwrap() = apps;
        self.unavailable.store(false, Ordering::SeqCst);
    }

    /// Fail every enumeration until the next `set`.
    pub fn set_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }
}

impl AppEnumerator for FakeEnumerator {
    fn running_apps(&self) -> Option<Vec<AppDescriptor>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.apps.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeFocus {
    active: Mutex<Option<u32>>,
    hidden: Mutex<HashSet<u32>>,
}

impl FakeFocus {
    pub fn set_active(&self, pid: Option<u32>) {
        *self.active.lock().unwrap() = pid;
    }

    pub fn set_hidden(&self, pids: &[u32]) {
        *self.hidden.lock().unwrap() = pids.iter().copied().collect();
    }
}

impl FocusTracker for FakeFocus {
    fn active_pid(&self) -> Option<u32> {
        *self.active.lock().unwrap()
    }

    fn hidden_pids(&self) -> HashSet<u32> {
        self.hidden.lock().unwrap().clone()
    }
}

/// Returns configured samples, the unavailable sentinel for unknown pids.
#[derive(Default)]
pub struct FakeSampler {
    samples: Mutex<HashMap<u32, ResourceSample>>,
    calls: AtomicUsize,
}

impl FakeSampler {
    pub fn set(&self, pid: u32, sample: ResourceSample) {
        self.samples.lock().unwrap().insert(pid, sample);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResourceSampler for FakeSampler {
    fn sample(&self, pid: u32) -> ResourceSample {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.samples
            .lock()
            .unwrap()
            .get(&pid)
            .copied()
            .unwrap_or_else(ResourceSample::unavailable)
    }
}

/// Records quit requests; pids in `refuse` fail with `PermissionDenied`.
#[derive(Default)]
pub struct FakeTerminator {
    requested: Mutex<Vec<u32>>,
    refuse: Mutex<HashSet<u32>>,
}

impl FakeTerminator {
    pub fn refuse(&self, pid: u32) {
        self.refuse.lock().unwrap().insert(pid);
    }

    pub fn requested(&self) -> Vec<u32> {
        self.requested.lock().unwrap().clone()
    }
}

impl ProcessTerminator for FakeTerminator {
    fn request_quit(&self, process: &TrackedProcess) -> PlatformResult<()> {
        if self.refuse.lock().unwrap().contains(&process.process_id) {
            return Err(PlatformError::PermissionDenied(format!(
                "pid {} refused",
                process.process_id
            )));
        }
        self.requested.lock().unwrap().push(process.process_id);
        Ok(())
    }
}
