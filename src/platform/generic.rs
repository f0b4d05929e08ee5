//! sysinfo-backed platform implementation
//!
//! Used where no native implementation exists. There is no window system
//! query, so every process of the current user with an executable counts as
//! an application and focus is never reported.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{TimeZone, Utc};
use sysinfo::{Pid, Process, ProcessesToUpdate, Signal, System, Uid};
use tracing::debug;

use super::{AppDescriptor, AppEnumerator, PlatformError, PlatformResult, ProcessTerminator, ResourceSample, ResourceSampler};
use crate::core::process::TrackedProcess;

/// One `System` shared by the enumerator, sampler and terminator.
pub struct SharedSystem {
    system: Mutex<System>,
    own_pid: Option<Pid>,
    own_uid: Option<Uid>,
}

impl SharedSystem {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        let own_pid = sysinfo::get_current_pid().ok();
        let own_uid = own_pid
            .and_then(|pid| system.process(pid))
            .and_then(|p| p.user_id().cloned());
        Self {
            system: Mutex::new(system),
            own_pid,
            own_uid,
        }
    }

    fn lock(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SharedSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Lower-cased executable file name, falling back to the process name.
fn identity_of(process: &Process) -> Option<String> {
    process
        .exe()
        .and_then(Path::file_name)
        .or_else(|| Some(process.name()))
        .map(|name| name.to_string_lossy().to_lowercase())
        .filter(|name| !name.is_empty())
}

fn is_helper(process: &Process) -> bool {
    process
        .cmd()
        .iter()
        .skip(1)
        .any(|arg| arg.to_string_lossy().starts_with("--type="))
}

pub struct GenericAppEnumerator {
    system: Arc<SharedSystem>,
}

impl GenericAppEnumerator {
    pub fn new(system: Arc<SharedSystem>) -> Self {
        Self { system }
    }
}

impl AppEnumerator for GenericAppEnumerator {
    fn running_apps(&self) -> Option<Vec<AppDescriptor>> {
        let mut sys = self.system.lock();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let identities: HashMap<Pid, String> = sys
            .processes()
            .iter()
            .filter(|(_, p)| p.exe().is_some())
            .filter_map(|(pid, p)| Some((*pid, identity_of(p)?)))
            .collect();

        let mut apps: Vec<AppDescriptor> = sys
            .processes()
            .iter()
            .filter(|(pid, _)| Some(**pid) != self.system.own_pid)
            .filter(|(_, p)| self.system.own_uid.is_none() || p.user_id() == self.system.own_uid.as_ref())
            .filter(|(_, p)| !is_helper(p))
            .filter_map(|(pid, p)| {
                let identity = identities.get(pid)?;
                let parent_identity = p.parent().and_then(|parent| identities.get(&parent));
                if parent_identity == Some(identity) {
                    return None;
                }
                let desc = AppDescriptor::new(pid.as_u32(), identity.clone())
                    .with_display_name(p.name().to_string_lossy());
                Some(match Utc.timestamp_opt(p.start_time() as i64, 0).single() {
                    Some(at) if p.start_time() > 0 => desc.with_launched_at(at),
                    _ => desc,
                })
            })
            .collect();
        apps.sort_by_key(|a| a.pid);
        Some(apps)
    }
}

pub struct GenericResourceSampler {
    system: Arc<SharedSystem>,
}

impl GenericResourceSampler {
    pub fn new(system: Arc<SharedSystem>) -> Self {
        Self { system }
    }
}

impl ResourceSampler for GenericResourceSampler {
    fn sample(&self, pid: u32) -> ResourceSample {
        let pid = Pid::from_u32(pid);
        let mut sys = self.system.lock();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        match sys.process(pid) {
            Some(p) => ResourceSample {
                memory_bytes: p.memory(),
                cpu_percent: (p.cpu_usage() as f64).clamp(0.0, 100.0),
                window_count: 0,
            },
            None => ResourceSample::unavailable(),
        }
    }
}

pub struct GenericProcessTerminator {
    system: Arc<SharedSystem>,
}

impl GenericProcessTerminator {
    pub fn new(system: Arc<SharedSystem>) -> Self {
        Self { system }
    }
}

impl ProcessTerminator for GenericProcessTerminator {
    fn request_quit(&self, target: &TrackedProcess) -> PlatformResult<()> {
        if target.process_id <= 1 {
            return Err(PlatformError::InvalidArgument(format!(
                "refusing to signal pid {}",
                target.process_id
            )));
        }

        let pid = Pid::from_u32(target.process_id);
        let mut sys = self.system.lock();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        let process = sys
            .process(pid)
            .ok_or_else(|| PlatformError::NotFound(format!("process {} has exited", target.process_id)))?;
        let identity = identity_of(process).unwrap_or_default();
        if identity != target.executable_identity {
            return Err(PlatformError::NotFound(format!(
                "pid {} now belongs to {}, not {}",
                target.process_id, identity, target.executable_identity
            )));
        }

        debug!("Sending terminate to {} ({})", target.process_id, identity);
        match process.kill_with(Signal::Term) {
            Some(true) => Ok(()),
            Some(false) => Err(PlatformError::PermissionDenied(format!(
                "cannot terminate process {}",
                target.process_id
            ))),
            None => Err(PlatformError::NotSupported(
                "graceful termination signal".to_string(),
            )),
        }
    }
}
