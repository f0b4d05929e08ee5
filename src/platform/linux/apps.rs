//! Application enumeration from /proc
//!
//! A process counts as a user-facing application when it belongs to the
//! current user, has a resolvable executable, is not a helper child of
//! another instance of the same program, and either owns a window or,
//! when there is no window system at all, has no controlling terminal.
//!
//! A window system that is present but fails to answer yields no list for
//! that round rather than falling back to the terminal rule.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::desktop::X11Desktop;
use super::proc;
use crate::platform::{AppDescriptor, AppEnumerator};

/// What the selection rules need to know about one process.
#[derive(Debug, Clone)]
pub struct ProcessCandidate {
    pub pid: u32,
    pub ppid: u32,
    pub identity: String,
    pub comm: String,
    pub tty_nr: i32,
    pub cmdline: Vec<String>,
    pub launched_at: Option<DateTime<Utc>>,
}

impl ProcessCandidate {
    /// Chromium and Electron renderer, GPU and utility children.
    fn is_helper(&self) -> bool {
        self.cmdline.iter().skip(1).any(|arg| arg.starts_with("--type="))
    }
}

/// Apply the application rules to the current user's processes.
///
/// `window_owners` is `None` when there is no window system.
pub fn select_apps(
    candidates: &[ProcessCandidate],
    window_owners: Option<&HashSet<u32>>,
    own_pid: u32,
) -> Vec<AppDescriptor> {
    let identities: HashMap<u32, &str> = candidates
        .iter()
        .map(|c| (c.pid, c.identity.as_str()))
        .collect();

    let mut apps: Vec<AppDescriptor> = candidates
        .iter()
        .filter(|c| c.pid != own_pid && !c.is_helper())
        .filter(|c| identities.get(&c.ppid) != Some(&c.identity.as_str()))
        .filter(|c| match window_owners {
            Some(owners) => owners.contains(&c.pid),
            None => c.tty_nr == 0,
        })
        .map(|c| {
            let desc = AppDescriptor::new(c.pid, c.identity.clone()).with_display_name(c.comm.clone());
            match c.launched_at {
                Some(at) => desc.with_launched_at(at),
                None => desc,
            }
        })
        .collect();
    apps.sort_by_key(|a| a.pid);
    apps
}

/// Enumerates applications of the current user.
pub struct LinuxAppEnumerator {
    desktop: Arc<X11Desktop>,
    uid: u32,
    own_pid: u32,
}

impl LinuxAppEnumerator {
    pub fn new(desktop: Arc<X11Desktop>) -> Self {
        Self {
            desktop,
            uid: proc::current_uid(),
            own_pid: std::process::id(),
        }
    }

    fn candidates(&self) -> Vec<ProcessCandidate> {
        let btime = proc::boot_time();
        let ticks = proc::clock_ticks();

        proc::list_pids()
            .into_iter()
            .filter(|&pid| proc::owner_uid(pid) == Some(self.uid) && proc::has_executable(pid))
            .filter_map(|pid| {
                let stat = proc::read_stat(pid)?;
                let identity = proc::executable_identity(pid)?;
                let launched_at = btime.and_then(|b| proc::launched_at(&stat, b, ticks));
                Some(ProcessCandidate {
                    pid,
                    ppid: stat.ppid,
                    identity,
                    comm: stat.comm,
                    tty_nr: stat.tty_nr,
                    cmdline: proc::read_cmdline(pid),
                    launched_at,
                })
            })
            .collect()
    }
}

impl AppEnumerator for LinuxAppEnumerator {
    fn running_apps(&self) -> Option<Vec<AppDescriptor>> {
        let owners = if self.desktop.is_enabled() {
            let Some(owners) = self.desktop.window_owners() else {
                debug!("Window query failed, skipping enumeration");
                return None;
            };
            Some(owners)
        } else {
            None
        };
        Some(select_apps(&self.candidates(), owners.as_ref(), self.own_pid))
    }
}
