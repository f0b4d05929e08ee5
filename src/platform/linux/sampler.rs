//! Per-process resource sampling

use std::sync::Arc;

use tracing::debug;

use super::desktop::X11Desktop;
use super::proc;
use crate::platform::{ResourceSample, ResourceSampler};

/// Samples resident memory, lifetime CPU and window count from /proc and X11.
pub struct LinuxResourceSampler {
    desktop: Arc<X11Desktop>,
    ticks: u64,
}

impl LinuxResourceSampler {
    pub fn new(desktop: Arc<X11Desktop>) -> Self {
        Self {
            desktop,
            ticks: proc::clock_ticks(),
        }
    }

    /// `smaps_rollup` is exact but may be hidden by ptrace policy; `statm`
    /// is always readable by the owner.
    fn memory_bytes(&self, pid: u32) -> Option<u64> {
        proc::read_rss_bytes(pid).or_else(|| {
            debug!("smaps_rollup unreadable for {}, using statm", pid);
            proc::read_statm_bytes(pid)
        })
    }
}

impl ResourceSampler for LinuxResourceSampler {
    fn sample(&self, pid: u32) -> ResourceSample {
        let Some(stat) = proc::read_stat(pid) else {
            return ResourceSample::unavailable();
        };
        let Some(memory_bytes) = self.memory_bytes(pid) else {
            return ResourceSample::unavailable();
        };

        let cpu_percent = proc::uptime_secs()
            .map(|uptime| proc::cpu_percent(&stat, uptime, self.ticks))
            .unwrap_or(0.0);
        let window_count = self.desktop.window_count(pid).unwrap_or(0);

        ResourceSample {
            memory_bytes,
            cpu_percent,
            window_count,
        }
    }
}
