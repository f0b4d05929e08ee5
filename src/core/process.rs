//! Tracked application records

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::ResourceSample;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Registry key: executable identity plus pid.
///
/// A raw pid is reused by the OS once a process exits, so it is never used
/// as a key on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessKey {
    pub identity: String,
    pub pid: u32,
}

impl ProcessKey {
    pub fn new(identity: impl Into<String>, pid: u32) -> Self {
        Self { identity: identity.into(), pid }
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.identity, self.pid)
    }
}

/// A running application as seen by the registry. Runtime only, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedProcess {
    pub id: ProcessKey,
    pub executable_identity: String,
    pub display_name: String,
    pub process_id: u32,
    /// Last sampled resident memory
    pub memory_bytes: u64,
    /// Last sampled CPU percentage; may exceed 100 on multi-core attribution
    pub cpu_percent: f64,
    pub window_count: u32,
    pub last_active_at: DateTime<Utc>,
    pub launched_at: DateTime<Utc>,
    pub is_foreground: bool,
    pub is_hidden: bool,
    /// Set once at creation from the static system denylist
    pub is_system_protected: bool,
    pub is_user_protected: bool,
    /// Registry insertion sequence; orders ties and guards metric write-back.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl TrackedProcess {
    /// New entry with zeroed metrics, last active and launched at `now`
    /// unless a more precise launch time is known.
    pub fn new(
        pid: u32,
        identity: impl Into<String>,
        display_name: impl Into<String>,
        now: DateTime<Utc>,
        launched_at: Option<DateTime<Utc>>,
    ) -> Self {
        let identity = identity.into();
        Self {
            id: ProcessKey::new(identity.clone(), pid),
            executable_identity: identity,
            display_name: display_name.into(),
            process_id: pid,
            memory_bytes: 0,
            cpu_percent: 0.0,
            window_count: 0,
            last_active_at: now,
            launched_at: launched_at.unwrap_or(now),
            is_foreground: false,
            is_hidden: false,
            is_system_protected: false,
            is_user_protected: false,
            seq: 0,
        }
    }

    /// Insertion order within the owning registry.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Protected from scoring and termination, either statically or by the user.
    pub fn is_protected(&self) -> bool {
        self.is_system_protected || self.is_user_protected
    }

    /// Time since this process last had focus; never negative.
    pub fn inactive_for(&self, now: DateTime<Utc>) -> Duration {
        let elapsed = now - self.last_active_at;
        if elapsed < Duration::zero() {
            Duration::zero()
        } else {
            elapsed
        }
    }

    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / BYTES_PER_MB
    }

    pub fn memory_gb(&self) -> f64 {
        self.memory_bytes as f64 / BYTES_PER_GB
    }

    /// Move `last_active_at` forward; earlier timestamps are ignored.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_active_at {
            self.last_active_at = at;
        }
    }

    pub fn apply_sample(&mut self, sample: &ResourceSample) {
        self.memory_bytes = sample.memory_bytes;
        self.cpu_percent = sample.cpu_percent;
        self.window_count = sample.window_count;
    }
}
