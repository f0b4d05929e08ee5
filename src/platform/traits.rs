//! Platform Abstraction Traits for Application Tracking
//!
//! This module defines the OS primitives the staleness engine depends on:
//! enumerating user-facing applications, observing focus/hidden state,
//! sampling per-process resources, and requesting a graceful quit.
//!
//! # Architecture
//!
//! ```text
//! +-------------------+
//! |   Platform Traits |  <- This module (defines interfaces)
//! +-------------------+
//!          |
//!    +-----+-----+
//!    |           |
//! +--v--+    +---v----+
//! | Lin |    | sysinfo|  <- Platform-specific implementations
//! +-----+    +--------+
//! ```
//!
//! Every trait is object safe and `Send + Sync`, so implementations are
//! shared as `Arc<dyn Trait>` between the registry, the scheduler and the
//! lifecycle watcher.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::process::TrackedProcess;

// ============================================================================
// Error Types
// ============================================================================

/// Platform-agnostic error type for all platform operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Permission denied (requires elevated privileges)
    PermissionDenied(String),
    /// Resource not found (process exited, pid reused, etc.)
    NotFound(String),
    /// Operation not supported on this platform
    NotSupported(String),
    /// Invalid argument provided
    InvalidArgument(String),
    /// System call failed
    SystemError { code: i32, message: String },
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            PlatformError::NotFound(msg) => write!(f, "Not found: {}", msg),
            PlatformError::NotSupported(msg) => write!(f, "Not supported: {}", msg),
            PlatformError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            PlatformError::SystemError { code, message } => {
                write!(f, "System error ({}): {}", code, message)
            }
        }
    }
}

impl std::error::Error for PlatformError {}

/// Result type alias for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

// ============================================================================
// Application Types
// ============================================================================

/// A running user-facing application as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    /// Process ID
    pub pid: u32,
    /// Executable identity (lower-cased executable name or bundle id)
    pub identity: String,
    /// Human-readable label
    pub display_name: String,
    /// Process creation time, when the OS exposes it
    pub launched_at: Option<DateTime<Utc>>,
}

impl AppDescriptor {
    /// Descriptor with only a pid and identity; the display name mirrors the identity.
    pub fn new(pid: u32, identity: impl Into<String>) -> Self {
        let identity = identity.into();
        Self {
            pid,
            display_name: identity.clone(),
            identity,
            launched_at: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_launched_at(mut self, at: DateTime<Utc>) -> Self {
        self.launched_at = Some(at);
        self
    }
}

// ============================================================================
// Resource Types
// ============================================================================

/// One metrics reading for a single process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Resident set size in bytes
    pub memory_bytes: u64,
    /// Lifetime-average CPU usage, clamped to 0-100
    pub cpu_percent: f64,
    /// On-screen, non-desktop windows owned by the process
    pub window_count: u32,
}

impl ResourceSample {
    /// The zeroed sentinel returned when a process cannot be queried.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn is_unavailable(&self) -> bool {
        self.memory_bytes == 0 && self.cpu_percent == 0.0 && self.window_count == 0
    }

    /// Get memory in megabytes.
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Lists regular, user-facing applications.
///
/// Implementations exclude background agents and helper processes; the
/// registry applies the denylist and user exclusions on top.
pub trait AppEnumerator: Send + Sync {
    /// `None` when the list could not be built completely this time (for
    /// example a failed window system query). Callers keep their current
    /// view instead of treating missing apps as terminated.
    fn running_apps(&self) -> Option<Vec<AppDescriptor>>;
}

/// Reports which process has input focus and which are hidden.
pub trait FocusTracker: Send + Sync {
    fn active_pid(&self) -> Option<u32>;
    fn hidden_pids(&self) -> HashSet<u32>;
}

/// Translates a pid into a metrics triple.
///
/// Must never panic or block indefinitely. A dead or inaccessible pid
/// yields [`ResourceSample::unavailable`].
pub trait ResourceSampler: Send + Sync {
    fn sample(&self, pid: u32) -> ResourceSample;
}

/// Issues graceful "please quit" requests. Never force-kills.
pub trait ProcessTerminator: Send + Sync {
    /// Returns once the request has been sent; does not wait for exit.
    fn request_quit(&self, process: &TrackedProcess) -> PlatformResult<()>;
}

/// Focus tracker for platforms without a window system query.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFocusTracker;

impl FocusTracker for NoFocusTracker {
    fn active_pid(&self) -> Option<u32> {
        None
    }

    fn hidden_pids(&self) -> HashSet<u32> {
        HashSet::new()
    }
}
