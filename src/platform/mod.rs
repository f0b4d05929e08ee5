//! Platform Abstraction Layer for RuVector AppSweep
//!
//! This module provides the OS primitives the staleness engine runs on:
//! application enumeration, focus tracking, per-process resource sampling
//! and graceful termination.
//!
//! # Architecture
//!
//! The platform layer uses conditional compilation to select the appropriate
//! implementation at build time:
//!
//! ```text
//! src/platform/
//! +-- mod.rs           <- This file (module definitions, Platform bundle)
//! +-- traits.rs        <- Platform-agnostic trait definitions
//! +-- generic.rs       <- sysinfo-backed fallback (any OS)
//! +-- linux/           <- Linux-specific implementations (cfg(linux))
//! |   +-- mod.rs
//! |   +-- proc.rs      <- /proc parsers
//! |   +-- desktop.rs   <- X11 window queries (wmctrl / xprop)
//! |   +-- apps.rs      <- application enumeration
//! |   +-- sampler.rs   <- memory / cpu / window sampling
//! |   +-- terminate.rs <- SIGTERM with pid reuse guard
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ruvector_appsweep::platform::create_platform;
//!
//! let platform = create_platform();
//! for app in platform.enumerator.running_apps().unwrap_or_default() {
//!     println!("{} ({})", app.display_name, app.pid);
//! }
//! ```
//!
//! # Platform Support
//!
//! | Feature | Linux | Other |
//! |---------|-------|-------|
//! | Enumeration | /proc + X11 windows | sysinfo, uid filter |
//! | Memory | smaps_rollup / statm | sysinfo |
//! | Focus / hidden | xprop | none |
//! | Termination | SIGTERM (nix) | sysinfo `kill_with(Term)` |

use std::sync::Arc;

// Core trait definitions - always available
pub mod traits;

pub mod generic;

pub use traits::{
    AppDescriptor, AppEnumerator, FocusTracker, NoFocusTracker, PlatformError, PlatformResult,
    ProcessTerminator, ResourceSample, ResourceSampler,
};

// ============================================================================
// Linux Platform Implementation
// ============================================================================

/// Linux-specific implementations.
#[cfg(target_os = "linux")]
pub mod linux;

// ============================================================================
// Platform Bundle
// ============================================================================

/// The four OS primitives, shared between the registry, scheduler, watcher
/// and cleanup coordinator.
#[derive(Clone)]
pub struct Platform {
    pub enumerator: Arc<dyn AppEnumerator>,
    pub focus: Arc<dyn FocusTracker>,
    pub sampler: Arc<dyn ResourceSampler>,
    pub terminator: Arc<dyn ProcessTerminator>,
}

/// Native implementations for the current target.
#[cfg(target_os = "linux")]
pub fn create_platform() -> Platform {
    let desktop = Arc::new(linux::X11Desktop::new());
    Platform {
        enumerator: Arc::new(linux::LinuxAppEnumerator::new(desktop.clone())),
        focus: desktop.clone(),
        sampler: Arc::new(linux::LinuxResourceSampler::new(desktop)),
        terminator: Arc::new(linux::LinuxProcessTerminator::new()),
    }
}

/// Native implementations for the current target.
#[cfg(not(target_os = "linux"))]
pub fn create_platform() -> Platform {
    let system = Arc::new(generic::SharedSystem::new());
    Platform {
        enumerator: Arc::new(generic::GenericAppEnumerator::new(system.clone())),
        focus: Arc::new(NoFocusTracker),
        sampler: Arc::new(generic::GenericResourceSampler::new(system.clone())),
        terminator: Arc::new(generic::GenericProcessTerminator::new(system)),
    }
}

// ============================================================================
// Cross-Platform Utilities
// ============================================================================

/// Format bytes into a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
