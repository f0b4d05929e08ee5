//! RuVector AppSweep
//!
//! Tracks the user-facing applications running on the desktop, measures
//! what each one costs, and scores how stale it is so forgotten apps can be
//! asked to quit.
//!
//! ## Features
//!
//! - **Process Registry**: live set of applications, driven by lifecycle events
//! - **Resource Sampling**: periodic memory/CPU/window sampling off the async runtime
//! - **Staleness Scoring**: weighted inactivity, memory and CPU score with five levels
//! - **Cleanup**: graceful quit requests with protection lists and dry-run mode
//! - **Hot Reload**: configuration file changes are applied while running
//!
//! ## Safety
//!
//! - System applications are never tracked unless asked, and never quit
//! - User-protected applications score 0 and are skipped at cleanup
//! - Only graceful termination is ever requested
//! - Pid reuse is checked before signalling

pub mod core;
pub mod engine;
pub mod platform;

// Re-exports
pub use core::cleanup::{CleanupCoordinator, CleanupReport, CleanupSelection, CleanupStatus};
pub use core::config::{AppSweepConfig, ConfigProvider, FileConfigProvider, ScoringConfig, StaticConfig};
pub use core::process::{ProcessKey, TrackedProcess};
pub use core::registry::{LifecycleEvent, ProcessRegistry};
pub use core::scheduler::PollingScheduler;
pub use core::scorer::{staleness_score, ScoredProcess, StalenessLevel, StalenessScorer};
pub use engine::{AppSweepEngine, SweepOptions};
pub use platform::{create_platform, Platform, PlatformError, PlatformResult};
