//! Linux Platform Support
//!
//! This module provides the Linux implementations of the platform traits
//! using the /proc filesystem, the X11 command-line tools and libc/nix
//! system calls.
//!
//! ## Modules
//!
//! - **proc**: /proc parsers (stat, statm, smaps_rollup, uptime)
//! - **desktop**: window list, focus and hidden state via wmctrl/xdotool/xprop
//! - **apps**: user-facing application enumeration
//! - **sampler**: memory, CPU and window sampling
//! - **terminate**: SIGTERM with a pid reuse guard
//! - **signals**: shutdown/reload flags for the watch loop
//!
//! ## Permissions
//!
//! Everything runs unprivileged. Only processes of the current user are
//! enumerated, so `smaps_rollup` and `kill()` are normally permitted; a
//! hardened ptrace policy can hide `smaps_rollup`, in which case `statm`
//! is used instead.

pub mod apps;
pub mod desktop;
pub mod proc;
pub mod sampler;
pub mod signals;
pub mod terminate;

pub use apps::LinuxAppEnumerator;
pub use desktop::X11Desktop;
pub use sampler::LinuxResourceSampler;
pub use signals::SignalState;
pub use terminate::LinuxProcessTerminator;
