//! Graceful termination via SIGTERM

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::debug;

use super::proc;
use crate::core::process::TrackedProcess;
use crate::platform::{PlatformError, PlatformResult, ProcessTerminator};

/// Sends SIGTERM after checking the pid still runs the same executable.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxProcessTerminator;

impl LinuxProcessTerminator {
    pub fn new() -> Self {
        Self
    }
}

/// Refuse to signal a pid that now belongs to a different program.
pub fn verify_identity(pid: u32, expected: &str, actual: Option<&str>) -> PlatformResult<()> {
    match actual {
        None => Err(PlatformError::NotFound(format!("process {} has exited", pid))),
        Some(actual) if actual != expected => Err(PlatformError::NotFound(format!(
            "pid {} now belongs to {}, not {}",
            pid, actual, expected
        ))),
        Some(_) => Ok(()),
    }
}

pub fn errno_to_error(errno: Errno, pid: u32) -> PlatformError {
    match errno {
        Errno::ESRCH => PlatformError::NotFound(format!("process {} has exited", pid)),
        Errno::EPERM => {
            PlatformError::PermissionDenied(format!("cannot send SIGTERM to process {}", pid))
        }
        other => PlatformError::SystemError {
            code: other as i32,
            message: other.desc().to_string(),
        },
    }
}

impl ProcessTerminator for LinuxProcessTerminator {
    fn request_quit(&self, process: &TrackedProcess) -> PlatformResult<()> {
        let pid = process.process_id;
        if pid <= 1 || pid > i32::MAX as u32 {
            return Err(PlatformError::InvalidArgument(format!("refusing to signal pid {}", pid)));
        }

        let actual = proc::executable_identity(pid);
        verify_identity(pid, &process.executable_identity, actual.as_deref())?;

        debug!("Sending SIGTERM to {} ({})", pid, process.executable_identity);
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| errno_to_error(e, pid))
    }
}
