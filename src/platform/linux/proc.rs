//! /proc filesystem readers
//!
//! Parsers take file contents as `&str` so they can be tested on fixed
//! strings; the `read_*` wrappers do the I/O and return `None` when the
//! process is gone or the file is not readable.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};

/// Fields of `/proc/<pid>/stat` the sampler and enumerator use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStat {
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub tty_nr: i32,
    /// User time in clock ticks
    pub utime: u64,
    /// System time in clock ticks
    pub stime: u64,
    /// Start time in clock ticks after boot
    pub starttime: u64,
}

/// Parse `/proc/<pid>/stat`.
///
/// The comm field can contain spaces and parentheses, so fields are counted
/// from the last `)`.
pub fn parse_stat(content: &str) -> Option<ProcStat> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close < open {
        return None;
    }
    let comm = content[open + 1..close].to_string();
    let fields: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();

    Some(ProcStat {
        comm,
        state: fields.first()?.chars().next()?,
        ppid: fields.get(1)?.parse().ok()?,
        tty_nr: fields.get(4)?.parse().ok()?,
        utime: fields.get(11)?.parse().ok()?,
        stime: fields.get(12)?.parse().ok()?,
        starttime: fields.get(19)?.parse().ok()?,
    })
}

/// Resident pages from `/proc/<pid>/statm` (second field).
pub fn parse_statm(content: &str) -> Option<u64> {
    content.split_whitespace().nth(1)?.parse().ok()
}

/// `Rss:` of `/proc/<pid>/smaps_rollup`, in bytes.
pub fn parse_smaps_rollup(content: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with("Rss:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Seconds since boot from `/proc/uptime`.
pub fn parse_uptime(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

/// Boot time (unix seconds) from the `btime` line of `/proc/stat`.
pub fn parse_btime(content: &str) -> Option<i64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|v| v.trim().parse().ok())
}

/// Lifetime average CPU usage, clamped to `[0, 100]`.
pub fn cpu_percent(stat: &ProcStat, uptime_secs: f64, ticks_per_sec: u64) -> f64 {
    if ticks_per_sec == 0 {
        return 0.0;
    }
    let ticks = ticks_per_sec as f64;
    let alive = uptime_secs - stat.starttime as f64 / ticks;
    if alive <= 0.0 {
        return 0.0;
    }
    let busy = (stat.utime + stat.stime) as f64 / ticks;
    (busy / alive * 100.0).clamp(0.0, 100.0)
}

/// Wall-clock start of a process.
pub fn launched_at(stat: &ProcStat, btime: i64, ticks_per_sec: u64) -> Option<DateTime<Utc>> {
    if ticks_per_sec == 0 {
        return None;
    }
    let millis = btime * 1000 + (stat.starttime * 1000 / ticks_per_sec) as i64;
    Utc.timestamp_millis_opt(millis).single()
}

/// Lower-cased executable file name from an `exe` link target.
pub fn identity_from_exe(target: &Path) -> Option<String> {
    let name = target.file_name()?.to_string_lossy();
    let name = name.strip_suffix(" (deleted)").unwrap_or(&name);
    if name.is_empty() {
        None
    } else {
        Some(name.to_lowercase())
    }
}

// ============================================================================
// Readers
// ============================================================================

pub fn list_pids() -> Vec<u32> {
    let Ok(dir) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    dir.flatten()
        .filter_map(|entry| entry.file_name().to_string_lossy().parse::<u32>().ok())
        .collect()
}

pub fn read_stat(pid: u32) -> Option<ProcStat> {
    parse_stat(&fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?)
}

pub fn read_comm(pid: u32) -> Option<String> {
    fs::read_to_string(format!("/proc/{}/comm", pid))
        .ok()
        .map(|s| s.trim().to_string())
}

/// Null-separated arguments of `/proc/<pid>/cmdline`.
pub fn read_cmdline(pid: u32) -> Vec<String> {
    fs::read(format!("/proc/{}/cmdline", pid))
        .map(|bytes| {
            bytes
                .split(|&b| b == 0)
                .filter(|arg| !arg.is_empty())
                .map(|arg| String::from_utf8_lossy(arg).into_owned())
                .collect()
        })
        .unwrap_or_default()
}

/// Executable identity: the `exe` link's file name, falling back to `comm`.
pub fn executable_identity(pid: u32) -> Option<String> {
    fs::read_link(format!("/proc/{}/exe", pid))
        .ok()
        .and_then(|target| identity_from_exe(&target))
        .or_else(|| read_comm(pid).map(|c| c.to_lowercase()))
        .filter(|identity| !identity.is_empty())
}

/// Whether `/proc/<pid>/exe` resolves. Kernel threads and processes of
/// other users do not.
pub fn has_executable(pid: u32) -> bool {
    fs::read_link(format!("/proc/{}/exe", pid)).is_ok()
}

pub fn owner_uid(pid: u32) -> Option<u32> {
    fs::metadata(format!("/proc/{}", pid)).ok().map(|m| m.uid())
}

pub fn read_rss_bytes(pid: u32) -> Option<u64> {
    parse_smaps_rollup(&fs::read_to_string(format!("/proc/{}/smaps_rollup", pid)).ok()?)
}

pub fn read_statm_bytes(pid: u32) -> Option<u64> {
    let pages = parse_statm(&fs::read_to_string(format!("/proc/{}/statm", pid)).ok()?)?;
    Some(pages * page_size())
}

pub fn uptime_secs() -> Option<f64> {
    parse_uptime(&fs::read_to_string("/proc/uptime").ok()?)
}

pub fn boot_time() -> Option<i64> {
    parse_btime(&fs::read_to_string("/proc/stat").ok()?)
}

pub fn current_uid() -> u32 {
    // SAFETY: getuid() cannot fail
    unsafe { libc::getuid() }
}

pub fn clock_ticks() -> u64 {
    // SAFETY: sysconf() has no preconditions
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

pub fn page_size() -> u64 {
    // SAFETY: sysconf() has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}
