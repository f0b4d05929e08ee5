//! X11 window queries
//!
//! Uses the `wmctrl`, `xdotool` and `xprop` command-line tools, so no X
//! client library is linked. Every tool call is bounded by a timeout and the
//! window list is cached briefly, since one polling pass asks for the window
//! count of every tracked process. `wmctrl` does not report window state, so
//! the per-window minimized flag is fetched with `xprop` and kept for
//! [`WINDOW_STATE_TTL`].
//!
//! Without `DISPLAY` (or without any of the tools) all queries report
//! "no window system" and callers fall back to terminal-based heuristics.

use std::collections::{HashMap, HashSet};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::platform::FocusTracker;

const WINDOW_CACHE_TTL: Duration = Duration::from_millis(500);
/// How long a fetched minimized flag is reused before asking `xprop` again.
pub const WINDOW_STATE_TTL: Duration = Duration::from_secs(5);
const TOOL_TIMEOUT: Duration = Duration::from_secs(2);

/// `_NET_WM_DESKTOP` value of windows shown on every desktop.
const STICKY_DESKTOP: i64 = 0xFFFF_FFFF;

/// A managed top-level window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: String,
    pub desktop: i64,
    pub pid: u32,
    /// Minimized; `None` until fetched
    pub hidden: Option<bool>,
}

impl WindowInfo {
    /// Docks, panels and desktop backgrounds are sticky.
    pub fn is_sticky(&self) -> bool {
        self.desktop == -1 || self.desktop == STICKY_DESKTOP
    }
}

// ============================================================================
// Tool output parsers
// ============================================================================

/// Parse `wmctrl -lp`: `<id> <desktop> <pid> <host> <title...>`.
///
/// Sticky windows and windows without a pid are skipped.
pub fn parse_wmctrl(output: &str) -> Vec<WindowInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next()?.to_string();
            let desktop = fields.next()?.parse::<i64>().ok()?;
            let pid = fields.next()?.parse::<u32>().ok()?;
            Some(WindowInfo { id, desktop, pid, hidden: None })
        })
        .filter(|w| w.pid != 0 && !w.is_sticky())
        .collect()
}

/// Window ids of `xprop -root _NET_CLIENT_LIST`.
pub fn parse_client_list(output: &str) -> Vec<String> {
    let Some((_, ids)) = output.split_once('#') else {
        return Vec::new();
    };
    ids.split(',')
        .map(str::trim)
        .filter(|id| id.starts_with("0x"))
        .map(str::to_string)
        .collect()
}

/// Window id of `xprop -root _NET_ACTIVE_WINDOW`; `0x0` means none.
pub fn parse_active_window(output: &str) -> Option<String> {
    let id = output.split_once('#')?.1.trim();
    let id = id.split(',').next()?.trim();
    if id.starts_with("0x") && id != "0x0" {
        Some(id.to_string())
    } else {
        None
    }
}

/// Value of a `NAME(CARDINAL) = <n>` line for `property`.
pub fn parse_cardinal(output: &str, property: &str) -> Option<i64> {
    output
        .lines()
        .find(|line| line.starts_with(property))
        .and_then(|line| line.split_once('='))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Whether `_NET_WM_STATE` carries `_NET_WM_STATE_HIDDEN`.
pub fn parse_hidden_state(output: &str) -> bool {
    output
        .lines()
        .filter(|line| line.starts_with("_NET_WM_STATE"))
        .filter_map(|line| line.split_once('='))
        .any(|(_, atoms)| atoms.split(',').any(|a| a.trim() == "_NET_WM_STATE_HIDDEN"))
}

/// Pids whose every window is minimized.
pub fn hidden_owners(windows: &[WindowInfo]) -> HashSet<u32> {
    let mut visible = HashSet::new();
    let mut hidden = HashSet::new();
    for window in windows {
        if window.hidden == Some(true) {
            hidden.insert(window.pid);
        } else {
            visible.insert(window.pid);
        }
    }
    hidden.retain(|pid| !visible.contains(pid));
    hidden
}

/// Fill in unknown minimized flags from `states`, calling `fetch` only for
/// windows whose cached flag is missing or older than `ttl`. States of
/// windows that are no longer listed are forgotten.
pub fn fill_hidden_states(
    windows: &mut [WindowInfo],
    states: &mut HashMap<String, (Instant, bool)>,
    now: Instant,
    ttl: Duration,
    mut fetch: impl FnMut(&str) -> bool,
) {
    let listed: HashSet<&str> = windows.iter().map(|w| w.id.as_str()).collect();
    states.retain(|id, _| listed.contains(id.as_str()));

    for window in windows.iter_mut().filter(|w| w.hidden.is_none()) {
        let hidden = match states.get(&window.id) {
            Some(&(at, hidden)) if now.saturating_duration_since(at) < ttl => hidden,
            _ => {
                let hidden = fetch(&window.id);
                states.insert(window.id.clone(), (now, hidden));
                hidden
            }
        };
        window.hidden = Some(hidden);
    }
}

/// Windows per pid.
pub fn window_counts(windows: &[WindowInfo]) -> HashMap<u32, u32> {
    let mut counts = HashMap::new();
    for window in windows {
        *counts.entry(window.pid).or_insert(0) += 1;
    }
    counts
}

// ============================================================================
// Tool runner
// ============================================================================

/// Run a tool and return its stdout, or `None` on spawn failure, non-zero
/// exit or timeout. A timed-out child is killed.
pub fn run_tool(program: &str, args: &[&str], timeout: Duration) -> Option<String> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;
    let pid = child.id();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(_) => None,
        Err(_) => {
            debug!("{} timed out after {:?}, killing", program, timeout);
            // SAFETY: kill() is safe to call with any pid and signal
            unsafe {
                libc::kill(pid as i32, libc::SIGKILL);
            }
            None
        }
    }
}

// ============================================================================
// X11 desktop
// ============================================================================

#[derive(Default)]
struct WindowCache {
    listed_at: Option<Instant>,
    windows: Option<Arc<Vec<WindowInfo>>>,
    states: HashMap<String, (Instant, bool)>,
}

/// Window list, focus and hidden state of the X11 session.
pub struct X11Desktop {
    enabled: bool,
    query: fn() -> Option<Vec<WindowInfo>>,
    cache: Mutex<WindowCache>,
}

impl X11Desktop {
    /// Enabled when `DISPLAY` is set.
    pub fn new() -> Self {
        let enabled = std::env::var_os("DISPLAY").map_or(false, |d| !d.is_empty());
        if !enabled {
            debug!("DISPLAY not set, window queries disabled");
        }
        Self::with_enabled(enabled)
    }

    /// A desktop that never reports windows.
    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        Self::with_query(enabled, query_windows)
    }

    fn with_query(enabled: bool, query: fn() -> Option<Vec<WindowInfo>>) -> Self {
        Self {
            enabled,
            query,
            cache: Mutex::new(WindowCache::default()),
        }
    }

    /// A desktop that is present but never answers window queries.
    #[cfg(test)]
    pub(crate) fn failing() -> Self {
        Self::with_query(true, || None)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Managed, non-sticky windows with their minimized flag, or `None`
    /// when no window system can be queried. Cached for a short TTL.
    pub fn windows(&self) -> Option<Arc<Vec<WindowInfo>>> {
        if !self.enabled {
            return None;
        }

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = cache.listed_at {
            if at.elapsed() < WINDOW_CACHE_TTL {
                return cache.windows.clone();
            }
        }

        let now = Instant::now();
        let windows = (self.query)().map(|mut windows| {
            fill_hidden_states(&mut windows, &mut cache.states, now, WINDOW_STATE_TTL, window_hidden);
            Arc::new(windows)
        });
        cache.listed_at = Some(now);
        cache.windows = windows.clone();
        windows
    }

    /// Number of windows owned by `pid`, `None` without a window system.
    pub fn window_count(&self, pid: u32) -> Option<u32> {
        let windows = self.windows()?;
        Some(windows.iter().filter(|w| w.pid == pid).count() as u32)
    }

    /// Pids owning at least one window.
    pub fn window_owners(&self) -> Option<HashSet<u32>> {
        Some(self.windows()?.iter().map(|w| w.pid).collect())
    }
}

impl Default for X11Desktop {
    fn default() -> Self {
        Self::new()
    }
}

fn query_windows() -> Option<Vec<WindowInfo>> {
    if let Some(output) = run_tool("wmctrl", &["-lp"], TOOL_TIMEOUT) {
        return Some(parse_wmctrl(&output));
    }

    let list = run_tool("xprop", &["-root", "_NET_CLIENT_LIST"], TOOL_TIMEOUT)?;
    let windows = parse_client_list(&list)
        .into_iter()
        .filter_map(|id| {
            let props = run_tool(
                "xprop",
                &["-id", &id, "_NET_WM_PID", "_NET_WM_DESKTOP", "_NET_WM_STATE"],
                TOOL_TIMEOUT,
            )?;
            let pid = parse_cardinal(&props, "_NET_WM_PID")? as u32;
            let desktop = parse_cardinal(&props, "_NET_WM_DESKTOP").unwrap_or(0);
            let hidden = Some(parse_hidden_state(&props));
            Some(WindowInfo { id, desktop, pid, hidden })
        })
        .filter(|w| w.pid != 0 && !w.is_sticky())
        .collect();
    Some(windows)
}

fn window_pid(id: &str) -> Option<u32> {
    let props = run_tool("xprop", &["-id", id, "_NET_WM_PID"], TOOL_TIMEOUT)?;
    parse_cardinal(&props, "_NET_WM_PID").map(|pid| pid as u32)
}

fn window_hidden(id: &str) -> bool {
    run_tool("xprop", &["-id", id, "_NET_WM_STATE"], TOOL_TIMEOUT)
        .map(|props| parse_hidden_state(&props))
        .unwrap_or(false)
}

impl FocusTracker for X11Desktop {
    fn active_pid(&self) -> Option<u32> {
        if !self.enabled {
            return None;
        }

        if let Some(pid) = run_tool("xdotool", &["getactivewindow", "getwindowpid"], TOOL_TIMEOUT)
            .and_then(|out| out.trim().parse::<u32>().ok())
        {
            return Some(pid);
        }

        let root = run_tool("xprop", &["-root", "_NET_ACTIVE_WINDOW"], TOOL_TIMEOUT)?;
        window_pid(&parse_active_window(&root)?)
    }

    /// Pids whose every window is minimized.
    fn hidden_pids(&self) -> HashSet<u32> {
        self.windows()
            .map(|windows| hidden_owners(&windows))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wmctrl() {
        let output = "\
0x01e00003 -1 1734   host Desktop
0x03a00003  0 4242   host Mozilla Firefox
0x03a0001b  1 4242   host Downloads
0x04000007  0 0      host Unknown owner
0x04400001  0 5151   host Terminal - ~/src
";
        let windows = parse_wmctrl(output);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].id, "0x03a00003");
        assert_eq!(window_counts(&windows).get(&4242), Some(&2));
        assert_eq!(window_counts(&windows).get(&5151), Some(&1));
        assert!(!window_counts(&windows).contains_key(&1734));
    }

    #[test]
    fn test_parse_client_list() {
        let output = "_NET_CLIENT_LIST(WINDOW): window id # 0x1e00003, 0x3a00003, 0x4400001\n";
        assert_eq!(parse_client_list(output), vec!["0x1e00003", "0x3a00003", "0x4400001"]);
        assert!(parse_client_list("_NET_CLIENT_LIST:  not found.\n").is_empty());
    }

    #[test]
    fn test_parse_active_window() {
        assert_eq!(
            parse_active_window("_NET_ACTIVE_WINDOW(WINDOW): window id # 0x3a00003\n"),
            Some("0x3a00003".to_string())
        );
        assert_eq!(parse_active_window("_NET_ACTIVE_WINDOW(WINDOW): window id # 0x0\n"), None);
    }

    #[test]
    fn test_parse_properties() {
        let props = "_NET_WM_PID(CARDINAL) = 4242\n_NET_WM_DESKTOP(CARDINAL) = 4294967295\n";
        assert_eq!(parse_cardinal(props, "_NET_WM_PID"), Some(4242));
        let sticky = WindowInfo {
            id: "0x1".into(),
            desktop: parse_cardinal(props, "_NET_WM_DESKTOP").unwrap(),
            pid: 4242,
            hidden: None,
        };
        assert!(sticky.is_sticky());
        assert_eq!(parse_cardinal("_NET_WM_PID:  not found.\n", "_NET_WM_PID"), None);
    }

    #[test]
    fn test_parse_hidden_state() {
        assert!(parse_hidden_state(
            "_NET_WM_STATE(ATOM) = _NET_WM_STATE_SKIP_TASKBAR, _NET_WM_STATE_HIDDEN\n"
        ));
        assert!(!parse_hidden_state("_NET_WM_STATE(ATOM) = _NET_WM_STATE_MAXIMIZED_VERT\n"));
        assert!(!parse_hidden_state("_NET_WM_STATE(ATOM) = \n"));
    }

    fn window(id: &str, pid: u32, hidden: Option<bool>) -> WindowInfo {
        WindowInfo { id: id.to_string(), desktop: 0, pid, hidden }
    }

    #[test]
    fn test_hidden_owners() {
        let windows = vec![
            window("0x1", 10, Some(true)),
            window("0x2", 10, Some(false)),
            window("0x3", 20, Some(true)),
            window("0x4", 30, None),
        ];
        assert_eq!(hidden_owners(&windows), HashSet::from([20]));
    }

    #[test]
    fn test_hidden_states_reused_within_ttl() {
        let start = Instant::now();
        let mut states = HashMap::new();
        let mut fetched = Vec::new();

        let mut windows = vec![window("0x1", 10, None), window("0x2", 20, None)];
        fill_hidden_states(&mut windows, &mut states, start, WINDOW_STATE_TTL, |id| {
            fetched.push(id.to_string());
            id == "0x2"
        });
        assert_eq!(fetched, vec!["0x1", "0x2"]);
        assert_eq!(windows[1].hidden, Some(true));

        // next listing within the TTL: no tool calls
        fetched.clear();
        let mut windows = vec![window("0x1", 10, None), window("0x2", 20, None)];
        fill_hidden_states(&mut windows, &mut states, start + Duration::from_secs(1), WINDOW_STATE_TTL, |id| {
            fetched.push(id.to_string());
            false
        });
        assert!(fetched.is_empty());
        assert_eq!(hidden_owners(&windows), HashSet::from([20]));

        // closed windows are forgotten; expired ones are fetched again
        let mut windows = vec![window("0x2", 20, None)];
        fill_hidden_states(&mut windows, &mut states, start + WINDOW_STATE_TTL, WINDOW_STATE_TTL, |id| {
            fetched.push(id.to_string());
            false
        });
        assert_eq!(fetched, vec!["0x2"]);
        assert_eq!(states.len(), 1);
        assert_eq!(windows[0].hidden, Some(false));
    }

    #[test]
    fn test_known_state_not_fetched() {
        let mut states = HashMap::new();
        let mut windows = vec![window("0x1", 10, Some(true))];
        fill_hidden_states(&mut windows, &mut states, Instant::now(), WINDOW_STATE_TTL, |_| {
            panic!("state already known")
        });
        assert!(states.is_empty());
    }

    #[test]
    fn test_failing_desktop_reports_no_windows() {
        let desktop = X11Desktop::failing();
        assert!(desktop.is_enabled());
        assert!(desktop.windows().is_none());
        assert!(desktop.window_owners().is_none());
        assert!(desktop.hidden_pids().is_empty());
    }

    #[test]
    fn test_disabled_desktop() {
        let desktop = X11Desktop::disabled();
        assert!(desktop.windows().is_none());
        assert!(desktop.window_count(1).is_none());
        assert!(desktop.active_pid().is_none());
        assert!(desktop.hidden_pids().is_empty());
    }

    #[test]
    fn test_run_tool() {
        assert_eq!(run_tool("echo", &["hi"], TOOL_TIMEOUT).as_deref(), Some("hi\n"));
        assert!(run_tool("false", &[], TOOL_TIMEOUT).is_none());
        assert!(run_tool("definitely-not-a-real-tool", &[], TOOL_TIMEOUT).is_none());

        let start = Instant::now();
        assert!(run_tool("sleep", &["5"], Duration::from_millis(200)).is_none());
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
