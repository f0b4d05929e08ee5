//! Static denylist of system applications that are never scored or quit

/// Executable identities (lower-cased) of shells, compositors, session
/// managers and core daemons.
pub const SYSTEM_PROTECTED_APPS: &[&str] = &[
    // Init systems
    "systemd",
    "init",
    "systemd-journald",
    "systemd-logind",

    // D-Bus
    "dbus-daemon",
    "dbus-broker",
    "dbus-broker-launch",

    // Display servers
    "xorg",
    "xwayland",

    // Wayland compositors / window managers
    "gnome-shell",
    "kwin_wayland",
    "kwin_x11",
    "sway",
    "weston",
    "mutter",
    "enlightenment",
    "wayfire",
    "river",
    "hyprland",
    "openbox",
    "i3",
    "xfwm4",

    // Desktop shells and session managers
    "plasmashell",
    "gnome-session",
    "gnome-session-binary",
    "xfce4-session",
    "xfce4-panel",
    "xfdesktop",
    "mate-session",
    "cinnamon-session",
    "lxsession",
    "lxqt-session",
    "budgie-wm",
    "gala",
    "marco",
    "nautilus-desktop",

    // Audio systems
    "pulseaudio",
    "pipewire",
    "pipewire-pulse",
    "wireplumber",

    // Security / keyring
    "polkit-gnome-authentication-agent-1",
    "gnome-keyring-daemon",
    "ssh-agent",
    "gpg-agent",

    // Display managers
    "gdm",
    "gdm-wayland-session",
    "gdm-x-session",
    "sddm",
    "lightdm",

    // Input methods
    "ibus-daemon",
    "fcitx5",

    // macOS window system
    "kernel_task",
    "launchd",
    "windowserver",
    "loginwindow",
    "dock",
    "finder",
    "systemuiserver",
    "controlcenter",
    "notificationcenter",

    // Windows shell
    "explorer.exe",
    "dwm.exe",
    "csrss.exe",
    "winlogon.exe",
];

/// Exact, case-insensitive match against [`SYSTEM_PROTECTED_APPS`].
pub fn is_system_protected(identity: &str) -> bool {
    let identity = identity.to_lowercase();
    SYSTEM_PROTECTED_APPS.iter().any(|p| *p == identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_system_apps() {
        assert!(is_system_protected("gnome-shell"));
        assert!(is_system_protected("Xwayland"));
        assert!(is_system_protected("WindowServer"));
        assert!(is_system_protected("plasmashell"));
    }

    #[test]
    fn test_user_apps_not_protected() {
        assert!(!is_system_protected("firefox"));
        assert!(!is_system_protected("code"));
        // exact match only, longer helper names are not covered
        assert!(!is_system_protected("gnome-shell-extension-prefs"));
    }

    #[test]
    fn test_list_is_lowercase() {
        for name in SYSTEM_PROTECTED_APPS {
            assert_eq!(*name, name.to_lowercase());
        }
    }
}
