//! Helpers for tests that touch real namespaces

use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

static PREFIX_COUNTER: AtomicU32 = AtomicU32::new(0);

/// How this process can manage network namespaces
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Privileges {
    Root,
    /// Only through `sudo -n`
    Sudo,
    Missing,
}

impl Privileges {
    /// Whether a netns backend configured with `use_sudo` will work.
    pub fn allows(self, use_sudo: bool) -> bool {
        match self {
            Self::Root => true,
            Self::Sudo => use_sudo,
            Self::Missing => false,
        }
    }
}

pub fn privileges() -> Privileges {
    let has_ip = Command::new("ip")
        .arg("netns")
        .output()
        .is_ok_and(|o| o.status.success());
    if !has_ip {
        return Privileges::Missing;
    }
    if nix::unistd::geteuid().is_root() {
        return Privileges::Root;
    }
    let sudo = Command::new("sudo")
        .args(["-n", "ip", "netns", "list"])
        .output()
        .is_ok_and(|o| o.status.success());
    if sudo {
        Privileges::Sudo
    } else {
        Privileges::Missing
    }
}

/// True when namespaces can be created, either as root or through
/// passwordless sudo.
pub fn check_privileges() -> bool {
    privileges() != Privileges::Missing
}

/// Namespace prefix unique to this process and call, so parallel test
/// runs do not collide. Short enough to leave room for a node id.
pub fn unique_prefix(tag: &str) -> String {
    let seq = PREFIX_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id() % 0xffff;
    format!("{tag}{pid:x}{seq}-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sudo_needs_opt_in() {
        assert!(Privileges::Root.allows(false));
        assert!(Privileges::Sudo.allows(true));
        assert!(!Privileges::Sudo.allows(false));
        assert!(!Privileges::Missing.allows(true));
    }

    #[test]
    fn test_unique_prefixes_differ() {
        let a = unique_prefix("t");
        let b = unique_prefix("t");
        assert_ne!(a, b);
        assert!(a.starts_with('t') && a.ends_with('-'));
    }
}
