//! Process liveness probes.

/// ID of the calling process.
#[must_use]
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Whether `pid` names a running process.
///
/// Zombies count as exited. A process we lack permission to signal still
/// counts as alive.
#[cfg(unix)]
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => !is_zombie(pid),
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether `pid` names a running process.
///
/// Without a safe probe on this platform every non-zero pid is assumed
/// alive; stale entries are only dropped when explicitly unregistered.
#[cfg(not(unix))]
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    pid != 0
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // Field 3 of /proc/<pid>/stat, after the parenthesised command name.
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
        })
        .unwrap_or(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}
