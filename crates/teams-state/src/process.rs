//! Process liveness probes and signal escalation.

use std::thread;
use std::time::{Duration, Instant};

/// Liveness probe via signal 0. A pid of 0 or one we cannot signal because it
/// is gone counts as dead; EPERM (alive but not ours) counts as alive.
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

pub fn pid_alive_str(pid: &str) -> bool {
    pid.parse::<u32>().map(pid_alive).unwrap_or(false)
}

pub fn send_sigterm(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

pub fn send_sigkill(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

/// SIGTERM, wait up to `grace` for exit, then SIGKILL. Returns true once the
/// pid is observed dead.
pub fn terminate_with_grace(pid: u32, grace: Duration) -> bool {
    if !pid_alive(pid) {
        return true;
    }

    send_sigterm(pid);
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !pid_alive(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(100));
    }

    send_sigkill(pid);
    thread::sleep(Duration::from_millis(100));
    !pid_alive(pid)
}
