//! Scheduler mutex: a `run.lock` directory holding the owner pid.
//!
//! `mkdir` is the atomic primitive here (the lock carries no payload beyond
//! the pid file inside). A lock whose recorded owner is dead is stale and is
//! reclaimed with one retry. The guard releases on drop; SIGINT/SIGTERM
//! handlers cover the paths drop cannot reach.

use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::StateError;
use crate::process::pid_alive_str;

static SIGNAL_RELEASE_PATHS: OnceLock<(CString, CString)> = OnceLock::new();

#[derive(Debug)]
pub struct RunLockGuard {
    dir: PathBuf,
    released: bool,
}

impl RunLockGuard {
    /// Acquire the run lock at `dir`. An existing lock with a live owner pid
    /// fails with [`StateError::RunLockHeld`]; a stale one is removed and the
    /// acquisition retried once.
    pub fn acquire(dir: &Path) -> Result<Self, StateError> {
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).map_err(|source| StateError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        for attempt in 0..2 {
            match fs::create_dir(dir) {
                Ok(()) => {
                    let pid_file = dir.join("pid");
                    fs::write(&pid_file, format!("{}\n", std::process::id())).map_err(
                        |source| {
                            let _ = fs::remove_dir_all(dir);
                            StateError::Write {
                                path: pid_file.clone(),
                                source,
                            }
                        },
                    )?;

                    let guard = Self {
                        dir: dir.to_path_buf(),
                        released: false,
                    };
                    guard.install_signal_release();
                    return Ok(guard);
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    let recorded = fs::read_to_string(dir.join("pid")).unwrap_or_default();
                    let recorded = recorded.trim();
                    if pid_alive_str(recorded) {
                        return Err(StateError::RunLockHeld {
                            pid: recorded.parse().unwrap_or(0),
                        });
                    }
                    // Stale owner: reclaim and retry once.
                    if attempt == 0 {
                        let _ = fs::remove_dir_all(dir);
                        continue;
                    }
                    return Err(StateError::RunLockHeld { pid: 0 });
                }
                Err(source) => {
                    return Err(StateError::CreateDir {
                        path: dir.to_path_buf(),
                        source,
                    });
                }
            }
        }
        unreachable!("run lock acquisition loop is bounded");
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = fs::remove_file(self.dir.join("pid"));
        let _ = fs::remove_dir(&self.dir);
    }

    /// Register SIGINT/SIGTERM handlers that drop the lock before exiting.
    /// One run lock per process, so a process-wide slot is sufficient; only
    /// the first acquisition installs the handlers.
    fn install_signal_release(&self) {
        let pid_file = self.dir.join("pid");
        let Ok(pid_c) = CString::new(pid_file.as_os_str().as_encoded_bytes()) else {
            return;
        };
        let Ok(dir_c) = CString::new(self.dir.as_os_str().as_encoded_bytes()) else {
            return;
        };
        if SIGNAL_RELEASE_PATHS.set((pid_c, dir_c)).is_err() {
            return;
        }

        let handler: extern "C" fn(libc::c_int) = release_on_signal;
        unsafe {
            libc::signal(libc::SIGINT, handler as usize);
            libc::signal(libc::SIGTERM, handler as usize);
        }
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.release_now();
    }
}

extern "C" fn release_on_signal(signo: libc::c_int) {
    // Async-signal-safe: raw unlink/rmdir only, then exit.
    if let Some((pid_file, dir)) = SIGNAL_RELEASE_PATHS.get() {
        unsafe {
            libc::unlink(pid_file.as_ptr());
            libc::rmdir(dir.as_ptr());
        }
    }
    unsafe { libc::_exit(128 + signo) }
}
