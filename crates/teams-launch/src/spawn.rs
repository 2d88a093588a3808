//! Detached worker spawn, pid metadata registration, and the exit watcher.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use teams_core::types::slug;
use teams_state::pidmeta::PidMeta;
use teams_state::process::{pid_alive, send_sigkill};

use crate::backend::{apply_sandbox_policy, shell_quote, ResolvedBackend};
use crate::error::LaunchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    pub tmux_bin: String,
    pub worker_bin: String,
}

impl Default for Launcher {
    fn default() -> Self {
        Self {
            tmux_bin: "tmux".to_string(),
            worker_bin: "codex".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub agent: String,
    pub scope: String,
    pub task_id: String,
    pub worktree: PathBuf,
    pub state_dir: PathBuf,
    pub repo_root: PathBuf,
    pub prompt: String,
    pub codex_flags: String,
    pub backend: ResolvedBackend,
    pub trigger: String,
    pub log_dir: PathBuf,
    pub pid_meta_path: PathBuf,
    pub cli_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedWorker {
    pub pid: u32,
    pub backend: ResolvedBackend,
    pub launch_label: String,
    pub tmux_session: String,
    pub log_file: PathBuf,
}

impl Launcher {
    /// Spawn the worker, register its pid metadata, and start the exit
    /// watcher. Any failure after the worker process exists kills it again:
    /// a worker without pid metadata would be invisible to every cleanup
    /// path.
    pub fn launch(&self, request: &LaunchRequest) -> Result<LaunchedWorker, LaunchError> {
        let label = launch_label(&request.agent, &request.task_id);
        let log_file = self.prepare_log_file(request)?;

        let (launched, child) = match request.backend {
            ResolvedBackend::Tmux => (self.spawn_tmux(request, &label, &log_file)?, None),
            ResolvedBackend::CodexExec => {
                let (launched, child) = self.spawn_direct(request, &label, &log_file)?;
                (launched, Some(child))
            }
        };

        // A worker that died before we could record it is a launch failure,
        // not a cleanup case. The direct backend must ask the child handle:
        // an unreaped child is a zombie, and zombies still answer kill(0).
        thread::sleep(Duration::from_millis(100));
        let died = match child {
            Some(mut child) => matches!(child.try_wait(), Ok(Some(_))),
            None => !pid_alive(launched.pid),
        };
        if died {
            self.kill_launched(&launched);
            return Err(LaunchError::WorkerDiedImmediately { pid: launched.pid });
        }

        self.register(request, &launched)?;
        self.spawn_exit_watcher(request, &launched);
        Ok(launched)
    }

    /// Write pid metadata for a spawned worker, killing it on failure.
    pub fn register(
        &self,
        request: &LaunchRequest,
        launched: &LaunchedWorker,
    ) -> Result<(), LaunchError> {
        let meta = PidMeta {
            pid: launched.pid.to_string(),
            task_id: request.task_id.clone(),
            owner: request.agent.clone(),
            scope: request.scope.clone(),
            worktree: request.worktree.display().to_string(),
            started_at: Utc::now().to_rfc3339(),
            launch_backend: launched.backend.as_str().to_string(),
            launch_label: launched.launch_label.clone(),
            tmux_session: launched.tmux_session.clone(),
            log_file: launched.log_file.display().to_string(),
            trigger: request.trigger.clone(),
        };

        if let Err(source) = meta.write(&request.pid_meta_path) {
            self.kill_launched(launched);
            return Err(LaunchError::PidMetaWrite { source });
        }
        Ok(())
    }

    /// Detach a watcher that waits for the worker pid to exit, then re-execs
    /// this CLI with `task auto-cleanup-exit`. Re-exec keeps the watcher free
    /// of any process-memory state.
    pub fn spawn_exit_watcher(&self, request: &LaunchRequest, launched: &LaunchedWorker) {
        let script = render_watcher_script(request, launched);
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        unsafe {
            command.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        // Watcher spawn failures are not fatal: the explicit cleanup paths
        // and the next readiness pass cover a missing watcher.
        if let Err(err) = command.spawn() {
            eprintln!("warning: exit watcher spawn failed: {err}");
        }
    }

    pub fn kill_launched(&self, launched: &LaunchedWorker) {
        if pid_alive(launched.pid) {
            send_sigkill(launched.pid);
        }
        if !launched.tmux_session.is_empty() {
            let _ = Command::new(&self.tmux_bin)
                .args(["kill-session", "-t", &launched.tmux_session])
                .output();
        }
    }

    fn prepare_log_file(&self, request: &LaunchRequest) -> Result<PathBuf, LaunchError> {
        fs::create_dir_all(&request.log_dir).map_err(|source| LaunchError::LogSetup {
            path: request.log_dir.clone(),
            source,
        })?;
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let log_file = request
            .log_dir
            .join(format!("{}-{stamp}.log", slug(&request.task_id)));
        // Create eagerly so operators can tail it from the first second.
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .map_err(|source| LaunchError::LogSetup {
                path: log_file.clone(),
                source,
            })?;
        Ok(log_file)
    }

    fn worker_args(&self, request: &LaunchRequest) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        args.extend(apply_sandbox_policy(&request.codex_flags));
        // Workers finalize through the shared state dir and the primary
        // repo, so both must be writable even under a restrictive sandbox.
        args.push("-c".to_string());
        args.push(format!(
            "sandbox_workspace_write.writable_roots=[\"{}\", \"{}\"]",
            request.state_dir.display(),
            request.repo_root.display()
        ));
        args.push(request.prompt.clone());
        args
    }

    fn spawn_direct(
        &self,
        request: &LaunchRequest,
        label: &str,
        log_file: &PathBuf,
    ) -> Result<(LaunchedWorker, std::process::Child), LaunchError> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|source| LaunchError::LogSetup {
                path: log_file.clone(),
                source,
            })?;
        let log_err = log.try_clone().map_err(|source| LaunchError::LogSetup {
            path: log_file.clone(),
            source,
        })?;

        let mut command = Command::new(&self.worker_bin);
        command
            .args(self.worker_args(request))
            .current_dir(&request.worktree)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err);
        unsafe {
            command.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let child = command.spawn().map_err(|source| LaunchError::Spawn {
            command: format!("{} exec ...", self.worker_bin),
            source,
        })?;

        let launched = LaunchedWorker {
            pid: child.id(),
            backend: ResolvedBackend::CodexExec,
            launch_label: label.to_string(),
            tmux_session: String::new(),
            log_file: log_file.clone(),
        };
        Ok((launched, child))
    }

    fn spawn_tmux(
        &self,
        request: &LaunchRequest,
        label: &str,
        log_file: &PathBuf,
    ) -> Result<LaunchedWorker, LaunchError> {
        // A leftover session under our label would shadow the new worker.
        let _ = Command::new(&self.tmux_bin)
            .args(["kill-session", "-t", label])
            .output();

        let mut shell_cmd = String::new();
        shell_cmd.push_str("cd ");
        shell_cmd.push_str(&shell_quote(&request.worktree.display().to_string()));
        shell_cmd.push_str(" && ");
        shell_cmd.push_str(&shell_quote(&self.worker_bin));
        for arg in self.worker_args(request) {
            shell_cmd.push(' ');
            shell_cmd.push_str(&shell_quote(&arg));
        }
        shell_cmd.push_str(" >> ");
        shell_cmd.push_str(&shell_quote(&log_file.display().to_string()));
        shell_cmd.push_str(" 2>&1");

        let output = Command::new(&self.tmux_bin)
            .args(["new-session", "-d", "-s", label, &shell_cmd])
            .output()
            .map_err(|source| LaunchError::Spawn {
                command: format!("{} new-session -d -s {label}", self.tmux_bin),
                source,
            })?;
        if !output.status.success() {
            return Err(LaunchError::TmuxUnavailable {
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let pid = self.tmux_pane_pid(label)?;
        Ok(LaunchedWorker {
            pid,
            backend: ResolvedBackend::Tmux,
            launch_label: label.to_string(),
            tmux_session: label.to_string(),
            log_file: log_file.clone(),
        })
    }

    fn tmux_pane_pid(&self, session: &str) -> Result<u32, LaunchError> {
        let output = Command::new(&self.tmux_bin)
            .args(["list-panes", "-t", session, "-F", "#{pane_pid}"])
            .output()
            .map_err(|err| LaunchError::PidCapture {
                session: session.to_string(),
                detail: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(LaunchError::PidCapture {
                session: session.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .and_then(|line| line.trim().parse::<u32>().ok())
            .ok_or_else(|| LaunchError::PidCapture {
                session: session.to_string(),
                detail: "no pane pid in tmux output".to_string(),
            })
    }
}

pub fn launch_label(agent: &str, task_id: &str) -> String {
    format!("codex-{}-{}", slug(agent), slug(task_id))
}

fn render_watcher_script(request: &LaunchRequest, launched: &LaunchedWorker) -> String {
    format!(
        "while kill -0 {pid} 2>/dev/null; do sleep 2; done; exec {cli} --repo {repo} --state-dir {state} task auto-cleanup-exit {task} {pid} --reason {reason}",
        pid = launched.pid,
        cli = shell_quote(&request.cli_path.display().to_string()),
        repo = shell_quote(&request.repo_root.display().to_string()),
        state = shell_quote(&request.state_dir.display().to_string()),
        task = shell_quote(&request.task_id),
        reason = shell_quote(&format!(
            "worker exited (backend={})",
            launched.backend.as_str()
        )),
    )
}
