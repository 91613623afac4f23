//! Target process lifecycle: executable discovery, spawn with the debug port open,
//! readiness polling and two-phase shutdown.

pub mod discovery;
pub mod workspace;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep, sleep_until, timeout, Instant};

use crate::client::DiscoveryClient;
use crate::config::RunConfig;
use crate::types::{DebugEndpoint, VersionInfo};
use crate::{DevtoolsError, Result};

pub use discovery::{resolve_executable, well_known_locations, DEFAULT_EXECUTABLE_NAME};
pub use workspace::WorkspaceOverride;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
const MAX_RECENT_OUTPUT_LINES: usize = 64;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn push_recent_output(lines: &mut VecDeque<String>, line: String) {
    lines.push_back(line);
    while lines.len() > MAX_RECENT_OUTPUT_LINES {
        lines.pop_front();
    }
}

/// Shared handle to a spawned target.
///
/// Clones refer to the same process, so `terminate` can run while another task is still
/// polling for readiness. No lock is held across an await.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    pid: u32,
    debug_port: u16,
    child: Mutex<Option<Child>>,
    exit_status: Mutex<Option<ExitStatus>>,
    terminated: AtomicBool,
    endpoint: OnceLock<DebugEndpoint>,
    workspace: Mutex<Option<WorkspaceOverride>>,
    recent_output: Arc<Mutex<VecDeque<String>>>,
}

impl ProcessHandle {
    /// Takes ownership of a freshly spawned child. Piped stdout/stderr are drained into
    /// tracing and the recent-output ring.
    pub fn from_child(
        mut child: Child,
        debug_port: u16,
        workspace: Option<WorkspaceOverride>,
    ) -> Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| DevtoolsError::launch("Process exited before its pid could be read"))?;

        let recent_output = Arc::new(Mutex::new(VecDeque::new()));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout", pid, recent_output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr", pid, recent_output.clone()));
        }

        Ok(Self {
            inner: Arc::new(HandleInner {
                pid,
                debug_port,
                child: Mutex::new(Some(child)),
                exit_status: Mutex::new(None),
                terminated: AtomicBool::new(false),
                endpoint: OnceLock::new(),
                workspace: Mutex::new(workspace),
                recent_output,
            }),
        })
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn debug_port(&self) -> u16 {
        self.inner.debug_port
    }

    /// Unset until readiness is observed.
    pub fn endpoint(&self) -> Option<&DebugEndpoint> {
        self.inner.endpoint.get()
    }

    /// Records the discovered endpoint. Returns `false` if one was already set.
    pub fn set_endpoint(&self, endpoint: DebugEndpoint) -> bool {
        self.inner.endpoint.set(endpoint).is_ok()
    }

    pub fn is_alive(&self) -> bool {
        let mut child = lock(&self.inner.child);
        let Some(child) = child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                *lock(&self.inner.exit_status) = Some(status);
                false
            }
            Err(e) => {
                tracing::warn!("Failed to query process {}: {}", self.inner.pid, e);
                false
            }
        }
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        *lock(&self.inner.exit_status)
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    pub fn has_pending_restore(&self) -> bool {
        lock(&self.inner.workspace)
            .as_ref()
            .is_some_and(|guard| !guard.is_restored())
    }

    /// Last lines the target printed on stdout/stderr, oldest first.
    pub fn recent_output(&self) -> Vec<String> {
        lock(&self.inner.recent_output).iter().cloned().collect()
    }

    /// Idempotent two-phase shutdown: graceful signal, `grace` to exit, then kill.
    /// Restores the workspace override whether or not the process was still running.
    pub async fn terminate(&self, grace: Duration) {
        let pid = self.inner.pid;
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            tracing::debug!("Process {} already terminated", pid);
            return;
        }

        let child = lock(&self.inner.child).take();
        if let Some(mut child) = child {
            if let Some(status) = shutdown_child(&mut child, pid, grace).await {
                *lock(&self.inner.exit_status) = Some(status);
            }
        }

        self.restore_workspace();
    }

    /// A failed restore keeps the guard, so it is retried when the last clone drops.
    fn restore_workspace(&self) {
        let mut slot = lock(&self.inner.workspace);
        if let Some(guard) = slot.as_mut() {
            if let Err(e) = guard.restore() {
                tracing::warn!(
                    "Failed to restore settings file {}: {}",
                    guard.path().display(),
                    e
                );
                return;
            }
        }
        *slot = None;
    }

    fn describe_exit(&self) -> String {
        let status = self
            .exit_status()
            .map(|status| format!(" ({status})"))
            .unwrap_or_default();
        let output = self.recent_output();
        if output.is_empty() {
            return status;
        }
        let tail_start = output.len().saturating_sub(5);
        format!("{status}; last output: {}", output[tail_start..].join(" | "))
    }
}

async fn forward_output<R>(
    reader: R,
    stream: &'static str,
    pid: u32,
    recent: Arc<Mutex<VecDeque<String>>>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(target: "debug_target", pid, stream, "{}", line);
                push_recent_output(&mut lock(&recent), line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Stopped reading {} of process {}: {}", stream, pid, e);
                break;
            }
        }
    }
}

fn reap(child: &mut Child, pid: u32) -> Option<ExitStatus> {
    match child.try_wait() {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!("Failed to query process {}: {}", pid, e);
            None
        }
    }
}

/// Waits for the direct child and, on unix, every process left in its group.
async fn wait_for_exit(
    child: &mut Child,
    pid: u32,
    mut status: Option<ExitStatus>,
    within: Duration,
) -> (Option<ExitStatus>, bool) {
    let deadline = Instant::now() + within;
    loop {
        if status.is_none() {
            status = reap(child, pid);
        }
        if status.is_some() && !group::is_alive(pid) {
            return (status, true);
        }
        if Instant::now() >= deadline {
            return (status, false);
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }
}

/// The target is spawned as a process group leader, so both phases signal the whole
/// group; helpers or the app behind a wrapper script go down with it.
async fn shutdown_child(child: &mut Child, pid: u32, grace: Duration) -> Option<ExitStatus> {
    let status = reap(child, pid);
    if let Some(status) = status {
        tracing::info!("Process {} had already exited ({})", pid, status);
        if !group::is_alive(pid) {
            return Some(status);
        }
        tracing::info!("Process group {} still has members, stopping them", pid);
    }

    group::terminate(child, pid);
    let (status, stopped) = wait_for_exit(child, pid, status, grace).await;
    if stopped {
        tracing::info!("Process {} exited after termination signal", pid);
        return status;
    }
    tracing::warn!(
        "Process {} still running {:?} after termination signal, forcing kill",
        pid,
        grace
    );

    group::kill(child, pid);
    let (status, stopped) = wait_for_exit(child, pid, status, grace).await;
    if stopped {
        tracing::info!("Process {} killed", pid);
    } else {
        tracing::warn!("Process {} did not exit after kill; giving up", pid);
    }
    status
}

#[cfg(unix)]
mod group {
    use nix::errno::Errno;
    use nix::sys::signal::{kill as kill_pid, killpg, Signal};
    use nix::unistd::Pid;
    use tokio::process::Child;

    fn raw(pid: u32) -> Option<Pid> {
        i32::try_from(pid).ok().map(Pid::from_raw)
    }

    /// Group first; a child spawned outside its own group only gets the direct signal.
    fn signal(pid: u32, sig: Signal) -> bool {
        let Some(target) = raw(pid) else {
            return false;
        };
        match killpg(target, sig) {
            Ok(()) => true,
            Err(Errno::ESRCH) => kill_pid(target, sig).is_ok(),
            Err(e) => {
                tracing::warn!("Failed to send {:?} to process group {}: {}", sig, pid, e);
                kill_pid(target, sig).is_ok()
            }
        }
    }

    pub(super) fn is_alive(pid: u32) -> bool {
        raw(pid).is_some_and(|target| killpg(target, None) != Err(Errno::ESRCH))
    }

    pub(super) fn terminate(child: &mut Child, pid: u32) {
        if !signal(pid, Signal::SIGTERM) {
            tracing::debug!("Nothing left to signal for process {}", pid);
            let _ = child.start_kill();
        }
    }

    pub(super) fn kill(child: &mut Child, pid: u32) {
        signal(pid, Signal::SIGKILL);
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
mod group {
    use tokio::process::Child;

    pub(super) fn is_alive(_pid: u32) -> bool {
        false
    }

    pub(super) fn terminate(child: &mut Child, pid: u32) {
        if let Err(e) = child.start_kill() {
            tracing::warn!("Failed to stop process {}: {}", pid, e);
        }
    }

    pub(super) fn kill(child: &mut Child, pid: u32) {
        terminate(child, pid);
    }
}

/// Starts targets and owns their lifecycle.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    client: DiscoveryClient,
    candidates: Vec<PathBuf>,
    executable_name: String,
    poll_interval: Duration,
    grace_period: Duration,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self {
            client: DiscoveryClient::new(DEFAULT_POLL_INTERVAL),
            candidates: well_known_locations(),
            executable_name: DEFAULT_EXECUTABLE_NAME.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<PathBuf>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_executable_name(mut self, name: impl Into<String>) -> Self {
        self.executable_name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.client = DiscoveryClient::new(poll_interval);
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn launch_args(config: &RunConfig) -> Vec<String> {
        let mut args = vec![format!("--remote-debugging-port={}", config.debug_port)];
        args.extend(config.args.iter().cloned());
        if let Some(workspace) = &config.workspace {
            args.push(workspace.display().to_string());
        }
        args
    }

    /// Starts the target and returns at once; the endpoint is resolved by [`Self::await_ready`].
    /// On failure nothing is left running and any settings override is already rolled back.
    pub fn spawn(&self, config: &RunConfig) -> Result<ProcessHandle> {
        let executable = resolve_executable(
            config.executable.as_deref(),
            &self.candidates,
            &self.executable_name,
        )?;

        let workspace = match (&config.settings_file, &config.workspace) {
            (Some(settings_file), Some(workspace)) => Some(
                WorkspaceOverride::apply(
                    settings_file,
                    &config.settings_key,
                    Value::String(workspace.display().to_string()),
                )
                .map_err(|e| {
                    DevtoolsError::launch(format!("Failed to apply workspace override: {e}"))
                })?,
            ),
            _ => None,
        };

        let args = Self::launch_args(config);
        tracing::info!("Launching {} {}", executable.display(), args.join(" "));

        let mut command = Command::new(&executable);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|e| {
                DevtoolsError::launch(format!("Failed to start '{}': {e}", executable.display()))
            })?;

        let handle = ProcessHandle::from_child(child, config.debug_port, workspace)?;
        tracing::info!("Target started with pid {}", handle.pid());
        Ok(handle)
    }

    /// Polls `/json/version` every poll interval until it names a debugger URL.
    ///
    /// Each probe is bounded by the remaining budget, so a timeout is reported no earlier
    /// than `timeout` and less than one interval after it. A launcher that exits cleanly
    /// may have handed off to a forked target, so polling continues; a failed exit ends
    /// the wait once a probe has also failed.
    pub async fn await_ready(
        &self,
        handle: &ProcessHandle,
        timeout_after: Duration,
    ) -> Result<DebugEndpoint> {
        if let Some(endpoint) = handle.endpoint() {
            return Ok(endpoint.clone());
        }

        let base_url = format!("http://127.0.0.1:{}", handle.debug_port());
        let started = Instant::now();
        let deadline = started + timeout_after;
        let mut handed_off = false;

        loop {
            if handle.is_terminated() {
                return Err(DevtoolsError::connect(format!(
                    "Process {} was terminated while waiting for its debug endpoint",
                    handle.pid()
                )));
            }

            let now = Instant::now();
            if now >= deadline {
                let elapsed = now.duration_since(started);
                tracing::warn!(
                    "Debug endpoint on port {} not ready after {:?}",
                    handle.debug_port(),
                    elapsed
                );
                return Err(DevtoolsError::ConnectTimeout { elapsed });
            }

            let budget = (deadline - now).min(self.poll_interval);
            match timeout(budget, self.client.version(&base_url)).await {
                Ok(Ok(VersionInfo {
                    web_socket_debugger_url: Some(url),
                    ..
                })) => match DebugEndpoint::from_websocket_url(&url) {
                    Ok(endpoint) => {
                        handle.set_endpoint(endpoint.clone());
                        tracing::info!(
                            "Debug endpoint ready after {:?}: {}",
                            started.elapsed(),
                            endpoint.websocket_url
                        );
                        return Ok(endpoint);
                    }
                    Err(e) => tracing::debug!("Discovery payload not connectable yet: {}", e),
                },
                Ok(Ok(_)) => tracing::debug!("Discovery payload has no webSocketDebuggerUrl yet"),
                Ok(Err(e)) => tracing::debug!("Debug endpoint not ready: {}", e),
                Err(_) => tracing::debug!("Discovery probe exceeded {:?}", budget),
            }

            if !handle.is_alive() {
                match handle.exit_status() {
                    Some(status) if status.success() => {
                        if !handed_off {
                            handed_off = true;
                            tracing::info!(
                                "Process {} exited ({}); polling for the target it started",
                                handle.pid(),
                                status
                            );
                        }
                    }
                    _ => {
                        return Err(DevtoolsError::connect(format!(
                            "Process {} exited before its debug endpoint became ready{}",
                            handle.pid(),
                            handle.describe_exit()
                        )));
                    }
                }
            }

            sleep_until((now + self.poll_interval).min(deadline)).await;
        }
    }

    pub async fn terminate(&self, handle: &ProcessHandle) {
        handle.terminate(self.grace_period).await;
    }
}
