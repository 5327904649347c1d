//! Process supervisor: the only component that starts or kills worker
//! processes.
//!
//! Every spawned process gets a monitor task that races the process exit
//! against its timeout and a cancellation token. Whichever fires first decides
//! the terminal status; there is no transition out of a terminal status.
//! Callers only ever see [`WorkerSnapshot`] copies of the registry.

use crate::config::SupervisorConfig;
use crate::types::{WorkerOutput, WorkerSnapshot, WorkerStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use stagehand_core::{StagehandError, StagehandResult};
use std::collections::{HashMap, VecDeque};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMPLETION_BUFFER: usize = 256;
const READER_DRAIN: Duration = Duration::from_secs(1);
const STDERR_TAIL_LINES: usize = 5;

/// What a spawn is for. Decides the default timeout and whether tools are
/// allowed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnKind {
    /// Tool-less routing decision.
    Routing,
    /// Full task processing.
    Task,
}

/// Everything [`ProcessSupervisor::spawn`] needs besides the event id.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Routing or task.
    pub kind: SpawnKind,
    /// Role label, `router` for routing spawns.
    pub role: String,
    /// Fully rendered instruction payload, written to the child's stdin.
    pub instructions: String,
    /// Tool allow-list. Always empty for routing spawns.
    pub allowed_tools: Vec<String>,
    /// Return the instance id immediately instead of waiting for exit.
    pub detached: bool,
    /// Overrides the kind's default timeout.
    pub timeout: Option<Duration>,
}

impl SpawnConfig {
    /// Tool-less routing spawn with the short timeout.
    pub fn routing(instructions: impl Into<String>) -> Self {
        Self {
            kind: SpawnKind::Routing,
            role: "router".into(),
            instructions: instructions.into(),
            allowed_tools: Vec::new(),
            detached: false,
            timeout: None,
        }
    }

    /// Task spawn with the long timeout and `allowed_tools`.
    pub fn task(
        role: impl Into<String>,
        instructions: impl Into<String>,
        allowed_tools: Vec<String>,
    ) -> Self {
        Self {
            kind: SpawnKind::Task,
            role: role.into(),
            instructions: instructions.into(),
            allowed_tools,
            detached: false,
            timeout: None,
        }
    }

    /// Return right after spawning.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Override the default timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of [`ProcessSupervisor::spawn`].
#[derive(Debug, Clone)]
pub enum SpawnOutcome {
    /// Spawned with `detached`; the worker is still running.
    Detached(Uuid),
    /// Awaited to a successful exit.
    Finished {
        /// Registry id.
        instance_id: Uuid,
        /// Captured output.
        output: WorkerOutput,
    },
}

impl SpawnOutcome {
    /// Registry id of the worker.
    pub fn instance_id(&self) -> Uuid {
        match self {
            SpawnOutcome::Detached(id) => *id,
            SpawnOutcome::Finished { instance_id, .. } => *instance_id,
        }
    }
}

/// Published once per worker when it reaches a terminal status.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    /// Registry id.
    pub instance_id: Uuid,
    /// Event the worker was spawned for.
    pub event_id: String,
    /// Role label.
    pub role: String,
    /// Terminal status.
    pub status: WorkerStatus,
    /// Exit code, when the process exited.
    pub exit_code: Option<i32>,
    /// Failure reason for failed workers.
    pub error: Option<String>,
}

/// What one [`ProcessSupervisor::cleanup`] sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Terminal workers dropped after the retention window.
    pub removed: usize,
    /// Running workers whose process no longer exists.
    pub reclassified: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

struct OutputBuffer {
    lines: VecDeque<(OutputStream, String)>,
    limit: usize,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    fn push(&mut self, stream: OutputStream, line: String) {
        if self.lines.len() == self.limit {
            self.lines.pop_front();
        }
        self.lines.push_back((stream, line));
    }

    fn joined(&self, stream: OutputStream) -> String {
        self.lines
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn to_output(&self, exit_code: Option<i32>) -> WorkerOutput {
        WorkerOutput {
            stdout: self.joined(OutputStream::Stdout),
            stderr: self.joined(OutputStream::Stderr),
            exit_code,
        }
    }
}

struct WorkerEntry {
    event_id: String,
    role: String,
    parent_id: Option<Uuid>,
    children: Vec<Uuid>,
    allowed_tools: Vec<String>,
    timeout: Duration,
    status: WorkerStatus,
    pid: Option<u32>,
    exit_code: Option<i32>,
    error: Option<String>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    ended: Option<Instant>,
    output: Arc<Mutex<OutputBuffer>>,
    status_tx: watch::Sender<WorkerStatus>,
    cancel: CancellationToken,
}

impl WorkerEntry {
    fn snapshot(&self, id: Uuid) -> WorkerSnapshot {
        WorkerSnapshot {
            id,
            event_id: self.event_id.clone(),
            role: self.role.clone(),
            parent_id: self.parent_id,
            children: self.children.clone(),
            status: self.status,
            pid: self.pid,
            exit_code: self.exit_code,
            error: self.error.clone(),
            allowed_tools: self.allowed_tools.clone(),
            timeout_secs: self.timeout.as_secs(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            output_lines: self.output.lock().lines.len(),
        }
    }
}

enum Exit {
    Exited(ExitStatus),
    WaitFailed(String),
    TimedOut,
    Terminated,
}

struct MonitorReport {
    status: WorkerStatus,
    error: Option<String>,
    timed_out: bool,
    output: WorkerOutput,
}

struct Inner {
    config: SupervisorConfig,
    registry: Mutex<HashMap<Uuid, WorkerEntry>>,
    completions_tx: mpsc::Sender<Completion>,
    completions_rx: Mutex<Option<mpsc::Receiver<Completion>>>,
}

/// Spawns, tracks and terminates external reasoning-agent processes.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    /// Supervisor with an empty registry.
    pub fn new(config: SupervisorConfig) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel(COMPLETION_BUFFER);
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(HashMap::new()),
                completions_tx,
                completions_rx: Mutex::new(Some(completions_rx)),
            }),
        }
    }

    /// Settings the supervisor was built with.
    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// The completion stream. Only the first caller gets it.
    pub fn take_completions(&self) -> Option<mpsc::Receiver<Completion>> {
        self.inner.completions_rx.lock().take()
    }

    /// Start a worker for `event_id`.
    ///
    /// Fails with [`StagehandError::Duplicate`] when the event already has a
    /// running worker. A non-detached spawn waits for exit and maps a non-zero
    /// exit to [`StagehandError::WorkerFailed`] and an expired bound to
    /// [`StagehandError::Timeout`].
    pub async fn spawn(
        &self,
        config: SpawnConfig,
        event_id: &str,
        parent_id: Option<Uuid>,
    ) -> StagehandResult<SpawnOutcome> {
        let settings = &self.inner.config;
        let allowed_tools = match config.kind {
            SpawnKind::Routing => Vec::new(),
            SpawnKind::Task => config.allowed_tools,
        };
        let timeout = config.timeout.unwrap_or(match config.kind {
            SpawnKind::Routing => settings.routing_timeout(),
            SpawnKind::Task => settings.task_timeout(),
        });

        let id = Uuid::new_v4();
        let output = Arc::new(Mutex::new(OutputBuffer::new(settings.max_output_lines)));
        let cancel = CancellationToken::new();
        let (status_tx, _) = watch::channel(WorkerStatus::Running);

        {
            let mut registry = self.inner.registry.lock();
            if let Some((existing, _)) = registry
                .iter()
                .find(|(_, w)| w.event_id == event_id && w.status == WorkerStatus::Running)
            {
                return Err(StagehandError::Duplicate(format!(
                    "event '{event_id}' already has running worker {existing}"
                )));
            }
            if let Some(parent) = parent_id.and_then(|p| registry.get_mut(&p)) {
                parent.children.push(id);
            }
            registry.insert(
                id,
                WorkerEntry {
                    event_id: event_id.to_string(),
                    role: config.role.clone(),
                    parent_id,
                    children: Vec::new(),
                    allowed_tools: allowed_tools.clone(),
                    timeout,
                    status: WorkerStatus::Running,
                    pid: None,
                    exit_code: None,
                    error: None,
                    started_at: Utc::now(),
                    ended_at: None,
                    ended: None,
                    output: output.clone(),
                    status_tx,
                    cancel: cancel.clone(),
                },
            );
        }

        let mut child = match self.build_command(&allowed_tools, config.detached).spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to start '{}': {e}", settings.agent.program);
                warn!(worker = %id, event_id, error = %message, "Worker spawn failed");
                self.inner.finish(id, WorkerStatus::Failed, None, Some(message.clone()));
                return Err(StagehandError::Spawn(message));
            }
        };

        let pid = child.id();
        if let Some(worker) = self.inner.registry.lock().get_mut(&id) {
            worker.pid = pid;
        }
        info!(
            worker = %id,
            event_id,
            role = %config.role,
            pid = ?pid,
            tools = allowed_tools.len(),
            timeout_secs = timeout.as_secs(),
            detached = config.detached,
            "Worker spawned"
        );

        if let Some(mut stdin) = child.stdin.take() {
            let instructions = config.instructions;
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(instructions.as_bytes()).await {
                    debug!(worker = %id, error = %e, "Worker closed stdin early");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, OutputStream::Stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, OutputStream::Stderr, output.clone()));
        }

        let monitor = tokio::spawn(self.inner.clone().monitor(
            id, child, timeout, cancel, readers, output,
        ));

        if config.detached {
            return Ok(SpawnOutcome::Detached(id));
        }

        let report = monitor
            .await
            .map_err(|e| StagehandError::WorkerFailed(format!("monitor for {id} aborted: {e}")))?;
        match report.status {
            WorkerStatus::Completed => Ok(SpawnOutcome::Finished {
                instance_id: id,
                output: report.output,
            }),
            _ if report.timed_out => Err(StagehandError::timeout(
                format!("worker {id} ({})", config.role),
                timeout,
            )),
            _ => {
                let mut message = report.error.unwrap_or_else(|| "worker failed".into());
                let tail = stderr_tail(&report.output.stderr);
                if !tail.is_empty() {
                    message.push_str(": ");
                    message.push_str(&tail);
                }
                Err(StagehandError::WorkerFailed(format!("{id}: {message}")))
            }
        }
    }

    fn build_command(&self, allowed_tools: &[String], detached: bool) -> Command {
        let agent = &self.inner.config.agent;
        let capture = || if detached { Stdio::null() } else { Stdio::piped() };

        let mut command = Command::new(&agent.program);
        command
            .args(agent.command_args(allowed_tools))
            .envs(&agent.env)
            .stdin(Stdio::piped())
            .stdout(capture())
            .stderr(capture())
            .kill_on_drop(true);
        // Own process group, so termination reaches helpers the agent starts.
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    /// Wait for a worker to reach a terminal status.
    ///
    /// On timeout the worker is terminated before the error is returned.
    pub async fn await_completion(&self, id: Uuid, timeout: Duration) -> StagehandResult<()> {
        let mut rx = self
            .inner
            .registry
            .lock()
            .get(&id)
            .map(|w| w.status_tx.subscribe())
            .ok_or_else(|| StagehandError::NotFound(format!("worker {id}")))?;

        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| s.is_terminal()))
            .await
            .map(|r| r.map(|status| *status));

        match waited {
            Ok(Ok(WorkerStatus::Completed)) => Ok(()),
            Ok(Ok(_)) => {
                let error = self
                    .snapshot(id)
                    .and_then(|s| s.error)
                    .unwrap_or_else(|| "worker failed".into());
                Err(StagehandError::WorkerFailed(format!("{id}: {error}")))
            }
            Ok(Err(_)) => Err(StagehandError::NotFound(format!("worker {id}"))),
            Err(_) => {
                warn!(worker = %id, timeout_ms = timeout.as_millis() as u64, "Await timed out, terminating worker");
                self.terminate(id);
                let bound = self.inner.config.kill_grace() + READER_DRAIN * 2;
                let _ = tokio::time::timeout(bound, rx.wait_for(|s| s.is_terminal())).await;
                Err(StagehandError::timeout(format!("awaiting worker {id}"), timeout))
            }
        }
    }

    /// Ask the monitor of a running worker to terminate it.
    pub fn terminate(&self, id: Uuid) -> bool {
        match self.inner.registry.lock().get(&id) {
            Some(worker) if worker.status == WorkerStatus::Running => {
                worker.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Drop terminal workers past retention and fail running workers whose
    /// process is gone. A second call right after the first changes nothing.
    pub fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        let running: Vec<(Uuid, u32)> = self
            .inner
            .registry
            .lock()
            .iter()
            .filter(|(_, w)| w.status == WorkerStatus::Running)
            .filter_map(|(id, w)| w.pid.map(|pid| (*id, pid)))
            .collect();

        for (id, pid) in running {
            if !process_alive(pid)
                && self.inner.finish(
                    id,
                    WorkerStatus::Failed,
                    None,
                    Some(format!("process {pid} no longer exists")),
                )
            {
                warn!(worker = %id, pid, "Running worker vanished, marked failed");
                report.reclassified += 1;
            }
        }

        let retention = self.inner.config.retention();
        let now = Instant::now();
        let mut registry = self.inner.registry.lock();
        let before = registry.len();
        registry.retain(|_, w| {
            !(w.status.is_terminal()
                && w.ended.is_some_and(|ended| now.duration_since(ended) >= retention))
        });
        report.removed = before - registry.len();

        if report != CleanupReport::default() {
            debug!(removed = report.removed, reclassified = report.reclassified, "Supervisor cleanup");
        }
        report
    }

    /// Periodic [`cleanup`](Self::cleanup), stopped by `cancel`.
    pub fn start_cleanup_loop(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => { supervisor.cleanup(); }
                }
            }
        })
    }

    /// Signal every tracked process and clear the registry. Returns how many
    /// workers were still running.
    pub fn terminate_all(&self) -> usize {
        let drained: Vec<WorkerEntry> = self.inner.registry.lock().drain().map(|(_, w)| w).collect();
        let mut running = 0;
        for worker in &drained {
            worker.cancel.cancel();
            if worker.status == WorkerStatus::Running {
                running += 1;
                if let Some(pid) = worker.pid {
                    signal(pid, SIGTERM);
                }
            }
        }
        if !drained.is_empty() {
            info!(cleared = drained.len(), running, "All workers terminated");
        }
        running
    }

    /// Copy of one worker's state.
    pub fn snapshot(&self, id: Uuid) -> Option<WorkerSnapshot> {
        self.inner.registry.lock().get(&id).map(|w| w.snapshot(id))
    }

    /// All workers, oldest first.
    pub fn list(&self) -> Vec<WorkerSnapshot> {
        let mut workers: Vec<WorkerSnapshot> = self
            .inner
            .registry
            .lock()
            .iter()
            .map(|(id, w)| w.snapshot(*id))
            .collect();
        workers.sort_by_key(|w| w.started_at);
        workers
    }

    /// Workers spawned with `parent` as their parent.
    pub fn children_of(&self, parent: Uuid) -> Vec<WorkerSnapshot> {
        self.list()
            .into_iter()
            .filter(|w| w.parent_id == Some(parent))
            .collect()
    }

    /// Workers still running.
    pub fn running_count(&self) -> usize {
        self.inner
            .registry
            .lock()
            .values()
            .filter(|w| w.status == WorkerStatus::Running)
            .count()
    }

    /// Workers in the registry, terminal ones included.
    pub fn len(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// No workers tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Output captured so far for a worker.
    pub fn output(&self, id: Uuid) -> Option<WorkerOutput> {
        let (buffer, exit_code) = {
            let registry = self.inner.registry.lock();
            let worker = registry.get(&id)?;
            (worker.output.clone(), worker.exit_code)
        };
        let output = buffer.lock().to_output(exit_code);
        Some(output)
    }
}

impl Inner {
    async fn monitor(
        self: Arc<Self>,
        id: Uuid,
        mut child: Child,
        timeout: Duration,
        cancel: CancellationToken,
        readers: Vec<JoinHandle<()>>,
        output: Arc<Mutex<OutputBuffer>>,
    ) -> MonitorReport {
        let exit = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Exit::Exited(status),
                Err(e) => Exit::WaitFailed(e.to_string()),
            },
            _ = tokio::time::sleep(timeout) => Exit::TimedOut,
            _ = cancel.cancelled() => Exit::Terminated,
        };

        if matches!(exit, Exit::TimedOut | Exit::Terminated) {
            terminate_child(&mut child, self.config.kill_grace()).await;
        }

        for reader in readers {
            let abort = reader.abort_handle();
            if tokio::time::timeout(READER_DRAIN, reader).await.is_err() {
                abort.abort();
            }
        }

        let timed_out = matches!(exit, Exit::TimedOut);
        let (status, exit_code, error) = match exit {
            Exit::Exited(status) if status.success() => (WorkerStatus::Completed, status.code(), None),
            Exit::Exited(status) => {
                let reason = match status.code() {
                    Some(code) => format!("exited with code {code}"),
                    None => "killed by signal".to_string(),
                };
                (WorkerStatus::Failed, status.code(), Some(reason))
            }
            Exit::WaitFailed(e) => (WorkerStatus::Failed, None, Some(format!("wait failed: {e}"))),
            Exit::TimedOut => {
                warn!(worker = %id, timeout_secs = timeout.as_secs(), "Worker timed out, terminated");
                (WorkerStatus::Failed, None, Some(format!("timed out after {timeout:?}")))
            }
            Exit::Terminated => (WorkerStatus::Failed, None, Some("terminated".to_string())),
        };

        self.finish(id, status, exit_code, error.clone());
        let output = output.lock().to_output(exit_code);
        MonitorReport {
            status,
            error,
            timed_out,
            output,
        }
    }

    /// Move a running worker to a terminal status, publish the completion and
    /// schedule its removal. Returns false when the worker is unknown or
    /// already terminal.
    fn finish(
        self: &Arc<Self>,
        id: Uuid,
        status: WorkerStatus,
        exit_code: Option<i32>,
        error: Option<String>,
    ) -> bool {
        let completion = {
            let mut registry = self.registry.lock();
            let Some(worker) = registry.get_mut(&id) else {
                return false;
            };
            if worker.status.is_terminal() {
                return false;
            }
            worker.status = status;
            worker.exit_code = exit_code;
            worker.error = error;
            worker.ended_at = Some(Utc::now());
            worker.ended = Some(Instant::now());
            worker.status_tx.send_replace(status);
            Completion {
                instance_id: id,
                event_id: worker.event_id.clone(),
                role: worker.role.clone(),
                status,
                exit_code,
                error: worker.error.clone(),
            }
        };

        info!(
            worker = %id,
            event_id = %completion.event_id,
            status = %status,
            exit_code = ?exit_code,
            "Worker finished"
        );

        match self.completions_tx.try_send(completion) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(worker = %id, "Completion listener lagging, notification dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }

        let inner = Arc::clone(self);
        let grace = self.config.removal_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut registry = inner.registry.lock();
            if registry.get(&id).is_some_and(|w| w.status.is_terminal()) {
                registry.remove(&id);
            }
        });
        true
    }
}

fn spawn_reader<R>(reader: R, stream: OutputStream, buffer: Arc<Mutex<OutputBuffer>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => buffer.lock().push(stream, line),
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Worker output stream closed");
                    break;
                }
            }
        }
    })
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

/// SIGTERM, wait `grace`, then SIGKILL. Always reaps the child.
async fn terminate_child(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        signal(pid, SIGTERM);
        if let Ok(Ok(_)) = tokio::time::timeout(grace, child.wait()).await {
            return;
        }
        signal(pid, SIGKILL);
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(unix)]
const SIGTERM: i32 = libc::SIGTERM;
#[cfg(unix)]
const SIGKILL: i32 = libc::SIGKILL;
#[cfg(not(unix))]
const SIGTERM: i32 = 15;
#[cfg(not(unix))]
const SIGKILL: i32 = 9;

#[cfg(unix)]
fn signal(pid: u32, sig: i32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pid, sig) };
    if rc != 0 {
        // SAFETY: as above.
        unsafe { libc::kill(pid, sig) };
    }
}

#[cfg(not(unix))]
fn signal(_pid: u32, _sig: i32) {}

/// Probe the OS process table. EPERM still means the process exists.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only performs the existence check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Non-unix targets cannot probe; every process counts as alive.
#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::AgentBinaryConfig;

    fn supervisor(script: &str) -> ProcessSupervisor {
        ProcessSupervisor::new(SupervisorConfig {
            removal_grace_secs: 60,
            kill_grace_secs: 1,
            agent: AgentBinaryConfig {
                program: "sh".into(),
                args: vec!["-c".into(), script.into()],
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn test_output_buffer_is_bounded() {
        let mut buffer = OutputBuffer::new(3);
        for i in 0..5 {
            buffer.push(OutputStream::Stdout, format!("line {i}"));
        }
        buffer.push(OutputStream::Stderr, "oops".into());
        let output = buffer.to_output(Some(0));
        assert_eq!(output.stdout, "line 3\nline 4");
        assert_eq!(output.stderr, "oops");
    }

    #[tokio::test]
    async fn test_spawn_reads_stdin_and_captures_output() {
        let sup = supervisor("read line; echo \"got: $line\"; echo warn >&2");
        let outcome = sup
            .spawn(SpawnConfig::task("coder", "hello agent\n", vec![]), "e1", None)
            .await
            .unwrap();
        let SpawnOutcome::Finished { instance_id, output } = outcome else {
            panic!("expected a finished outcome");
        };
        assert_eq!(output.stdout, "got: hello agent");
        assert_eq!(output.stderr, "warn");
        assert_eq!(output.exit_code, Some(0));

        let snap = sup.snapshot(instance_id).unwrap();
        assert_eq!(snap.status, WorkerStatus::Completed);
        assert_eq!(snap.timeout_secs, 120);
    }

    #[tokio::test]
    async fn test_routing_spawn_drops_tools_and_uses_short_timeout() {
        let sup = supervisor("cat >/dev/null; echo \"$@\"");
        let mut config = SpawnConfig::routing("route this");
        config.allowed_tools = vec!["speak".into()];
        let outcome = sup.spawn(config, "e1", None).await.unwrap();
        let snap = sup.snapshot(outcome.instance_id()).unwrap();
        assert!(snap.allowed_tools.is_empty());
        assert_eq!(snap.timeout_secs, 10);
        assert_eq!(snap.role, "router");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_worker_failure() {
        let sup = supervisor("cat >/dev/null; echo boom >&2; exit 3");
        let err = sup
            .spawn(SpawnConfig::task("coder", "x", vec![]), "e1", None)
            .await
            .unwrap_err();
        match err {
            StagehandError::WorkerFailed(msg) => {
                assert!(msg.contains("exited with code 3"));
                assert!(msg.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        let worker = &sup.list()[0];
        assert_eq!(worker.status, WorkerStatus::Failed);
        assert_eq!(worker.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_failed() {
        let sup = ProcessSupervisor::new(SupervisorConfig {
            agent: AgentBinaryConfig {
                program: "/nonexistent/agent-binary".into(),
                ..Default::default()
            },
            ..Default::default()
        });
        let err = sup
            .spawn(SpawnConfig::routing("x"), "e1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::Spawn(_)));
        let worker = &sup.list()[0];
        assert_eq!(worker.status, WorkerStatus::Failed);
        assert!(worker.pid.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_running_event_rejected() {
        let sup = supervisor("sleep 5");
        let first = sup
            .spawn(SpawnConfig::task("coder", "", vec![]).detached(), "e1", None)
            .await
            .unwrap();
        let err = sup
            .spawn(SpawnConfig::task("coder", "", vec![]).detached(), "e1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::Duplicate(_)));

        // A different event is fine.
        let other = sup
            .spawn(
                SpawnConfig::task("helper", "", vec![]).detached(),
                "e1/sub",
                Some(first.instance_id()),
            )
            .await
            .unwrap();
        let children = sup.children_of(first.instance_id());
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, other.instance_id());
        assert_eq!(
            sup.snapshot(first.instance_id()).unwrap().children,
            vec![other.instance_id()]
        );

        assert_eq!(sup.terminate_all(), 2);
        assert!(sup.is_empty());
    }

    #[tokio::test]
    async fn test_await_completion() {
        let sup = supervisor("sleep 0.2");
        let outcome = sup
            .spawn(SpawnConfig::task("coder", "", vec![]).detached(), "e1", None)
            .await
            .unwrap();
        sup.await_completion(outcome.instance_id(), Duration::from_secs(5))
            .await
            .unwrap();
        // Already terminal: resolves immediately.
        sup.await_completion(outcome.instance_id(), Duration::from_millis(1))
            .await
            .unwrap();

        let missing = sup.await_completion(Uuid::new_v4(), Duration::from_secs(1)).await;
        assert!(matches!(missing, Err(StagehandError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_await_timeout_kills_worker() {
        let sup = supervisor("sleep 30");
        let outcome = sup
            .spawn(SpawnConfig::task("coder", "", vec![]).detached(), "e1", None)
            .await
            .unwrap();
        let id = outcome.instance_id();
        let pid = sup.snapshot(id).unwrap().pid.unwrap();

        let err = sup
            .await_completion(id, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::Timeout { .. }));
        assert_eq!(sup.snapshot(id).unwrap().status, WorkerStatus::Failed);
        assert!(!process_alive(pid));
    }

    #[tokio::test]
    async fn test_completion_published_once() {
        let sup = supervisor("cat >/dev/null");
        let mut rx = sup.take_completions().unwrap();
        assert!(sup.take_completions().is_none());

        let outcome = sup
            .spawn(SpawnConfig::task("coder", "x", vec![]), "e9", None)
            .await
            .unwrap();
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.instance_id, outcome.instance_id());
        assert_eq!(completion.event_id, "e9");
        assert_eq!(completion.status, WorkerStatus::Completed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cleanup_reclassifies_vanished_worker() {
        let sup = supervisor("true");
        let mut rx = sup.take_completions().unwrap();

        let mut reaped = std::process::Command::new("true").spawn().unwrap();
        let pid = reaped.id();
        reaped.wait().unwrap();
        assert!(!process_alive(pid));

        let id = Uuid::new_v4();
        let (status_tx, _) = watch::channel(WorkerStatus::Running);
        sup.inner.registry.lock().insert(
            id,
            WorkerEntry {
                event_id: "ghost".into(),
                role: "task".into(),
                parent_id: None,
                children: Vec::new(),
                allowed_tools: Vec::new(),
                timeout: Duration::from_secs(120),
                status: WorkerStatus::Running,
                pid: Some(pid),
                exit_code: None,
                error: None,
                started_at: Utc::now(),
                ended_at: None,
                ended: None,
                output: Arc::new(Mutex::new(OutputBuffer::new(16))),
                status_tx,
                cancel: CancellationToken::new(),
            },
        );

        let first = sup.cleanup();
        assert_eq!(first.reclassified, 1);
        assert_eq!(first.removed, 0);
        let snapshot = sup.snapshot(id).unwrap();
        assert_eq!(snapshot.status, WorkerStatus::Failed);
        assert!(snapshot.error.unwrap().contains("no longer exists"));

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.instance_id, id);
        assert_eq!(completion.event_id, "ghost");
        assert_eq!(completion.status, WorkerStatus::Failed);
        assert!(rx.try_recv().is_err());

        assert_eq!(sup.cleanup(), CleanupReport::default());
        assert!(rx.try_recv().is_err());
    }
}
