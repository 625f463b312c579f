// ABOUTME: Sandbox host backed by a local directory and real child processes
// ABOUTME: Allows one live instance per process and detects dev server ports from output

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use livebuild_config::PreviewSettings;

use crate::file_tree::FileTree;
use crate::host::{
    HostEnvironment, HostError, HostErrorCode, ProcessControls, ProcessHandle, ProcessOutput,
    SandboxHandle, SandboxHost, SandboxInstance, ServerReady, SpawnSpec, KILLED_EXIT_CODE,
};
use crate::types::LogType;

static LIVE_INSTANCE: Lazy<Mutex<Weak<LocalSandbox>>> = Lazy::new(|| Mutex::new(Weak::new()));

// Common patterns for dev server port detection
static PORT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"Local:\s+https?://(?:localhost|127\.0\.0\.1|\[::1\]):(\d+)", // Vite
        r"Local server:\s+http://localhost:(\d+)",
        r"Running at http://localhost:(\d+)",
        r"Server ready at http://localhost:(\d+)",
        r"server running on port (\d+)",
        r"ready - started server on.*:(\d+)", // Next.js
        r"http://localhost:(\d+)",
        r"localhost:(\d+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Extract the port a dev server reports it is listening on.
pub fn extract_port_from_log(line: &str) -> Option<u16> {
    PORT_PATTERNS.iter().find_map(|regex| {
        regex
            .captures(line)
            .and_then(|captures| captures.get(1))
            .and_then(|port| port.as_str().parse::<u16>().ok())
    })
}

const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(5);

type ReadyWaiters = Arc<Mutex<Vec<oneshot::Sender<ServerReady>>>>;

pub struct LocalSandboxHost {
    root: Option<PathBuf>,
    environment: HostEnvironment,
}

impl LocalSandboxHost {
    /// Host that mounts into `root`, or a fresh temp directory when `None`.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            environment: HostEnvironment {
                secure_context: true,
                cross_origin_isolated: true,
            },
        }
    }

    pub fn from_settings(settings: &PreviewSettings) -> Self {
        Self {
            root: settings.sandbox_root.clone(),
            environment: HostEnvironment {
                secure_context: settings.secure_context,
                cross_origin_isolated: settings.cross_origin_isolated,
            },
        }
    }

    fn live_instance() -> Option<Arc<LocalSandbox>> {
        LIVE_INSTANCE
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
            .filter(|instance| instance.is_alive())
    }
}

#[async_trait]
impl SandboxHost for LocalSandboxHost {
    async fn boot(&self) -> Result<SandboxHandle, HostError> {
        let id = uuid::Uuid::new_v4().to_string();
        let root = match &self.root {
            Some(root) => root.clone(),
            None => std::env::temp_dir().join(format!("livebuild-{}", id)),
        };

        // Claim the slot before any await so two boots cannot both succeed.
        let instance = {
            let mut live = LIVE_INSTANCE.lock().unwrap_or_else(PoisonError::into_inner);
            if live.upgrade().is_some_and(|existing| existing.is_alive()) {
                return Err(HostError::new(
                    HostErrorCode::SingletonViolation,
                    "a sandbox instance is already running in this process",
                ));
            }
            let instance = Arc::new(LocalSandbox::new(id, root.clone()));
            *live = Arc::downgrade(&instance);
            instance
        };

        if let Err(e) = tokio::fs::create_dir_all(&root).await {
            instance.alive.store(false, Ordering::SeqCst);
            return Err(HostError::unknown(format!(
                "failed to create sandbox root {}: {}",
                root.display(),
                e
            )));
        }

        info!("Booted local sandbox {} at {}", instance.id, root.display());
        Ok(SandboxHandle::new(instance))
    }

    fn current_instance(&self) -> Option<SandboxHandle> {
        Self::live_instance().map(|instance| SandboxHandle::new(instance))
    }

    fn environment(&self) -> HostEnvironment {
        self.environment
    }
}

pub struct LocalSandbox {
    id: String,
    root: PathBuf,
    alive: AtomicBool,
    ready_waiters: ReadyWaiters,
}

impl LocalSandbox {
    fn new(id: String, root: PathBuf) -> Self {
        Self {
            id,
            root,
            alive: AtomicBool::new(true),
            ready_waiters: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl SandboxInstance for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn mount(&self, tree: &FileTree) -> Result<(), HostError> {
        tree.write_to(&self.root)
            .await
            .map_err(|e| HostError::unknown(format!("mount failed: {}", e)))?;
        debug!("Mounted {} files into {}", tree.file_count(), self.root.display());
        Ok(())
    }

    async fn spawn(&self, spec: SpawnSpec) -> Result<ProcessHandle, HostError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // Own process group so grandchildren (npm -> node) die with the child
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| HostError::unknown(format!("{}: {}", spec.display(), e)))?;
        let (handle, controls) = ProcessHandle::channel(child.id());
        debug!("Spawned '{}' with PID {:?}", spec.display(), child.id());

        let ProcessControls { output, exit, kill } = controls;
        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump_lines(
                stdout,
                LogType::Stdout,
                output.clone(),
                self.ready_waiters.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump_lines(
                stderr,
                LogType::Stderr,
                output,
                self.ready_waiters.clone(),
            ));
        }

        tokio::spawn(supervise(child, pumps, exit, kill, spec.display()));
        Ok(handle)
    }

    fn on_server_ready(&self) -> oneshot::Receiver<ServerReady> {
        register_waiter(&self.ready_waiters)
    }

    async fn file_exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.root.join(path))
            .await
            .unwrap_or(false)
    }
}

/// Waiters whose receiver was dropped (a server that never became ready) are
/// discarded on every registration.
fn register_waiter(waiters: &ReadyWaiters) -> oneshot::Receiver<ServerReady> {
    let (tx, rx) = oneshot::channel();
    let mut waiters = waiters.lock().unwrap_or_else(PoisonError::into_inner);
    waiters.retain(|waiter| !waiter.is_closed());
    waiters.push(tx);
    rx
}

fn notify_ready(waiters: &ReadyWaiters, port: u16) {
    let ready = ServerReady {
        port,
        url: format!("http://localhost:{}", port),
    };
    let waiters: Vec<_> = waiters
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain(..)
        .collect();
    if !waiters.is_empty() {
        info!("Dev server ready on port {}", port);
    }
    for waiter in waiters {
        let _ = waiter.send(ready.clone());
    }
}

fn pump_lines<R>(
    reader: R,
    stream: LogType,
    output: mpsc::UnboundedSender<ProcessOutput>,
    waiters: ReadyWaiters,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(port) = extract_port_from_log(&line) {
                notify_ready(&waiters, port);
            }
            let _ = output.send(ProcessOutput { stream, line });
        }
    })
}

/// Wait for the child to exit or for a kill request, then report the exit
/// code once its output has been drained.
async fn supervise(
    mut child: Child,
    pumps: Vec<JoinHandle<()>>,
    exit: oneshot::Sender<i32>,
    kill: oneshot::Receiver<()>,
    command: String,
) {
    let code = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => status.code().unwrap_or(KILLED_EXIT_CODE),
            Err(e) => {
                warn!("Failed to wait on '{}': {}", command, e);
                KILLED_EXIT_CODE
            }
        },
        _ = kill => {
            terminate(&mut child, &command).await;
            KILLED_EXIT_CODE
        }
    };

    let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, futures::future::join_all(pumps));
    if drained.await.is_err() {
        debug!("Output of '{}' still open after exit, detaching", command);
    }

    debug!("'{}' exited with code {}", command, code);
    let _ = exit.send(code);
}

/// SIGTERM the process group, then SIGKILL if it does not exit in time.
async fn terminate(child: &mut Child, command: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let group = Pid::from_raw(pid as i32);
        if let Err(e) = killpg(group, Signal::SIGTERM) {
            debug!("Failed to send SIGTERM to group {}: {}", pid, e);
        }
        if tokio::time::timeout(GRACEFUL_SHUTDOWN, child.wait()).await.is_ok() {
            info!("'{}' terminated after SIGTERM", command);
            return;
        }
        warn!("'{}' did not respond to SIGTERM, sending SIGKILL", command);
        let _ = killpg(group, Signal::SIGKILL);
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill '{}': {}", command, e);
    }
}
