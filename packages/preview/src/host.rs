// ABOUTME: Contract between the preview runtime and the execution sandbox host
// ABOUTME: Host and instance traits, structured host errors, and child process handles

use async_trait::async_trait;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::file_tree::FileTree;
use crate::types::LogType;

/// Machine-readable reason attached to a host failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostErrorCode {
    /// A live instance already exists and the host refuses a second one.
    SingletonViolation,
    /// The host requires cross-origin isolation and it is not available.
    CrossOriginIsolation,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
    pub code: HostErrorCode,
    pub message: String,
}

impl HostError {
    pub fn new(code: HostErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(HostErrorCode::Unknown, message)
    }

    /// Effective code. Hosts that do not report a code are classified from
    /// the message text as a compatibility fallback.
    pub fn classify(&self) -> HostErrorCode {
        if self.code != HostErrorCode::Unknown {
            return self.code;
        }

        let message = self.message.to_ascii_lowercase();
        if message.contains("single") || message.contains("only one instance") {
            HostErrorCode::SingletonViolation
        } else if message.contains("cross-origin") || message.contains("crossoriginisolated") {
            HostErrorCode::CrossOriginIsolation
        } else {
            HostErrorCode::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostEnvironment {
    pub secure_context: bool,
    pub cross_origin_isolated: bool,
}

/// Fired once when a dev server starts listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReady {
    pub port: u16,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl SpawnSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stream: LogType,
    pub line: String,
}

/// Exit code reported when a process was killed or its host went away.
pub const KILLED_EXIT_CODE: i32 = -1;

/// Host side of a spawned process.
pub struct ProcessControls {
    pub output: mpsc::UnboundedSender<ProcessOutput>,
    pub exit: oneshot::Sender<i32>,
    pub kill: oneshot::Receiver<()>,
}

/// One spawned child. Dropping the handle kills the process.
pub struct ProcessHandle {
    pid: Option<u32>,
    output: Option<mpsc::UnboundedReceiver<ProcessOutput>>,
    exit: Option<oneshot::Receiver<i32>>,
    kill: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn channel(pid: Option<u32>) -> (Self, ProcessControls) {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        (
            Self {
                pid,
                output: Some(output_rx),
                exit: Some(exit_rx),
                kill: Some(kill_tx),
            },
            ProcessControls {
                output: output_tx,
                exit: exit_tx,
                kill: kill_rx,
            },
        )
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<ProcessOutput>> {
        self.output.take()
    }

    pub fn take_exit(&mut self) -> Option<oneshot::Receiver<i32>> {
        self.exit.take()
    }

    /// Ask the host to kill the process. Safe to call more than once.
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("killed", &self.kill.is_none())
            .finish()
    }
}

/// One live execution environment.
#[async_trait]
pub trait SandboxInstance: Send + Sync {
    fn id(&self) -> &str;

    fn is_alive(&self) -> bool;

    /// Write the tree into the instance's file system, overwriting files.
    async fn mount(&self, tree: &FileTree) -> Result<(), HostError>;

    async fn spawn(&self, spec: SpawnSpec) -> Result<ProcessHandle, HostError>;

    /// Register for the next server-ready event. Must be called before the
    /// spawn that triggers it; the host may fire during spawn.
    fn on_server_ready(&self) -> oneshot::Receiver<ServerReady>;

    async fn file_exists(&self, path: &str) -> bool;
}

/// Cheaply clonable reference to the live sandbox instance.
#[derive(Clone)]
pub struct SandboxHandle {
    inner: Arc<dyn SandboxInstance>,
}

impl SandboxHandle {
    pub fn new(instance: Arc<dyn SandboxInstance>) -> Self {
        Self { inner: instance }
    }

    pub fn ptr_eq(&self, other: &SandboxHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for SandboxHandle {
    type Target = dyn SandboxInstance;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("id", &self.inner.id())
            .field("alive", &self.inner.is_alive())
            .finish()
    }
}

/// Factory for sandbox instances. Enforces at most one live instance.
#[async_trait]
pub trait SandboxHost: Send + Sync {
    async fn boot(&self) -> Result<SandboxHandle, HostError>;

    /// The host's own record of the live instance, if it keeps one.
    fn current_instance(&self) -> Option<SandboxHandle>;

    fn environment(&self) -> HostEnvironment;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_code_wins_over_message() {
        let err = HostError::new(HostErrorCode::CrossOriginIsolation, "single instance");
        assert_eq!(err.classify(), HostErrorCode::CrossOriginIsolation);
    }

    #[test]
    fn test_message_fallback_classification() {
        assert_eq!(
            HostError::unknown("Only a single WebContainer instance can be booted").classify(),
            HostErrorCode::SingletonViolation
        );
        assert_eq!(
            HostError::unknown("Cross-Origin isolation is not enabled").classify(),
            HostErrorCode::CrossOriginIsolation
        );
        assert_eq!(HostError::unknown("disk full").classify(), HostErrorCode::Unknown);
    }

    #[tokio::test]
    async fn test_dropping_handle_sends_kill() {
        let (handle, controls) = ProcessHandle::channel(Some(42));
        assert_eq!(handle.pid(), Some(42));
        drop(handle);
        assert!(controls.kill.await.is_ok());
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let (mut handle, controls) = ProcessHandle::channel(None);
        handle.kill();
        handle.kill();
        assert!(controls.kill.await.is_ok());
    }
}
