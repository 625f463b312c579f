use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Lifecycle of the live preview. Exactly one state is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PreviewState {
    Idle,
    Fetching,
    Booting,
    Mounting,
    Installing,
    Starting,
    Ready { url: String },
    Error { message: String, recoverable: bool },
}

impl PreviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewState::Idle => "idle",
            PreviewState::Fetching => "fetching",
            PreviewState::Booting => "booting",
            PreviewState::Mounting => "mounting",
            PreviewState::Installing => "installing",
            PreviewState::Starting => "starting",
            PreviewState::Ready { .. } => "ready",
            PreviewState::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PreviewState::Ready { .. } | PreviewState::Error { .. })
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            PreviewState::Ready { url } => Some(url),
            _ => None,
        }
    }

    pub fn from_error(error: &PreviewError) -> Self {
        PreviewState::Error {
            message: error.to_string(),
            recoverable: error.is_recoverable(),
        }
    }
}

/// Log entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Stdout,
    Stderr,
    System,
}

/// Preview log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewLog {
    pub timestamp: DateTime<Utc>,
    pub log_type: LogType,
    pub message: String,
}

/// Outcome of a `refresh(token)` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Token was zero or not newer than the last one processed.
    Ignored,
    /// A pipeline was running; the token runs once it finishes.
    Deferred,
    Completed(PreviewState),
}

/// Monotonic refresh token source shared between the session layer and the
/// orchestrator. Starts at zero, which never triggers a refresh.
#[derive(Debug, Clone)]
pub struct RefreshSignal {
    tx: watch::Sender<u64>,
}

impl RefreshSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }

    /// Bump the token and return the new value.
    pub fn raise(&self) -> u64 {
        let mut next = 0;
        self.tx.send_modify(|token| {
            *token += 1;
            next = *token;
        });
        next
    }

    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

impl Default for RefreshSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Error types for preview operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreviewError {
    #[error("Generated files are not ready after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Another sandbox instance is already running and could not be recovered")]
    SingletonConflict,

    #[error("Cross-origin isolation is required: {0}")]
    IsolationPrecondition(String),

    #[error("A secure context is required to run the sandbox")]
    InsecureContext,

    #[error("Dependency install failed: {message}")]
    InstallFailed { message: String },

    #[error("Dev server exited with code {code}")]
    DevServerCrashed { code: i32 },

    #[error("Failed to mount files: {0}")]
    Mount(String),

    #[error("Failed to spawn process '{command}': {error}")]
    Spawn { command: String, error: String },

    #[error("Sandbox host error: {0}")]
    Host(String),

    #[error("Preview run was superseded by a reset")]
    Superseded,
}

impl PreviewError {
    /// Whether "try again" can succeed without reloading the whole process.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            PreviewError::IsolationPrecondition(_) | PreviewError::InsecureContext
        )
    }
}

/// Result type for preview operations
pub type PreviewResult<T> = Result<T, PreviewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_signal_is_monotonic() {
        let signal = RefreshSignal::new();
        let rx = signal.subscribe();
        assert_eq!(signal.current(), 0);
        assert_eq!(signal.raise(), 1);
        assert_eq!(signal.raise(), 2);
        assert_eq!(*rx.borrow(), 2);
    }

    #[test]
    fn test_error_recoverability() {
        assert!(PreviewError::SingletonConflict.is_recoverable());
        assert!(PreviewError::NotReady { attempts: 10 }.is_recoverable());
        assert!(!PreviewError::InsecureContext.is_recoverable());
        assert!(!PreviewError::IsolationPrecondition("missing".into()).is_recoverable());
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let state = PreviewState::Ready {
            url: "http://localhost:5173".to_string(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "ready");
        assert_eq!(json["url"], "http://localhost:5173");
        assert_eq!(state.url(), Some("http://localhost:5173"));
    }
}
