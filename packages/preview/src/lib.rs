//! Livebuild Preview - runs generated projects live inside a single sandbox instance
//!
//! The [`SandboxRuntimeManager`] boots or recovers the one sandbox instance the
//! host allows, and the [`ProcessOrchestrator`] drives fetch, mount, install and
//! dev server stages on top of it, restarting only the dev server on refresh.

pub mod fetcher;
pub mod file_tree;
pub mod host;
pub mod local_host;
pub mod logs;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod types;

// Re-export key types for easier use
pub use fetcher::{ArtifactFetcher, ArtifactSource};
pub use file_tree::{FileNode, FileTree};
pub use host::{
    HostEnvironment, HostError, HostErrorCode, ProcessHandle, ProcessOutput, SandboxHandle,
    SandboxHost, SandboxInstance, ServerReady, SpawnSpec,
};
pub use local_host::{extract_port_from_log, LocalSandboxHost};
pub use orchestrator::{ProcessOrchestrator, ReadyCallback};
pub use registry::{InstanceRegistry, Slot};
pub use runtime::SandboxRuntimeManager;
pub use types::{
    LogType, PreviewError, PreviewLog, PreviewResult, PreviewState, RefreshOutcome,
    RefreshSignal,
};
