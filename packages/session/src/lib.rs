//! Livebuild Session - turns a brief into a finished build and carries the conversation after it
//!
//! The [`BuildCoordinator`] submits a job, polls it to a terminal status and
//! folds its events into an append-only message log. The [`FollowUpConsumer`]
//! streams follow-up replies through the [`FrameDecoder`] into the same log.

pub mod api;
pub mod brief;
pub mod coordinator;
pub mod error;
pub mod followup;
pub mod frame;
pub mod message;
pub mod status;

// Re-export key types for easier use
pub use api::{BuildApi, ChatApi};
pub use brief::Brief;
pub use coordinator::{BuildCoordinator, BuildSession, CompletionCallback};
pub use error::{SessionError, SessionResult};
pub use followup::FollowUpConsumer;
pub use frame::{decode_stream, FrameDecoder, FRAME_PREFIX};
pub use message::{ChatMessage, MessageKind, MessageLog, MessageRole, ACKNOWLEDGEMENT};
pub use status::SessionStatus;
