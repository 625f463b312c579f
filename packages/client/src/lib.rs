//! Livebuild Client - authenticated access to the generation backend.

pub mod auth;
pub mod client;
pub mod error;
pub mod ids;
pub mod types;

pub use auth::{StaticToken, TokenProvider};
pub use client::{ApiClient, ByteStream, SESSION_HEADER};
pub use error::{ClientError, ClientResult};
pub use ids::generate_session_id;
pub use types::{
    Deployment, InitJobResponse, JobEvent, JobSnapshot, JobStatus, UploadResponse,
};
