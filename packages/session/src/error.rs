use livebuild_client::ClientError;
use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Build session has already been started")]
    AlreadyStarted,

    #[error("Backend request failed: {0}")]
    Client(#[from] ClientError),

    #[error("A follow-up message is already in flight")]
    FollowUpInFlight,

    #[error("Build session was cancelled")]
    Cancelled,
}
