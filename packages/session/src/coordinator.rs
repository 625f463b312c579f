// ABOUTME: Drives a generation job from submission to completion by polling its status
// ABOUTME: Folds each job event into the session log once and fires the completion callback once

use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use livebuild_client::{generate_session_id, JobEvent, JobSnapshot, JobStatus};
use livebuild_config::SessionSettings;

use crate::api::BuildApi;
use crate::brief::Brief;
use crate::error::{SessionError, SessionResult};
use crate::message::{ChatMessage, MessageLog};
use crate::status::SessionStatus;

/// Invoked with the session id the first time a job completes.
pub type CompletionCallback = Arc<dyn Fn(&str) + Send + Sync>;

const JOB_FAILED: &str = "The build failed. Please try again.";
const JOB_CANCELLED: &str = "The build was cancelled.";

/// Client-side record of one brief-to-build conversation.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSession {
    pub session_id: String,
    pub messages: MessageLog,
    pub status: SessionStatus,
    pub error: Option<String>,
    pub job_id: Option<String>,
    /// Every status the session has been in, oldest first.
    pub history: Vec<SessionStatus>,
    #[serde(skip)]
    seen: HashSet<String>,
    #[serde(skip)]
    pub(crate) started: bool,
    #[serde(skip)]
    pub(crate) completion_fired: bool,
}

impl BuildSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: MessageLog::new(),
            status: SessionStatus::Idle,
            error: None,
            job_id: None,
            history: vec![SessionStatus::Idle],
            seen: HashSet::new(),
            started: false,
            completion_fired: false,
        }
    }

    pub fn has_seen(&self, event_id: &str) -> bool {
        self.seen.contains(event_id)
    }

    /// Move to `next` if that keeps the status monotonic.
    pub fn transition(&mut self, next: SessionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            debug!(
                "Session {} ignoring status change {} -> {}",
                self.session_id, self.status, next
            );
            return false;
        }
        self.status = next;
        self.history.push(next);
        true
    }

    /// Append a message for every event not folded before. Returns how many
    /// were new.
    pub fn fold_events(&mut self, events: &[JobEvent]) -> usize {
        let mut added = 0;
        for event in events {
            if !self.seen.insert(event.id.clone()) {
                continue;
            }
            let content = event
                .message
                .clone()
                .unwrap_or_else(|| event.event_type.clone());
            self.messages
                .push(ChatMessage::event(&event.id, event.node.clone(), content));
            added += 1;
        }
        added
    }

    /// End the session in `error`, recording `message` in the log.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.transition(SessionStatus::Error) {
            return false;
        }
        let message = message.into();
        self.error = Some(message.clone());
        self.messages.push(ChatMessage::system_error(message));
        true
    }

    /// Fold one poll response and return the resulting status.
    pub fn apply_snapshot(&mut self, snapshot: &JobSnapshot) -> SessionStatus {
        let added = self.fold_events(&snapshot.events);
        if added > 0 {
            debug!("Session {} folded {} new events", self.session_id, added);
        }

        match SessionStatus::from_job(snapshot.status) {
            SessionStatus::Completed => {
                self.transition(SessionStatus::Completed);
            }
            SessionStatus::Error => {
                let message = snapshot
                    .error_message
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| default_failure(snapshot.status).to_string());
                self.fail(message);
            }
            _ => {}
        }
        self.status
    }
}

fn default_failure(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Cancelled => JOB_CANCELLED,
        _ => JOB_FAILED,
    }
}

/// Owns one build session at a time and the poll loop that drives it.
#[derive(Clone)]
pub struct BuildCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn BuildApi>,
    settings: SessionSettings,
    session: RwLock<BuildSession>,
    // Replaced under the session lock so a token always matches its session
    cancel: Mutex<CancellationToken>,
    on_complete: StdRwLock<Option<CompletionCallback>>,
    status: watch::Sender<SessionStatus>,
    revision: watch::Sender<u64>,
}

impl BuildCoordinator {
    pub fn new(api: Arc<dyn BuildApi>, settings: SessionSettings) -> Self {
        let session_id = settings
            .session_id
            .clone()
            .unwrap_or_else(generate_session_id);
        let (status, _) = watch::channel(SessionStatus::Idle);
        let (revision, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                api,
                settings,
                session: RwLock::new(BuildSession::new(session_id)),
                cancel: Mutex::new(CancellationToken::new()),
                on_complete: StdRwLock::new(None),
                status,
                revision,
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn on_complete<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_complete
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Receiver that changes whenever the session is modified.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub async fn session(&self) -> BuildSession {
        self.inner.session.read().await.clone()
    }

    pub async fn session_id(&self) -> String {
        self.inner.session.read().await.session_id.clone()
    }

    /// Submit `brief` and poll the job until it finishes. Runs once per
    /// session; a reset session may be started again.
    pub async fn start(&self, brief: &Brief) -> SessionResult<SessionStatus> {
        let (token, session_id) = {
            let mut session = self.inner.session.write().await;
            if session.started {
                return Err(SessionError::AlreadyStarted);
            }
            let token = self.current_token();
            if token.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            session.started = true;
            session.messages.push(ChatMessage::brief(brief.render()));
            session.messages.push(ChatMessage::acknowledgement());
            session.transition(SessionStatus::Initializing);
            self.publish(&session);
            (token, session.session_id.clone())
        };

        info!("Submitting build '{}' for session {}", brief.title, session_id);
        let payload = brief.to_payload();
        let init = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SessionError::Cancelled),
            result = self.inner.api.init_job(&session_id, &payload) => result,
        };

        let job_id = {
            let mut session = self.inner.session.write().await;
            if token.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            match init {
                Ok(response) => {
                    session.job_id = Some(response.job_id.clone());
                    session.transition(SessionStatus::Streaming);
                    self.publish(&session);
                    response.job_id
                }
                Err(e) => {
                    error!("Failed to start build for session {}: {}", session_id, e);
                    session.fail(format!("Could not start the build: {}", e));
                    self.publish(&session);
                    return Ok(session.status);
                }
            }
        };

        info!("Session {} is following job {}", session_id, job_id);
        self.poll(&token, &session_id, &job_id).await
    }

    async fn poll(
        &self,
        token: &CancellationToken,
        session_id: &str,
        job_id: &str,
    ) -> SessionResult<SessionStatus> {
        let interval = self.inner.settings.poll_interval;
        let bound = self
            .inner
            .settings
            .max_poll_duration
            .map(|limit| (limit, Instant::now() + limit));

        loop {
            if token.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            if let Some((limit, deadline)) = bound {
                if Instant::now() >= deadline {
                    warn!("Job {} still running after {:?}, giving up", job_id, limit);
                    return self.give_up(token, limit).await;
                }
            }

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(SessionError::Cancelled),
                result = self.inner.api.get_job(session_id, job_id) => result,
            };

            let (status, fire) = {
                let mut session = self.inner.session.write().await;
                if token.is_cancelled() {
                    return Err(SessionError::Cancelled);
                }
                let status = match result {
                    Ok(snapshot) => session.apply_snapshot(&snapshot),
                    Err(e) => {
                        error!("Polling job {} failed: {}", job_id, e);
                        session.fail(format!("Lost contact with the build: {}", e));
                        session.status
                    }
                };
                let fire = status == SessionStatus::Completed && !session.completion_fired;
                if fire {
                    session.completion_fired = true;
                }
                self.publish(&session);
                (status, fire)
            };

            if fire {
                self.fire_completion(session_id);
            }
            if status.is_terminal() {
                info!("Session {} finished with status {}", session_id, status);
                return Ok(status);
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(SessionError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn give_up(
        &self,
        token: &CancellationToken,
        limit: Duration,
    ) -> SessionResult<SessionStatus> {
        let mut session = self.inner.session.write().await;
        if token.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        session.fail(format!(
            "The build did not finish within {} minutes.",
            limit.as_secs() / 60
        ));
        self.publish(&session);
        Ok(session.status)
    }

    fn fire_completion(&self, session_id: &str) {
        let callback = self
            .inner
            .on_complete
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            debug!("Firing completion callback for session {}", session_id);
            callback(session_id);
        }
    }

    /// Abort in-flight work and start over with an empty `idle` session.
    /// Returns the new session id.
    pub async fn reset(&self, session_id: Option<String>) -> String {
        // Cancel first so in-flight requests stop before we wait for the lock
        self.current_token().cancel();

        let mut session = self.inner.session.write().await;
        *self.inner.cancel.lock().unwrap_or_else(PoisonError::into_inner) =
            CancellationToken::new();
        let id = session_id.unwrap_or_else(generate_session_id);
        *session = BuildSession::new(id.clone());
        self.publish(&session);
        info!("Reset build session, new session id {}", id);
        id
    }

    /// Apply `update` to the current session under the session lock.
    pub(crate) async fn update<R>(&self, update: impl FnOnce(&mut BuildSession) -> R) -> R {
        let mut session = self.inner.session.write().await;
        let result = update(&mut session);
        self.publish(&session);
        result
    }

    fn current_token(&self) -> CancellationToken {
        self.inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, session: &BuildSession) {
        let status = session.status;
        self.inner.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        self.inner.revision.send_modify(|revision| *revision += 1);
    }
}
