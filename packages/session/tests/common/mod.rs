// ABOUTME: Scripted backends shared by session integration tests
// ABOUTME: Poll responses and chat streams are queued up front and served in order

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use livebuild_client::{
    ByteStream, ClientError, ClientResult, InitJobResponse, JobEvent, JobSnapshot, JobStatus,
};
use livebuild_config::SessionSettings;
use livebuild_session::{BuildApi, BuildCoordinator, ChatApi};

pub fn event(id: &str, node: &str, message: &str) -> JobEvent {
    JobEvent {
        id: id.to_string(),
        event_type: "progress".to_string(),
        node: Some(node.to_string()),
        message: Some(message.to_string()),
    }
}

pub fn snapshot(status: JobStatus, events: Vec<JobEvent>) -> JobSnapshot {
    JobSnapshot {
        status,
        events,
        error_message: None,
    }
}

pub fn settings() -> SessionSettings {
    SessionSettings {
        session_id: Some("session-1".to_string()),
        ..SessionSettings::default()
    }
}

/// Serves queued poll results. When the queue runs dry it keeps reporting
/// `running`, or hangs forever if `hang_when_empty` is set.
pub struct ScriptedBuildApi {
    pub init: Mutex<Option<ClientResult<InitJobResponse>>>,
    pub polls: Mutex<VecDeque<ClientResult<JobSnapshot>>>,
    pub init_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub hang_when_empty: bool,
    pub payloads: Mutex<Vec<Value>>,
}

impl ScriptedBuildApi {
    pub fn new(polls: Vec<ClientResult<JobSnapshot>>) -> Arc<Self> {
        Self::build(polls, false)
    }

    pub fn hanging(polls: Vec<ClientResult<JobSnapshot>>) -> Arc<Self> {
        Self::build(polls, true)
    }

    fn build(polls: Vec<ClientResult<JobSnapshot>>, hang_when_empty: bool) -> Arc<Self> {
        Arc::new(Self {
            init: Mutex::new(Some(Ok(InitJobResponse {
                job_id: "job-42".to_string(),
                landing_page_id: None,
            }))),
            polls: Mutex::new(polls.into()),
            init_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            hang_when_empty,
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_init(&self, error: ClientError) {
        *self.init.lock().unwrap() = Some(Err(error));
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildApi for ScriptedBuildApi {
    async fn init_job(&self, _session_id: &str, payload: &Value) -> ClientResult<InitJobResponse> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload.clone());
        self.init
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(ClientError::config("init called twice")))
    }

    async fn get_job(&self, _session_id: &str, job_id: &str) -> ClientResult<JobSnapshot> {
        assert_eq!(job_id, "job-42");
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None if self.hang_when_empty => futures::future::pending().await,
            None => Ok(snapshot(JobStatus::Running, vec![])),
        }
    }
}

pub fn coordinator(api: Arc<ScriptedBuildApi>) -> BuildCoordinator {
    BuildCoordinator::new(api, settings())
}

/// Serves one scripted body per follow-up, split into the given chunks.
/// Opening can be held until `release` is notified.
pub struct ScriptedChatApi {
    pub bodies: Mutex<VecDeque<ClientResult<Vec<ClientResult<Bytes>>>>>,
    pub gate: Option<Arc<Notify>>,
    pub opened: AtomicUsize,
    pub messages: Mutex<Vec<String>>,
}

impl ScriptedChatApi {
    pub fn new(bodies: Vec<ClientResult<Vec<ClientResult<Bytes>>>>) -> Arc<Self> {
        Arc::new(Self {
            bodies: Mutex::new(bodies.into()),
            gate: None,
            opened: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        })
    }

    pub fn gated(body: Vec<ClientResult<Bytes>>, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            bodies: Mutex::new(VecDeque::from(vec![Ok(body)])),
            gate: Some(gate),
            opened: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChatApi for ScriptedChatApi {
    async fn open_chat_stream(&self, _session_id: &str, message: &str) -> ClientResult<ByteStream> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(message.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let body = self
            .bodies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))?;
        Ok(stream::iter(body).boxed())
    }
}

/// Split `text` into chunks of `size` bytes, ignoring character boundaries.
pub fn chunked(text: &str, size: usize) -> Vec<ClientResult<Bytes>> {
    text.as_bytes()
        .chunks(size)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect()
}

/// Let spawned tasks run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
