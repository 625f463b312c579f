// ABOUTME: Sends follow-up chat messages and streams the reply into a single working turn
// ABOUTME: Records from other producer nodes are dropped and only one follow-up runs at a time

use futures::StreamExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::ChatApi;
use crate::coordinator::BuildCoordinator;
use crate::error::{SessionError, SessionResult};
use crate::frame::decode_stream;
use crate::message::ChatMessage;

const STREAM_ERROR: &str = "Something went wrong while replying.";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ChatRecord {
    Chunk {
        #[serde(default)]
        node: Option<String>,
        #[serde(default)]
        text: String,
    },
    Message {
        #[serde(default)]
        node: Option<String>,
        #[serde(default)]
        text: String,
    },
    Done {
        #[serde(default)]
        node: Option<String>,
    },
    Error {
        #[serde(default)]
        node: Option<String>,
        #[serde(default, alias = "message")]
        text: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl ChatRecord {
    fn node(&self) -> Option<&str> {
        match self {
            ChatRecord::Chunk { node, .. }
            | ChatRecord::Message { node, .. }
            | ChatRecord::Done { node }
            | ChatRecord::Error { node, .. } => node.as_deref(),
            ChatRecord::Other => None,
        }
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Streams follow-up replies into the session owned by a [`BuildCoordinator`].
pub struct FollowUpConsumer {
    coordinator: BuildCoordinator,
    api: Arc<dyn ChatApi>,
    primary_node: String,
    in_flight: AtomicBool,
}

impl FollowUpConsumer {
    pub fn new(coordinator: BuildCoordinator, api: Arc<dyn ChatApi>) -> Self {
        let primary_node = coordinator.settings().primary_node.clone();
        Self {
            coordinator,
            api,
            primary_node,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_primary_node(mut self, node: impl Into<String>) -> Self {
        self.primary_node = node.into();
        self
    }

    pub fn coordinator(&self) -> &BuildCoordinator {
        &self.coordinator
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Send `message` and stream the reply. Returns the finished turn.
    pub async fn send(&self, message: &str) -> SessionResult<ChatMessage> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::FollowUpInFlight);
        }
        let _guard = InFlight(&self.in_flight);

        let (session_id, turn) = self
            .coordinator
            .update(|session| {
                session.messages.push(ChatMessage::user(message));
                let turn = session
                    .messages
                    .push(ChatMessage::working(self.primary_node.clone()));
                (session.session_id.clone(), turn)
            })
            .await;

        info!("Sending follow-up for session {}", session_id);
        let chunks = match self.api.open_chat_stream(&session_id, message).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Failed to open follow-up stream: {}", e);
                self.finish_turn(&turn, Some(e.to_string())).await;
                return Err(e.into());
            }
        };

        let mut records = std::pin::pin!(decode_stream(chunks));
        while let Some(record) = records.next().await {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!("Follow-up stream interrupted: {}", e);
                    self.finish_turn(&turn, Some(e.to_string())).await;
                    return Err(e.into());
                }
            };

            let record: ChatRecord = match serde_json::from_value(record) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unrecognized chat record: {}", e);
                    continue;
                }
            };
            if let Some(node) = record.node() {
                if node != self.primary_node {
                    debug!("Discarding record from node '{}'", node);
                    continue;
                }
            }

            let live = match record {
                ChatRecord::Chunk { text, .. } => {
                    self.edit_turn(&turn, |m| m.content.push_str(&text)).await
                }
                ChatRecord::Message { text, .. } => {
                    self.edit_turn(&turn, |m| m.content = text).await
                }
                ChatRecord::Done { .. } => break,
                ChatRecord::Error { text, .. } => {
                    let text = text.unwrap_or_else(|| STREAM_ERROR.to_string());
                    warn!("Follow-up reply failed: {}", text);
                    self.finish_turn(&turn, Some(text)).await;
                    break;
                }
                ChatRecord::Other => true,
            };
            if !live {
                // The session was reset underneath us
                return Err(SessionError::Cancelled);
            }
        }

        // A stream that ends without a terminal record still finishes the turn
        self.finish_turn(&turn, None).await;
        self.coordinator
            .update(|session| session.messages.get(&turn).cloned())
            .await
            .ok_or(SessionError::Cancelled)
    }

    async fn edit_turn<F>(&self, turn: &str, edit: F) -> bool
    where
        F: FnOnce(&mut ChatMessage),
    {
        self.coordinator
            .update(|session| session.messages.update_working(turn, edit))
            .await
    }

    async fn finish_turn(&self, turn: &str, error: Option<String>) -> bool {
        self.edit_turn(turn, |m| {
            m.finished = true;
            m.error = error;
        })
        .await
    }
}
