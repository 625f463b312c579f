// ABOUTME: Integration tests for the follow-up stream consumer
// ABOUTME: Feeds scripted "data:" bodies split at awkward boundaries into a shared session

mod common;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Notify;

use common::{chunked, coordinator, snapshot, ScriptedBuildApi, ScriptedChatApi};
use livebuild_client::{ClientError, JobStatus};
use livebuild_session::{Brief, FollowUpConsumer, MessageKind, MessageRole, SessionError};

fn consumer(chat: Arc<ScriptedChatApi>) -> FollowUpConsumer {
    FollowUpConsumer::new(coordinator(ScriptedBuildApi::new(vec![])), chat)
}

async fn messages(consumer: &FollowUpConsumer) -> Vec<(MessageRole, String)> {
    consumer
        .coordinator()
        .session()
        .await
        .messages
        .iter()
        .map(|m| (m.role, m.content.clone()))
        .collect()
}

#[tokio::test]
async fn test_primary_chunks_fill_the_turn_and_other_nodes_are_dropped() {
    let body = concat!(
        "data: {\"type\":\"chunk\",\"node\":\"assistant\",\"text\":\"Voilà, \"}\n",
        "data: {\"type\":\"chunk\",\"node\":\"critic\",\"text\":\"(internal note)\"}\n",
        "data: {\"type\":\"chunk\",\"text\":\"the header is now blue.\"}\n",
        "data: {\"type\":\"done\"}\n",
    );
    let chat = ScriptedChatApi::new(vec![Ok(chunked(body, 7))]);
    let consumer = consumer(chat.clone());

    let turn = consumer.send("Make the header blue").await.unwrap();

    assert_eq!(turn.content, "Voilà, the header is now blue.");
    assert!(turn.finished);
    assert_eq!(turn.error, None);
    assert_eq!(
        messages(&consumer).await,
        vec![
            (MessageRole::User, "Make the header blue".to_string()),
            (
                MessageRole::Assistant,
                "Voilà, the header is now blue.".to_string()
            ),
        ]
    );
    assert_eq!(
        *chat.messages.lock().unwrap(),
        vec!["Make the header blue".to_string()]
    );
    assert!(!consumer.is_in_flight());
}

#[tokio::test]
async fn test_message_record_replaces_streamed_text() {
    let body = concat!(
        "data: {\"type\":\"chunk\",\"text\":\"Draft\"}\n",
        "data: {\"type\":\"message\",\"node\":\"assistant\",\"text\":\"Final answer\"}\n",
        "data: {\"type\":\"done\"}\n",
        "data: {\"type\":\"chunk\",\"text\":\" ignored after done\"}\n",
    );
    let consumer = consumer(ScriptedChatApi::new(vec![Ok(chunked(body, 64))]));

    let turn = consumer.send("Summarize").await.unwrap();

    assert_eq!(turn.content, "Final answer");
}

#[tokio::test]
async fn test_error_record_finishes_turn_with_error_text() {
    let body = concat!(
        "data: {\"type\":\"chunk\",\"text\":\"Partial\"}\n",
        "data: {broken json\n",
        "data: {\"type\":\"error\",\"text\":\"model overloaded\"}\n",
    );
    let consumer = consumer(ScriptedChatApi::new(vec![Ok(chunked(body, 5))]));

    let turn = consumer.send("Add a footer").await.unwrap();

    assert!(turn.finished);
    assert_eq!(turn.content, "Partial");
    assert_eq!(turn.error.as_deref(), Some("model overloaded"));
}

#[tokio::test]
async fn test_stream_without_terminal_record_still_finishes() {
    let body = "data: {\"type\":\"chunk\",\"text\":\"Hello\"}\ndata: {\"type\":\"chunk\",\"text\":\"!\"}";
    let consumer = consumer(ScriptedChatApi::new(vec![Ok(chunked(body, 3))]));

    let turn = consumer.send("Hi").await.unwrap();

    assert!(turn.finished);
    assert_eq!(turn.content, "Hello!");
}

#[tokio::test]
async fn test_second_follow_up_is_rejected_while_one_is_in_flight() {
    let gate = Arc::new(Notify::new());
    let body = chunked("data: {\"type\":\"chunk\",\"text\":\"ok\"}\n", 64);
    let chat = ScriptedChatApi::gated(body, gate.clone());
    let consumer = Arc::new(consumer(chat.clone()));

    let first = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.send("first").await })
    };
    while chat.opened.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    assert!(consumer.is_in_flight());
    assert!(matches!(
        consumer.send("second").await,
        Err(SessionError::FollowUpInFlight)
    ));

    gate.notify_one();
    let turn = first.await.unwrap().unwrap();
    assert_eq!(turn.content, "ok");
    assert!(!consumer.is_in_flight());
    // The rejected message never reached the log or the backend
    assert_eq!(chat.opened.load(Ordering::SeqCst), 1);
    assert_eq!(messages(&consumer).await.len(), 2);
}

#[tokio::test]
async fn test_open_failure_finishes_turn_and_reports_client_error() {
    let chat = ScriptedChatApi::new(vec![Err(ClientError::Status {
        status: 502,
        body: "bad gateway".to_string(),
    })]);
    let consumer = consumer(chat);

    let result = consumer.send("Hello?").await;

    assert!(matches!(result, Err(SessionError::Client(_))));
    let session = consumer.coordinator().session().await;
    let turn = session.messages.last().unwrap();
    assert!(turn.finished);
    assert!(turn.error.is_some());
    assert!(!consumer.is_in_flight());
}

#[tokio::test]
async fn test_transport_error_mid_stream_keeps_partial_text() {
    let body = vec![
        Ok(Bytes::from_static(b"data: {\"type\":\"chunk\",\"text\":\"Half\"}\n")),
        Err(ClientError::Network("stream reset".to_string())),
    ];
    let consumer = consumer(ScriptedChatApi::new(vec![Ok(body)]));

    let result = consumer.send("Continue").await;

    assert!(matches!(result, Err(SessionError::Client(_))));
    let session = consumer.coordinator().session().await;
    let turn = session.messages.last().unwrap();
    assert_eq!(turn.content, "Half");
    assert!(turn.error.as_deref().unwrap().contains("stream reset"));
}

#[tokio::test(start_paused = true)]
async fn test_follow_up_appends_after_build_messages() {
    let api = ScriptedBuildApi::new(vec![Ok(snapshot(JobStatus::Completed, vec![]))]);
    let coordinator = coordinator(api);
    coordinator
        .start(&Brief::new("Recipe blog"))
        .await
        .unwrap();

    let chat = ScriptedChatApi::new(vec![Ok(chunked(
        "data: {\"type\":\"message\",\"text\":\"Added a search bar.\"}\ndata: {\"type\":\"done\"}\n",
        11,
    ))]);
    let consumer = FollowUpConsumer::new(coordinator.clone(), chat);
    consumer.send("Add search").await.unwrap();

    let session = coordinator.session().await;
    let kinds: Vec<_> = session.messages.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MessageKind::Brief,
            MessageKind::Acknowledgement,
            MessageKind::Chat,
            MessageKind::Chat,
        ]
    );
    assert_eq!(session.messages.last().unwrap().content, "Added a search bar.");
}
