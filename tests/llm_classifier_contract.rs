//! Chat endpoint contract tests for the LLM-backed memory collaborators.
//!
//! `ureq` is blocking, so every call runs on `spawn_blocking` while the
//! mock server is served by the multi-threaded runtime.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use sage::config::{LlmConfig, MemoryConfig};
use sage::error::SageError;
use sage::llm::{ChatClient, ChatOptions, LlmClassifier};
use sage::memory::{
    Collaborators, HashingEmbedder, ImportanceClassifier, Interaction, MemoryStore,
    MoodTopicClassifier, Role, Summarizer, SummaryKind,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, api_key: &str) -> LlmConfig {
    LlmConfig {
        api_url: format!("{}/v1", server.uri()),
        api_model: "local-model".to_owned(),
        api_key: api_key.to_owned(),
        timeout_secs: 5,
    }
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "local-model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    }))
}

#[tokio::test(flavor = "multi_thread")]
async fn request_shape_and_bearer_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "model": "local-model",
            "stream": false,
            "max_tokens": 5,
            "temperature": 0.0
        })))
        .and(body_string_contains("You are a helpful classifier."))
        .respond_with(completion("  4  "))
        .expect(1)
        .mount(&server)
        .await;

    let client = ChatClient::new(&config_for(&server, "sk-test"));
    let reply = tokio::task::spawn_blocking(move || {
        client.complete("You are a helpful classifier.", "rate this", ChatOptions::classifier(5))
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply, "4");
}

#[tokio::test(flavor = "multi_thread")]
async fn no_authorization_header_without_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion("ok"))
        .mount(&server)
        .await;

    let client = ChatClient::new(&config_for(&server, ""));
    tokio::task::spawn_blocking(move || {
        client.complete("sys", "hi", ChatOptions::classifier(5))
    })
    .await
    .unwrap()
    .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn http_failure_maps_to_llm_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&server)
        .await;

    let client = ChatClient::new(&config_for(&server, ""));
    let result = tokio::task::spawn_blocking(move || {
        client.complete("sys", "hi", ChatOptions::classifier(5))
    })
    .await
    .unwrap();
    match result {
        Err(SageError::Llm(msg)) => assert!(msg.contains("500"), "unexpected message: {msg}"),
        other => panic!("expected LLM error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn reply_without_content_is_llm_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let client = ChatClient::new(&config_for(&server, ""));
    let result = tokio::task::spawn_blocking(move || {
        client.complete("sys", "hi", ChatOptions::classifier(5))
    })
    .await
    .unwrap();
    assert!(matches!(result, Err(SageError::Llm(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn importance_classifier_reads_first_digit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("On a scale of 1 to 5"))
        .respond_with(completion("Rating: 4 (fairly important)"))
        .mount(&server)
        .await;

    let classifier = LlmClassifier::new(&config_for(&server, ""));
    let importance =
        tokio::task::spawn_blocking(move || classifier.classify_importance("I got a new job"))
            .await
            .unwrap()
            .unwrap();
    assert_eq!(importance, 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn importance_without_digit_is_classifier_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("not sure"))
        .mount(&server)
        .await;

    let classifier = LlmClassifier::new(&config_for(&server, ""));
    let result = tokio::task::spawn_blocking(move || classifier.classify_importance("hmm"))
        .await
        .unwrap();
    assert!(matches!(result, Err(SageError::Classifier(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn mood_topic_classifier_parses_json_and_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("first message"))
        .and(body_partial_json(json!({"max_tokens": 80})))
        .respond_with(completion(
            r##"Sure: {"mood": "happy", "topic": "work", "color": "#ffd700"}"##,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("second message"))
        .respond_with(completion("{mood: sad, topic: health}"))
        .mount(&server)
        .await;

    let classifier = Arc::new(LlmClassifier::new(&config_for(&server, "")));
    let first = Arc::clone(&classifier);
    let strict = tokio::task::spawn_blocking(move || first.classify_mood_topic("first message"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(strict.mood.as_deref(), Some("happy"));
    assert_eq!(strict.topic.as_deref(), Some("work"));
    assert_eq!(strict.color.as_deref(), Some("#ffd700"));

    let loose = tokio::task::spawn_blocking(move || classifier.classify_mood_topic("second message"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loose.mood.as_deref(), Some("sad"));
    assert_eq!(loose.topic.as_deref(), Some("health"));
    assert!(loose.color.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn summarizer_prompts_by_kind() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("less important memories"))
        .respond_with(completion("They chatted about the weather."))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("high-level overview"))
        .respond_with(completion("Mostly work and family."))
        .mount(&server)
        .await;

    let classifier = Arc::new(LlmClassifier::new(&config_for(&server, "")));
    let low = Arc::clone(&classifier);
    let summary = tokio::task::spawn_blocking(move || {
        low.summarize(SummaryKind::LowImportance, "User: nice day")
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(summary, "They chatted about the weather.");

    let overview = tokio::task::spawn_blocking(move || {
        classifier.summarize(SummaryKind::LongTermOverview, "User: my sister visited")
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(overview, "Mostly work and family.");
}

#[tokio::test(flavor = "multi_thread")]
async fn store_logs_with_llm_collaborators() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("On a scale of 1 to 5"))
        .respond_with(completion("5"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("Classify the following message"))
        .respond_with(completion(r#"{"mood": "excited", "topic": "relationships"}"#))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server, "");
    let root = dir.path().to_path_buf();
    let entry = tokio::task::spawn_blocking(move || {
        let collaborators = Collaborators::from_classifier(
            Arc::new(LlmClassifier::new(&config)),
            Arc::new(HashingEmbedder::new(32).unwrap()),
        );
        let store = MemoryStore::open(MemoryConfig::with_root(&root), collaborators).unwrap();
        store.log_interaction(Interaction::new(Role::User, "We got engaged!"))
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(entry.importance, 5);
    assert_eq!(entry.tags, vec!["excited".to_owned(), "relationships".to_owned()]);
    assert_eq!(entry.metadata.topic.as_deref(), Some("relationships"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_endpoint_still_logs() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let entry = tokio::task::spawn_blocking(move || {
        let config = LlmConfig {
            api_url: "http://127.0.0.1:1/v1".to_owned(),
            timeout_secs: 1,
            ..LlmConfig::default()
        };
        let collaborators = Collaborators::from_classifier(
            Arc::new(LlmClassifier::new(&config)),
            Arc::new(HashingEmbedder::new(32).unwrap()),
        );
        let store = MemoryStore::open(MemoryConfig::with_root(&root), collaborators).unwrap();
        store.log_interaction(Interaction::new(Role::User, "hello"))
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(entry.importance, 1);
    assert!(entry.metadata.is_empty());
}
