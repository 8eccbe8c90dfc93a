//! Integration tests for the Ollama adapter.
//!
//! Each test stands up a mock generate endpoint and drives the full pipeline:
//! prompt → HTTP → envelope → JSON recovery → normalization.

use std::time::Duration;

use prism_inference::{InferenceAdapter, InferenceConfig, InferenceError, Outcome};
use prism_types::{FALLBACK_REASON, FALLBACK_SUMMARY, Impact, InferenceResult};
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter_for(server: &MockServer) -> InferenceAdapter {
    adapter_with_timeout(&server.uri(), Duration::from_secs(5))
}

fn adapter_with_timeout(base_url: &str, timeout: Duration) -> InferenceAdapter {
    InferenceAdapter::new(InferenceConfig {
        base_url: base_url.to_string(),
        model: "llama3.1:8b".to_string(),
        timeout,
    })
    .unwrap()
}

fn files() -> Vec<String> {
    vec!["src/auth.rs".to_string(), "src/session.rs".to_string()]
}

/// Wrap model text in an Ollama generate envelope.
fn envelope(model_text: &str) -> serde_json::Value {
    json!({
        "model": "llama3.1:8b",
        "created_at": "2026-01-01T00:00:00Z",
        "response": model_text,
        "done": true
    })
}

async fn mount_text(server: &MockServer, model_text: &str) {
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(model_text)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn well_formed_answer_passes_through() {
    let server = MockServer::start().await;
    mount_text(
        &server,
        r#"{"risk": 72, "confidence": 81, "impact": "high",
            "summary": "Touches session handling.",
            "reason": "Auth changes affect every request.",
            "suggestedTests": ["login with expired session", "logout clears cookie"]}"#,
    )
    .await;

    let assessment = adapter_for(&server).assess(&files(), "Rework sessions").await;

    assert_eq!(assessment.outcome, Outcome::Model);
    let result = assessment.result;
    assert_eq!(result.risk().value(), 72);
    assert_eq!(result.confidence().value(), 81);
    assert_eq!(result.impact(), Impact::High);
    assert_eq!(result.summary(), "Touches session handling.");
    assert_eq!(result.reason(), "Auth changes affect every request.");
    assert_eq!(
        result.suggested_tests(),
        ["login with expired session", "logout clears cookie"]
    );
}

#[tokio::test]
async fn out_of_range_scores_are_clamped() {
    let server = MockServer::start().await;
    mount_text(
        &server,
        r#"{"risk": 150, "confidence": -30, "impact": "low",
            "summary": "s", "reason": "r", "suggestedTests": []}"#,
    )
    .await;

    let result = adapter_for(&server).predict(&files(), "msg").await;

    assert_eq!(result.risk().value(), 100);
    assert_eq!(result.confidence().value(), 0);
    assert_eq!(result.impact(), Impact::Low);
}

#[tokio::test]
async fn malformed_text_yields_exact_fallback() {
    let server = MockServer::start().await;
    mount_text(&server, "I could not decide, sorry.").await;

    let assessment = adapter_for(&server).assess(&files(), "msg").await;

    assert!(assessment.is_fallback());
    assert!(matches!(
        assessment.outcome,
        Outcome::Fallback(InferenceError::Parse(_))
    ));
    assert_eq!(assessment.result, InferenceResult::fallback());
    assert_eq!(assessment.result.summary(), FALLBACK_SUMMARY.as_str());
    assert_eq!(assessment.result.reason(), FALLBACK_REASON.as_str());
}

#[tokio::test]
async fn placeholder_braces_in_prose_fall_back() {
    let server = MockServer::start().await;
    mount_text(&server, "sure! ```json {...} ```").await;

    let result = adapter_for(&server).predict(&files(), "msg").await;

    assert_eq!(result, InferenceResult::fallback());
}

#[tokio::test]
async fn valid_object_inside_prose_is_recovered() {
    let server = MockServer::start().await;
    mount_text(
        &server,
        "Here is my analysis:\n```json\n{\"risk\": 20, \"confidence\": 90, \"impact\": \"low\", \
         \"summary\": \"Docs only.\", \"reason\": \"No code paths change.\"}\n```",
    )
    .await;

    let assessment = adapter_for(&server).assess(&files(), "Update README").await;

    assert_eq!(assessment.outcome, Outcome::Model);
    assert_eq!(assessment.result.risk().value(), 20);
    assert_eq!(assessment.result.summary(), "Docs only.");
    assert!(assessment.result.suggested_tests().is_empty());
}

#[tokio::test]
async fn unknown_impact_becomes_medium() {
    let server = MockServer::start().await;
    mount_text(
        &server,
        r#"{"risk": 90, "confidence": 70, "impact": "critical", "summary": "s", "reason": "r"}"#,
    )
    .await;

    let assessment = adapter_for(&server).assess(&files(), "msg").await;

    assert_eq!(assessment.outcome, Outcome::Model);
    assert_eq!(assessment.result.impact(), Impact::Medium);
    assert_eq!(assessment.result.risk().value(), 90);
}

#[tokio::test]
async fn output_field_is_accepted_when_response_missing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": r#"{"risk": 10, "confidence": 60, "impact": "low", "summary": "s", "reason": "r"}"#,
            "done": true
        })))
        .mount(&server)
        .await;

    let assessment = adapter_for(&server).assess(&files(), "msg").await;

    assert_eq!(assessment.outcome, Outcome::Model);
    assert_eq!(assessment.result.risk().value(), 10);
}

#[tokio::test]
async fn server_error_falls_back_with_transport_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let assessment = adapter_for(&server).assess(&files(), "msg").await;

    let Outcome::Fallback(InferenceError::Transport(message)) = &assessment.outcome else {
        panic!("expected transport fallback, got {:?}", assessment.outcome);
    };
    assert!(message.contains("500"), "message: {message}");
    assert!(message.contains("model not loaded"), "message: {message}");
    assert_eq!(assessment.result, InferenceResult::fallback());
}

#[tokio::test]
async fn slow_model_times_out_into_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope(r#"{"risk": 1}"#))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let timeout = Duration::from_millis(200);
    let assessment = adapter_with_timeout(&server.uri(), timeout)
        .assess(&files(), "msg")
        .await;

    assert_eq!(
        assessment.outcome,
        Outcome::Fallback(InferenceError::Timeout(timeout))
    );
    assert_eq!(assessment.result, InferenceResult::fallback());
}

#[tokio::test]
async fn unreachable_server_falls_back() {
    // Bind then drop to get a port with nothing listening.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let adapter = adapter_with_timeout(&format!("http://127.0.0.1:{port}"), Duration::from_secs(2));

    let assessment = adapter.assess(&files(), "msg").await;

    assert!(matches!(
        assessment.outcome,
        Outcome::Fallback(InferenceError::Transport(_))
    ));
    assert_eq!(assessment.result, InferenceResult::fallback());
}

#[tokio::test]
async fn request_carries_model_options_and_change_details() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "llama3.1:8b",
            "stream": false,
            "format": "json",
            "options": { "temperature": 0.2, "top_p": 0.9, "num_predict": 1024 }
        })))
        .and(body_string_contains("src/auth.rs"))
        .and(body_string_contains("Rework sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            r#"{"risk": 40, "confidence": 55, "impact": "medium", "summary": "s", "reason": "r"}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let assessment = adapter_for(&server).assess(&files(), "Rework sessions").await;

    assert_eq!(assessment.outcome, Outcome::Model);
    assert_eq!(assessment.result.risk().value(), 40);
}
