//! HTTP transport to the Ollama generate endpoint.

use std::time::Duration;

use serde_json::{Value, json};

use crate::{InferenceConfig, InferenceError};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 8;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_CHARS: usize = 512;

const TEMPERATURE: f64 = 0.2;
const TOP_P: f64 = 0.9;
const NUM_PREDICT: u32 = 1024;

/// Build the shared client. The overall timeout covers connect, send and body read.
pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .build()
}

pub(crate) fn generate_url(base_url: &str) -> String {
    format!("{}/api/generate", base_url.trim_end_matches('/'))
}

pub(crate) fn request_body(model: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "prompt": prompt,
        "stream": false,
        "format": "json",
        "options": {
            "temperature": TEMPERATURE,
            "top_p": TOP_P,
            "num_predict": NUM_PREDICT
        }
    })
}

/// Send the prompt and return the model's raw text.
pub(crate) async fn generate(
    client: &reqwest::Client,
    config: &InferenceConfig,
    prompt: &str,
) -> Result<String, InferenceError> {
    let body = request_body(&config.model, prompt);

    let response = client
        .post(generate_url(&config.base_url))
        .header("content-type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| classify(&e, config.timeout))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read error: {e}>"));
        return Err(InferenceError::Transport(format!(
            "HTTP {status}: {}",
            truncate_chars(error_text.trim(), MAX_ERROR_BODY_CHARS)
        )));
    }

    let raw = response
        .text()
        .await
        .map_err(|e| classify(&e, config.timeout))?;

    extract_model_text(&raw)
}

/// Pull the model text out of the generate envelope (`response`, else `output`).
pub(crate) fn extract_model_text(raw: &str) -> Result<String, InferenceError> {
    let envelope: Value = serde_json::from_str(raw)
        .map_err(|e| InferenceError::Parse(format!("response envelope is not JSON ({e})")))?;

    envelope
        .get("response")
        .and_then(Value::as_str)
        .or_else(|| envelope.get("output").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| {
            InferenceError::Parse("response envelope has no `response` or `output` text".into())
        })
}

fn classify(error: &reqwest::Error, timeout: Duration) -> InferenceError {
    if error.is_timeout() {
        InferenceError::Timeout(timeout)
    } else {
        InferenceError::Transport(error.to_string())
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_url_strips_trailing_slash() {
        assert_eq!(
            generate_url("http://localhost:11434/"),
            "http://localhost:11434/api/generate"
        );
        assert_eq!(
            generate_url("http://ollama:11434"),
            "http://ollama:11434/api/generate"
        );
    }

    #[test]
    fn request_body_has_fixed_options() {
        let body = request_body("llama3.1:8b", "hello");
        assert_eq!(body["model"], "llama3.1:8b");
        assert_eq!(body["prompt"], "hello");
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"], "json");
        assert_eq!(body["options"]["temperature"], 0.2);
        assert_eq!(body["options"]["top_p"], 0.9);
        assert_eq!(body["options"]["num_predict"], 1024);
    }

    #[test]
    fn envelope_prefers_response_then_output() {
        assert_eq!(
            extract_model_text(r#"{"response": "a", "output": "b"}"#).unwrap(),
            "a"
        );
        assert_eq!(extract_model_text(r#"{"output": "b"}"#).unwrap(), "b");
        assert!(matches!(
            extract_model_text(r#"{"done": true}"#),
            Err(InferenceError::Parse(_))
        ));
        assert!(matches!(
            extract_model_text("<html>bad gateway</html>"),
            Err(InferenceError::Parse(_))
        ));
    }

    #[test]
    fn truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
