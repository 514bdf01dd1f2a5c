//! OpenRouter chat-completions client.
//!
//! One bounded call per decision: 45-second deadline enforced by
//! cancellation, a single retry with a fresh request on failure, and
//! first-JSON-object extraction from whatever prose the model wraps its
//! answer in.

use crate::config::OpenRouterConfig;
use crate::error::{DeskError, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Per-attempt deadline for the chat call.
pub const LLM_TIMEOUT_SECS: u64 = 45;

const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u32 = 500;

pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

impl LlmClient {
    pub fn new(config: &OpenRouterConfig) -> Result<Self> {
        // The client timeout sits above the 45s deadline; cancellation is
        // driven by the tokio timeout, not the transport.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LLM_TIMEOUT_SECS + 15))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// One chat completion, retried once with a fresh request on failure.
    pub async fn chat(&self, model: &str, system: &str, user: &str) -> Result<String> {
        match self.attempt(model, system, user).await {
            Ok(content) => Ok(content),
            Err(first) => {
                warn!(model, error = %first, "LLM call failed, retrying once");
                self.attempt(model, system, user).await
            }
        }
    }

    async fn attempt(&self, model: &str, system: &str, user: &str) -> Result<String> {
        match timeout(
            Duration::from_secs(LLM_TIMEOUT_SECS),
            self.request(model, system, user),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeskError::LlmTimeout(LLM_TIMEOUT_SECS)),
        }
    }

    async fn request(&self, model: &str, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(DeskError::Llm(format!("{status}: {text}")));
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| DeskError::Llm("response had no choices".to_string()))
    }
}

/// First balanced JSON object embedded in `text`, brace-matched and
/// string-aware so braces inside quoted values do not confuse it.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_object() {
        let text = r#"{"action": "hold", "reasoning": "nothing to do"}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn extracts_object_out_of_prose() {
        let text = "Sure! Here's my decision:\n```json\n{\"action\": \"open_long\", \"asset\": \"BTC\"}\n```\nGood luck!";
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"action": "open_long", "asset": "BTC"}"#)
        );
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_matching() {
        let text = r#"{"action": "hold", "reasoning": "ranges {0.01, 0.02} look flat"}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn nested_objects_match_to_the_outer_close() {
        let text = r#"noise {"a": {"b": 1}, "c": 2} trailing"#;
        assert_eq!(extract_json_object(text), Some(r#"{"a": {"b": 1}, "c": 2}"#));
    }

    #[test]
    fn no_object_yields_none() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{unterminated"), None);
    }
}
