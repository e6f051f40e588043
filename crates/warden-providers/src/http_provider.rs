use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::{ChatMessage, CompletionResult, Provider, ProviderError, ToolCall, TokenUsage};

/// OpenAI-compatible chat-completions adapter. Grounded on the teacher's
/// multi-vendor `OpenAICompatibleProvider`, trimmed to the non-streaming
/// `call()` contract this runtime needs.
pub struct HttpProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl HttpProvider {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: normalize_base(&base_url.into()),
            api_key,
            model: model.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(
        &self,
        system: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<CompletionResult, ProviderError> {
        let mut wire_messages = vec![json!({"role": "system", "content": system})];
        wire_messages.extend(messages.iter().map(|m| json!({"role": m.role, "content": m.content})));

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(timeout)
            .json(&json!({
                "model": self.model,
                "messages": wire_messages,
                "max_tokens": max_tokens,
                "stream": false,
            }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(map_reqwest_error)?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let reset_at = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<i64>().ok())
                .map(|seconds| chrono::Utc::now() + chrono::Duration::seconds(seconds));
            return Err(ProviderError::RateLimited { reset_at });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::Auth(format!("provider `{}` rejected credentials", self.id)));
        }

        let value: serde_json::Value = response.json().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            let detail = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("request failed")
                .to_string();
            return Err(ProviderError::Other(detail));
        }

        let choice = value
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ProviderError::Other("response had no choices".into()))?;
        let message = choice.get("message").cloned().unwrap_or_default();

        let text = message.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();

        let tool_calls = message
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|call| {
                let id = call.get("id")?.as_str()?.to_string();
                let function = call.get("function")?;
                let name = function.get("name")?.as_str()?.to_string();
                let arguments = function.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}").to_string();
                Some(ToolCall { id, name, arguments })
            })
            .collect();

        let usage = value.get("usage").map(|u| TokenUsage {
            input: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            output: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        }).unwrap_or_default();

        Ok(CompletionResult { text, tool_calls, usage })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(err.to_string())
    }
}

fn normalize_base(input: &str) -> String {
    let trimmed = input.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_base;

    #[test]
    fn normalizes_base_url_to_include_v1_once() {
        assert_eq!(normalize_base("https://api.openai.com"), "https://api.openai.com/v1");
        assert_eq!(normalize_base("https://api.openai.com/v1/"), "https://api.openai.com/v1");
    }
}
