use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{ChatMessage, CompletionResult, Provider, ProviderError, TokenUsage};

/// Wraps a local CLI binary that reads a prompt on stdin and writes a JSON
/// object `{text, input_tokens, output_tokens}` on stdout. Grounded on the
/// source's `ClaudeCLIClient`, which shells out to a `claude` binary for
/// OAuth-token-authenticated completions rather than calling an HTTP API
/// directly; here the prompt/response boundary is pushed onto stdin/stdout
/// so any compatible CLI can be substituted via configuration.
pub struct SubprocessProvider {
    id: String,
    binary: String,
    extra_args: Vec<String>,
}

impl SubprocessProvider {
    pub fn new(id: impl Into<String>, binary: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self { id: id.into(), binary: binary.into(), extra_args }
    }
}

#[async_trait]
impl Provider for SubprocessProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(
        &self,
        system: &str,
        messages: &[ChatMessage],
        _max_tokens: u32,
        timeout: Duration,
    ) -> Result<CompletionResult, ProviderError> {
        let prompt = build_prompt(system, messages);

        let mut child = Command::new(&self.binary)
            .args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProviderError::Transport(format!("failed to spawn `{}`: {e}", self.binary)))?;

        {
            let mut stdin = child.stdin.take().ok_or_else(|| ProviderError::Other("no stdin handle".into()))?;
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ProviderError::Timeout)?
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.to_lowercase().contains("limit reached") {
                return Err(ProviderError::RateLimited { reset_at: None });
            }
            return Err(ProviderError::Other(format!("`{}` exited with {}: {stderr}", self.binary, output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        parse_cli_response(&stdout, &prompt)
    }
}

fn build_prompt(system: &str, messages: &[ChatMessage]) -> String {
    let mut parts = Vec::new();
    if !system.is_empty() {
        parts.push(format!("<system>{system}</system>"));
    }
    for m in messages {
        parts.push(format!("<{}>{}</{}>", m.role, m.content, m.role));
    }
    parts.join("\n\n")
}

fn parse_cli_response(stdout: &str, prompt: &str) -> Result<CompletionResult, ProviderError> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(stdout) {
        let text = value.get("text").and_then(|v| v.as_str()).unwrap_or(stdout).to_string();
        let input = value.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or_else(|| estimate_tokens(prompt));
        let output = value.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or_else(|| estimate_tokens(&text));
        return Ok(CompletionResult { text, tool_calls: vec![], usage: TokenUsage { input, output } });
    }

    Ok(CompletionResult {
        text: stdout.to_string(),
        tool_calls: vec![],
        usage: TokenUsage { input: estimate_tokens(prompt), output: estimate_tokens(stdout) },
    })
}

fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_response_from_stdout() {
        let result = parse_cli_response(r#"{"text": "hi", "input_tokens": 3, "output_tokens": 1}"#, "prompt").unwrap();
        assert_eq!(result.text, "hi");
        assert_eq!(result.usage.input, 3);
        assert_eq!(result.usage.output, 1);
    }

    #[test]
    fn falls_back_to_plain_text_with_estimated_tokens() {
        let result = parse_cli_response("plain response text", "a short prompt").unwrap();
        assert_eq!(result.text, "plain response text");
        assert_eq!(result.usage.output, "plain response text".len() as u64 / 4);
    }
}
