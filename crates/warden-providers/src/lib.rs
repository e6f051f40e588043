//! LLM provider abstraction (C6.4 / §6.4). Two logical roles, classifier
//! and executor, share one `call()` contract; verifier reuses the
//! classifier. An HTTP (OpenAI-compatible) adapter and a subprocess-CLI
//! adapter both implement `Provider`.

mod http_provider;
mod subprocess_provider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use http_provider::HttpProvider;
pub use subprocess_provider::SubprocessProvider;

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

/// Mirrors the failure taxonomy in §7: rate-limited and transport errors
/// are the only ones the caller may retry locally.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rate limited")]
    RateLimited { reset_at: Option<DateTime<Utc>> },
    #[error("provider call timed out")]
    Timeout,
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("provider authentication error: {0}")]
    Auth(String),
    #[error("provider error: {0}")]
    Other(String),
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    async fn call(
        &self,
        system: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<CompletionResult, ProviderError>;
}

/// Which of the two LLM roles a call is for. `Verifier` is not a distinct
/// provider — `ProviderRegistry::verifier()` returns the classifier handle
/// — but callers still log usage under the role they reasoned as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    Classifier,
    Executor,
    Verifier,
}

/// Binds the classifier and executor roles to concrete providers. Built
/// once at startup from configuration (C14) and handed to every component
/// that calls an LLM.
#[derive(Clone)]
pub struct ProviderRegistry {
    classifier: Arc<dyn Provider>,
    executor: Arc<dyn Provider>,
}

impl ProviderRegistry {
    pub fn new(classifier: Arc<dyn Provider>, executor: Arc<dyn Provider>) -> Self {
        Self { classifier, executor }
    }

    pub fn for_role(&self, role: ProviderRole) -> Arc<dyn Provider> {
        match role {
            ProviderRole::Classifier | ProviderRole::Verifier => self.classifier.clone(),
            ProviderRole::Executor => self.executor.clone(),
        }
    }

    pub fn classifier(&self) -> Arc<dyn Provider> {
        self.classifier.clone()
    }

    pub fn executor(&self) -> Arc<dyn Provider> {
        self.executor.clone()
    }

    pub fn verifier(&self) -> Arc<dyn Provider> {
        self.classifier.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProvider(&'static str);

    #[async_trait]
    impl Provider for EchoProvider {
        fn id(&self) -> &str {
            self.0
        }

        async fn call(
            &self,
            _system: &str,
            messages: &[ChatMessage],
            _max_tokens: u32,
            _timeout: Duration,
        ) -> Result<CompletionResult, ProviderError> {
            Ok(CompletionResult {
                text: messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                tool_calls: vec![],
                usage: TokenUsage { input: 10, output: 5 },
            })
        }
    }

    #[tokio::test]
    async fn verifier_role_resolves_to_classifier() {
        let registry = ProviderRegistry::new(Arc::new(EchoProvider("fast")), Arc::new(EchoProvider("capable")));
        assert_eq!(registry.for_role(ProviderRole::Verifier).id(), "fast");
        assert_eq!(registry.for_role(ProviderRole::Executor).id(), "capable");
    }
}
