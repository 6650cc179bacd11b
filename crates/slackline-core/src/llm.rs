// LLM Driver Abstractions
//
// This module encapsulates what the orchestrator needs from an LLM provider:
// - LlmDriver trait for provider-agnostic chat completions
// - Message types for LLM calls
// - Provider selection types shared by the provider crate and configuration
//
// Design: Dependency inversion - the provider crate (slackline-openai) depends on
// core and implements LlmDriver. Core has no knowledge of specific providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;

// ============================================================================
// LlmDriver Trait
// ============================================================================

/// Metadata about LLM completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmCompletionMetadata {
    /// Total tokens used
    pub total_tokens: Option<u32>,
    /// Prompt tokens
    pub prompt_tokens: Option<u32>,
    /// Completion tokens
    pub completion_tokens: Option<u32>,
    /// Model used
    pub model: Option<String>,
    /// Finish reason
    pub finish_reason: Option<String>,
}

/// Completed (non-streaming) LLM response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub metadata: LlmCompletionMetadata,
}

/// Trait for LLM drivers
///
/// Implementations handle provider-specific API calls and response parsing.
/// Any failure is reported as `BotError::Provider`.
#[async_trait]
pub trait LlmDriver: Send + Sync {
    /// Call the LLM and wait for the full completion
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse>;
}

/// Shared, dynamically dispatched driver
pub type SharedLlmDriver = Arc<dyn LlmDriver>;

#[async_trait]
impl<T: LlmDriver + ?Sized> LlmDriver for Arc<T> {
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse> {
        (**self).chat_completion(messages, config).await
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmMessageRole {
    System,
    User,
    Assistant,
}

impl LlmMessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmMessageRole::System => "system",
            LlmMessageRole::User => "user",
            LlmMessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for LlmMessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message format for LLM calls (provider-agnostic)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmMessageRole,
    pub content: String,
}

impl LlmMessage {
    pub fn new(role: LlmMessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(LlmMessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(LlmMessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(LlmMessageRole::Assistant, content)
    }
}

/// Configuration for a single LLM call
#[derive(Debug, Clone, PartialEq)]
pub struct LlmCallConfig {
    /// Model identifier (deployment name for Azure)
    pub model: String,
    /// Temperature for sampling (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

impl LlmCallConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// ============================================================================
// Provider Selection
// ============================================================================

/// Supported LLM provider kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    #[default]
    OpenAI,
    Azure,
}

impl LlmProviderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(LlmProviderKind::OpenAI),
            "azure" | "azure_openai" | "azure-openai" => Some(LlmProviderKind::Azure),
            _ => None,
        }
    }
}

impl std::fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProviderKind::OpenAI => write!(f, "openai"),
            LlmProviderKind::Azure => write!(f, "azure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(LlmProviderKind::parse("OpenAI"), Some(LlmProviderKind::OpenAI));
        assert_eq!(LlmProviderKind::parse(" azure "), Some(LlmProviderKind::Azure));
        assert_eq!(LlmProviderKind::parse("anthropic"), None);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = LlmMessage::assistant("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }
}
