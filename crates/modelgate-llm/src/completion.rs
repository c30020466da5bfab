//! Completion request and normalized response types
//!
//! A [`CompletionRequest`] is provider-agnostic: it names a logical model and
//! carries the caller's credential bundle, and the orchestrator resolves both
//! into a concrete deployment per attempt. Everything here is created fresh
//! per request and dropped with the response.

use crate::message::{Message, ToolDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default provider-call timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.5;

/// Structured-output request: a caller-supplied, request-scoped JSON Schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    /// The named schema the answer must conform to
    pub json_schema: JsonSchemaFormat,
}

/// A named JSON Schema document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSchemaFormat {
    /// Schema name (providers with a native structured mode require one)
    pub name: String,
    /// The JSON Schema object itself
    pub schema: serde_json::Value,
    /// Whether the provider should enforce the schema strictly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// Provider-agnostic completion request
#[derive(Clone)]
pub struct CompletionRequest {
    /// Per-provider credential bundle (e.g. `openai`, `azure`, `anthropic`)
    pub credentials: HashMap<String, String>,
    /// Logical model name; may resolve to several deployments
    pub model: String,
    /// Conversation, in order
    pub messages: Vec<Message>,
    /// Sampling temperature
    pub temperature: f32,
    /// Provider-call timeout
    pub timeout: Duration,
    /// Maximum tokens the provider may generate
    pub max_output_tokens: Option<u32>,
    /// Structured-output constraint, if the caller wants a typed answer
    pub response_format: Option<ResponseFormat>,
    /// Tool declarations passed through to the provider
    pub tools: Vec<ToolDefinition>,
}

impl CompletionRequest {
    /// Create a request for a logical model with defaults matching the API
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            credentials: HashMap::new(),
            model: model.into(),
            messages,
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_output_tokens: None,
            response_format: None,
            tools: Vec::new(),
        }
    }

    /// Set a credential for a provider
    #[must_use]
    pub fn with_credential(
        mut self,
        provider: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.credentials.insert(provider.into(), secret.into());
        self
    }

    /// Set the sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the provider-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cap the provider's output tokens
    #[must_use]
    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }

    /// Require a structured answer conforming to the given schema
    #[must_use]
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Attach tool declarations
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

impl std::fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Credential values never appear in logs
        f.debug_struct("CompletionRequest")
            .field("credentials", &self.credentials.keys().collect::<Vec<_>>())
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("structured", &self.response_format.is_some())
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub prompt_tokens: u32,
    /// Completion tokens
    pub completion_tokens: u32,
    /// Total tokens
    pub total_tokens: u32,
}

/// Normalized response envelope returned for every provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedResponse {
    /// Always `assistant`
    pub role: crate::message::MessageRole,
    /// Raw or validated-structured content, explicitly tagged
    pub content: ResponseContent,
    /// Token usage, when the provider reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Concrete model that answered
    pub model: String,
}

/// Response content, tagged so callers can tell a raw provider payload from a
/// schema-validated value without inspecting its shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseContent {
    /// The provider-shaped response payload, untouched
    Raw {
        /// Full provider response
        payload: serde_json::Value,
    },
    /// A validated structured value alongside the payload it was parsed from
    Structured {
        /// The value conforming to the caller's schema
        value: serde_json::Value,
        /// Full provider response the value came from
        payload: serde_json::Value,
    },
}

impl ResponseContent {
    /// The validated structured value, if this is a structured response
    #[must_use]
    pub fn structured_value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured { value, .. } => Some(value),
            Self::Raw { .. } => None,
        }
    }
}
