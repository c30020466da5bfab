//! Provider adapters
//!
//! One adapter per vendor wire protocol. Adapters are the only components
//! that perform network I/O: they translate the normalized request into the
//! vendor call, classify vendor failures into [`ProviderError`], and expose
//! the token accounting the budget enforcer runs against.

pub mod anthropic;
pub mod azure;
pub mod openai;

use crate::completion::TokenUsage;
use crate::error::{ProviderError, Result};
use crate::limits;
use crate::message::{Message, ToolDefinition};
use crate::router::Deployment;
use crate::schema::CompiledSchema;
use crate::token::TokenCounter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Which vendor wire protocol a deployment speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions API
    OpenAi,
    /// Azure-hosted OpenAI deployments (same wire family, different auth)
    Azure,
    /// Anthropic messages API
    Anthropic,
}

impl ProviderKind {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Budget-fitted request handed to an adapter for one attempt
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Conversation after budget enforcement
    pub messages: Vec<Message>,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_output_tokens: Option<u32>,
    /// Transport-level timeout for the call
    pub timeout: Duration,
    /// Tool declarations, if any
    pub tools: Vec<ToolDefinition>,
    /// Structured-output constraint, if the caller wants a typed answer
    pub structured: Option<CompiledSchema>,
}

/// Vendor response in normalized form, with the vendor payload preserved
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Assistant text extracted from the payload
    pub content: String,
    /// The provider-shaped response, untouched
    pub payload: serde_json::Value,
    /// Token usage, when reported
    pub usage: Option<TokenUsage>,
    /// Concrete model that answered
    pub model: String,
}

/// Common contract for vendor adapters
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which wire protocol this adapter speaks
    fn kind(&self) -> ProviderKind;

    /// Invoke the vendor with a budget-fitted request
    ///
    /// # Errors
    /// Returns a classified [`ProviderError`]; retriable kinds trigger
    /// deployment failover in the orchestrator.
    async fn invoke(
        &self,
        deployment: &Deployment,
        request: &ProviderRequest,
    ) -> std::result::Result<RawResponse, ProviderError>;

    /// Count input tokens the way this vendor accounts for them
    fn count_tokens(&self, _model: &str, messages: &[Message]) -> usize {
        TokenCounter::new().count_conversation(messages)
    }

    /// Maximum input tokens the concrete model accepts
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownModel`] when the registry has no entry.
    fn max_input_tokens(&self, model: &str) -> Result<u32> {
        limits::max_input_tokens(model)
    }
}

/// The full adapter set for the protocols the gateway routes to
#[must_use]
pub fn default_adapters() -> HashMap<ProviderKind, Arc<dyn ProviderAdapter>> {
    HashMap::from([
        (
            ProviderKind::OpenAi,
            Arc::new(openai::OpenAiAdapter::new()) as Arc<dyn ProviderAdapter>,
        ),
        (
            ProviderKind::Azure,
            Arc::new(azure::AzureAdapter::new()) as Arc<dyn ProviderAdapter>,
        ),
        (
            ProviderKind::Anthropic,
            Arc::new(anthropic::AnthropicAdapter::new()) as Arc<dyn ProviderAdapter>,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_as_str() {
        assert_eq!(ProviderKind::OpenAi.as_str(), "openai");
        assert_eq!(ProviderKind::Azure.as_str(), "azure");
        assert_eq!(ProviderKind::Anthropic.as_str(), "anthropic");
    }

    #[test]
    fn test_default_adapters_cover_all_kinds() {
        let adapters = default_adapters();
        assert_eq!(adapters.len(), 3);
        for (kind, adapter) in &adapters {
            assert_eq!(*kind, adapter.kind());
        }
    }

    #[test]
    fn test_default_token_counting() {
        let adapters = default_adapters();
        let adapter = adapters.get(&ProviderKind::OpenAi).unwrap();
        let messages = vec![Message::user("Hello!")];
        assert!(adapter.count_tokens("gpt-4o", &messages) > 0);
        assert_eq!(adapter.count_tokens("gpt-4o", &[]), 0);
    }
}
