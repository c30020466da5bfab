//! Modelgate LLM - provider normalization and routing
//!
//! One chat-completion interface over heterogeneous LLM providers:
//! - Router: latency-aware deployment selection with health cooldowns
//! - Budget: deterministic conversation trimming against input-token limits
//! - Schema: runtime compilation of caller-supplied JSON Schemas into a
//!   closed descriptor used to constrain and validate structured output
//! - Providers: OpenAI, Azure OpenAI, and Anthropic adapters
//! - Orchestrator: the end-to-end completion entry point

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod budget;
pub mod completion;
pub mod error;
pub mod limits;
pub mod message;
pub mod orchestrator;
pub mod providers;
pub mod router;
pub mod schema;
pub mod token;
pub mod util;

pub use completion::{
    CompletionRequest, JsonSchemaFormat, NormalizedResponse, ResponseContent, ResponseFormat,
    TokenUsage,
};
pub use error::{Error, ProviderError, ProviderErrorKind, Result};
pub use message::{Message, MessageRole, ToolDefinition};
pub use orchestrator::{GatewayConfig, Orchestrator};
pub use providers::{
    default_adapters, ProviderAdapter, ProviderKind, ProviderRequest, RawResponse,
};
pub use router::{
    deployments_for, Deployment, DeploymentRouter, HealthTable, RouterOptions,
};
pub use schema::{CompiledSchema, FieldDescriptor, ScalarKind, SchemaDescriptor};
pub use token::TokenCounter;
