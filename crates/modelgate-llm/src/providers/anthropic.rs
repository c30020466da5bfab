//! Anthropic adapter, via reqwest
//!
//! The messages API keeps the system prompt outside the message list and has
//! no native structured-output mode; when a schema is requested it is
//! injected as a system instruction and the orchestrator parse-validates the
//! answer.

use crate::completion::TokenUsage;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::message::{Message, MessageRole, ToolDefinition};
use crate::providers::{ProviderAdapter, ProviderKind, ProviderRequest, RawResponse};
use crate::router::Deployment;
use crate::schema::CompiledSchema;
use crate::util::sanitize_api_error;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Anthropic API version
const API_VERSION: &str = "2023-06-01";

/// Default API base URL
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Output-token cap when the caller does not set one; the field is mandatory
/// on this wire protocol
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    r#type: String,
    message: String,
}

/// Anthropic API adapter
pub struct AnthropicAdapter {
    client: Client,
    base_url: String,
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AnthropicAdapter {
    /// Create a new adapter against the public API
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the adapter at a different base URL (proxies, tests)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Split the normalized conversation into a system prompt and wire messages
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts = Vec::new();
        let mut wire_messages = Vec::new();

        for msg in messages {
            match msg.role {
                MessageRole::System => {
                    if !msg.content.is_empty() {
                        system_parts.push(msg.content.clone());
                    }
                }
                MessageRole::User => wire_messages.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
                MessageRole::Assistant => wire_messages.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
                MessageRole::Tool => {
                    if let Some(tool_call_id) = &msg.tool_call_id {
                        wire_messages.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: AnthropicContent::Blocks(vec![ContentBlock::ToolResult {
                                tool_use_id: tool_call_id.clone(),
                                content: msg.content.clone(),
                            }]),
                        });
                    }
                }
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, wire_messages)
    }

    fn convert_tool(tool: &ToolDefinition) -> AnthropicTool {
        AnthropicTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.parameters.clone(),
        }
    }

    /// Instruction appended to the system prompt when a schema is requested
    fn schema_instruction(schema: &CompiledSchema) -> String {
        format!(
            "Respond with a single JSON object named {} that conforms to this JSON Schema. \
             Output only the JSON object, with no surrounding prose or code fences.\n{}",
            schema.name, schema.document
        )
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
        let detail = serde_json::from_str::<AnthropicErrorBody>(body)
            .map(|e| format!("{}: {}", e.error.r#type, e.error.message))
            .unwrap_or_else(|_| format!("HTTP {status}"));

        let kind = match status.as_u16() {
            429 => ProviderErrorKind::RateLimit,
            401 | 403 => ProviderErrorKind::Auth,
            408 => ProviderErrorKind::Timeout,
            500..=599 => ProviderErrorKind::Server,
            _ => ProviderErrorKind::BadRequest,
        };
        ProviderError::new(kind, sanitize_api_error(&detail))
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    #[instrument(skip(self, deployment, request), fields(model = %deployment.model))]
    async fn invoke(
        &self,
        deployment: &Deployment,
        request: &ProviderRequest,
    ) -> Result<RawResponse, ProviderError> {
        let (mut system, messages) = Self::convert_messages(&request.messages);

        if let Some(schema) = &request.structured {
            let instruction = Self::schema_instruction(schema);
            system = Some(match system {
                Some(existing) => format!("{existing}\n\n{instruction}"),
                None => instruction,
            });
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools.iter().map(Self::convert_tool).collect())
        };

        let wire_request = AnthropicRequest {
            model: deployment.model.clone(),
            max_tokens: request.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            temperature: Some(request.temperature),
            tools,
        };

        let base_url = deployment.endpoint.as_deref().unwrap_or(&self.base_url);
        let url = format!("{base_url}/v1/messages");
        debug!("Sending request to Anthropic: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &deployment.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .timeout(request.timeout)
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    ProviderErrorKind::Timeout
                } else {
                    ProviderErrorKind::Network
                };
                ProviderError::new(kind, sanitize_api_error(&e.to_string()))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Network,
                sanitize_api_error(&e.to_string()),
            )
        })?;

        if !status.is_success() {
            return Err(Self::classify_status(status, &body));
        }

        let payload: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            ProviderError::new(ProviderErrorKind::Server, sanitize_api_error(&e.to_string()))
        })?;
        let parsed: AnthropicResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::new(ProviderErrorKind::Server, sanitize_api_error(&e.to_string()))
        })?;

        let content = parsed
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let usage = parsed.usage.map(|u| TokenUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(RawResponse {
            content,
            payload,
            usage,
            model: parsed.model,
        })
    }
}
