//! OpenAI adapter, via async-openai
//!
//! Also hosts the wire-shape conversions shared with the Azure adapter, which
//! speaks the same protocol behind different authentication.

use crate::error::{ProviderError, ProviderErrorKind};
use crate::message::{Message, MessageRole, ToolDefinition};
use crate::providers::{ProviderAdapter, ProviderKind, ProviderRequest, RawResponse};
use crate::router::Deployment;
use crate::schema::CompiledSchema;
use crate::util::sanitize_api_error;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestToolMessage,
        ChatCompletionRequestToolMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, ChatCompletionTool, ChatCompletionTools,
        CreateChatCompletionRequest, CreateChatCompletionResponse, FunctionObject, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use tracing::{debug, instrument};

/// OpenAI API adapter
#[derive(Default)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    /// Create a new adapter
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Convert a normalized message to the OpenAI wire shape
pub(crate) fn convert_message(
    msg: &Message,
) -> Result<ChatCompletionRequestMessage, ProviderError> {
    let message = match msg.role {
        MessageRole::System => ChatCompletionRequestSystemMessage {
            content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
            name: None,
        }
        .into(),
        MessageRole::User => ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
            name: None,
        }
        .into(),
        MessageRole::Assistant =>
        {
            #[allow(deprecated)]
            ChatCompletionRequestAssistantMessage {
                content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                    msg.content.clone(),
                )),
                name: None,
                tool_calls: None,
                function_call: None,
                refusal: None,
                audio: None,
            }
            .into()
        }
        MessageRole::Tool => {
            let tool_call_id = msg.tool_call_id.as_ref().ok_or_else(|| {
                ProviderError::new(
                    ProviderErrorKind::BadRequest,
                    "tool message missing tool_call_id",
                )
            })?;
            ChatCompletionRequestToolMessage {
                content: ChatCompletionRequestToolMessageContent::Text(msg.content.clone()),
                tool_call_id: tool_call_id.clone(),
            }
            .into()
        }
    };
    Ok(message)
}

pub(crate) fn convert_tool(tool: &ToolDefinition) -> ChatCompletionTools {
    ChatCompletionTools::Function(ChatCompletionTool {
        function: FunctionObject {
            name: tool.name.clone(),
            description: Some(tool.description.clone()),
            parameters: Some(tool.parameters.clone()),
            strict: None,
        },
    })
}

pub(crate) fn convert_response_format(schema: &CompiledSchema) -> ResponseFormat {
    ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: None,
            name: schema.name.clone(),
            schema: Some(schema.document.clone()),
            strict: Some(schema.strict),
        },
    }
}

/// Build the wire request for an OpenAI-protocol deployment
pub(crate) fn build_request(
    model: String,
    request: &ProviderRequest,
) -> Result<CreateChatCompletionRequest, ProviderError> {
    let messages: Vec<ChatCompletionRequestMessage> = request
        .messages
        .iter()
        .map(convert_message)
        .collect::<Result<_, _>>()?;

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(request.tools.iter().map(convert_tool).collect())
    };

    // o1-family models reject a temperature; the field must be absent, not null
    let temperature = if model.starts_with("o1") {
        None
    } else {
        Some(request.temperature)
    };

    Ok(CreateChatCompletionRequest {
        model,
        messages,
        temperature,
        max_completion_tokens: request.max_output_tokens,
        tools,
        response_format: request.structured.as_ref().map(convert_response_format),
        ..Default::default()
    })
}

/// Classify an async-openai failure into the gateway taxonomy
pub(crate) fn classify_error(error: OpenAIError) -> ProviderError {
    match error {
        OpenAIError::Reqwest(e) => {
            let kind = if e.is_timeout() {
                ProviderErrorKind::Timeout
            } else {
                ProviderErrorKind::Network
            };
            ProviderError::new(kind, sanitize_api_error(&e.to_string()))
        }
        OpenAIError::ApiError(api) => {
            let lower = api.message.to_lowercase();
            let kind = if lower.contains("rate limit") || lower.contains("quota") {
                ProviderErrorKind::RateLimit
            } else if lower.contains("api key")
                || lower.contains("authentication")
                || lower.contains("unauthorized")
            {
                ProviderErrorKind::Auth
            } else if lower.contains("internal")
                || lower.contains("server error")
                || lower.contains("overloaded")
            {
                ProviderErrorKind::Server
            } else {
                ProviderErrorKind::BadRequest
            };
            ProviderError::new(kind, sanitize_api_error(&api.message))
        }
        other => ProviderError::new(
            ProviderErrorKind::Network,
            sanitize_api_error(&other.to_string()),
        ),
    }
}

/// Lift the vendor response into the normalized envelope
pub(crate) fn normalize_response(
    response: CreateChatCompletionResponse,
) -> Result<RawResponse, ProviderError> {
    let choice = response.choices.first().ok_or_else(|| {
        ProviderError::new(ProviderErrorKind::Server, "no choices in response")
    })?;
    let content = choice.message.content.clone().unwrap_or_default();

    let usage = response.usage.as_ref().map(|u| crate::completion::TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });
    let model = response.model.clone();

    let payload = serde_json::to_value(&response).map_err(|e| {
        ProviderError::new(ProviderErrorKind::Server, sanitize_api_error(&e.to_string()))
    })?;

    Ok(RawResponse {
        content,
        payload,
        usage,
        model,
    })
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    #[instrument(skip(self, deployment, request), fields(model = %deployment.model))]
    async fn invoke(
        &self,
        deployment: &Deployment,
        request: &ProviderRequest,
    ) -> Result<RawResponse, ProviderError> {
        let mut config = OpenAIConfig::new().with_api_key(&deployment.api_key);
        if let Some(endpoint) = &deployment.endpoint {
            config = config.with_api_base(endpoint);
        }
        let client = Client::with_config(config);

        let wire_request = build_request(deployment.model.clone(), request)?;

        debug!("Sending request to OpenAI");
        let response = client
            .chat()
            .create(wire_request)
            .await
            .map_err(classify_error)?;

        normalize_response(response)
    }
}
