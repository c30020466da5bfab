//! HTTP transport shim
//!
//! Thin front door over the orchestrator: parse the request body, run the
//! completion, serialize the envelope or a structured error. Status mapping
//! lives here and only here: schema violations are the one caller-attributable
//! failure; everything else the core surfaces is a server error.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use config::{Config, Environment};
use modelgate_llm::{
    CompletionRequest, Error, GatewayConfig, Message, Orchestrator, ResponseFormat,
    RouterOptions, ToolDefinition,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shim configuration, read from `MODELGATE_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,
    /// Cooldown window for failed deployments, in seconds
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Fraction above the best latency still treated as near-best
    #[serde(default = "default_latency_buffer")]
    pub latency_buffer: f64,
    /// Deployment failover attempts per request
    #[serde(default = "default_failover_attempts")]
    pub failover_attempts: usize,
}

fn default_port() -> u16 {
    8889
}

fn default_cooldown_secs() -> u64 {
    3600
}

fn default_latency_buffer() -> f64 {
    0.5
}

fn default_failover_attempts() -> usize {
    3
}

impl AppConfig {
    fn load() -> Result<Self> {
        Config::builder()
            .add_source(Environment::with_prefix("MODELGATE"))
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")
    }

    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            router: RouterOptions {
                cooldown: Duration::from_secs(self.cooldown_secs),
                latency_buffer: self.latency_buffer,
            },
            max_failover_attempts: self.failover_attempts,
        }
    }
}

/// Wire shape of the chat-completion endpoint body
#[derive(Debug, Deserialize)]
struct ChatCompletionBody {
    #[serde(default)]
    credentials: HashMap<String, String>,
    model: String,
    messages: Vec<Message>,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_timeout_secs")]
    timeout: u64,
    #[serde(default, alias = "max_completion_tokens")]
    max_output_tokens: Option<u32>,
    #[serde(default)]
    response_format: Option<ResponseFormat>,
    #[serde(default)]
    tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.5
}

fn default_timeout_secs() -> u64 {
    600
}

async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "pong"}))
}

async fn chat_completion(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(body): Json<ChatCompletionBody>,
) -> Response {
    let mut request = CompletionRequest::new(body.model, body.messages)
        .with_temperature(body.temperature)
        .with_timeout(Duration::from_secs(body.timeout))
        .with_tools(body.tools);
    request.credentials = body.credentials;
    request.max_output_tokens = body.max_output_tokens;
    request.response_format = body.response_format;

    match orchestrator.complete(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            error!(kind = err.kind(), "completion failed: {err}");
            let status = match err {
                Error::SchemaViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let payload = serde_json::json!({
                "error": err.to_string(),
                "kind": err.kind(),
            });
            (status, Json(payload)).into_response()
        }
    }
}

/// Build the application router
pub fn app(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/", get(ping))
        .route("/chatcompletion", post(chat_completion))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Run the gateway server until shutdown
pub async fn run() -> Result<()> {
    let config = AppConfig::load()?;
    let orchestrator = Arc::new(Orchestrator::new(config.gateway_config()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Listening on {addr}");

    axum::serve(listener, app(orchestrator))
        .await
        .context("serving")?;
    Ok(())
}
