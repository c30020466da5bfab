//! Completion orchestrator
//!
//! The top-level entry point: resolve the logical model to a deployment, fit
//! the conversation to the deployment's input-token budget, invoke the
//! adapter, and coerce the answer through the schema validator when the
//! caller asked for structured output. Retriable provider failures put the
//! deployment into cooldown and fail over to the next candidate, up to a
//! bounded attempt count; one corrective follow-up is attempted on a schema
//! violation before the failure surfaces.

use crate::budget;
use crate::completion::{CompletionRequest, NormalizedResponse, ResponseContent};
use crate::error::{Error, ProviderError, ProviderErrorKind, Result};
use crate::message::{Message, MessageRole};
use crate::providers::{
    default_adapters, ProviderAdapter, ProviderKind, ProviderRequest, RawResponse,
};
use crate::router::{deployments_for, Deployment, DeploymentRouter, HealthTable, RouterOptions};
use crate::schema::{extract_json, CompiledSchema};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Gateway-level tuning
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Router knobs: cooldown window and latency buffer fraction
    pub router: RouterOptions,
    /// How many deployments a request may burn through before giving up
    pub max_failover_attempts: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            router: RouterOptions::default(),
            max_failover_attempts: 3,
        }
    }
}

/// Stateless request/response gateway over the registered provider adapters
///
/// The only cross-request state is the deployment health table; everything
/// else lives and dies with one `complete` call.
pub struct Orchestrator {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    health: Arc<HealthTable>,
    config: GatewayConfig,
}

impl Orchestrator {
    /// Create an orchestrator with the default adapter set
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_adapters(default_adapters(), config)
    }

    /// Create an orchestrator over an explicit adapter set
    #[must_use]
    pub fn with_adapters(
        adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            adapters,
            health: Arc::new(HealthTable::new()),
            config,
        }
    }

    /// The shared health table (for inspection and tests)
    #[must_use]
    pub fn health(&self) -> Arc<HealthTable> {
        self.health.clone()
    }

    /// Run one completion end to end
    ///
    /// # Errors
    /// `NoAvailableDeployment` and `UnknownModel` are fatal; retriable
    /// provider failures fail over before surfacing; a `SchemaViolation`
    /// surfaces after one corrective retry.
    #[instrument(skip(self, request), fields(model = %request.model))]
    pub async fn complete(&self, request: CompletionRequest) -> Result<NormalizedResponse> {
        let router = DeploymentRouter::new(
            deployments_for(&request.credentials),
            self.health.clone(),
            self.config.router.clone(),
        );

        let schema = request.response_format.as_ref().map(|format| {
            CompiledSchema::compile(
                &format.json_schema.name,
                &format.json_schema.schema,
                format.json_schema.strict.unwrap_or(true),
            )
        });

        let mut excluded: HashSet<String> = HashSet::new();

        for attempt in 0..self.config.max_failover_attempts {
            let deployment = router.select(&request.model, &excluded)?;
            let adapter = self
                .adapters
                .get(&deployment.provider)
                .ok_or_else(|| Error::NotConfigured(deployment.provider.to_string()))?
                .clone();

            // Registry miss is fatal for the request, not a failover trigger
            let max_input = adapter.max_input_tokens(&deployment.model)?;

            let messages = budget::fit(
                request.messages.clone(),
                |m| adapter.count_tokens(&deployment.model, m),
                max_input as usize,
            );
            if messages.len() < request.messages.len() {
                debug!(
                    dropped = request.messages.len() - messages.len(),
                    "Trimmed conversation to fit input budget"
                );
            }

            let provider_request = ProviderRequest {
                messages,
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                timeout: request.timeout,
                tools: request.tools.clone(),
                structured: schema.clone(),
            };

            let started = Instant::now();
            match invoke_with_timeout(adapter.as_ref(), &deployment, &provider_request).await {
                Ok(raw) => {
                    router.report_success(&deployment, started.elapsed());
                    info!(
                        deployment = %deployment.id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Provider call succeeded"
                    );
                    return self
                        .finish(raw, schema.as_ref(), adapter.as_ref(), &deployment, &provider_request)
                        .await;
                }
                Err(err) if err.retriable() && attempt + 1 < self.config.max_failover_attempts => {
                    warn!(
                        deployment = %deployment.id,
                        kind = %err.kind,
                        "Provider call failed, cooling deployment and failing over"
                    );
                    router.report_failure(&deployment);
                    excluded.insert(deployment.id.clone());
                }
                Err(err) => {
                    if err.retriable() {
                        router.report_failure(&deployment);
                    }
                    return Err(Error::Provider(err));
                }
            }
        }

        Err(Error::NoAvailableDeployment(request.model.clone()))
    }

    /// Post-process a successful provider call: coerce and validate the
    /// structured answer when one was requested, with one repair attempt
    async fn finish(
        &self,
        raw: RawResponse,
        schema: Option<&CompiledSchema>,
        adapter: &dyn ProviderAdapter,
        deployment: &Deployment,
        provider_request: &ProviderRequest,
    ) -> Result<NormalizedResponse> {
        let Some(schema) = schema else {
            return Ok(normalized(raw, None));
        };

        let violation = match coerce_structured(schema, &raw) {
            Ok(value) => return Ok(normalized(raw, Some(value))),
            Err(err) => err,
        };

        warn!(schema = %schema.name, error = %violation, "Structured answer invalid, retrying once");

        let mut repair = provider_request.clone();
        repair
            .messages
            .push(Message::assistant(raw.content.clone()));
        repair.messages.push(Message::user(format!(
            "The previous reply was not valid: {violation}. \
             Respond again with only a JSON object conforming to the {} schema:\n{}",
            schema.name, schema.document
        )));

        let repaired = invoke_with_timeout(adapter, deployment, &repair).await?;
        match coerce_structured(schema, &repaired) {
            Ok(value) => Ok(normalized(repaired, Some(value))),
            Err(err) => Err(err),
        }
    }
}

/// Run the adapter call under the caller's timeout; expiry counts as a
/// retriable failure of that deployment
async fn invoke_with_timeout(
    adapter: &dyn ProviderAdapter,
    deployment: &Deployment,
    request: &ProviderRequest,
) -> std::result::Result<RawResponse, ProviderError> {
    match tokio::time::timeout(request.timeout, adapter.invoke(deployment, request)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::new(
            ProviderErrorKind::Timeout,
            format!("provider call exceeded {}s", request.timeout.as_secs()),
        )),
    }
}

/// Parse the answer text and validate it against the schema
fn coerce_structured(schema: &CompiledSchema, raw: &RawResponse) -> Result<serde_json::Value> {
    let value = extract_json(&raw.content)?;
    schema.conform(value)
}

fn normalized(raw: RawResponse, structured: Option<serde_json::Value>) -> NormalizedResponse {
    let content = match structured {
        Some(value) => ResponseContent::Structured {
            value,
            payload: raw.payload,
        },
        None => ResponseContent::Raw {
            payload: raw.payload,
        },
    };
    NormalizedResponse {
        role: MessageRole::Assistant,
        content,
        usage: raw.usage,
        model: raw.model,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{JsonSchemaFormat, ResponseFormat};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted adapter: pops one outcome per invocation and records the
    /// requests it saw
    struct MockAdapter {
        kind: ProviderKind,
        script: Mutex<Vec<std::result::Result<RawResponse, ProviderError>>>,
        seen: Mutex<Vec<ProviderRequest>>,
    }

    impl MockAdapter {
        fn new(
            kind: ProviderKind,
            script: Vec<std::result::Result<RawResponse, ProviderError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: Mutex::new(script),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn invocations(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl ProviderAdapter for MockAdapter {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn invoke(
            &self,
            _deployment: &Deployment,
            request: &ProviderRequest,
        ) -> std::result::Result<RawResponse, ProviderError> {
            self.seen.lock().unwrap().push(request.clone());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(ProviderError::new(ProviderErrorKind::Server, "script empty"));
            }
            script.remove(0)
        }
    }

    fn answer(text: &str) -> std::result::Result<RawResponse, ProviderError> {
        Ok(RawResponse {
            content: text.to_string(),
            payload: json!({"content": text}),
            usage: None,
            model: "gpt-4o".to_string(),
        })
    }

    fn failure(kind: ProviderErrorKind) -> std::result::Result<RawResponse, ProviderError> {
        Err(ProviderError::new(kind, "scripted failure"))
    }

    fn orchestrator_with(
        adapters: Vec<Arc<MockAdapter>>,
    ) -> Orchestrator {
        let map: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = adapters
            .into_iter()
            .map(|a| (a.kind(), a as Arc<dyn ProviderAdapter>))
            .collect();
        Orchestrator::with_adapters(map, GatewayConfig::default())
    }

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest::new(model, vec![Message::user("Hello")])
            .with_credential("openai", "sk-test")
            .with_credential("azure", "azure-key")
            .with_credential("azure_endpoint", "https://example.openai.azure.com")
            .with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_complete_returns_raw_payload() {
        let openai = MockAdapter::new(ProviderKind::OpenAi, vec![answer("Hi there")]);
        let azure = MockAdapter::new(ProviderKind::Azure, vec![answer("Hi from azure")]);
        let orchestrator = orchestrator_with(vec![openai, azure]);

        let response = orchestrator.complete(request("gpt-4o")).await.unwrap();
        assert_eq!(response.role, MessageRole::Assistant);
        assert!(matches!(response.content, ResponseContent::Raw { .. }));
    }

    #[tokio::test]
    async fn test_failover_to_second_deployment() {
        // Azure fails retriably; the openai deployment of the same logical
        // model answers
        let openai = MockAdapter::new(ProviderKind::OpenAi, vec![answer("recovered")]);
        let azure = MockAdapter::new(ProviderKind::Azure, vec![failure(ProviderErrorKind::Server)]);
        let orchestrator = orchestrator_with(vec![openai.clone(), azure.clone()]);

        // Seed latencies so selection deterministically prefers azure first:
        // openai sits far outside the near-best buffer band
        let catalog = deployments_for(&request("gpt-4o").credentials);
        let azure_deployment = catalog
            .iter()
            .find(|d| d.provider == ProviderKind::Azure)
            .unwrap();
        let openai_deployment = catalog
            .iter()
            .find(|d| d.logical_model == "gpt-4o" && d.provider == ProviderKind::OpenAi)
            .unwrap();
        let health = orchestrator.health();
        health.record_latency(&azure_deployment.id, Duration::from_millis(100));
        health.record_latency(&openai_deployment.id, Duration::from_secs(2));

        let response = orchestrator.complete(request("gpt-4o")).await.unwrap();
        assert!(matches!(response.content, ResponseContent::Raw { .. }));
        assert_eq!(azure.invocations(), 1);
        assert_eq!(openai.invocations(), 1);

        // The failed deployment is cooling for subsequent requests
        assert!(health.is_cooling(&azure_deployment.id));
        assert!(!health.is_cooling(&openai_deployment.id));
    }

    #[tokio::test]
    async fn test_non_retriable_error_surfaces_immediately() {
        let openai = MockAdapter::new(
            ProviderKind::OpenAi,
            vec![failure(ProviderErrorKind::Auth)],
        );
        let orchestrator = orchestrator_with(vec![openai.clone()]);

        let mut req = request("gpt-4");
        req.credentials.remove("azure");
        let err = orchestrator.complete(req).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provider(ProviderError {
                kind: ProviderErrorKind::Auth,
                ..
            })
        ));
        assert_eq!(openai.invocations(), 1);
    }

    #[tokio::test]
    async fn test_no_available_deployment_for_unknown_logical_model() {
        let openai = MockAdapter::new(ProviderKind::OpenAi, vec![]);
        let orchestrator = orchestrator_with(vec![openai]);

        let err = orchestrator.complete(request("mystery-model")).await.unwrap_err();
        assert!(matches!(err, Error::NoAvailableDeployment(_)));
    }

    #[tokio::test]
    async fn test_unknown_model_is_fatal_not_retried() {
        struct UnknownModelAdapter;
        #[async_trait::async_trait]
        impl ProviderAdapter for UnknownModelAdapter {
            fn kind(&self) -> ProviderKind {
                ProviderKind::OpenAi
            }
            fn max_input_tokens(&self, model: &str) -> Result<u32> {
                Err(Error::UnknownModel(model.to_string()))
            }
            async fn invoke(
                &self,
                _deployment: &Deployment,
                _request: &ProviderRequest,
            ) -> std::result::Result<RawResponse, ProviderError> {
                panic!("must not be invoked when the model is unknown");
            }
        }

        let map: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::from([(
            ProviderKind::OpenAi,
            Arc::new(UnknownModelAdapter) as Arc<dyn ProviderAdapter>,
        )]);
        let orchestrator = Orchestrator::with_adapters(map, GatewayConfig::default());

        let mut req = request("gpt-4");
        req.credentials.remove("azure");
        let err = orchestrator.complete(req).await.unwrap_err();
        assert!(matches!(err, Error::UnknownModel(_)));
    }

    #[tokio::test]
    async fn test_structured_answer_validated() {
        let schema = json!({
            "type": "object",
            "required": ["answer"],
            "properties": {"answer": {"type": "string"}}
        });
        let openai = MockAdapter::new(
            ProviderKind::OpenAi,
            vec![answer(r#"{"answer": "forty-two"}"#)],
        );
        let orchestrator = orchestrator_with(vec![openai]);

        let mut req = request("gpt-4");
        req.credentials.remove("azure");
        req.response_format = Some(ResponseFormat {
            json_schema: JsonSchemaFormat {
                name: "Answer".to_string(),
                schema,
                strict: None,
            },
        });

        let response = orchestrator.complete(req).await.unwrap();
        let value = response.content.structured_value().unwrap();
        assert_eq!(value["answer"], "forty-two");
    }

    #[tokio::test]
    async fn test_schema_violation_repaired_once() {
        let schema = json!({
            "type": "object",
            "required": ["answer"],
            "properties": {"answer": {"type": "string"}}
        });
        let openai = MockAdapter::new(
            ProviderKind::OpenAi,
            vec![
                answer(r#"{"answer": 42}"#),
                answer(r#"{"answer": "forty-two"}"#),
            ],
        );
        let orchestrator = orchestrator_with(vec![openai.clone()]);

        let mut req = request("gpt-4");
        req.credentials.remove("azure");
        req.response_format = Some(ResponseFormat {
            json_schema: JsonSchemaFormat {
                name: "Answer".to_string(),
                schema,
                strict: None,
            },
        });

        let response = orchestrator.complete(req).await.unwrap();
        assert_eq!(openai.invocations(), 2);
        let value = response.content.structured_value().unwrap();
        assert_eq!(value["answer"], "forty-two");

        // The corrective follow-up carried the violation and the schema
        let seen = openai.seen.lock().unwrap();
        let repair = &seen[1];
        let last = repair.messages.last().unwrap();
        assert_eq!(last.role, MessageRole::User);
        assert!(last.content.contains("Answer"));
    }

    #[tokio::test]
    async fn test_schema_violation_surfaces_after_one_repair() {
        let schema = json!({
            "type": "object",
            "required": ["answer"],
            "properties": {"answer": {"type": "string"}}
        });
        let openai = MockAdapter::new(
            ProviderKind::OpenAi,
            vec![answer(r#"{"answer": 42}"#), answer(r#"{"answer": 43}"#)],
        );
        let orchestrator = orchestrator_with(vec![openai.clone()]);

        let mut req = request("gpt-4");
        req.credentials.remove("azure");
        req.response_format = Some(ResponseFormat {
            json_schema: JsonSchemaFormat {
                name: "Answer".to_string(),
                schema,
                strict: None,
            },
        });

        let err = orchestrator.complete(req).await.unwrap_err();
        assert!(matches!(err, Error::SchemaViolation { .. }));
        assert_eq!(openai.invocations(), 2);
    }

    #[tokio::test]
    async fn test_budget_trim_applied_before_invoke() {
        struct TinyBudgetAdapter {
            inner: Arc<MockAdapter>,
        }
        #[async_trait::async_trait]
        impl ProviderAdapter for TinyBudgetAdapter {
            fn kind(&self) -> ProviderKind {
                ProviderKind::OpenAi
            }
            fn count_tokens(&self, _model: &str, messages: &[Message]) -> usize {
                messages.len() * 100
            }
            fn max_input_tokens(&self, _model: &str) -> Result<u32> {
                Ok(250)
            }
            async fn invoke(
                &self,
                deployment: &Deployment,
                request: &ProviderRequest,
            ) -> std::result::Result<RawResponse, ProviderError> {
                self.inner.invoke(deployment, request).await
            }
        }

        let inner = MockAdapter::new(ProviderKind::OpenAi, vec![answer("ok")]);
        let map: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::from([(
            ProviderKind::OpenAi,
            Arc::new(TinyBudgetAdapter {
                inner: inner.clone(),
            }) as Arc<dyn ProviderAdapter>,
        )]);
        let orchestrator = Orchestrator::with_adapters(map, GatewayConfig::default());

        let mut req = request("gpt-4");
        req.credentials.remove("azure");
        req.messages = vec![
            Message::user("one"),
            Message::assistant("1"),
            Message::user("two"),
            Message::assistant("2"),
            Message::user("three"),
        ];

        orchestrator.complete(req).await.unwrap();
        let seen = inner.seen.lock().unwrap();
        // 5 messages at 100 tokens each against a 250 budget: trimmed to
        // start at a later user turn
        assert!(seen[0].messages.len() < 5);
        assert_eq!(seen[0].messages[0].role, MessageRole::User);
    }
}
