//! Azure OpenAI adapter
//!
//! Same wire family as OpenAI but authenticated against a per-resource
//! endpoint with an `api-key` header and a pinned API version; the deployment
//! name stands in for the model. The shared conversions live in
//! [`super::openai`].

use crate::error::{ProviderError, ProviderErrorKind};
use crate::providers::openai::{build_request, classify_error, normalize_response};
use crate::providers::{ProviderAdapter, ProviderKind, ProviderRequest, RawResponse};
use crate::router::{Deployment, AZURE_API_VERSION};
use async_openai::{config::AzureConfig, Client};
use tracing::{debug, instrument};

/// Azure OpenAI adapter
#[derive(Default)]
pub struct AzureAdapter;

impl AzureAdapter {
    /// Create a new adapter
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AzureAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    #[instrument(skip(self, deployment, request), fields(model = %deployment.model))]
    async fn invoke(
        &self,
        deployment: &Deployment,
        request: &ProviderRequest,
    ) -> Result<RawResponse, ProviderError> {
        let endpoint = deployment.endpoint.as_ref().ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::BadRequest,
                "azure deployment missing endpoint",
            )
        })?;

        let config = AzureConfig::new()
            .with_api_base(endpoint)
            .with_api_key(&deployment.api_key)
            .with_api_version(AZURE_API_VERSION)
            .with_deployment_id(&deployment.model);
        let client = Client::with_config(config);

        let wire_request = build_request(deployment.model.clone(), request)?;

        debug!("Sending request to Azure OpenAI");
        let response = client
            .chat()
            .create(wire_request)
            .await
            .map_err(classify_error)?;

        normalize_response(response)
    }
}
