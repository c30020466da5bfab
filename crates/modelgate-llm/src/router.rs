//! Deployment routing
//!
//! A logical model name maps to one or more concrete deployments (provider +
//! credential + endpoint). The router picks the historically fastest healthy
//! deployment, with a randomized near-best buffer so traffic spreads instead
//! of herding onto one backend. Deployments that fail are put into cooldown
//! and excluded from selection until the window expires.
//!
//! The catalog is credential-scoped and rebuilt per request; the health and
//! latency table is process-wide and shared across routers.

use crate::error::{Error, Result};
use crate::providers::ProviderKind;
use crate::util::mask_api_key;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Azure OpenAI API version the gateway pins
pub const AZURE_API_VERSION: &str = "2024-08-01-preview";

/// EWMA smoothing factor for latency estimates
const LATENCY_EWMA_ALPHA: f64 = 0.3;

/// A concrete binding of a logical model name to a provider endpoint
#[derive(Clone)]
pub struct Deployment {
    /// Stable key for the health table
    pub id: String,
    /// Caller-facing model name this deployment serves
    pub logical_model: String,
    /// Which adapter dispatches to it
    pub provider: ProviderKind,
    /// Provider-specific model identifier
    pub model: String,
    /// Credential for this deployment
    pub api_key: String,
    /// Endpoint override (Azure resource endpoint, proxy base URL)
    pub endpoint: Option<String>,
}

impl Deployment {
    fn new(
        logical_model: &str,
        provider: ProviderKind,
        model: &str,
        api_key: &str,
        endpoint: Option<&str>,
    ) -> Self {
        Self {
            id: match endpoint {
                Some(endpoint) => format!("{provider}:{model}@{endpoint}"),
                None => format!("{provider}:{model}"),
            },
            logical_model: logical_model.to_string(),
            provider,
            model: model.to_string(),
            api_key: api_key.to_string(),
            endpoint: endpoint.map(str::to_string),
        }
    }
}

impl fmt::Debug for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deployment")
            .field("id", &self.id)
            .field("logical_model", &self.logical_model)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &mask_api_key(&self.api_key))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Build the deployment catalog for a credential bundle
///
/// Mirrors the gateway's supported matrix: an OpenAI key serves the GPT-4 and
/// o1 families plus a `gpt-4o` fallback; Azure credentials add a second,
/// preferred `gpt-4o` backend; an Anthropic key serves the Claude Sonnet
/// models. Providers whose credentials are absent contribute nothing.
#[must_use]
pub fn deployments_for(credentials: &HashMap<String, String>) -> Vec<Deployment> {
    let mut catalog = Vec::new();

    let credential = |name: &str| {
        credentials
            .get(name)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    };

    if let (Some(key), Some(endpoint)) = (credential("azure"), credential("azure_endpoint")) {
        catalog.push(Deployment::new(
            "gpt-4o",
            ProviderKind::Azure,
            "gpt-4o",
            key,
            Some(endpoint),
        ));
    }

    if let Some(key) = credential("openai") {
        for model in ["gpt-4", "o1", "o1-preview", "o1-mini", "gpt-4o"] {
            catalog.push(Deployment::new(model, ProviderKind::OpenAi, model, key, None));
        }
    }

    if let Some(key) = credential("anthropic") {
        catalog.push(Deployment::new(
            "claude-3-5-sonnet",
            ProviderKind::Anthropic,
            "claude-3-5-sonnet-20240620",
            key,
            None,
        ));
        catalog.push(Deployment::new(
            "claude-3-7-sonnet",
            ProviderKind::Anthropic,
            "claude-3-7-sonnet-20250219",
            key,
            None,
        ));
    }

    catalog
}

#[derive(Debug, Default, Clone)]
struct HealthState {
    cooling_until: Option<Instant>,
    latency_secs: Option<f64>,
}

/// Process-wide deployment health and latency table
///
/// Written on failure and after each successful call, read by every request.
/// A cooldown write races harmlessly with a read that observes the pre- or
/// post-update state.
#[derive(Default)]
pub struct HealthTable {
    inner: RwLock<HashMap<String, HealthState>>,
}

impl HealthTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the deployment is currently cooling down
    #[must_use]
    pub fn is_cooling(&self, deployment_id: &str) -> bool {
        self.inner
            .read()
            .expect("health table lock poisoned")
            .get(deployment_id)
            .and_then(|state| state.cooling_until)
            .is_some_and(|until| until > Instant::now())
    }

    /// Put a deployment into cooldown after an attributable failure
    pub fn mark_failure(&self, deployment_id: &str, cooldown: Duration) {
        let mut table = self.inner.write().expect("health table lock poisoned");
        let state = table.entry(deployment_id.to_string()).or_default();
        state.cooling_until = Some(Instant::now() + cooldown);
    }

    /// Fold an observed call latency into the deployment's rolling estimate
    pub fn record_latency(&self, deployment_id: &str, elapsed: Duration) {
        let observed = elapsed.as_secs_f64();
        let mut table = self.inner.write().expect("health table lock poisoned");
        let state = table.entry(deployment_id.to_string()).or_default();
        state.latency_secs = Some(match state.latency_secs {
            Some(current) => current + LATENCY_EWMA_ALPHA * (observed - current),
            None => observed,
        });
        // A successful call ends any cooldown early
        state.cooling_until = None;
    }

    /// Rolling latency estimate in seconds, if any call has completed
    #[must_use]
    pub fn latency(&self, deployment_id: &str) -> Option<f64> {
        self.inner
            .read()
            .expect("health table lock poisoned")
            .get(deployment_id)
            .and_then(|state| state.latency_secs)
    }
}

/// Router tuning knobs
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// How long a failed deployment stays excluded
    pub cooldown: Duration,
    /// Fraction above the best latency still considered near-best; negative
    /// values behave as zero
    pub latency_buffer: f64,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(3600),
            latency_buffer: 0.5,
        }
    }
}

/// Latency-aware deployment selector over a credential-scoped catalog
pub struct DeploymentRouter {
    catalog: Vec<Deployment>,
    health: Arc<HealthTable>,
    options: RouterOptions,
}

impl DeploymentRouter {
    /// Create a router over a catalog, sharing the process-wide health table
    #[must_use]
    pub fn new(catalog: Vec<Deployment>, health: Arc<HealthTable>, options: RouterOptions) -> Self {
        Self {
            catalog,
            health,
            options,
        }
    }

    /// The cooldown window failed deployments are excluded for
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.options.cooldown
    }

    /// Select a deployment for a logical model
    ///
    /// Deployments in `excluded` or in cooldown are never returned. Among the
    /// healthy candidates the lowest-latency one wins, with everything within
    /// the buffer fraction of the best treated as a tie broken at random.
    ///
    /// # Errors
    /// Returns [`Error::NoAvailableDeployment`] when no candidate remains.
    pub fn select(&self, logical_model: &str, excluded: &HashSet<String>) -> Result<Deployment> {
        let candidates: Vec<&Deployment> = self
            .catalog
            .iter()
            .filter(|d| d.logical_model == logical_model)
            .filter(|d| !excluded.contains(&d.id))
            .filter(|d| !self.health.is_cooling(&d.id))
            .collect();

        if candidates.is_empty() {
            return Err(Error::NoAvailableDeployment(logical_model.to_string()));
        }

        // Unmeasured deployments count as zero latency so new backends get
        // traffic before estimates exist
        let latencies: Vec<f64> = candidates
            .iter()
            .map(|d| self.health.latency(&d.id).unwrap_or(0.0))
            .collect();
        let best = latencies.iter().copied().fold(f64::INFINITY, f64::min);
        // A negative buffer would put the threshold below the best latency
        // and empty the band; treat it as zero
        let threshold = best * (1.0 + self.options.latency_buffer.max(0.0));

        let near_best: Vec<&Deployment> = candidates
            .iter()
            .zip(latencies.iter())
            .filter(|(_, &latency)| latency <= threshold)
            .map(|(d, _)| *d)
            .collect();

        let pick = if near_best.len() > 1 {
            rand::thread_rng().gen_range(0..near_best.len())
        } else {
            0
        };
        Ok(near_best[pick].clone())
    }

    /// Record an attributable failure: cooldown plus exclusion for this request
    pub fn report_failure(&self, deployment: &Deployment) {
        self.health.mark_failure(&deployment.id, self.options.cooldown);
    }

    /// Record a successful call's latency
    pub fn report_success(&self, deployment: &Deployment, elapsed: Duration) {
        self.health.record_latency(&deployment.id, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_credentials() -> HashMap<String, String> {
        HashMap::from([
            ("openai".to_string(), "sk-openai".to_string()),
            ("azure".to_string(), "azure-key".to_string()),
            (
                "azure_endpoint".to_string(),
                "https://example.openai.azure.com".to_string(),
            ),
            ("anthropic".to_string(), "sk-ant".to_string()),
        ])
    }

    fn router_with(credentials: &HashMap<String, String>) -> (DeploymentRouter, Arc<HealthTable>) {
        let health = Arc::new(HealthTable::new());
        let router = DeploymentRouter::new(
            deployments_for(credentials),
            health.clone(),
            RouterOptions::default(),
        );
        (router, health)
    }

    #[test]
    fn test_catalog_redundant_gpt_4o() {
        let catalog = deployments_for(&test_credentials());
        let gpt_4o: Vec<&Deployment> = catalog
            .iter()
            .filter(|d| d.logical_model == "gpt-4o")
            .collect();
        assert_eq!(gpt_4o.len(), 2);
        assert_eq!(gpt_4o[0].provider, ProviderKind::Azure);
        assert_eq!(gpt_4o[1].provider, ProviderKind::OpenAi);
    }

    #[test]
    fn test_catalog_skips_missing_credentials() {
        let credentials = HashMap::from([("anthropic".to_string(), "sk-ant".to_string())]);
        let catalog = deployments_for(&credentials);
        assert!(catalog.iter().all(|d| d.provider == ProviderKind::Anthropic));
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_catalog_azure_requires_endpoint() {
        let credentials = HashMap::from([("azure".to_string(), "azure-key".to_string())]);
        assert!(deployments_for(&credentials).is_empty());
    }

    #[test]
    fn test_select_unknown_model() {
        let (router, _) = router_with(&test_credentials());
        let err = router.select("gpt-9000", &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::NoAvailableDeployment(_)));
    }

    #[test]
    fn test_select_skips_cooling_deployment() {
        let (router, health) = router_with(&test_credentials());

        // First gpt-4o deployment (azure) marked unavailable
        let catalog = deployments_for(&test_credentials());
        let azure = catalog
            .iter()
            .find(|d| d.logical_model == "gpt-4o" && d.provider == ProviderKind::Azure)
            .unwrap();
        health.mark_failure(&azure.id, Duration::from_secs(3600));

        let selected = router.select("gpt-4o", &HashSet::new()).unwrap();
        assert_eq!(selected.provider, ProviderKind::OpenAi);

        // Repeated selections never return the cooling deployment
        for _ in 0..20 {
            let selected = router.select("gpt-4o", &HashSet::new()).unwrap();
            assert_ne!(selected.id, azure.id);
        }
    }

    #[test]
    fn test_select_all_excluded_fails() {
        let (router, _) = router_with(&test_credentials());
        let excluded: HashSet<String> = deployments_for(&test_credentials())
            .iter()
            .filter(|d| d.logical_model == "gpt-4o")
            .map(|d| d.id.clone())
            .collect();
        let err = router.select("gpt-4o", &excluded).unwrap_err();
        assert!(matches!(err, Error::NoAvailableDeployment(_)));
    }

    #[test]
    fn test_select_prefers_lower_latency() {
        let (router, health) = router_with(&test_credentials());
        let catalog = deployments_for(&test_credentials());
        let azure = &catalog[0];
        let openai = catalog
            .iter()
            .find(|d| d.logical_model == "gpt-4o" && d.provider == ProviderKind::OpenAi)
            .unwrap();

        // Azure is slow, OpenAI fast and well outside the buffer band
        health.record_latency(&azure.id, Duration::from_secs(10));
        health.record_latency(&openai.id, Duration::from_millis(200));

        for _ in 0..20 {
            let selected = router.select("gpt-4o", &HashSet::new()).unwrap();
            assert_eq!(selected.id, openai.id);
        }
    }

    #[test]
    fn test_select_negative_buffer_still_picks_best() {
        let health = Arc::new(HealthTable::new());
        let router = DeploymentRouter::new(
            deployments_for(&test_credentials()),
            health.clone(),
            RouterOptions {
                cooldown: Duration::from_secs(3600),
                latency_buffer: -1.0,
            },
        );

        let catalog = deployments_for(&test_credentials());
        let azure = &catalog[0];
        let openai = catalog
            .iter()
            .find(|d| d.logical_model == "gpt-4o" && d.provider == ProviderKind::OpenAi)
            .unwrap();
        health.record_latency(&azure.id, Duration::from_millis(100));
        health.record_latency(&openai.id, Duration::from_secs(2));

        // Both deployments measured: a band emptied by the negative buffer
        // would leave nothing to pick from
        for _ in 0..20 {
            let selected = router.select("gpt-4o", &HashSet::new()).unwrap();
            assert_eq!(selected.id, azure.id);
        }
    }

    #[test]
    fn test_cooldown_expires() {
        let health = HealthTable::new();
        health.mark_failure("dep", Duration::from_millis(0));
        // Zero-length cooldown is already over
        assert!(!health.is_cooling("dep"));

        health.mark_failure("dep", Duration::from_secs(3600));
        assert!(health.is_cooling("dep"));
    }

    #[test]
    fn test_success_clears_cooldown() {
        let health = HealthTable::new();
        health.mark_failure("dep", Duration::from_secs(3600));
        health.record_latency("dep", Duration::from_millis(100));
        assert!(!health.is_cooling("dep"));
        assert!(health.latency("dep").is_some());
    }

    #[test]
    fn test_latency_ewma_moves_toward_observations() {
        let health = HealthTable::new();
        health.record_latency("dep", Duration::from_secs(1));
        let first = health.latency("dep").unwrap();
        assert!((first - 1.0).abs() < 1e-9);

        health.record_latency("dep", Duration::from_secs(3));
        let second = health.latency("dep").unwrap();
        assert!(second > first);
        assert!(second < 3.0);
    }

    #[test]
    fn test_deployment_debug_masks_key() {
        let deployment = Deployment::new(
            "gpt-4o",
            ProviderKind::OpenAi,
            "gpt-4o",
            "sk-1234567890abcdef",
            None,
        );
        let debug = format!("{:?}", deployment);
        assert!(!debug.contains("34567890abcd"));
    }
}
