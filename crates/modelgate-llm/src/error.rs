//! Error types for modelgate-llm

use std::fmt;
use thiserror::Error;

/// Gateway error type
#[derive(Debug, Error)]
pub enum Error {
    /// Every deployment for a logical model is unhealthy or excluded
    #[error("no available deployment for model: {0}")]
    NoAvailableDeployment(String),

    /// No registry entry for the concrete provider model
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Provider call failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Structured output did not conform to the requested schema
    #[error("schema violation at {path}: {reason}")]
    SchemaViolation {
        /// Path of the offending field (e.g. `changed_files[0].content`)
        path: String,
        /// What went wrong at that path
        reason: String,
    },

    /// Provider returned something we could not interpret
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Provider adapter not configured
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl Error {
    /// Short classification name for structured error payloads
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoAvailableDeployment(_) => "no_available_deployment",
            Self::UnknownModel(_) => "unknown_model",
            Self::Provider(_) => "provider_error",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::InvalidResponse(_) => "invalid_response",
            Self::NotConfigured(_) => "not_configured",
        }
    }

    pub(crate) fn schema_violation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by a provider adapter
#[derive(Debug, Error)]
#[error("{kind} error: {message}")]
pub struct ProviderError {
    /// Failure classification
    pub kind: ProviderErrorKind,
    /// Sanitized description
    pub message: String,
}

impl ProviderError {
    /// Create a new provider error
    #[must_use]
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether failover to another deployment makes sense
    #[must_use]
    pub fn retriable(&self) -> bool {
        self.kind.retriable()
    }
}

/// Classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The call did not return within the caller's timeout
    Timeout,
    /// The provider rejected the call for rate/quota reasons
    RateLimit,
    /// The provider reported a 5xx-class failure
    Server,
    /// Authentication was rejected
    Auth,
    /// The provider rejected the request shape
    BadRequest,
    /// Transport-level failure before an HTTP status was seen
    Network,
}

impl ProviderErrorKind {
    /// Retriable kinds trigger deployment failover; the rest surface immediately
    #[must_use]
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimit | Self::Server | Self::Network
        )
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::RateLimit => "rate limit",
            Self::Server => "server",
            Self::Auth => "authentication",
            Self::BadRequest => "bad request",
            Self::Network => "network",
        };
        f.write_str(name)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
