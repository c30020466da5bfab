//! Model limits registry
//!
//! Maps concrete provider model identifiers to the maximum input-token count
//! they accept. The table is authoritative for the models the gateway routes
//! to; lookups are cached for the process lifetime. A miss is fatal for the
//! request (`UnknownModel`), never retried.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Maximum input tokens per canonical model identifier
const MODEL_MAX_INPUT_TOKENS: &[(&str, u32)] = &[
    ("gpt-4o", 128_000),
    ("gpt-4", 8_192),
    ("o1", 200_000),
    ("o1-preview", 128_000),
    ("o1-mini", 128_000),
    ("claude-3-5-sonnet-20240620", 200_000),
    ("claude-3-7-sonnet-20250219", 200_000),
];

lazy_static::lazy_static! {
    /// Process-lifetime lookup cache, append-only
    static ref LIMIT_CACHE: RwLock<HashMap<String, u32>> = RwLock::new(HashMap::new());
}

/// Normalize a model name to the canonical identifier the registry knows
///
/// Deployment model identifiers carry provider prefixes and version suffixes
/// (`azure/gpt-4o`, `claude-3-5-sonnet-v2@20241022`); substring matching
/// collapses them onto one registry entry. Longer, more specific patterns are
/// checked first.
#[must_use]
pub fn canonical_model_id(model: &str) -> &str {
    const PATTERNS: &[(&str, &str)] = &[
        ("claude-3-5-sonnet", "claude-3-5-sonnet-20240620"),
        ("claude-3-7-sonnet", "claude-3-7-sonnet-20250219"),
        ("gpt-4o", "gpt-4o"),
        ("gpt-4", "gpt-4"),
        ("o1-preview", "o1-preview"),
        ("o1-mini", "o1-mini"),
        ("o1", "o1"),
    ];
    for (pattern, canonical) in PATTERNS {
        if model.contains(pattern) {
            return canonical;
        }
    }
    model
}

/// Look up the maximum input tokens for a concrete model identifier
///
/// # Errors
/// Returns [`Error::UnknownModel`] when the registry has no entry.
pub fn max_input_tokens(model: &str) -> Result<u32> {
    let canonical = canonical_model_id(model);

    if let Some(&limit) = LIMIT_CACHE
        .read()
        .expect("limit cache lock poisoned")
        .get(canonical)
    {
        return Ok(limit);
    }

    let limit = MODEL_MAX_INPUT_TOKENS
        .iter()
        .find(|(id, _)| *id == canonical)
        .map(|(_, limit)| *limit)
        .ok_or_else(|| Error::UnknownModel(model.to_string()))?;

    LIMIT_CACHE
        .write()
        .expect("limit cache lock poisoned")
        .insert(canonical.to_string(), limit);

    Ok(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_model_id() {
        assert_eq!(canonical_model_id("gpt-4o"), "gpt-4o");
        assert_eq!(canonical_model_id("azure/gpt-4o"), "gpt-4o");
        assert_eq!(canonical_model_id("gpt-4"), "gpt-4");
        assert_eq!(canonical_model_id("o1-mini"), "o1-mini");
        assert_eq!(canonical_model_id("o1-preview"), "o1-preview");
        assert_eq!(
            canonical_model_id("claude-3-5-sonnet-v2@20241022"),
            "claude-3-5-sonnet-20240620"
        );
        assert_eq!(
            canonical_model_id("claude-3-7-sonnet@20250219"),
            "claude-3-7-sonnet-20250219"
        );
    }

    #[test]
    fn test_max_input_tokens_known() {
        assert_eq!(max_input_tokens("gpt-4o").unwrap(), 128_000);
        assert_eq!(max_input_tokens("gpt-4").unwrap(), 8_192);
        assert_eq!(
            max_input_tokens("claude-3-5-sonnet-20240620").unwrap(),
            200_000
        );
        // Second lookup hits the cache
        assert_eq!(max_input_tokens("gpt-4o").unwrap(), 128_000);
    }

    #[test]
    fn test_max_input_tokens_unknown_model() {
        let err = max_input_tokens("made-up-model-9000").unwrap_err();
        assert!(matches!(err, Error::UnknownModel(_)));
    }
}
