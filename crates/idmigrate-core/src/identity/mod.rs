//! Legacy identifier recognition and target identity resolution.
//!
//! The target identity system is reached through the [`IdentityProvider`]
//! capability. Each provider variant implements it directly and is chosen once,
//! when the resolver is built, from [`ProviderConfig`].

pub mod memory;
#[cfg(feature = "rest")]
pub mod rest;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, Result};

pub use memory::MemoryIdentityProvider;
#[cfg(feature = "rest")]
pub use rest::RestIdentityProvider;

/// Length of a legacy identifier.
pub const LEGACY_ID_LEN: usize = 28;

/// Whether `id` has the shape of a legacy identifier: exactly
/// [`LEGACY_ID_LEN`] ASCII alphanumeric characters.
pub fn is_legacy_format(id: &str) -> bool {
    id.len() == LEGACY_ID_LEN && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// An identity in the target identity system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Payload for creating a bare identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDraft {
    pub email: String,
}

/// Failures reported by an identity provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// No identity matches. The only outcome that triggers creation.
    #[error("identity not found")]
    NotFound,

    /// Transport-level failure.
    #[error("request failed: {0}")]
    Request(String),

    /// The provider answered with an error status.
    #[error("provider rejected request with status {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body or message.
        message: String,
    },

    /// The provider answered with something we could not interpret.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Capability interface of a target identity system.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &'static str;

    /// Look up an identity by email. Must return [`ProviderError::NotFound`]
    /// when no identity matches.
    async fn get_by_email(&self, email: &str) -> Result<Identity, ProviderError>;

    /// Create an identity carrying only the draft's fields.
    async fn create(&self, draft: &IdentityDraft) -> Result<Identity, ProviderError>;
}

/// Provider variant selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// HTTP user-management API.
    #[default]
    Rest,
    /// In-process provider for rehearsals.
    Memory,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Rest => write!(f, "rest"),
            ProviderKind::Memory => write!(f, "memory"),
        }
    }
}

/// Default identity API request timeout in seconds.
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Identity provider settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Base URL of the user-management API.
    pub endpoint: Option<String>,
    /// Bearer credential for the API.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Settings for the given provider kind with no endpoint.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            endpoint: None,
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        }
    }

    /// Set the API endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the configured provider.
    pub fn build(&self) -> Result<Arc<dyn IdentityProvider>> {
        match self.kind {
            ProviderKind::Memory => Ok(Arc::new(MemoryIdentityProvider::new())),
            #[cfg(feature = "rest")]
            ProviderKind::Rest => {
                let endpoint = self
                    .endpoint
                    .as_deref()
                    .filter(|e| !e.trim().is_empty())
                    .ok_or_else(|| {
                        Error::Config("identity provider endpoint is not configured".to_string())
                    })?;
                let api_key = self.api_key.as_deref().ok_or_else(|| {
                    Error::Config("identity provider API key is not configured".to_string())
                })?;
                Ok(Arc::new(RestIdentityProvider::new(
                    endpoint,
                    api_key,
                    self.timeout,
                )?))
            }
            #[cfg(not(feature = "rest"))]
            ProviderKind::Rest => Err(Error::Config(
                "built without the `rest` identity provider".to_string(),
            )),
        }
    }
}

/// Resolves emails to target identities, creating them when absent.
#[derive(Clone)]
pub struct IdentityResolver {
    provider: Arc<dyn IdentityProvider>,
}

impl IdentityResolver {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Name of the underlying provider.
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Return the target identity id for `email`, creating a bare identity if
    /// the provider reports none. Repeating the call for the same email returns
    /// the same id because lookup always precedes creation.
    pub async fn resolve_or_create(&self, email: &str) -> Result<String> {
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::Resolution {
                email: String::new(),
                source: ProviderError::InvalidResponse("legacy record has no email".to_string()),
            });
        }

        match self.provider.get_by_email(email).await {
            Ok(identity) => {
                tracing::debug!(email, new_id = %identity.id, "found existing identity");
                Ok(identity.id)
            }
            Err(ProviderError::NotFound) => {
                let draft = IdentityDraft {
                    email: email.to_string(),
                };
                let identity =
                    self.provider
                        .create(&draft)
                        .await
                        .map_err(|source| Error::Resolution {
                            email: email.to_string(),
                            source,
                        })?;
                tracing::info!(
                    email,
                    new_id = %identity.id,
                    provider = self.provider.name(),
                    "created identity"
                );
                Ok(identity.id)
            }
            Err(source) => Err(Error::Resolution {
                email: email.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_format() {
        assert!(is_legacy_format("aB3dE5gH7jK9mN1pQ3sT5vW7yZ01"));
        assert!(is_legacy_format("0000000000000000000000000000"));
        assert!(!is_legacy_format("not-legacy-shaped"));
        assert!(!is_legacy_format("aB3dE5gH7jK9mN1pQ3sT5vW7yZ0"));
        assert!(!is_legacy_format("aB3dE5gH7jK9mN1pQ3sT5vW7yZ012"));
        assert!(!is_legacy_format("aB3dE5gH7jK9mN1pQ3sT5vW7y_01"));
        assert!(!is_legacy_format(""));
    }

    #[test]
    fn test_multibyte_not_legacy() {
        // 28 bytes but only 14 characters
        assert!(!is_legacy_format("éééééééééééééé"));
    }

    #[tokio::test]
    async fn test_resolve_creates_once() {
        let provider = Arc::new(MemoryIdentityProvider::new());
        let resolver = IdentityResolver::new(provider.clone());

        let first = resolver.resolve_or_create("a@x.com").await.unwrap();
        let second = resolver.resolve_or_create("a@x.com").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.created_count(), 1);
        assert!(!is_legacy_format(&first));
    }

    #[tokio::test]
    async fn test_resolve_uses_existing_identity() {
        let provider = Arc::new(MemoryIdentityProvider::new());
        provider.insert("user_existing", "b@x.com");
        let resolver = IdentityResolver::new(provider.clone());

        let id = resolver.resolve_or_create("b@x.com").await.unwrap();
        assert_eq!(id, "user_existing");
        assert_eq!(provider.created_count(), 0);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_resolution_error() {
        let provider = Arc::new(MemoryIdentityProvider::new());
        provider.fail_lookups_for("c@x.com");
        let resolver = IdentityResolver::new(provider.clone());

        let err = resolver.resolve_or_create("c@x.com").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        assert_eq!(provider.created_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_email_rejected() {
        let resolver = IdentityResolver::new(Arc::new(MemoryIdentityProvider::new()));
        let err = resolver.resolve_or_create("  ").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[test]
    fn test_rest_requires_endpoint() {
        let err = ProviderConfig::new(ProviderKind::Rest)
            .with_api_key("sk_test")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_memory_provider_builds() {
        let provider = ProviderConfig::new(ProviderKind::Memory).build().unwrap();
        assert_eq!(provider.name(), "memory");
    }
}
