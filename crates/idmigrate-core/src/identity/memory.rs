//! In-process identity provider.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Identity, IdentityDraft, IdentityProvider, ProviderError};

#[derive(Default)]
struct Inner {
    by_email: HashMap<String, Identity>,
    failing_lookups: HashSet<String>,
    failing_creates: HashSet<String>,
    next_id: u64,
    created: usize,
}

/// Identity provider that keeps identities in memory.
///
/// Issued ids are `user_`-prefixed and therefore never legacy-shaped.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    inner: Mutex<Inner>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing identity.
    pub fn insert(&self, id: &str, email: &str) {
        self.inner.lock().by_email.insert(
            email.to_string(),
            Identity {
                id: id.to_string(),
                email: Some(email.to_string()),
            },
        );
    }

    /// Make lookups for `email` fail with a non-not-found error.
    pub fn fail_lookups_for(&self, email: &str) {
        self.inner.lock().failing_lookups.insert(email.to_string());
    }

    /// Make creation for `email` fail.
    pub fn fail_creates_for(&self, email: &str) {
        self.inner.lock().failing_creates.insert(email.to_string());
    }

    /// Number of identities created through [`IdentityProvider::create`].
    pub fn created_count(&self) -> usize {
        self.inner.lock().created
    }

    /// Number of identities known to the provider.
    pub fn len(&self) -> usize {
        self.inner.lock().by_email.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_by_email(&self, email: &str) -> Result<Identity, ProviderError> {
        let inner = self.inner.lock();
        if inner.failing_lookups.contains(email) {
            return Err(ProviderError::Rejected {
                status: 503,
                message: "lookup unavailable".to_string(),
            });
        }
        inner
            .by_email
            .get(email)
            .cloned()
            .ok_or(ProviderError::NotFound)
    }

    async fn create(&self, draft: &IdentityDraft) -> Result<Identity, ProviderError> {
        let mut inner = self.inner.lock();
        if inner.failing_creates.contains(&draft.email) {
            return Err(ProviderError::Rejected {
                status: 422,
                message: "email rejected".to_string(),
            });
        }
        if let Some(existing) = inner.by_email.get(&draft.email) {
            return Err(ProviderError::Rejected {
                status: 409,
                message: format!("identity {} already exists", existing.id),
            });
        }

        inner.next_id += 1;
        let identity = Identity {
            id: format!("user_{:024x}", inner.next_id),
            email: Some(draft.email.clone()),
        };
        inner.by_email.insert(draft.email.clone(), identity.clone());
        inner.created += 1;
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_lookup() {
        let provider = MemoryIdentityProvider::new();
        assert!(matches!(
            provider.get_by_email("a@x.com").await,
            Err(ProviderError::NotFound)
        ));

        let created = provider
            .create(&IdentityDraft {
                email: "a@x.com".to_string(),
            })
            .await
            .unwrap();
        let found = provider.get_by_email("a@x.com").await.unwrap();
        assert_eq!(created, found);
        assert!(created.id.starts_with("user_"));
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let provider = MemoryIdentityProvider::new();
        provider.insert("user_1", "a@x.com");
        let err = provider
            .create(&IdentityDraft {
                email: "a@x.com".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { status: 409, .. }));
    }
}
