//! Durable legacy → target identity mappings.
//!
//! The mapping table is the idempotence anchor of the engine: the user phase
//! writes it, and every later phase reads a [`MappingCache`] built from it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::identity::is_legacy_format;
use crate::model::IdentityMapping;
use crate::store::{MigrationStore, StoreError, StoreTransaction};

/// Access to the mapping table.
#[derive(Clone)]
pub struct MappingStore {
    store: Arc<dyn MigrationStore>,
}

impl MappingStore {
    pub fn new(store: Arc<dyn MigrationStore>) -> Self {
        Self { store }
    }

    /// Create the mapping table if needed. Safe to call on every run.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.store.ensure_mapping_table().await?;
        tracing::debug!("mapping table ready");
        Ok(())
    }

    /// Insert or update the mapping for `legacy_id` inside the caller's transaction.
    pub async fn upsert(
        &self,
        tx: &mut dyn StoreTransaction,
        legacy_id: &str,
        email: &str,
        new_id: &str,
    ) -> Result<(), StoreError> {
        tx.upsert_mapping(legacy_id, email, new_id).await
    }

    /// Look up a mapping by legacy id or email.
    pub async fn get(&self, identifier: &str) -> Result<IdentityMapping> {
        self.store
            .find_mapping(identifier.trim())
            .await?
            .ok_or_else(|| Error::NotFound(format!("no mapping for '{}'", identifier.trim())))
    }

    /// All mappings, most recent first.
    pub async fn list(&self) -> Result<Vec<IdentityMapping>> {
        Ok(self.store.list_mappings().await?)
    }

    /// Snapshot the mapping table into memory.
    pub async fn cache(&self) -> Result<MappingCache> {
        let mappings = self.list().await?;
        let cache = MappingCache::from_mappings(&mappings);
        tracing::info!(entries = cache.len(), "loaded mapping cache");
        Ok(cache)
    }
}

/// In-memory legacy id → new id lookup.
#[derive(Debug, Clone, Default)]
pub struct MappingCache {
    entries: HashMap<String, String>,
}

impl MappingCache {
    /// Build from mappings ordered most-recent first; the first entry per
    /// legacy id wins.
    pub fn from_mappings(mappings: &[IdentityMapping]) -> Self {
        let mut entries = HashMap::with_capacity(mappings.len());
        for mapping in mappings {
            entries
                .entry(mapping.legacy_id.clone())
                .or_insert_with(|| mapping.new_id.clone());
        }
        Self { entries }
    }

    /// Add or replace a single entry.
    pub fn insert(&mut self, legacy_id: impl Into<String>, new_id: impl Into<String>) {
        self.entries.insert(legacy_id.into(), new_id.into());
    }

    /// New id for a legacy-shaped, mapped identifier.
    pub fn lookup(&self, id: &str) -> Option<&str> {
        if !is_legacy_format(id) {
            return None;
        }
        self.entries.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    const LEGACY: &str = "aB3dE5gH7jK9mN1pQ3sT5vW7yZ01";

    fn mapping(legacy_id: &str, new_id: &str, age_secs: i64) -> IdentityMapping {
        let at = Utc::now() - Duration::seconds(age_secs);
        IdentityMapping {
            legacy_id: legacy_id.to_string(),
            email: "a@x.com".to_string(),
            new_id: new_id.to_string(),
            migrated_at: at,
            created_at: at,
        }
    }

    #[test]
    fn test_cache_first_entry_wins() {
        let cache = MappingCache::from_mappings(&[
            mapping(LEGACY, "user_new", 0),
            mapping(LEGACY, "user_old", 60),
        ]);
        assert_eq!(cache.lookup(LEGACY), Some("user_new"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_ignores_non_legacy_keys() {
        let mut cache = MappingCache::default();
        cache.insert("short", "user_1");
        assert_eq!(cache.lookup("short"), None);
    }

    #[tokio::test]
    async fn test_get_by_legacy_id_and_email() {
        let store = MemoryStore::new();
        let mappings = MappingStore::new(Arc::new(store.clone()));
        mappings.ensure_schema().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        mappings
            .upsert(tx.as_mut(), LEGACY, "a@x.com", "user_1")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let by_id = mappings.get(LEGACY).await.unwrap();
        let by_email = mappings.get("a@x.com").await.unwrap();
        assert_eq!(by_id, by_email);
        assert_eq!(by_id.new_id, "user_1");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let mappings = MappingStore::new(Arc::new(store));
        mappings.ensure_schema().await.unwrap();

        let err = mappings.get("nobody@x.com").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
