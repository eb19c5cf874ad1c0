//! TTL-bounded result cache keyed by request shape hash.

use std::sync::Arc;

use arw_core::{CacheEntry, RequestShape};
use serde_json::Value;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::store::CacheStore;

/// TTL-bounded memo of computed payloads keyed by request shape.
///
/// Lookups never delete; expired rows stay until [`ResultCache::purge_expired`].
pub struct ResultCache<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: CacheStore> ResultCache<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The stored payload if an entry exists and `now < expires_at`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the store read fails.
    pub async fn lookup(&self, shape: &RequestShape) -> Result<Option<Value>, EngineError> {
        let Some(entry) = self.store.cache_entry(shape.hash()).await? else {
            tracing::debug!(shape_hash = %shape.hash(), "cache miss");
            return Ok(None);
        };

        if entry.is_live_at(self.clock.now()) {
            tracing::debug!(shape_hash = %shape.hash(), "cache hit");
            Ok(Some(entry.payload))
        } else {
            tracing::debug!(
                shape_hash = %shape.hash(),
                expires_at = %entry.expires_at,
                "cache entry expired"
            );
            Ok(None)
        }
    }

    /// Store `payload` for `shape`, expiring `ttl_hours` from now (one hour
    /// when `None`). Overwrites any previous entry for the same shape.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the write fails.
    pub async fn store(
        &self,
        shape: &RequestShape,
        payload: Value,
        ttl_hours: Option<u32>,
    ) -> Result<CacheEntry, EngineError> {
        let entry = CacheEntry::new(shape, payload, self.clock.now(), ttl_hours);
        self.store.put_cache_entry(&entry).await?;
        tracing::debug!(
            shape_hash = %entry.shape_hash,
            expires_at = %entry.expires_at,
            "cache entry stored"
        );
        Ok(entry)
    }

    /// Remove entries whose `expires_at` has been reached.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the delete fails.
    pub async fn purge_expired(&self) -> Result<u64, EngineError> {
        let removed = self.store.purge_cache_entries(self.clock.now()).await?;
        tracing::info!(removed, "expired cache entries purged");
        Ok(removed)
    }
}
