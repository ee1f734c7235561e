//! Two-tier idempotency lookup for inbound events.
//!
//! The fast tier is an in-process TTL cache holding the response payload
//! of recently processed events; it absorbs the common rapid-retry burst
//! from the sender. The durable tier is the `webhook_events` table, which
//! remains the authority: a cache miss proves nothing, and the unique
//! key constraint (not this cache) arbitrates concurrent duplicates.

use std::{sync::Arc, time::Duration};

use breakwater_core::error::Result;
use moka::future::Cache;
use serde_json::Value;

use crate::store::WebhookStore;

/// Two-tier (cache + durable) idempotency store.
#[derive(Clone)]
pub struct IdempotencyStore {
    cache: Cache<String, Value>,
    store: Arc<dyn WebhookStore>,
}

impl IdempotencyStore {
    /// Creates a store with the given cache capacity and entry TTL.
    pub fn new(store: Arc<dyn WebhookStore>, max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).time_to_live(ttl).build();

        Self { cache, store }
    }

    /// Looks up the prior outcome for an idempotency key.
    ///
    /// Checks the cache first; on miss, consults the durable store for an
    /// event whose processing already completed and re-caches the
    /// already-processed response.
    ///
    /// # Errors
    ///
    /// Propagates durable-store failures; the caller treats these as
    /// persistence errors.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(hit) = self.cache.get(key).await {
            return Ok(Some(hit));
        }

        let Some(event) = self.store.find_event_by_key(key.to_string()).await? else {
            return Ok(None);
        };

        if event.processed_at.is_none() {
            return Ok(None);
        }

        let response = serde_json::json!({
            "status": "already_processed",
            "event_id": event.id,
        });
        self.cache.insert(key.to_string(), response.clone()).await;

        Ok(Some(response))
    }

    /// Caches the response for a freshly processed event.
    pub async fn record(&self, key: &str, response: Value) {
        self.cache.insert(key.to_string(), response).await;
    }
}
