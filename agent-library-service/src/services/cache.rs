//! Cache-aside reads over the shared key-value store.
//!
//! The cache never decides whether a request succeeds: an unreachable store
//! or an undecodable entry on read is a miss, and a failed write-back is
//! logged and dropped.
//!
//! Every cached key has a generation counter at `<key>:gen`. Invalidation
//! bumps it before deleting the entry, and a load only writes back if the
//! generation it started under is still current, so a load that raced a
//! write never reinstates the value from before that write.

use serde::{de::DeserializeOwned, Serialize};
use service_core::error::AppError;
use service_core::store::{CounterOp, KeyValueStore};
use std::future::Future;
use std::sync::Arc;

#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KeyValueStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                record("miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                record("error");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                record("hit");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                record("miss");
                None
            }
        }
    }

    pub async fn write<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<(), AppError> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key, &raw, Some(ttl_seconds)).await
    }

    pub async fn invalidate(&self, keys: &[&str]) -> Result<(), AppError> {
        let bumps: Vec<CounterOp> = keys
            .iter()
            .map(|key| CounterOp::incr(generation_key(key)))
            .collect();
        self.store.apply_atomic(&bumps).await?;
        self.store.delete(keys).await
    }

    /// Serve `key` from the cache, or run `loader` and store its result for
    /// `ttl_seconds`.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        key: &str,
        ttl_seconds: u64,
        loader: F,
    ) -> Result<T, AppError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        if let Some(cached) = self.read(key).await {
            tracing::debug!(key = %key, "Serving from cache");
            return Ok(cached);
        }

        let generation = match self.store.get(&generation_key(key)).await {
            Ok(generation) => Some(generation.unwrap_or_else(|| "0".to_string())),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache generation unreadable, skipping write-back");
                None
            }
        };

        let value = loader().await?;

        if let Some(generation) = generation {
            match self.write_back(key, &value, ttl_seconds, &generation).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(key = %key, "Invalidated during load, not caching");
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Cache write-back failed");
                }
            }
        }

        Ok(value)
    }

    async fn write_back<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
        generation: &str,
    ) -> Result<bool, AppError> {
        let raw = serde_json::to_string(value)?;
        self.store
            .set_guarded(key, &raw, Some(ttl_seconds), &generation_key(key), generation)
            .await
    }
}

fn generation_key(key: &str) -> String {
    format!("{}:gen", key)
}

fn record(result: &'static str) {
    metrics::counter!("cache_lookups_total", "result" => result).increment(1);
}
