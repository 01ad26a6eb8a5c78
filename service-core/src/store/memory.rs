use super::{CacheStore, CounterOp, SortedSetStore, versions_key};
use crate::error::AppError;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Default, Clone)]
struct State {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    sorted_sets: HashMap<String, BTreeSet<(i64, String)>>,
    expirations: HashMap<String, Instant>,
}

impl State {
    fn purge_if_expired(&mut self, key: &str) {
        if let Some(deadline) = self.expirations.get(key) {
            if Instant::now() >= *deadline {
                self.remove(key);
            }
        }
    }

    fn remove(&mut self, key: &str) {
        self.strings.remove(key);
        self.hashes.remove(key);
        self.sorted_sets.remove(key);
        self.expirations.remove(key);
    }

    fn incr(&mut self, key: &str) -> Result<i64, AppError> {
        self.purge_if_expired(key);
        let current = match self.strings.get(key) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                AppError::InternalError(anyhow::anyhow!("value at {} is not an integer", key))
            })?,
            None => 0,
        };
        let next = current + 1;
        self.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    fn hash_incr(&mut self, key: &str, field: &str, by: i64) -> Result<i64, AppError> {
        self.purge_if_expired(key);
        let hash = self.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                AppError::InternalError(anyhow::anyhow!(
                    "hash field {}.{} is not an integer",
                    key,
                    field
                ))
            })?,
            None => 0,
        };
        let next = current + by;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    fn hash_set(&mut self, key: &str, field: &str, value: &str) -> i64 {
        self.purge_if_expired(key);
        let created = self
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string())
            .is_none();
        i64::from(created)
    }
}

/// Process-local store with the same semantics as [`super::RedisStore`].
///
/// All operations on one instance are serialised by a single lock, which is
/// also what makes [`CacheStore::apply_atomic`] atomic here. The store can be
/// switched to an unavailable mode in which every call fails with a Redis
/// I/O error.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::RedisError(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "in-memory store marked unavailable",
            ))));
        }
        self.state
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("In-memory store mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut state = self.lock()?;
        state.purge_if_expired(key);
        Ok(state.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), AppError> {
        let mut state = self.lock()?;
        state.remove(key);
        state.strings.insert(key.to_string(), value.to_string());
        if let Some(ttl) = ttl_seconds.filter(|ttl| *ttl > 0) {
            state
                .expirations
                .insert(key.to_string(), Instant::now() + Duration::from_secs(ttl));
        }
        Ok(())
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), AppError> {
        let mut state = self.lock()?;
        for key in keys {
            state.remove(key);
        }
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, AppError> {
        self.lock()?.incr(key)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), AppError> {
        self.lock()?.hash_set(key, field, value);
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, AppError> {
        let mut state = self.lock()?;
        state.purge_if_expired(key);
        Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, AppError> {
        let mut state = self.lock()?;
        state.purge_if_expired(key);
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn apply_atomic(&self, ops: &[CounterOp]) -> Result<Vec<i64>, AppError> {
        let mut state = self.lock()?;

        // Work on a copy so a failing op leaves nothing half-applied.
        let mut staged = state.clone();
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let value = match op {
                CounterOp::Incr { key } => staged.incr(key)?,
                CounterOp::HashIncr { key, field, by } => staged.hash_incr(key, field, *by)?,
                CounterOp::HashSet { key, field, value } => staged.hash_set(key, field, value),
            };
            results.push(value);
        }
        *state = staged;
        Ok(results)
    }

    async fn hash_set_versioned(
        &self,
        key: &str,
        field: &str,
        value: &str,
        version: i64,
    ) -> Result<bool, AppError> {
        let mut state = self.lock()?;
        let versions = versions_key(key);
        state.purge_if_expired(key);
        state.purge_if_expired(&versions);

        let current = state
            .hashes
            .get(&versions)
            .and_then(|h| h.get(field))
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(-1);
        if current >= version {
            return Ok(false);
        }

        state.hash_set(key, field, value);
        state.hash_set(&versions, field, &version.to_string());
        Ok(true)
    }

    async fn set_guarded(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
        guard_key: &str,
        expected: &str,
    ) -> Result<bool, AppError> {
        let mut state = self.lock()?;
        state.purge_if_expired(guard_key);
        let current = state.strings.get(guard_key).map_or("0", String::as_str);
        if current != expected {
            return Ok(false);
        }

        state.remove(key);
        state.strings.insert(key.to_string(), value.to_string());
        if let Some(ttl) = ttl_seconds.filter(|ttl| *ttl > 0) {
            state
                .expirations
                .insert(key.to_string(), Instant::now() + Duration::from_secs(ttl));
        }
        Ok(true)
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.lock().map(|_| ())
    }
}

#[async_trait]
impl SortedSetStore for InMemoryStore {
    async fn remove_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<u64, AppError> {
        let mut state = self.lock()?;
        state.purge_if_expired(key);
        let Some(set) = state.sorted_sets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|(score, _)| *score < min || *score > max);
        let removed = (before - set.len()) as u64;
        if set.is_empty() {
            state.remove(key);
        }
        Ok(removed)
    }

    async fn cardinality(&self, key: &str) -> Result<u64, AppError> {
        let mut state = self.lock()?;
        state.purge_if_expired(key);
        Ok(state.sorted_sets.get(key).map_or(0, |set| set.len() as u64))
    }

    async fn add(&self, key: &str, score: i64, member: &str) -> Result<(), AppError> {
        let mut state = self.lock()?;
        state.purge_if_expired(key);
        let set = state.sorted_sets.entry(key.to_string()).or_default();
        set.retain(|(_, existing)| existing != member);
        set.insert((score, member.to_string()));
        Ok(())
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), AppError> {
        let mut state = self.lock()?;
        state.purge_if_expired(key);
        let exists = state.strings.contains_key(key)
            || state.hashes.contains_key(key)
            || state.sorted_sets.contains_key(key);
        if exists {
            state
                .expirations
                .insert(key.to_string(), Instant::now() + Duration::from_secs(seconds));
        }
        Ok(())
    }

    async fn first_with_score(&self, key: &str) -> Result<Option<(String, i64)>, AppError> {
        let mut state = self.lock()?;
        state.purge_if_expired(key);
        Ok(state
            .sorted_sets
            .get(key)
            .and_then(|set| set.first())
            .map(|(score, member)| (member.clone(), *score)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn incrementing_n_times_from_zero_yields_n() {
        let store = InMemoryStore::new();
        for _ in 0..25 {
            store.incr("total_api_calls").await.unwrap();
        }
        assert_eq!(
            store.get("total_api_calls").await.unwrap().as_deref(),
            Some("25")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryStore::new());
        let tasks = (0..8).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    store
                        .apply_atomic(&[
                            CounterOp::incr("total_api_calls"),
                            CounterOp::hash_incr("user:u1:usage", "apiCalls", 1),
                        ])
                        .await
                        .unwrap();
                }
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        assert_eq!(store.incr("total_api_calls").await.unwrap(), 401);
        assert_eq!(
            store
                .hash_get("user:u1:usage", "apiCalls")
                .await
                .unwrap()
                .as_deref(),
            Some("400")
        );
    }

    #[tokio::test]
    async fn failed_batch_leaves_counters_untouched() {
        let store = InMemoryStore::new();
        store.set("broken", "not-a-number", None).await.unwrap();

        let result = store
            .apply_atomic(&[CounterOp::incr("total_api_calls"), CounterOp::incr("broken")])
            .await;

        assert!(result.is_err());
        assert_eq!(store.get("total_api_calls").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.get("agents:all").await,
            Err(AppError::RedisError(_))
        ));
        store.set_available(true);
        assert!(store.get("agents:all").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn versioned_write_never_goes_backwards() {
        let store = InMemoryStore::new();

        assert!(store.hash_set_versioned("user_usage", "u1", "v2", 2).await.unwrap());
        assert!(!store.hash_set_versioned("user_usage", "u1", "v1", 1).await.unwrap());
        assert!(!store.hash_set_versioned("user_usage", "u1", "v2-again", 2).await.unwrap());
        assert!(store.hash_set_versioned("user_usage", "u2", "v1", 1).await.unwrap());

        assert_eq!(
            store.hash_get("user_usage", "u1").await.unwrap().as_deref(),
            Some("v2")
        );
        assert_eq!(store.hash_get_all("user_usage").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn guarded_write_requires_unchanged_guard() {
        let store = InMemoryStore::new();

        assert!(store.set_guarded("usage:u1", "a", Some(60), "usage:u1:gen", "0").await.unwrap());
        assert_eq!(store.get("usage:u1").await.unwrap().as_deref(), Some("a"));

        store.incr("usage:u1:gen").await.unwrap();
        assert!(!store.set_guarded("usage:u1", "b", Some(60), "usage:u1:gen", "0").await.unwrap());
        assert_eq!(store.get("usage:u1").await.unwrap().as_deref(), Some("a"));

        assert!(store.set_guarded("usage:u1", "c", None, "usage:u1:gen", "1").await.unwrap());
        assert_eq!(store.get("usage:u1").await.unwrap().as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn expired_strings_disappear() {
        let store = InMemoryStore::new();
        store.set("usage:u1", "{}", Some(1)).await.unwrap();
        {
            let mut state = store.state.lock().unwrap();
            state
                .expirations
                .insert("usage:u1".to_string(), Instant::now() - Duration::from_secs(1));
        }
        assert_eq!(store.get("usage:u1").await.unwrap(), None);
    }
}
