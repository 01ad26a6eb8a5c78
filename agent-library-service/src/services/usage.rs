use super::cache::Cache;
use crate::keys::{self, ADMIN_USERS, API_CALLS_FIELD, LAST_USED_FIELD, TOTAL_API_CALLS, USAGE_ALL, USER_USAGE};
use crate::models::{RecordedUsage, UserUsage};
use chrono::{SecondsFormat, Utc};
use service_core::error::AppError;
use service_core::store::{CounterOp, KeyValueStore};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Usage counters with cached per-user and aggregate read views.
#[derive(Clone)]
pub struct UsageTracker {
    store: Arc<dyn KeyValueStore>,
    cache: Cache,
    ttl_seconds: u64,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl_seconds: u64) -> Self {
        Self {
            cache: Cache::new(store.clone()),
            store,
            ttl_seconds,
        }
    }

    /// Count one call of `agent_id` by `user_id`.
    ///
    /// The counters move together in one atomic batch. The aggregate snapshot
    /// is then rebuilt from the counters and stored only if it is newer than
    /// the one already there, and both cached views are dropped, so the next
    /// read sees this call.
    pub async fn record(
        &self,
        user_id: &str,
        agent_id: &str,
        operation: &str,
    ) -> Result<RecordedUsage, AppError> {
        let counters_key = keys::user_usage_counters(user_id);
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let results = self
            .store
            .apply_atomic(&[
                CounterOp::incr(TOTAL_API_CALLS),
                CounterOp::hash_incr(&counters_key, API_CALLS_FIELD, 1),
                CounterOp::hash_incr(&counters_key, keys::agent_field(agent_id), 1),
                CounterOp::hash_set(&counters_key, LAST_USED_FIELD, now),
            ])
            .await?;

        let recorded = match results.as_slice() {
            [total_calls, user_calls, agent_calls, ..] => RecordedUsage {
                total_calls: *total_calls,
                user_calls: *user_calls,
                agent_calls: *agent_calls,
            },
            _ => {
                return Err(AppError::InternalError(anyhow::anyhow!(
                    "Usage batch returned {} results",
                    results.len()
                )));
            }
        };

        // Versioned by apiCalls: a slower call holding an older read of the
        // counters cannot overwrite a newer snapshot.
        let snapshot = UserUsage::from_counters(&self.store.hash_get_all(&counters_key).await?);
        let version = snapshot.api_calls;
        let snapshot = serde_json::to_string(&snapshot)?;
        if !self
            .store
            .hash_set_versioned(USER_USAGE, user_id, &snapshot, version)
            .await?
        {
            tracing::debug!(user_id = %user_id, version, "Newer usage snapshot already stored");
        }

        let view_key = keys::usage_view(user_id);
        self.cache.invalidate(&[view_key.as_str(), USAGE_ALL]).await?;

        metrics::counter!("agent_usage_recorded_total", "operation" => operation.to_string())
            .increment(1);
        tracing::info!(
            user_id = %user_id,
            agent_id = %agent_id,
            operation = %operation,
            user_calls = recorded.user_calls,
            "Usage recorded"
        );

        Ok(recorded)
    }

    pub async fn user_usage(&self, user_id: &str) -> Result<UserUsage, AppError> {
        let view_key = keys::usage_view(user_id);
        let counters_key = keys::user_usage_counters(user_id);

        self.cache
            .get_or_load(&view_key, self.ttl_seconds, || async {
                let fields = self.store.hash_get_all(&counters_key).await?;
                Ok(UserUsage::from_counters(&fields))
            })
            .await
    }

    /// Per-user snapshots for every user that has recorded usage.
    pub async fn all_usage(&self) -> Result<BTreeMap<String, UserUsage>, AppError> {
        self.cache
            .get_or_load(USAGE_ALL, self.ttl_seconds, || async {
                let snapshots = self.store.hash_get_all(USER_USAGE).await?;
                let mut usage = BTreeMap::new();
                for (user_id, raw) in snapshots {
                    match serde_json::from_str::<UserUsage>(&raw) {
                        Ok(snapshot) => {
                            usage.insert(user_id, snapshot);
                        }
                        Err(e) => {
                            tracing::warn!(user_id = %user_id, error = %e, "Skipping undecodable usage snapshot");
                        }
                    }
                }
                Ok(usage)
            })
            .await
    }

    /// Whether `user_id` is in the `admin_users` allowlist. A malformed
    /// allowlist grants nobody.
    pub async fn is_admin(&self, user_id: &str) -> Result<bool, AppError> {
        let Some(raw) = self.store.get(ADMIN_USERS).await? else {
            return Ok(false);
        };

        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(admins) => Ok(admins.iter().any(|id| id == user_id)),
            Err(e) => {
                tracing::warn!(error = %e, "admin_users is not a JSON array of user ids");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use service_core::store::{CacheStore, InMemoryStore, SortedSetStore};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn tracker() -> (Arc<InMemoryStore>, UsageTracker) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), UsageTracker::new(store, 3600))
    }

    #[tokio::test]
    async fn recording_updates_all_counters() {
        let (_, tracker) = tracker();

        tracker.record("u1", "retrieval-qa", "invoke").await.unwrap();
        tracker.record("u2", "retrieval-qa", "invoke").await.unwrap();
        let recorded = tracker.record("u1", "summarization", "invoke").await.unwrap();

        assert_eq!(
            recorded,
            RecordedUsage {
                total_calls: 3,
                user_calls: 2,
                agent_calls: 1,
            }
        );
    }

    #[tokio::test]
    async fn read_after_record_is_not_stale() {
        let (_, tracker) = tracker();

        assert_eq!(tracker.user_usage("u1").await.unwrap(), UserUsage::default());

        tracker.record("u1", "retrieval-qa", "invoke").await.unwrap();
        let usage = tracker.user_usage("u1").await.unwrap();
        assert_eq!(usage.api_calls, 1);
        assert_eq!(usage.agents.get("retrieval-qa"), Some(&1));
        assert!(usage.last_used.is_some());

        let all = tracker.all_usage().await.unwrap();
        assert_eq!(all["u1"], usage);

        tracker.record("u1", "retrieval-qa", "invoke").await.unwrap();
        assert_eq!(tracker.user_usage("u1").await.unwrap().api_calls, 2);
        assert_eq!(tracker.all_usage().await.unwrap()["u1"].api_calls, 2);
    }

    #[tokio::test]
    async fn admin_allowlist() {
        let (store, tracker) = tracker();
        assert!(!tracker.is_admin("u1").await.unwrap());

        store.set(ADMIN_USERS, r#"["u1"]"#, None).await.unwrap();
        assert!(tracker.is_admin("u1").await.unwrap());
        assert!(!tracker.is_admin("u2").await.unwrap());

        store.set(ADMIN_USERS, "u1", None).await.unwrap();
        assert!(!tracker.is_admin("u1").await.unwrap());
    }

    /// Delegates to an [`InMemoryStore`], stalling the first `hash_get_all`
    /// after it has read the hash.
    #[derive(Default)]
    struct StallingStore {
        inner: InMemoryStore,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl CacheStore for StallingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), AppError> {
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, keys: &[&str]) -> Result<(), AppError> {
            self.inner.delete(keys).await
        }

        async fn incr(&self, key: &str) -> Result<i64, AppError> {
            self.inner.incr(key).await
        }

        async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), AppError> {
            self.inner.hash_set(key, field, value).await
        }

        async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, AppError> {
            self.inner.hash_get(key, field).await
        }

        async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, AppError> {
            let fields = self.inner.hash_get_all(key).await?;
            if !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok(fields)
        }

        async fn apply_atomic(&self, ops: &[CounterOp]) -> Result<Vec<i64>, AppError> {
            self.inner.apply_atomic(ops).await
        }

        async fn hash_set_versioned(
            &self,
            key: &str,
            field: &str,
            value: &str,
            version: i64,
        ) -> Result<bool, AppError> {
            self.inner.hash_set_versioned(key, field, value, version).await
        }

        async fn set_guarded(
            &self,
            key: &str,
            value: &str,
            ttl: Option<u64>,
            guard_key: &str,
            expected: &str,
        ) -> Result<bool, AppError> {
            self.inner.set_guarded(key, value, ttl, guard_key, expected).await
        }

        async fn ping(&self) -> Result<(), AppError> {
            self.inner.ping().await
        }
    }

    #[async_trait]
    impl SortedSetStore for StallingStore {
        async fn remove_range_by_score(&self, key: &str, min: i64, max: i64) -> Result<u64, AppError> {
            self.inner.remove_range_by_score(key, min, max).await
        }

        async fn cardinality(&self, key: &str) -> Result<u64, AppError> {
            self.inner.cardinality(key).await
        }

        async fn add(&self, key: &str, score: i64, member: &str) -> Result<(), AppError> {
            self.inner.add(key, score, member).await
        }

        async fn expire(&self, key: &str, seconds: u64) -> Result<(), AppError> {
            self.inner.expire(key, seconds).await
        }

        async fn first_with_score(&self, key: &str) -> Result<Option<(String, i64)>, AppError> {
            self.inner.first_with_score(key).await
        }
    }

    #[tokio::test]
    async fn slow_recording_does_not_overwrite_newer_snapshot() {
        let store = Arc::new(StallingStore::default());
        let tracker = UsageTracker::new(store.clone(), 3600);

        let slow = tracker.record("u1", "retrieval-qa", "invoke");
        let fast = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tracker.record("u1", "retrieval-qa", "invoke").await
        };
        let (slow, fast) = tokio::join!(slow, fast);
        slow.unwrap();
        fast.unwrap();

        let raw = store.inner.hash_get(USER_USAGE, "u1").await.unwrap().unwrap();
        let snapshot: UserUsage = serde_json::from_str(&raw).unwrap();
        assert_eq!(snapshot.api_calls, 2);
        assert_eq!(snapshot.agents.get("retrieval-qa"), Some(&2));
        assert_eq!(tracker.all_usage().await.unwrap()["u1"].api_calls, 2);
    }

    #[tokio::test]
    async fn store_outage_fails_recording() {
        let (store, tracker) = tracker();
        store.set_available(false);
        assert!(matches!(
            tracker.record("u1", "retrieval-qa", "invoke").await,
            Err(AppError::RedisError(_))
        ));
    }
}
