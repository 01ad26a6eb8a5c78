//! Key-value store abstraction.
//!
//! Services talk to the cache/counter store through two narrow traits so the
//! backing store can be swapped: [`RedisStore`] in production and
//! [`InMemoryStore`] in tests and local runs.
//!
//! - [`CacheStore`]: strings with optional TTL, counters, hashes, an
//!   atomic multi-key batch for counter updates and two conditional writes
//!   (versioned hash fields, guarded strings).
//! - [`SortedSetStore`]: the ordered-set primitives the sliding-window rate
//!   limiter needs (range pruning, cardinality, insertion, expiry, oldest
//!   entry).

mod memory;
mod redis;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

use crate::error::AppError;
use async_trait::async_trait;
use std::collections::HashMap;

/// One step of an atomic counter batch. Every variant yields an integer
/// reply, so a batch returns one `i64` per op in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterOp {
    /// `INCR key`, yields the new value.
    Incr { key: String },
    /// `HINCRBY key field by`, yields the new field value.
    HashIncr { key: String, field: String, by: i64 },
    /// `HSET key field value`, yields the number of fields created.
    HashSet {
        key: String,
        field: String,
        value: String,
    },
}

impl CounterOp {
    pub fn incr(key: impl Into<String>) -> Self {
        CounterOp::Incr { key: key.into() }
    }

    pub fn hash_incr(key: impl Into<String>, field: impl Into<String>, by: i64) -> Self {
        CounterOp::HashIncr {
            key: key.into(),
            field: field.into(),
            by,
        }
    }

    pub fn hash_set(
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        CounterOp::HashSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Companion hash holding the per-field versions of `key`.
pub fn versions_key(key: &str) -> String {
    format!("{}:versions", key)
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    /// Store `value`; `ttl_seconds` of `None` keeps it until deleted.
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), AppError>;

    async fn delete(&self, keys: &[&str]) -> Result<(), AppError>;

    async fn incr(&self, key: &str) -> Result<i64, AppError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), AppError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, AppError>;

    /// All fields of a hash; an absent key yields an empty map.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, AppError>;

    /// Apply every op or none of them.
    async fn apply_atomic(&self, ops: &[CounterOp]) -> Result<Vec<i64>, AppError>;

    /// Set `key[field] = value` unless a write with a version at least
    /// `version` already landed. Versions live in the companion hash
    /// [`versions_key`]. Returns whether the write happened.
    async fn hash_set_versioned(
        &self,
        key: &str,
        field: &str,
        value: &str,
        version: i64,
    ) -> Result<bool, AppError>;

    /// Store `value` only while `guard_key` still reads `expected`, an absent
    /// guard reading as `"0"`. Returns whether the write happened.
    async fn set_guarded(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
        guard_key: &str,
        expected: &str,
    ) -> Result<bool, AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}

#[async_trait]
pub trait SortedSetStore: Send + Sync {
    /// Remove members whose score lies in `[min, max]`, returning how many
    /// were removed.
    async fn remove_range_by_score(&self, key: &str, min: i64, max: i64)
    -> Result<u64, AppError>;

    async fn cardinality(&self, key: &str) -> Result<u64, AppError>;

    async fn add(&self, key: &str, score: i64, member: &str) -> Result<(), AppError>;

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), AppError>;

    /// Lowest-scored member and its score.
    async fn first_with_score(&self, key: &str) -> Result<Option<(String, i64)>, AppError>;
}

/// Everything a service needs from its key-value store.
pub trait KeyValueStore: CacheStore + SortedSetStore {}

impl<T: CacheStore + SortedSetStore> KeyValueStore for T {}
