use super::{CacheStore, CounterOp, SortedSetStore, versions_key};
use crate::error::AppError;
use async_trait::async_trait;
use redis::{Client, Script, aio::ConnectionManager};
use std::collections::HashMap;
use std::sync::LazyLock;

// KEYS: hash, versions hash. ARGV: field, value, version.
static VERSIONED_HSET: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local current = tonumber(redis.call('HGET', KEYS[2], ARGV[1]) or '-1')
        if current >= tonumber(ARGV[3]) then
            return 0
        end
        redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
        redis.call('HSET', KEYS[2], ARGV[1], ARGV[3])
        return 1
        ",
    )
});

// KEYS: target, guard. ARGV: value, expected guard, ttl seconds (0 keeps).
static GUARDED_SET: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local current = redis.call('GET', KEYS[2]) or '0'
        if current ~= ARGV[2] then
            return 0
        end
        if tonumber(ARGV[3]) > 0 then
            redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
        else
            redis.call('SET', KEYS[1], ARGV[1])
        end
        return 1
        ",
    )
});

/// Redis-backed store. Cloning is cheap: every clone shares the same
/// multiplexed, auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisStore {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            AppError::from(e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_seconds.filter(|ttl| *ttl > 0) {
            cmd.arg("EX").arg(ttl);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), AppError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, AppError> {
        let mut conn = self.manager.clone();
        let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, AppError> {
        let mut conn = self.manager.clone();
        let values: HashMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn apply_atomic(&self, ops: &[CounterOp]) -> Result<Vec<i64>, AppError> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                CounterOp::Incr { key } => {
                    pipe.cmd("INCR").arg(key);
                }
                CounterOp::HashIncr { key, field, by } => {
                    pipe.cmd("HINCRBY").arg(key).arg(field).arg(*by);
                }
                CounterOp::HashSet { key, field, value } => {
                    pipe.cmd("HSET").arg(key).arg(field).arg(value);
                }
            }
        }

        let mut conn = self.manager.clone();
        let results: Vec<i64> = pipe.query_async(&mut conn).await?;
        Ok(results)
    }

    async fn hash_set_versioned(
        &self,
        key: &str,
        field: &str,
        value: &str,
        version: i64,
    ) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();
        let written: i64 = VERSIONED_HSET
            .key(key)
            .key(versions_key(key))
            .arg(field)
            .arg(value)
            .arg(version)
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn set_guarded(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
        guard_key: &str,
        expected: &str,
    ) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();
        let written: i64 = GUARDED_SET
            .key(key)
            .key(guard_key)
            .arg(value)
            .arg(expected)
            .arg(ttl_seconds.unwrap_or(0))
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl SortedSetStore for RedisStore {
    async fn remove_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<u64, AppError> {
        let mut conn = self.manager.clone();
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn cardinality(&self, key: &str) -> Result<u64, AppError> {
        let mut conn = self.manager.clone();
        let count: u64 = redis::cmd("ZCARD").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    async fn add(&self, key: &str, score: i64, member: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn first_with_score(&self, key: &str) -> Result<Option<(String, i64)>, AppError> {
        let mut conn = self.manager.clone();
        let reply: Vec<String> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        let mut reply = reply.into_iter();
        match (reply.next(), reply.next()) {
            (Some(member), Some(score)) => {
                let score = score.parse::<f64>().map_err(|e| {
                    AppError::InternalError(anyhow::anyhow!(
                        "Invalid sorted set score '{}' for {}: {}",
                        score,
                        key,
                        e
                    ))
                })?;
                Ok(Some((member, score as i64)))
            }
            _ => Ok(None),
        }
    }
}
