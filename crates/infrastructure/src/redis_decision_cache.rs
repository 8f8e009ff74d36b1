//! Redis-backed decision cache shared across engine instances.

use async_trait::async_trait;
use redis::AsyncCommands;
use warden_application::{CacheStamp, DecisionCache, DecisionKey};
use warden_core::{AppError, AppResult};

/// Redis implementation of the decision cache port.
///
/// Partition generations live under `<prefix>:gen:<partition>` and are bumped
/// with `INCR`. Decisions are keyed by the generation stamp they were computed
/// under, so an invalidated entry is never read again and simply expires.
#[derive(Clone)]
pub struct RedisDecisionCache {
    client: redis::Client,
    key_prefix: String,
    ttl_seconds: u64,
}

impl RedisDecisionCache {
    /// Creates a cache adapter with a configured Redis client, key prefix and
    /// entry lifetime.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            ttl_seconds,
        }
    }

    fn generation_key(&self, partition: &str) -> String {
        format!("{}:gen:{partition}", self.key_prefix)
    }

    fn decision_key(&self, key: &DecisionKey, stamp: &CacheStamp) -> String {
        let fields = [
            key.subject.as_str(),
            key.partition.as_str(),
            key.resource.as_str(),
            key.action.as_str(),
        ]
        .iter()
        .map(|field| format!("{}:{field}", field.len()))
        .collect::<Vec<_>>()
        .join("|");

        format!("{}:decision:{}:{fields}", self.key_prefix, stamp.token())
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))
    }
}

#[async_trait]
impl DecisionCache for RedisDecisionCache {
    async fn stamp(&self, partitions: &[String]) -> AppResult<CacheStamp> {
        if partitions.is_empty() {
            return Ok(CacheStamp::new(Vec::new()));
        }

        let keys: Vec<String> = partitions
            .iter()
            .map(|partition| self.generation_key(partition))
            .collect();
        let mut connection = self.connection().await?;

        let generations: Vec<Option<u64>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to read policy cache generations: {error}"))
            })?;

        Ok(CacheStamp::new(
            partitions
                .iter()
                .cloned()
                .zip(generations.into_iter().map(Option::unwrap_or_default))
                .collect(),
        ))
    }

    async fn get(&self, key: &DecisionKey, stamp: &CacheStamp) -> AppResult<Option<bool>> {
        let cache_key = self.decision_key(key, stamp);
        let mut connection = self.connection().await?;

        let encoded: Option<String> = connection.get(cache_key).await.map_err(|error| {
            AppError::Internal(format!("failed to read policy decision cache entry: {error}"))
        })?;

        encoded.as_deref().map(decode_decision).transpose()
    }

    async fn put(&self, key: DecisionKey, stamp: CacheStamp, allowed: bool) -> AppResult<()> {
        if self.ttl_seconds == 0 {
            return Ok(());
        }

        let cache_key = self.decision_key(&key, &stamp);
        let mut connection = self.connection().await?;

        connection
            .set_ex(cache_key, if allowed { "1" } else { "0" }, self.ttl_seconds)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to write policy decision cache entry: {error}"
                ))
            })
    }

    async fn invalidate(&self, partition: &str) -> AppResult<()> {
        let mut connection = self.connection().await?;

        let _: i64 = connection
            .incr(self.generation_key(partition), 1)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to bump policy cache generation for '{partition}': {error}"
                ))
            })?;

        Ok(())
    }
}

fn decode_decision(value: &str) -> AppResult<bool> {
    match value {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(AppError::Internal(format!(
            "invalid policy decision cache value '{value}'"
        ))),
    }
}
