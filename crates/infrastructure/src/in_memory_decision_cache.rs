use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;
use warden_application::{CacheStamp, DecisionCache, DecisionKey};
use warden_core::AppResult;

#[derive(Debug, Clone)]
struct DecisionEntry {
    stamp: CacheStamp,
    allowed: bool,
    expires_at: Instant,
}

#[derive(Debug)]
struct DecisionTable {
    decisions: HashMap<DecisionKey, DecisionEntry>,
    next_sweep: Instant,
}

impl DecisionTable {
    fn sweep(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.decisions.len();
        self.decisions.retain(|_, entry| entry.expires_at > now);
        self.next_sweep = now.checked_add(ttl).unwrap_or(now);
        before - self.decisions.len()
    }
}

/// Process-local decision cache with per-partition generations.
#[derive(Debug)]
pub struct InMemoryDecisionCache {
    ttl: Duration,
    generations: RwLock<HashMap<String, u64>>,
    entries: RwLock<DecisionTable>,
}

impl InMemoryDecisionCache {
    /// Creates an empty cache whose entries live for `ttl`.
    ///
    /// Writes sweep expired entries at most once per `ttl`, so the cache stays
    /// bounded by the decisions made within roughly two TTL windows even when
    /// no sweeper task runs.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            ttl,
            generations: RwLock::new(HashMap::new()),
            entries: RwLock::new(DecisionTable {
                decisions: HashMap::new(),
                next_sweep: now.checked_add(ttl).unwrap_or(now),
            }),
        }
    }

    /// Drops expired entries and returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        self.entries.write().await.sweep(Instant::now(), self.ttl)
    }

    /// Returns the number of cached decisions, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.decisions.len()
    }

    /// Returns whether the cache holds no decisions.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.decisions.is_empty()
    }

    /// Spawns a task that sweeps expired entries every `interval`.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = self.sweep_expired().await;
                if removed > 0 {
                    debug!(removed, "swept expired policy decisions");
                }
            }
        })
    }

    async fn is_current(&self, stamp: &CacheStamp) -> bool {
        let generations = self.generations.read().await;
        stamp.generations().iter().all(|(partition, generation)| {
            generations.get(partition).copied().unwrap_or_default() == *generation
        })
    }
}

#[async_trait]
impl DecisionCache for InMemoryDecisionCache {
    async fn stamp(&self, partitions: &[String]) -> AppResult<CacheStamp> {
        let generations = self.generations.read().await;

        Ok(CacheStamp::new(
            partitions
                .iter()
                .map(|partition| {
                    (
                        partition.clone(),
                        generations.get(partition).copied().unwrap_or_default(),
                    )
                })
                .collect(),
        ))
    }

    async fn get(&self, key: &DecisionKey, stamp: &CacheStamp) -> AppResult<Option<bool>> {
        let entries = self.entries.read().await;

        Ok(entries
            .decisions
            .get(key)
            .filter(|entry| &entry.stamp == stamp && entry.expires_at > Instant::now())
            .map(|entry| entry.allowed))
    }

    async fn put(&self, key: DecisionKey, stamp: CacheStamp, allowed: bool) -> AppResult<()> {
        if self.ttl.is_zero() || !self.is_current(&stamp).await {
            return Ok(());
        }

        let now = Instant::now();
        let expires_at = now.checked_add(self.ttl).unwrap_or(now);
        let mut entries = self.entries.write().await;
        if now >= entries.next_sweep {
            let removed = entries.sweep(now, self.ttl);
            if removed > 0 {
                debug!(removed, "evicted expired policy decisions");
            }
        }
        entries.decisions.insert(
            key,
            DecisionEntry {
                stamp,
                allowed,
                expires_at,
            },
        );

        Ok(())
    }

    async fn invalidate(&self, partition: &str) -> AppResult<()> {
        *self
            .generations
            .write()
            .await
            .entry(partition.to_owned())
            .or_default() += 1;

        self.entries
            .write()
            .await
            .decisions
            .retain(|_, entry| !entry.stamp.covers(partition));

        Ok(())
    }
}
