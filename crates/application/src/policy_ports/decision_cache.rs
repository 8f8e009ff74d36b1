use async_trait::async_trait;

use warden_core::AppResult;

/// Enforcement tuple a cached decision answers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    /// Subject identifier.
    pub subject: String,
    /// Partition key of the enforced domain.
    pub partition: String,
    /// Resource type.
    pub resource: String,
    /// Action.
    pub action: String,
}

/// Generations of every partition a decision was computed from.
///
/// A cached decision is only served for an identical stamp, so any
/// invalidation that happens after the stamp was taken hides the entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheStamp {
    generations: Vec<(String, u64)>,
}

impl CacheStamp {
    /// Creates a stamp from `(partition, generation)` pairs.
    #[must_use]
    pub fn new(generations: Vec<(String, u64)>) -> Self {
        Self { generations }
    }

    /// Returns the `(partition, generation)` pairs.
    #[must_use]
    pub fn generations(&self) -> &[(String, u64)] {
        &self.generations
    }

    /// Returns whether the stamp depends on a partition.
    #[must_use]
    pub fn covers(&self, partition: &str) -> bool {
        self.generations
            .iter()
            .any(|(stamped_partition, _)| stamped_partition == partition)
    }

    /// Returns a compact token suitable for cache keys.
    #[must_use]
    pub fn token(&self) -> String {
        self.generations
            .iter()
            .map(|(partition, generation)| format!("{partition}@{generation}"))
            .collect::<Vec<_>>()
            .join("+")
    }
}

/// Cache port for enforcement decisions.
#[async_trait]
pub trait DecisionCache: Send + Sync {
    /// Reads the current generation of each partition.
    async fn stamp(&self, partitions: &[String]) -> AppResult<CacheStamp>;

    /// Returns a cached decision computed under exactly this stamp.
    async fn get(&self, key: &DecisionKey, stamp: &CacheStamp) -> AppResult<Option<bool>>;

    /// Stores a decision computed under `stamp`.
    async fn put(&self, key: DecisionKey, stamp: CacheStamp, allowed: bool) -> AppResult<()>;

    /// Advances the generation of a partition, hiding every decision that
    /// depended on it.
    async fn invalidate(&self, partition: &str) -> AppResult<()>;
}
