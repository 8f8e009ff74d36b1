use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use warden_application::{RoleMetadata, RuleStore, RuleTransaction, WriteOutcome};
use warden_core::AppResult;
use warden_domain::{DomainRef, DomainType, GrantRule, GroupingRule, Subject};

type GrantKey = (String, String, String);
type GroupingKey = (String, String);

#[derive(Debug, Clone, Default)]
struct PartitionRules {
    grants: BTreeMap<GrantKey, GrantRule>,
    groupings: BTreeMap<GroupingKey, GroupingRule>,
    metadata: BTreeMap<String, RoleMetadata>,
}

impl PartitionRules {
    fn grants(&self, role: Option<&str>) -> Vec<GrantRule> {
        match role {
            Some(role) => self
                .grants
                .values()
                .filter(|rule| rule.role() == role)
                .cloned()
                .collect(),
            None => self.grants.values().cloned().collect(),
        }
    }

    fn groupings(&self, member: Option<&Subject>, target: Option<&Subject>) -> Vec<GroupingRule> {
        self.groupings
            .values()
            .filter(|rule| member.is_none_or(|member| rule.member() == member))
            .filter(|rule| target.is_none_or(|target| rule.target() == target))
            .cloned()
            .collect()
    }

    fn has_member(&self, member: &Subject) -> bool {
        self.groupings.values().any(|rule| rule.member() == member)
    }

    fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.groupings.is_empty() && self.metadata.is_empty()
    }
}

fn grant_key(rule: &GrantRule) -> GrantKey {
    (
        rule.role().to_owned(),
        rule.resource().to_owned(),
        rule.action().to_owned(),
    )
}

fn grouping_key(rule: &GroupingRule) -> GroupingKey {
    (rule.member().encode(), rule.target().encode())
}

#[derive(Debug)]
struct DomainPartition {
    domain: DomainRef,
    writer: Arc<Mutex<()>>,
    rules: RwLock<PartitionRules>,
}

type PartitionMap = Arc<RwLock<HashMap<String, Arc<DomainPartition>>>>;

/// In-memory rule store partitioned by domain.
///
/// Each partition has its own writer lock, so transactions on different
/// domains proceed in parallel while readers never wait on an open
/// transaction. A partition is published on the first commit that leaves
/// rules in it; until then it is only reachable by open transactions.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    partitions: PartitionMap,
    pending: Mutex<HashMap<String, Weak<DomainPartition>>>,
}

impl InMemoryRuleStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn partition(&self, domain: &DomainRef) -> Option<Arc<DomainPartition>> {
        self.partitions
            .read()
            .await
            .get(domain.partition_key().as_str())
            .cloned()
    }

    /// Returns the published partition, or the one shared by transactions
    /// already open on a domain that has not been committed yet.
    async fn partition_for_writer(&self, domain: &DomainRef) -> Arc<DomainPartition> {
        let mut pending = self.pending.lock().await;
        if let Some(partition) = self.partition(domain).await {
            return partition;
        }

        let key = domain.partition_key();
        if let Some(partition) = pending.get(key.as_str()).and_then(Weak::upgrade) {
            return partition;
        }

        let partition = Arc::new(DomainPartition {
            domain: domain.clone(),
            writer: Arc::new(Mutex::new(())),
            rules: RwLock::new(PartitionRules::default()),
        });
        pending.retain(|_, unpublished| unpublished.strong_count() > 0);
        pending.insert(key, Arc::downgrade(&partition));
        partition
    }

    #[cfg(test)]
    async fn partition_count(&self) -> usize {
        self.partitions.read().await.len()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn filter_grants(
        &self,
        domain: &DomainRef,
        role: Option<&str>,
    ) -> AppResult<Vec<GrantRule>> {
        domain.ensure_partitioned()?;
        let Some(partition) = self.partition(domain).await else {
            return Ok(Vec::new());
        };

        let grants = partition.rules.read().await.grants(role);
        Ok(grants)
    }

    async fn filter_groupings(
        &self,
        domain: &DomainRef,
        member: Option<&Subject>,
        target: Option<&Subject>,
    ) -> AppResult<Vec<GroupingRule>> {
        domain.ensure_partitioned()?;
        let Some(partition) = self.partition(domain).await else {
            return Ok(Vec::new());
        };

        let groupings = partition.rules.read().await.groupings(member, target);
        Ok(groupings)
    }

    async fn list_role_metadata(&self, domain: &DomainRef) -> AppResult<Vec<RoleMetadata>> {
        domain.ensure_partitioned()?;
        let Some(partition) = self.partition(domain).await else {
            return Ok(Vec::new());
        };

        let metadata = partition.rules.read().await.metadata.values().cloned().collect();
        Ok(metadata)
    }

    async fn list_domains_for_member(
        &self,
        member: &Subject,
        domain_type: DomainType,
    ) -> AppResult<Vec<DomainRef>> {
        let candidates: Vec<(String, Arc<DomainPartition>)> = self
            .partitions
            .read()
            .await
            .iter()
            .filter(|(_, partition)| {
                partition.domain.domain_type() == domain_type && !partition.domain.is_global()
            })
            .map(|(key, partition)| (key.clone(), Arc::clone(partition)))
            .collect();

        let mut domains = Vec::new();
        for (key, partition) in candidates {
            if partition.rules.read().await.has_member(member) {
                domains.push((key, partition.domain.clone()));
            }
        }
        domains.sort_by(|left, right| left.0.cmp(&right.0));

        Ok(domains.into_iter().map(|(_, domain)| domain).collect())
    }

    async fn begin(&self, domain: &DomainRef) -> AppResult<Box<dyn RuleTransaction>> {
        domain.ensure_partitioned()?;
        let partition = self.partition_for_writer(domain).await;
        let writer_guard = Arc::clone(&partition.writer).lock_owned().await;
        let staged = partition.rules.read().await.clone();

        Ok(Box::new(InMemoryRuleTransaction {
            partitions: Arc::clone(&self.partitions),
            partition,
            domain: domain.clone(),
            staged,
            writer_guard,
        }))
    }
}

/// Copy-on-write transaction over one partition.
///
/// Holds the partition's writer lock until it is committed or dropped.
struct InMemoryRuleTransaction {
    partitions: PartitionMap,
    partition: Arc<DomainPartition>,
    domain: DomainRef,
    staged: PartitionRules,
    writer_guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl RuleTransaction for InMemoryRuleTransaction {
    fn domain(&self) -> &DomainRef {
        &self.domain
    }

    async fn add_grant(&mut self, rule: &GrantRule) -> AppResult<WriteOutcome> {
        let key = grant_key(rule);
        if self.staged.grants.contains_key(&key) {
            return Ok(WriteOutcome::Unchanged);
        }

        self.staged.grants.insert(key, rule.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn remove_grant(&mut self, rule: &GrantRule) -> AppResult<WriteOutcome> {
        Ok(WriteOutcome::from_changed(
            self.staged.grants.remove(&grant_key(rule)).is_some(),
        ))
    }

    async fn add_grouping(&mut self, rule: &GroupingRule) -> AppResult<WriteOutcome> {
        let key = grouping_key(rule);
        if self.staged.groupings.contains_key(&key) {
            return Ok(WriteOutcome::Unchanged);
        }

        self.staged.groupings.insert(key, rule.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn remove_grouping(&mut self, rule: &GroupingRule) -> AppResult<WriteOutcome> {
        Ok(WriteOutcome::from_changed(
            self.staged.groupings.remove(&grouping_key(rule)).is_some(),
        ))
    }

    async fn filter_grants(&mut self, role: Option<&str>) -> AppResult<Vec<GrantRule>> {
        Ok(self.staged.grants(role))
    }

    async fn filter_groupings(
        &mut self,
        member: Option<&Subject>,
        target: Option<&Subject>,
    ) -> AppResult<Vec<GroupingRule>> {
        Ok(self.staged.groupings(member, target))
    }

    async fn list_role_metadata(&mut self) -> AppResult<Vec<RoleMetadata>> {
        Ok(self.staged.metadata.values().cloned().collect())
    }

    async fn save_role_metadata(&mut self, metadata: &RoleMetadata) -> AppResult<WriteOutcome> {
        if self.staged.metadata.get(&metadata.role_name) == Some(metadata) {
            return Ok(WriteOutcome::Unchanged);
        }

        self.staged
            .metadata
            .insert(metadata.role_name.clone(), metadata.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn remove_role_metadata(&mut self, role_name: &str) -> AppResult<WriteOutcome> {
        Ok(WriteOutcome::from_changed(
            self.staged.metadata.remove(role_name).is_some(),
        ))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let Self {
            partitions,
            partition,
            staged,
            writer_guard,
            ..
        } = *self;
        let publish = !staged.is_empty();
        *partition.rules.write().await = staged;
        if publish {
            partitions
                .write()
                .await
                .entry(partition.domain.partition_key())
                .or_insert_with(|| Arc::clone(&partition));
        }
        drop(writer_guard);

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}
