use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use warden_core::{AppError, AppResult};
use warden_domain::{DomainRef, DomainType, GrantRule, GroupingRule, Subject};

use crate::{
    CacheStamp, DecisionCache, DecisionKey, RoleMetadata, RuleStore, RuleTransaction,
    WriteOutcome,
};

#[derive(Debug, Clone, Default)]
struct FakePartition {
    domain: Option<DomainRef>,
    grants: Vec<GrantRule>,
    groupings: Vec<GroupingRule>,
    metadata: BTreeMap<String, RoleMetadata>,
}

impl FakePartition {
    fn grants(&self, role: Option<&str>) -> Vec<GrantRule> {
        self.grants
            .iter()
            .filter(|rule| role.is_none_or(|role| rule.role() == role))
            .cloned()
            .collect()
    }

    fn groupings(&self, member: Option<&Subject>, target: Option<&Subject>) -> Vec<GroupingRule> {
        self.groupings
            .iter()
            .filter(|rule| member.is_none_or(|member| rule.member() == member))
            .filter(|rule| target.is_none_or(|target| rule.target() == target))
            .cloned()
            .collect()
    }
}

/// Rule store fake with optional write failure injection.
#[derive(Default)]
pub(crate) struct FakeRuleStore {
    partitions: Arc<Mutex<HashMap<String, FakePartition>>>,
    fail_after_writes: Option<usize>,
}

impl FakeRuleStore {
    /// Fails the write following the first `writes` writes of each transaction.
    pub(crate) fn failing_after(writes: usize) -> Self {
        Self {
            partitions: Arc::default(),
            fail_after_writes: Some(writes),
        }
    }

    async fn partition(&self, domain: &DomainRef) -> FakePartition {
        self.partitions
            .lock()
            .await
            .get(domain.partition_key().as_str())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RuleStore for FakeRuleStore {
    async fn filter_grants(
        &self,
        domain: &DomainRef,
        role: Option<&str>,
    ) -> AppResult<Vec<GrantRule>> {
        Ok(self.partition(domain).await.grants(role))
    }

    async fn filter_groupings(
        &self,
        domain: &DomainRef,
        member: Option<&Subject>,
        target: Option<&Subject>,
    ) -> AppResult<Vec<GroupingRule>> {
        Ok(self.partition(domain).await.groupings(member, target))
    }

    async fn list_role_metadata(&self, domain: &DomainRef) -> AppResult<Vec<RoleMetadata>> {
        Ok(self.partition(domain).await.metadata.into_values().collect())
    }

    async fn list_domains_for_member(
        &self,
        member: &Subject,
        domain_type: DomainType,
    ) -> AppResult<Vec<DomainRef>> {
        let partitions = self.partitions.lock().await;
        let mut domains: Vec<DomainRef> = partitions
            .values()
            .filter(|partition| !partition.groupings(Some(member), None).is_empty())
            .filter_map(|partition| partition.domain.clone())
            .filter(|domain| domain.domain_type() == domain_type && !domain.is_global())
            .collect();
        domains.sort();
        Ok(domains)
    }

    async fn begin(&self, domain: &DomainRef) -> AppResult<Box<dyn RuleTransaction>> {
        let mut staged = self.partition(domain).await;
        staged.domain.get_or_insert_with(|| domain.clone());

        Ok(Box::new(FakeRuleTransaction {
            partitions: Arc::clone(&self.partitions),
            domain: domain.clone(),
            staged,
            writes: 0,
            fail_after_writes: self.fail_after_writes,
        }))
    }
}

struct FakeRuleTransaction {
    partitions: Arc<Mutex<HashMap<String, FakePartition>>>,
    domain: DomainRef,
    staged: FakePartition,
    writes: usize,
    fail_after_writes: Option<usize>,
}

impl FakeRuleTransaction {
    fn count_write(&mut self) -> AppResult<()> {
        self.writes += 1;
        if self
            .fail_after_writes
            .is_some_and(|limit| self.writes > limit)
        {
            return Err(AppError::Internal("injected write failure".to_owned()));
        }

        Ok(())
    }
}

#[async_trait]
impl RuleTransaction for FakeRuleTransaction {
    fn domain(&self) -> &DomainRef {
        &self.domain
    }

    async fn add_grant(&mut self, rule: &GrantRule) -> AppResult<WriteOutcome> {
        self.count_write()?;
        if self.staged.grants.contains(rule) {
            return Ok(WriteOutcome::Unchanged);
        }
        self.staged.grants.push(rule.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn remove_grant(&mut self, rule: &GrantRule) -> AppResult<WriteOutcome> {
        self.count_write()?;
        let before = self.staged.grants.len();
        self.staged.grants.retain(|existing| existing != rule);
        Ok(WriteOutcome::from_changed(before != self.staged.grants.len()))
    }

    async fn add_grouping(&mut self, rule: &GroupingRule) -> AppResult<WriteOutcome> {
        self.count_write()?;
        if self.staged.groupings.contains(rule) {
            return Ok(WriteOutcome::Unchanged);
        }
        self.staged.groupings.push(rule.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn remove_grouping(&mut self, rule: &GroupingRule) -> AppResult<WriteOutcome> {
        self.count_write()?;
        let before = self.staged.groupings.len();
        self.staged.groupings.retain(|existing| existing != rule);
        Ok(WriteOutcome::from_changed(
            before != self.staged.groupings.len(),
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
        self.count_write()?;
        let previous = self
            .staged
            .metadata
            .insert(metadata.role_name.clone(), metadata.clone());
        Ok(WriteOutcome::from_changed(
            previous.as_ref() != Some(metadata),
        ))
    }

    async fn remove_role_metadata(&mut self, role_name: &str) -> AppResult<WriteOutcome> {
        self.count_write()?;
        Ok(WriteOutcome::from_changed(
            self.staged.metadata.remove(role_name).is_some(),
        ))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let Self {
            partitions,
            domain,
            staged,
            ..
        } = *self;
        partitions
            .lock()
            .await
            .insert(domain.partition_key(), staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

/// Decision cache fake that records invalidated partitions.
#[derive(Default)]
pub(crate) struct FakeDecisionCache {
    generations: Mutex<HashMap<String, u64>>,
    entries: Mutex<HashMap<(DecisionKey, CacheStamp), bool>>,
    invalidations: Mutex<Vec<String>>,
    unavailable: bool,
    invalidate_delay: Duration,
}

impl FakeDecisionCache {
    /// Cache whose every call fails.
    pub(crate) fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Cache whose invalidation takes `delay` to complete.
    pub(crate) fn slow_invalidation(delay: Duration) -> Self {
        Self {
            invalidate_delay: delay,
            ..Self::default()
        }
    }

    pub(crate) async fn invalidations(&self) -> Vec<String> {
        self.invalidations.lock().await.clone()
    }

    pub(crate) async fn entry_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn ensure_available(&self) -> AppResult<()> {
        if self.unavailable {
            return Err(AppError::Internal("decision cache unavailable".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl DecisionCache for FakeDecisionCache {
    async fn stamp(&self, partitions: &[String]) -> AppResult<CacheStamp> {
        self.ensure_available()?;
        let generations = self.generations.lock().await;
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
        self.ensure_available()?;
        Ok(self
            .entries
            .lock()
            .await
            .get(&(key.clone(), stamp.clone()))
            .copied())
    }

    async fn put(&self, key: DecisionKey, stamp: CacheStamp, allowed: bool) -> AppResult<()> {
        self.ensure_available()?;
        self.entries.lock().await.insert((key, stamp), allowed);
        Ok(())
    }

    async fn invalidate(&self, partition: &str) -> AppResult<()> {
        self.ensure_available()?;
        if !self.invalidate_delay.is_zero() {
            tokio::time::sleep(self.invalidate_delay).await;
        }
        *self
            .generations
            .lock()
            .await
            .entry(partition.to_owned())
            .or_default() += 1;
        self.invalidations.lock().await.push(partition.to_owned());
        Ok(())
    }
}
