use async_trait::async_trait;

use warden_core::AppResult;
use warden_domain::{DomainRef, DomainType, GrantRule, GroupingRule, Subject};

use super::records::{RoleMetadata, WriteOutcome};

/// Durable, domain-partitioned store of grant and grouping rules.
///
/// Reads are filtered by partition so their cost follows the size of one
/// tenant's policy, never the global rule count.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Lists grant rules of a domain, optionally for one role.
    async fn filter_grants(
        &self,
        domain: &DomainRef,
        role: Option<&str>,
    ) -> AppResult<Vec<GrantRule>>;

    /// Lists grouping rules of a domain, optionally narrowed by member and target.
    async fn filter_groupings(
        &self,
        domain: &DomainRef,
        member: Option<&Subject>,
        target: Option<&Subject>,
    ) -> AppResult<Vec<GroupingRule>>;

    /// Lists role catalog entries of a domain.
    async fn list_role_metadata(&self, domain: &DomainRef) -> AppResult<Vec<RoleMetadata>>;

    /// Lists domains of one type where the subject is a grouping member.
    async fn list_domains_for_member(
        &self,
        member: &Subject,
        domain_type: DomainType,
    ) -> AppResult<Vec<DomainRef>>;

    /// Opens a transaction scoped to one domain partition.
    ///
    /// Transactions on the same partition are serialized; transactions on
    /// different partitions never wait on each other. Dropping the handle
    /// without committing discards every staged write.
    async fn begin(&self, domain: &DomainRef) -> AppResult<Box<dyn RuleTransaction>>;
}

/// Domain-scoped unit of work against a [`RuleStore`].
///
/// Reads issued through the transaction observe its own staged writes.
#[async_trait]
pub trait RuleTransaction: Send {
    /// Returns the domain this transaction is scoped to.
    fn domain(&self) -> &DomainRef;

    /// Inserts a grant rule.
    async fn add_grant(&mut self, rule: &GrantRule) -> AppResult<WriteOutcome>;

    /// Deletes a grant rule.
    async fn remove_grant(&mut self, rule: &GrantRule) -> AppResult<WriteOutcome>;

    /// Inserts a grouping rule.
    async fn add_grouping(&mut self, rule: &GroupingRule) -> AppResult<WriteOutcome>;

    /// Deletes a grouping rule.
    async fn remove_grouping(&mut self, rule: &GroupingRule) -> AppResult<WriteOutcome>;

    /// Lists grant rules of the transaction domain.
    async fn filter_grants(&mut self, role: Option<&str>) -> AppResult<Vec<GrantRule>>;

    /// Lists grouping rules of the transaction domain.
    async fn filter_groupings(
        &mut self,
        member: Option<&Subject>,
        target: Option<&Subject>,
    ) -> AppResult<Vec<GroupingRule>>;

    /// Lists role catalog entries of the transaction domain.
    async fn list_role_metadata(&mut self) -> AppResult<Vec<RoleMetadata>>;

    /// Inserts or replaces a role catalog entry.
    async fn save_role_metadata(&mut self, metadata: &RoleMetadata) -> AppResult<WriteOutcome>;

    /// Deletes a role catalog entry.
    async fn remove_role_metadata(&mut self, role_name: &str) -> AppResult<WriteOutcome>;

    /// Makes every staged write visible.
    async fn commit(self: Box<Self>) -> AppResult<()>;

    /// Discards every staged write.
    async fn rollback(self: Box<Self>) -> AppResult<()>;
}
