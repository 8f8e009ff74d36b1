use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use warden_core::{AppError, AppResult};
use warden_domain::{DomainRef, GrantRule, GroupingRule, Subject};

use crate::{DecisionCache, RoleMetadata, RuleStore, RuleTransaction, WriteOutcome};

/// Boxed future borrowed for the lifetime of a policy transaction.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Domain-scoped transaction handle passed to policy mutations.
///
/// Refuses rules that belong to another partition and counts applied writes
/// so commit only invalidates cached decisions when something changed.
pub struct PolicyTransaction {
    inner: Box<dyn RuleTransaction>,
    domain: DomainRef,
    applied_writes: usize,
}

impl PolicyTransaction {
    /// Returns the domain this transaction writes to.
    #[must_use]
    pub fn domain(&self) -> &DomainRef {
        &self.domain
    }

    /// Returns how many writes changed the store so far.
    #[must_use]
    pub fn applied_writes(&self) -> usize {
        self.applied_writes
    }

    /// Inserts a grant rule.
    pub async fn add_grant(&mut self, rule: &GrantRule) -> AppResult<WriteOutcome> {
        self.ensure_in_partition(rule.domain())?;
        let outcome = self.inner.add_grant(rule).await?;
        Ok(self.record(outcome))
    }

    /// Deletes a grant rule.
    pub async fn remove_grant(&mut self, rule: &GrantRule) -> AppResult<WriteOutcome> {
        self.ensure_in_partition(rule.domain())?;
        let outcome = self.inner.remove_grant(rule).await?;
        Ok(self.record(outcome))
    }

    /// Inserts a grouping rule.
    pub async fn add_grouping(&mut self, rule: &GroupingRule) -> AppResult<WriteOutcome> {
        self.ensure_in_partition(rule.domain())?;
        let outcome = self.inner.add_grouping(rule).await?;
        Ok(self.record(outcome))
    }

    /// Deletes a grouping rule.
    pub async fn remove_grouping(&mut self, rule: &GroupingRule) -> AppResult<WriteOutcome> {
        self.ensure_in_partition(rule.domain())?;
        let outcome = self.inner.remove_grouping(rule).await?;
        Ok(self.record(outcome))
    }

    /// Lists grant rules, observing staged writes.
    pub async fn filter_grants(&mut self, role: Option<&str>) -> AppResult<Vec<GrantRule>> {
        self.inner.filter_grants(role).await
    }

    /// Lists grouping rules, observing staged writes.
    pub async fn filter_groupings(
        &mut self,
        member: Option<&Subject>,
        target: Option<&Subject>,
    ) -> AppResult<Vec<GroupingRule>> {
        self.inner.filter_groupings(member, target).await
    }

    /// Lists role catalog entries, observing staged writes.
    pub async fn list_role_metadata(&mut self) -> AppResult<Vec<RoleMetadata>> {
        self.inner.list_role_metadata().await
    }

    /// Inserts or replaces a role catalog entry.
    pub async fn save_role_metadata(&mut self, metadata: &RoleMetadata) -> AppResult<WriteOutcome> {
        let outcome = self.inner.save_role_metadata(metadata).await?;
        Ok(self.record(outcome))
    }

    /// Deletes a role catalog entry.
    pub async fn remove_role_metadata(&mut self, role_name: &str) -> AppResult<WriteOutcome> {
        let outcome = self.inner.remove_role_metadata(role_name).await?;
        Ok(self.record(outcome))
    }

    fn ensure_in_partition(&self, rule_domain: &DomainRef) -> AppResult<()> {
        if !self.domain.same_partition(rule_domain) {
            return Err(AppError::Validation(format!(
                "rule for domain '{rule_domain}' cannot be written in a transaction on '{}'",
                self.domain
            )));
        }

        Ok(())
    }

    fn record(&mut self, outcome: WriteOutcome) -> WriteOutcome {
        if outcome.is_applied() {
            self.applied_writes += 1;
        }
        outcome
    }
}

/// Store-committed transaction whose cached decisions are not invalidated yet.
#[must_use = "a commit must be settled to invalidate cached decisions"]
pub struct Committed<T> {
    value: T,
    domain: DomainRef,
    changed: bool,
}

impl<T> Committed<T> {
    /// Returns whether the commit changed any rule.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.changed
    }

    fn map<U>(self, apply: impl FnOnce(T) -> U) -> Committed<U> {
        Committed {
            value: apply(self.value),
            domain: self.domain,
            changed: self.changed,
        }
    }
}

/// Opens domain-scoped transactions and invalidates cached decisions after
/// every committed change.
#[derive(Clone)]
pub struct PolicyWriter {
    store: Arc<dyn RuleStore>,
    cache: Option<Arc<dyn DecisionCache>>,
    transaction_timeout: Duration,
}

impl PolicyWriter {
    /// Creates a writer.
    #[must_use]
    pub fn new(
        store: Arc<dyn RuleStore>,
        cache: Option<Arc<dyn DecisionCache>>,
        transaction_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            transaction_timeout,
        }
    }

    /// Returns the underlying rule store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn RuleStore> {
        Arc::clone(&self.store)
    }

    /// Opens a transaction on the domain partition.
    pub async fn begin(&self, domain: &DomainRef) -> AppResult<PolicyTransaction> {
        domain.ensure_partitioned()?;
        let inner = self.store.begin(domain).await?;

        Ok(PolicyTransaction {
            inner,
            domain: domain.clone(),
            applied_writes: 0,
        })
    }

    /// Commits the transaction. Cached decisions of the domain stay valid
    /// until the returned [`Committed`] is settled.
    pub async fn commit(&self, transaction: PolicyTransaction) -> AppResult<Committed<()>> {
        let PolicyTransaction {
            inner,
            domain,
            applied_writes,
        } = transaction;
        inner.commit().await?;

        Ok(Committed {
            value: (),
            domain,
            changed: applied_writes > 0,
        })
    }

    /// Discards the transaction.
    pub async fn rollback(&self, transaction: PolicyTransaction) -> AppResult<()> {
        transaction.inner.rollback().await
    }

    /// Commits on success and rolls back on error, returning the original
    /// result.
    pub async fn finish<T>(
        &self,
        transaction: PolicyTransaction,
        result: AppResult<T>,
    ) -> AppResult<Committed<T>> {
        match result {
            Ok(value) => {
                let committed = self.commit(transaction).await?;
                Ok(committed.map(|()| value))
            }
            Err(error) => {
                let domain = transaction.domain().clone();
                if let Err(rollback_error) = self.rollback(transaction).await {
                    warn!(
                        domain = %domain,
                        error = %rollback_error,
                        "policy transaction rollback failed"
                    );
                }
                Err(error)
            }
        }
    }

    /// Bounds a transactional operation by the configured timeout, then
    /// settles its commit.
    ///
    /// The bound ends at the store commit. On timeout the operation future is
    /// dropped together with its transaction, which discards every staged
    /// write. Cache invalidation runs after the bound, so a committed write is
    /// never reported as timed out and always invalidates before returning.
    pub async fn within_timeout<T, Fut>(&self, domain: &DomainRef, operation: Fut) -> AppResult<T>
    where
        Fut: Future<Output = AppResult<Committed<T>>>,
    {
        let committed = tokio::time::timeout(self.transaction_timeout, operation)
            .await
            .map_err(|_| {
                AppError::Internal(format!(
                    "policy transaction on '{domain}' exceeded {}ms",
                    self.transaction_timeout.as_millis()
                ))
            })??;

        self.settle(committed).await
    }

    /// Invalidates the cached decisions a commit made stale and returns its
    /// value.
    pub async fn settle<T>(&self, committed: Committed<T>) -> AppResult<T> {
        let Committed {
            value,
            domain,
            changed,
        } = committed;

        if changed {
            self.invalidate(&domain).await?;
        }

        Ok(value)
    }

    /// Runs `apply` inside one transaction on `domain`.
    ///
    /// Commits when `apply` succeeds and rolls back when it fails. Only the
    /// target partition is read or written through the handle.
    pub async fn update_domain_policy<T, F>(&self, domain: &DomainRef, apply: F) -> AppResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut PolicyTransaction) -> BoxFuture<'t, AppResult<T>> + Send,
    {
        self.within_timeout(domain, async {
            let mut transaction = self.begin(domain).await?;
            let result = apply(&mut transaction).await;
            self.finish(transaction, result).await
        })
        .await
    }

    /// Hides every cached decision that depends on the domain.
    pub async fn invalidate(&self, domain: &DomainRef) -> AppResult<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };

        cache
            .invalidate(domain.partition_key().as_str())
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "policy for '{domain}' was committed but cached decisions could not be invalidated: {error}"
                ))
            })?;
        info!(domain = %domain, "invalidated cached policy decisions");

        Ok(())
    }
}
