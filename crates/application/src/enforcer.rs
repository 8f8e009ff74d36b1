use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};
use warden_core::{AppError, AppResult};
use warden_domain::{DomainRef, Permission, Subject};

use crate::{CacheStamp, DecisionCache, DecisionKey, RoleGraphResolver};

/// Decides `(subject, domain, resource, action)` requests.
///
/// Evaluation is two-level: collect the roles reachable from the subject in
/// the domain, then look for a grant matching the resource and action. There
/// is no explicit deny.
#[derive(Clone)]
pub struct Enforcer {
    resolver: RoleGraphResolver,
    cache: Option<Arc<dyn DecisionCache>>,
}

impl Enforcer {
    /// Creates an enforcer. Passing no cache disables decision caching.
    #[must_use]
    pub fn new(resolver: RoleGraphResolver, cache: Option<Arc<dyn DecisionCache>>) -> Self {
        Self { resolver, cache }
    }

    /// Returns whether the subject may perform `action` on `resource` in the
    /// domain. Unprovisioned domains deny everything.
    pub async fn enforce(
        &self,
        subject_id: &str,
        domain: &DomainRef,
        resource: &str,
        action: &str,
    ) -> AppResult<bool> {
        let subject = Subject::user(subject_id)?;
        let permission = Permission::new(resource, action)?;
        domain.ensure_partitioned()?;

        let Some(cache) = &self.cache else {
            return self.evaluate(&subject, domain, &permission).await;
        };

        let key = DecisionKey {
            subject: subject_id.to_owned(),
            partition: domain.partition_key(),
            resource: permission.resource().to_owned(),
            action: permission.action().to_owned(),
        };
        let stamp = self.read_stamp(cache.as_ref(), domain).await;

        if let Some(stamp) = &stamp {
            match cache.get(&key, stamp).await {
                Ok(Some(allowed)) => return Ok(allowed),
                Ok(None) => {}
                Err(error) => warn!(
                    domain = %domain,
                    error = %error,
                    "decision cache read failed, evaluating from store"
                ),
            }
        }

        let allowed = self.evaluate(&subject, domain, &permission).await?;

        if let Some(stamp) = stamp
            && let Err(error) = cache.put(key, stamp, allowed).await
        {
            warn!(domain = %domain, error = %error, "decision cache write failed");
        }

        Ok(allowed)
    }

    /// Fails with [`AppError::Forbidden`] when the request is denied.
    pub async fn require(
        &self,
        subject_id: &str,
        domain: &DomainRef,
        resource: &str,
        action: &str,
    ) -> AppResult<()> {
        if self.enforce(subject_id, domain, resource, action).await? {
            return Ok(());
        }

        Err(AppError::Forbidden(format!(
            "subject '{subject_id}' may not {action} '{resource}' in domain '{domain}'"
        )))
    }

    /// Returns every role the subject holds in the domain, directly, through
    /// groups or through inheritance.
    pub async fn implicit_roles(
        &self,
        subject_id: &str,
        domain: &DomainRef,
    ) -> AppResult<BTreeSet<String>> {
        let subject = Subject::user(subject_id)?;
        self.resolver.reachable_roles(&subject, domain).await
    }

    /// Returns every permission the subject holds in the domain.
    pub async fn implicit_permissions(
        &self,
        subject_id: &str,
        domain: &DomainRef,
    ) -> AppResult<BTreeSet<Permission>> {
        let subject = Subject::user(subject_id)?;
        let view = self.resolver.load(domain).await?;

        Ok(view
            .reachable_roles(&subject)
            .iter()
            .flat_map(|role| view.direct_permissions(role))
            .collect())
    }

    async fn evaluate(
        &self,
        subject: &Subject,
        domain: &DomainRef,
        permission: &Permission,
    ) -> AppResult<bool> {
        let view = self.resolver.load(domain).await?;
        let allowed = view.is_allowed(subject, permission.resource(), permission.action());
        debug!(
            subject = %subject,
            domain = %domain,
            permission = %permission,
            allowed,
            "evaluated policy decision"
        );

        Ok(allowed)
    }

    async fn read_stamp(&self, cache: &dyn DecisionCache, domain: &DomainRef) -> Option<CacheStamp> {
        let mut partitions = vec![domain.partition_key()];
        if let Some(catalog) = domain.fallback_catalog() {
            partitions.push(catalog.partition_key());
        }

        match cache.stamp(&partitions).await {
            Ok(stamp) => Some(stamp),
            Err(error) => {
                warn!(
                    domain = %domain,
                    error = %error,
                    "decision cache unavailable, evaluating from store"
                );
                None
            }
        }
    }
}
