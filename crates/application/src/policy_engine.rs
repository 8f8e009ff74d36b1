use std::sync::Arc;
use std::time::Duration;

use crate::{
    DecisionCache, Enforcer, GroupService, PolicyTemplates, PolicyWriter, RoleAssignmentService,
    RoleDefinitionService, RoleGraphResolver, RuleStore, TenantProvisioner,
};

/// Default bound on a single policy transaction.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime options of a [`PolicyEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Serve repeated decisions from the decision cache.
    pub decision_cache_enabled: bool,
    /// Upper bound on any single policy transaction.
    pub transaction_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decision_cache_enabled: true,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }
}

/// Explicitly constructed handle wiring every policy service around one
/// rule store and an optional decision cache.
#[derive(Clone)]
pub struct PolicyEngine {
    writer: PolicyWriter,
    resolver: RoleGraphResolver,
    enforcer: Enforcer,
    provisioner: TenantProvisioner,
    roles: RoleDefinitionService,
    assignments: RoleAssignmentService,
    groups: GroupService,
}

impl PolicyEngine {
    /// Creates an engine. The cache is ignored when caching is disabled.
    #[must_use]
    pub fn new(
        store: Arc<dyn RuleStore>,
        cache: Option<Arc<dyn DecisionCache>>,
        templates: PolicyTemplates,
        config: EngineConfig,
    ) -> Self {
        let cache = cache.filter(|_| config.decision_cache_enabled);
        let writer = PolicyWriter::new(Arc::clone(&store), cache.clone(), config.transaction_timeout);
        let resolver = RoleGraphResolver::new(store);

        Self {
            enforcer: Enforcer::new(resolver.clone(), cache),
            provisioner: TenantProvisioner::new(writer.clone(), templates),
            roles: RoleDefinitionService::new(writer.clone(), resolver.clone()),
            assignments: RoleAssignmentService::new(writer.clone(), resolver.clone()),
            groups: GroupService::new(writer.clone(), resolver.clone()),
            writer,
            resolver,
        }
    }

    /// Returns the transaction opener.
    #[must_use]
    pub fn writer(&self) -> &PolicyWriter {
        &self.writer
    }

    /// Returns the role graph resolver.
    #[must_use]
    pub fn resolver(&self) -> &RoleGraphResolver {
        &self.resolver
    }

    /// Returns the enforcer.
    #[must_use]
    pub fn enforcer(&self) -> &Enforcer {
        &self.enforcer
    }

    /// Returns the tenant provisioner.
    #[must_use]
    pub fn provisioner(&self) -> &TenantProvisioner {
        &self.provisioner
    }

    /// Returns the custom role service.
    #[must_use]
    pub fn roles(&self) -> &RoleDefinitionService {
        &self.roles
    }

    /// Returns the role assignment service.
    #[must_use]
    pub fn assignments(&self) -> &RoleAssignmentService {
        &self.assignments
    }

    /// Returns the group service.
    #[must_use]
    pub fn groups(&self) -> &GroupService {
        &self.groups
    }
}
