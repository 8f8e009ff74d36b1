//! Application services and ports of the policy engine.

#![forbid(unsafe_code)]

mod enforcer;
mod group_service;
mod policy_engine;
mod policy_ports;
mod policy_writer;
mod role_assignment_service;
mod role_definition_service;
mod role_resolver;
mod tenant_provisioner;

#[cfg(test)]
mod test_support;

pub use enforcer::Enforcer;
pub use group_service::{Group, GroupService};
pub use policy_engine::{DEFAULT_TRANSACTION_TIMEOUT, EngineConfig, PolicyEngine};
pub use policy_ports::{
    CacheStamp, DecisionCache, DecisionKey, RoleMetadata, RuleStore, RuleTransaction,
    WriteOutcome,
};
pub use policy_writer::{BoxFuture, Committed, PolicyTransaction, PolicyWriter};
pub use role_assignment_service::{RoleAssignment, RoleAssignmentService};
pub use role_definition_service::{CustomRoleInput, RoleDefinitionService};
pub use role_resolver::{DomainPolicy, PolicyView, RoleDefinition, RoleGraphResolver};
pub use tenant_provisioner::{PolicyTemplates, ProvisioningSummary, TenantProvisioner};
