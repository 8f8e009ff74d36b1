//! Policy domain entities and invariants.

#![forbid(unsafe_code)]

mod built_in_role;
mod domain_ref;
mod role_graph;
mod rule;
mod subject;
mod template;

pub use built_in_role::BuiltInRole;
pub use domain_ref::{DomainRef, DomainType, GLOBAL_DOMAIN_ID};
pub use role_graph::{
    MAX_TRAVERSAL_NODES, RoleGraph, ancestor_chain, traverse, would_create_cycle,
};
pub use rule::{GrantRule, GroupingRule, Permission, STANDARD_ACTIONS};
pub use subject::{Subject, SubjectKind};
pub use template::{DOMAIN_PLACEHOLDER, PolicyTemplate, TemplateRow, TemplateRules};
