use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use warden_core::AppResult;
use warden_domain::{
    BuiltInRole, DomainRef, DomainType, GrantRule, GroupingRule, Permission, RoleGraph, Subject,
    ancestor_chain, traverse, would_create_cycle,
};

use crate::{PolicyTransaction, RoleMetadata, RuleStore};

/// Role definition rebuilt from the rules of one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDefinition {
    /// Role name.
    pub name: String,
    /// Domain type the role belongs to.
    pub domain_type: DomainType,
    /// Permissions granted to the role itself.
    pub permissions: BTreeSet<Permission>,
    /// Own permissions plus every permission inherited through the parent chain.
    pub effective_permissions: BTreeSet<Permission>,
    /// Direct parent, materialized one level deep.
    pub inherits_from: Option<Box<RoleDefinition>>,
    /// Built-in roles are readonly.
    pub readonly: bool,
    /// Human-readable label.
    pub display_name: String,
    /// Optional description.
    pub description: Option<String>,
}

/// Snapshot of every rule stored in one domain partition.
#[derive(Debug, Clone)]
pub struct DomainPolicy {
    domain: DomainRef,
    grants: BTreeMap<String, BTreeSet<Permission>>,
    graph: RoleGraph,
    metadata: BTreeMap<String, RoleMetadata>,
}

impl DomainPolicy {
    /// Builds a snapshot from the partition's rules.
    #[must_use]
    pub fn from_rules(
        domain: DomainRef,
        grants: Vec<GrantRule>,
        groupings: &[GroupingRule],
        metadata: Vec<RoleMetadata>,
    ) -> Self {
        let mut grants_by_role: BTreeMap<String, BTreeSet<Permission>> = BTreeMap::new();
        for rule in grants {
            grants_by_role
                .entry(rule.role().to_owned())
                .or_default()
                .insert(rule.permission().clone());
        }

        Self {
            domain,
            grants: grants_by_role,
            graph: RoleGraph::from_rules(groupings),
            metadata: metadata
                .into_iter()
                .map(|entry| (entry.role_name.clone(), entry))
                .collect(),
        }
    }

    /// Returns the snapshot domain.
    #[must_use]
    pub fn domain(&self) -> &DomainRef {
        &self.domain
    }

    /// Returns the grouping graph.
    #[must_use]
    pub fn graph(&self) -> &RoleGraph {
        &self.graph
    }

    /// Returns the permissions granted directly to a role.
    #[must_use]
    pub fn grants_of(&self, role: &str) -> Option<&BTreeSet<Permission>> {
        self.grants.get(role)
    }

    /// Returns the stored catalog entry of a role.
    #[must_use]
    pub fn metadata_of(&self, role: &str) -> Option<&RoleMetadata> {
        self.metadata.get(role)
    }

    /// Returns whether this partition defines the role: it carries grants,
    /// a parent edge or a catalog entry for it.
    #[must_use]
    pub fn defines_role(&self, role: &str) -> bool {
        self.grants.contains_key(role)
            || self.graph.parent_role(role).is_some()
            || self.metadata.contains_key(role)
    }

    /// Returns whether any rule of this partition mentions the role.
    #[must_use]
    pub fn references_role(&self, role: &str) -> bool {
        self.defines_role(role) || self.graph.contains(&Subject::Role(role.to_owned()))
    }

    /// Returns whether the partition holds no rules at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.graph.edge_count() == 0 && self.metadata.is_empty()
    }

    fn role_names(&self) -> impl Iterator<Item = &str> {
        self.grants
            .keys()
            .map(String::as_str)
            .chain(self.metadata.keys().map(String::as_str))
            .chain(self.graph.role_names())
    }
}

/// Policy of a domain together with the global catalog it falls back to.
#[derive(Debug, Clone)]
pub struct PolicyView {
    local: DomainPolicy,
    catalog: Option<DomainPolicy>,
}

impl PolicyView {
    /// Creates a view over a domain and its optional fallback catalog.
    #[must_use]
    pub fn new(local: DomainPolicy, catalog: Option<DomainPolicy>) -> Self {
        Self { local, catalog }
    }

    /// Returns the domain's own policy.
    #[must_use]
    pub fn local(&self) -> &DomainPolicy {
        &self.local
    }

    /// Returns the fallback catalog policy, if any.
    #[must_use]
    pub fn catalog(&self) -> Option<&DomainPolicy> {
        self.catalog.as_ref()
    }

    /// Returns the partition a role's grants and parent edge are read from.
    ///
    /// Roles defined by the domain itself shadow the catalog.
    #[must_use]
    pub fn source_for(&self, role: &str) -> &DomainPolicy {
        if self.local.defines_role(role) {
            return &self.local;
        }

        match &self.catalog {
            Some(catalog) if catalog.defines_role(role) => catalog,
            _ => &self.local,
        }
    }

    /// Returns every role reachable from the subject, through groups and
    /// inheritance.
    #[must_use]
    pub fn reachable_roles(&self, subject: &Subject) -> BTreeSet<String> {
        let reached = traverse(subject, |node| {
            let graph = match node {
                Subject::Role(role) => self.source_for(role).graph(),
                Subject::User(_) | Subject::Group(_) => self.local.graph(),
            };
            graph.targets(node).cloned().collect::<Vec<_>>()
        });

        reached
            .into_iter()
            .filter_map(|node| match node {
                Subject::Role(role) => Some(role),
                Subject::User(_) | Subject::Group(_) => None,
            })
            .collect()
    }

    /// Returns the direct parent of a role.
    #[must_use]
    pub fn parent_role(&self, role: &str) -> Option<String> {
        self.source_for(role)
            .graph()
            .parent_role(role)
            .map(str::to_owned)
    }

    /// Returns the parent chain of a role, nearest first.
    #[must_use]
    pub fn ancestors(&self, role: &str) -> Vec<String> {
        ancestor_chain(role, |current| self.parent_role(current))
    }

    /// Returns the permissions granted to the role itself.
    #[must_use]
    pub fn direct_permissions(&self, role: &str) -> BTreeSet<Permission> {
        self.source_for(role)
            .grants_of(role)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the role's permissions plus those of every ancestor.
    #[must_use]
    pub fn inherited_permissions(&self, role: &str) -> BTreeSet<Permission> {
        let mut permissions = self.direct_permissions(role);
        for ancestor in self.ancestors(role) {
            permissions.extend(self.direct_permissions(ancestor.as_str()));
        }
        permissions
    }

    /// Returns whether any role reachable from the subject is granted
    /// `(resource, action)`.
    #[must_use]
    pub fn is_allowed(&self, subject: &Subject, resource: &str, action: &str) -> bool {
        self.reachable_roles(subject).iter().any(|role| {
            self.source_for(role).grants_of(role).is_some_and(|grants| {
                grants.iter().any(|permission| {
                    permission.resource() == resource && permission.action() == action
                })
            })
        })
    }

    /// Returns whether the role resolves in this domain or its catalog.
    #[must_use]
    pub fn role_exists(&self, role: &str) -> bool {
        self.local.references_role(role)
            || self
                .catalog
                .as_ref()
                .is_some_and(|catalog| catalog.references_role(role))
    }

    /// Returns whether the role is protected from mutation.
    #[must_use]
    pub fn is_readonly(&self, role: &str) -> bool {
        BuiltInRole::is_reserved(role)
            || self
                .source_for(role)
                .metadata_of(role)
                .is_some_and(|metadata| metadata.is_readonly)
    }

    /// Returns whether making `child` inherit from `parent` would close a cycle.
    #[must_use]
    pub fn would_create_cycle(&self, child: &str, parent: &str) -> bool {
        would_create_cycle(child, parent, |current| self.parent_role(current))
    }

    /// Returns every role name visible in the domain.
    #[must_use]
    pub fn role_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.local.role_names().map(str::to_owned).collect();
        if let Some(catalog) = &self.catalog {
            names.extend(catalog.role_names().map(str::to_owned));
        }
        names
    }

    /// Rebuilds the definition of a role.
    #[must_use]
    pub fn role_definition(&self, role: &str) -> Option<RoleDefinition> {
        if !self.role_exists(role) {
            return None;
        }

        Some(self.definition_at_depth(role, 0))
    }

    fn definition_at_depth(&self, role: &str, depth: usize) -> RoleDefinition {
        let inherits_from = match depth {
            0 => self
                .parent_role(role)
                .map(|parent| Box::new(self.definition_at_depth(parent.as_str(), depth + 1))),
            _ => None,
        };
        let metadata = self.source_for(role).metadata_of(role);

        RoleDefinition {
            name: role.to_owned(),
            domain_type: self.local.domain().domain_type(),
            permissions: self.direct_permissions(role),
            effective_permissions: self.inherited_permissions(role),
            inherits_from,
            readonly: self.is_readonly(role),
            display_name: metadata
                .map(|metadata| metadata.display_name.clone())
                .or_else(|| {
                    BuiltInRole::from_name(role).map(|built_in| built_in.display_name().to_owned())
                })
                .unwrap_or_else(|| role.to_owned()),
            description: metadata.and_then(|metadata| metadata.description.clone()),
        }
    }
}

/// Loads domain policies and resolves role reachability and inheritance.
#[derive(Clone)]
pub struct RoleGraphResolver {
    store: Arc<dyn RuleStore>,
}

impl RoleGraphResolver {
    /// Creates a resolver over a rule store.
    #[must_use]
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    /// Loads a domain's policy and, for canvases with organization context,
    /// the organization's global catalog.
    pub async fn load(&self, domain: &DomainRef) -> AppResult<PolicyView> {
        domain.ensure_partitioned()?;
        let local = self.load_policy(domain).await?;
        let catalog = match domain.fallback_catalog() {
            Some(catalog) => Some(self.load_policy(&catalog).await?),
            None => None,
        };

        Ok(PolicyView::new(local, catalog))
    }

    /// Loads a view whose local policy includes the transaction's staged
    /// writes.
    pub async fn load_for_update(&self, transaction: &mut PolicyTransaction) -> AppResult<PolicyView> {
        let domain = transaction.domain().clone();
        let grants = transaction.filter_grants(None).await?;
        let groupings = transaction.filter_groupings(None, None).await?;
        let metadata = transaction.list_role_metadata().await?;
        let local = DomainPolicy::from_rules(domain.clone(), grants, &groupings, metadata);

        let catalog = match domain.fallback_catalog() {
            Some(catalog) => Some(self.load_policy(&catalog).await?),
            None => None,
        };

        Ok(PolicyView::new(local, catalog))
    }

    /// Returns every role reachable from the subject in the domain.
    pub async fn reachable_roles(
        &self,
        subject: &Subject,
        domain: &DomainRef,
    ) -> AppResult<BTreeSet<String>> {
        Ok(self.load(domain).await?.reachable_roles(subject))
    }

    /// Returns a role's permissions together with every inherited one.
    pub async fn inherited_permissions(
        &self,
        role: &str,
        domain: &DomainRef,
    ) -> AppResult<BTreeSet<Permission>> {
        Ok(self.load(domain).await?.inherited_permissions(role))
    }

    async fn load_policy(&self, domain: &DomainRef) -> AppResult<DomainPolicy> {
        let grants = self.store.filter_grants(domain, None).await?;
        let groupings = self.store.filter_groupings(domain, None, None).await?;
        let metadata = self.store.list_role_metadata(domain).await?;

        Ok(DomainPolicy::from_rules(
            domain.clone(),
            grants,
            &groupings,
            metadata,
        ))
    }
}
