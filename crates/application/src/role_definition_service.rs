use std::collections::BTreeSet;

use tracing::info;
use warden_core::{AppError, AppResult, CallerContext, validate_identifier};
use warden_domain::{BuiltInRole, DomainRef, GrantRule, GroupingRule, Permission, Subject};

use crate::{PolicyTransaction, PolicyView, PolicyWriter, RoleDefinition, RoleGraphResolver, RoleMetadata};

/// Requested shape of a custom role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomRoleInput {
    /// Role name, unique within the domain.
    pub name: String,
    /// Permissions granted directly to the role.
    pub permissions: Vec<Permission>,
    /// Optional parent role whose grants are inherited.
    pub inherits_from: Option<String>,
    /// Optional catalog label. Defaults to the role name.
    pub display_name: Option<String>,
    /// Optional catalog description.
    pub description: Option<String>,
}

/// Lifecycle management for custom roles.
#[derive(Clone)]
pub struct RoleDefinitionService {
    writer: PolicyWriter,
    resolver: RoleGraphResolver,
}

impl RoleDefinitionService {
    /// Creates the service.
    #[must_use]
    pub fn new(writer: PolicyWriter, resolver: RoleGraphResolver) -> Self {
        Self { writer, resolver }
    }

    /// Creates a custom role with its grants, optional parent and catalog entry.
    pub async fn create_role(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        input: CustomRoleInput,
    ) -> AppResult<RoleDefinition> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let name = validate_custom_role(&input)?;

        let definition = self
            .writer
            .within_timeout(&domain, async {
                let mut transaction = self.writer.begin(&domain).await?;
                let result = self.create_in(&mut transaction, &name, &input).await;
                self.writer.finish(transaction, result).await
            })
            .await?;

        info!(
            actor = %caller.subject(),
            domain = %domain,
            role = %name,
            permissions = definition.permissions.len(),
            "created custom role"
        );

        Ok(definition)
    }

    /// Replaces the grants, parent and catalog entry of a custom role.
    pub async fn update_role(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        input: CustomRoleInput,
    ) -> AppResult<RoleDefinition> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let name = validate_identifier("role name", &input.name)?;
        if BuiltInRole::is_reserved(&name) {
            return Err(AppError::DefaultRole(format!(
                "cannot update default role '{name}'"
            )));
        }
        ensure_role_grants_something(&name, &input)?;

        let definition = self
            .writer
            .within_timeout(&domain, async {
                let mut transaction = self.writer.begin(&domain).await?;
                let result = self.update_in(&mut transaction, &name, &input).await;
                self.writer.finish(transaction, result).await
            })
            .await?;

        info!(
            actor = %caller.subject(),
            domain = %domain,
            role = %name,
            "updated custom role"
        );

        Ok(definition)
    }

    /// Deletes a custom role together with every rule that mentions it.
    pub async fn delete_role(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        role_name: &str,
    ) -> AppResult<()> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let name = validate_identifier("role name", role_name)?;
        if BuiltInRole::is_reserved(&name) {
            return Err(AppError::DefaultRole(format!(
                "cannot delete default role '{name}'"
            )));
        }

        let removed_rules = self
            .writer
            .within_timeout(&domain, async {
                let mut transaction = self.writer.begin(&domain).await?;
                let result = self.delete_in(&mut transaction, &name).await;
                self.writer.finish(transaction, result).await
            })
            .await?;

        info!(
            actor = %caller.subject(),
            domain = %domain,
            role = %name,
            removed_rules,
            "deleted custom role"
        );

        Ok(())
    }

    /// Returns the definition of one role.
    pub async fn get_role(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        role_name: &str,
    ) -> AppResult<RoleDefinition> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let view = self.resolver.load(&domain).await?;

        view.role_definition(role_name)
            .ok_or_else(|| AppError::NotFound(format!("role not found: '{role_name}' in '{domain}'")))
    }

    /// Returns the definitions of every role visible in the domain.
    pub async fn list_roles(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
    ) -> AppResult<Vec<RoleDefinition>> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let view = self.resolver.load(&domain).await?;

        Ok(view
            .role_names()
            .iter()
            .filter_map(|role| view.role_definition(role))
            .collect())
    }

    async fn create_in(
        &self,
        transaction: &mut PolicyTransaction,
        name: &str,
        input: &CustomRoleInput,
    ) -> AppResult<RoleDefinition> {
        let view = self.resolver.load_for_update(transaction).await?;
        let domain = transaction.domain().clone();

        if view.local().references_role(name) {
            return Err(AppError::Conflict(format!(
                "role '{name}' already exists in domain '{domain}'"
            )));
        }
        if let Some(parent) = &input.inherits_from {
            ensure_valid_parent(&view, &domain, name, parent)?;
        }

        for permission in &input.permissions {
            transaction
                .add_grant(&GrantRule::new(name, domain.clone(), permission.clone())?)
                .await?;
        }
        if let Some(parent) = &input.inherits_from {
            transaction
                .add_grouping(&GroupingRule::role_inheritance(name, parent, domain.clone())?)
                .await?;
        }
        transaction
            .save_role_metadata(&metadata_for(name, input))
            .await?;

        self.definition_after_write(transaction, name).await
    }

    async fn update_in(
        &self,
        transaction: &mut PolicyTransaction,
        name: &str,
        input: &CustomRoleInput,
    ) -> AppResult<RoleDefinition> {
        let view = self.resolver.load_for_update(transaction).await?;
        let domain = transaction.domain().clone();

        if view.is_readonly(name) {
            return Err(AppError::DefaultRole(format!(
                "cannot update default role '{name}'"
            )));
        }
        if !view.local().defines_role(name) {
            return Err(AppError::NotFound(format!(
                "role '{name}' not found in domain '{domain}'"
            )));
        }

        let current_parent = view.local().graph().parent_role(name).map(str::to_owned);
        if input.inherits_from != current_parent
            && let Some(parent) = &input.inherits_from
        {
            ensure_valid_parent(&view, &domain, name, parent)?;
        }

        let current: BTreeSet<Permission> = view
            .local()
            .grants_of(name)
            .cloned()
            .unwrap_or_default();
        let desired: BTreeSet<Permission> = input.permissions.iter().cloned().collect();

        for permission in current.difference(&desired) {
            transaction
                .remove_grant(&GrantRule::new(name, domain.clone(), permission.clone())?)
                .await?;
        }
        for permission in desired.difference(&current) {
            transaction
                .add_grant(&GrantRule::new(name, domain.clone(), permission.clone())?)
                .await?;
        }

        if input.inherits_from != current_parent {
            if let Some(parent) = &current_parent {
                transaction
                    .remove_grouping(&GroupingRule::role_inheritance(name, parent, domain.clone())?)
                    .await?;
            }
            if let Some(parent) = &input.inherits_from {
                transaction
                    .add_grouping(&GroupingRule::role_inheritance(name, parent, domain.clone())?)
                    .await?;
            }
        }

        transaction
            .save_role_metadata(&metadata_for(name, input))
            .await?;

        self.definition_after_write(transaction, name).await
    }

    async fn delete_in(&self, transaction: &mut PolicyTransaction, name: &str) -> AppResult<usize> {
        let view = self.resolver.load_for_update(transaction).await?;

        if view.is_readonly(name) {
            return Err(AppError::DefaultRole(format!(
                "cannot delete default role '{name}'"
            )));
        }
        if !view.local().references_role(name) {
            return Err(AppError::NotFound(format!(
                "role '{name}' not found in domain '{}'",
                transaction.domain()
            )));
        }

        let role = Subject::role(name)?;
        let mut removed_rules = 0;

        for rule in transaction.filter_grants(Some(name)).await? {
            if transaction.remove_grant(&rule).await?.is_applied() {
                removed_rules += 1;
            }
        }

        let outgoing = transaction.filter_groupings(Some(&role), None).await?;
        let incoming = transaction.filter_groupings(None, Some(&role)).await?;
        for rule in outgoing.iter().chain(&incoming) {
            if transaction.remove_grouping(rule).await?.is_applied() {
                removed_rules += 1;
            }
        }

        transaction.remove_role_metadata(name).await?;

        Ok(removed_rules)
    }

    async fn definition_after_write(
        &self,
        transaction: &mut PolicyTransaction,
        name: &str,
    ) -> AppResult<RoleDefinition> {
        self.resolver
            .load_for_update(transaction)
            .await?
            .role_definition(name)
            .ok_or_else(|| AppError::Internal(format!("role '{name}' vanished while being written")))
    }
}

fn validate_custom_role(input: &CustomRoleInput) -> AppResult<String> {
    let name = validate_identifier("role name", &input.name)?;
    if BuiltInRole::is_reserved(&name) {
        return Err(AppError::Validation(format!(
            "role name '{name}' is reserved for a default role"
        )));
    }
    ensure_role_grants_something(&name, input)?;

    Ok(name)
}

fn ensure_role_grants_something(name: &str, input: &CustomRoleInput) -> AppResult<()> {
    if input.permissions.is_empty() && input.inherits_from.is_none() {
        return Err(AppError::Validation(format!(
            "role '{name}' needs at least one permission or a parent role"
        )));
    }

    if let Some(parent) = &input.inherits_from {
        validate_identifier("parent role", parent)?;
    }

    Ok(())
}

fn ensure_valid_parent(view: &PolicyView, domain: &DomainRef, name: &str, parent: &str) -> AppResult<()> {
    if !view.role_exists(parent) {
        return Err(AppError::NotFound(format!(
            "parent role '{parent}' not found in domain '{domain}'"
        )));
    }
    if view.would_create_cycle(name, parent) {
        return Err(AppError::Conflict(format!(
            "role '{name}' cannot inherit from '{parent}': inheritance cycle"
        )));
    }

    Ok(())
}

fn metadata_for(name: &str, input: &CustomRoleInput) -> RoleMetadata {
    RoleMetadata::custom(
        name,
        input.display_name.as_deref(),
        input.description.as_deref(),
    )
}
