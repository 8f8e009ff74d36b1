use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use warden_core::{AppError, AppResult, CallerContext};
use warden_domain::{DomainRef, GroupingRule, Subject};

use crate::{PolicyTransaction, PolicyWriter, RoleGraphResolver, RuleStore, WriteOutcome};

/// Named group of users carrying one role in a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    /// Group name, unique within the domain.
    pub name: String,
    /// Owning domain.
    pub domain: DomainRef,
    /// Role every member receives.
    pub role: String,
}

/// Manages groups and their memberships.
#[derive(Clone)]
pub struct GroupService {
    writer: PolicyWriter,
    resolver: RoleGraphResolver,
    store: Arc<dyn RuleStore>,
}

impl GroupService {
    /// Creates the service.
    #[must_use]
    pub fn new(writer: PolicyWriter, resolver: RoleGraphResolver) -> Self {
        let store = writer.store();
        Self {
            writer,
            resolver,
            store,
        }
    }

    /// Creates a group carrying `role`.
    pub async fn create_group(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        group_name: &str,
        role: &str,
    ) -> AppResult<Group> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let rule = GroupingRule::group_role(group_name, role, domain.clone())?;

        self.writer
            .within_timeout(&domain, async {
                let mut transaction = self.writer.begin(&domain).await?;
                let result = self.create_in(&mut transaction, &rule).await;
                self.writer.finish(transaction, result).await
            })
            .await?;

        info!(
            actor = %caller.subject(),
            domain = %domain,
            group = %group_name,
            role = %role,
            "created group"
        );

        Ok(Group {
            name: rule.member().name().to_owned(),
            domain,
            role: rule.target().name().to_owned(),
        })
    }

    /// Adds a user to an existing group. Adding a member twice is a no-op.
    pub async fn add_user_to_group(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        group_name: &str,
        user_id: &str,
    ) -> AppResult<WriteOutcome> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let rule = GroupingRule::group_membership(user_id, group_name, domain.clone())?;

        let outcome = self
            .writer
            .within_timeout(&domain, async {
                let mut transaction = self.writer.begin(&domain).await?;
                let result: AppResult<WriteOutcome> = async {
                    current_group_role(&mut transaction, rule.target()).await?;
                    transaction.add_grouping(&rule).await
                }
                .await;
                self.writer.finish(transaction, result).await
            })
            .await?;

        info!(
            actor = %caller.subject(),
            domain = %domain,
            group = %group_name,
            user_id = %user_id,
            changed = outcome.is_applied(),
            "added user to group"
        );

        Ok(outcome)
    }

    /// Removes a user from an existing group. Removing a non-member is a no-op.
    pub async fn remove_user_from_group(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        group_name: &str,
        user_id: &str,
    ) -> AppResult<WriteOutcome> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let rule = GroupingRule::group_membership(user_id, group_name, domain.clone())?;

        let outcome = self
            .writer
            .within_timeout(&domain, async {
                let mut transaction = self.writer.begin(&domain).await?;
                let result: AppResult<WriteOutcome> = async {
                    current_group_role(&mut transaction, rule.target()).await?;
                    transaction.remove_grouping(&rule).await
                }
                .await;
                self.writer.finish(transaction, result).await
            })
            .await?;

        info!(
            actor = %caller.subject(),
            domain = %domain,
            group = %group_name,
            user_id = %user_id,
            changed = outcome.is_applied(),
            "removed user from group"
        );

        Ok(outcome)
    }

    /// Points an existing group at another role.
    pub async fn update_group_role(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        group_name: &str,
        role: &str,
    ) -> AppResult<Group> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let rule = GroupingRule::group_role(group_name, role, domain.clone())?;

        self.writer
            .within_timeout(&domain, async {
                let mut transaction = self.writer.begin(&domain).await?;
                let result = self.update_role_in(&mut transaction, &rule).await;
                self.writer.finish(transaction, result).await
            })
            .await?;

        info!(
            actor = %caller.subject(),
            domain = %domain,
            group = %group_name,
            role = %role,
            "updated group role"
        );

        Ok(Group {
            name: rule.member().name().to_owned(),
            domain,
            role: rule.target().name().to_owned(),
        })
    }

    /// Deletes a group: memberships first, then its role edge.
    pub async fn delete_group(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        group_name: &str,
    ) -> AppResult<()> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let group = Subject::group(group_name)?;

        let removed_members = self
            .writer
            .within_timeout(&domain, async {
                let mut transaction = self.writer.begin(&domain).await?;
                let result = delete_in(&mut transaction, &group).await;
                self.writer.finish(transaction, result).await
            })
            .await?;

        info!(
            actor = %caller.subject(),
            domain = %domain,
            group = %group_name,
            removed_members,
            "deleted group"
        );

        Ok(())
    }

    /// Lists the members of a group.
    pub async fn get_group_users(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        group_name: &str,
    ) -> AppResult<Vec<String>> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let group = Subject::group(group_name)?;
        self.stored_group_role(&domain, &group).await?;

        let mut users: Vec<String> = self
            .store
            .filter_groupings(&domain, None, Some(&group))
            .await?
            .iter()
            .filter_map(|rule| match rule.member() {
                Subject::User(user_id) => Some(user_id.clone()),
                Subject::Group(_) | Subject::Role(_) => None,
            })
            .collect();
        users.sort();

        Ok(users)
    }

    /// Lists every group of the domain.
    pub async fn get_groups(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
    ) -> AppResult<Vec<Group>> {
        let domain = domain.resolve_with(caller.organization_id())?;

        let mut groups: Vec<Group> = self
            .store
            .filter_groupings(&domain, None, None)
            .await?
            .iter()
            .filter_map(|rule| match (rule.member(), rule.target()) {
                (Subject::Group(name), Subject::Role(role)) => Some(Group {
                    name: name.clone(),
                    domain: domain.clone(),
                    role: role.clone(),
                }),
                _ => None,
            })
            .collect();
        groups.sort_by(|left, right| left.name.cmp(&right.name));

        Ok(groups)
    }

    /// Returns the role a group carries.
    pub async fn get_group_role(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        group_name: &str,
    ) -> AppResult<String> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let group = Subject::group(group_name)?;
        self.stored_group_role(&domain, &group).await
    }

    async fn stored_group_role(&self, domain: &DomainRef, group: &Subject) -> AppResult<String> {
        self.store
            .filter_groupings(domain, Some(group), None)
            .await?
            .iter()
            .find_map(|rule| rule.target().as_role().map(str::to_owned))
            .ok_or_else(|| missing_group(group, domain))
    }

    async fn create_in(
        &self,
        transaction: &mut PolicyTransaction,
        rule: &GroupingRule,
    ) -> AppResult<()> {
        let group = rule.member();
        if !transaction.filter_groupings(Some(group), None).await?.is_empty() {
            return Err(AppError::Conflict(format!(
                "group '{}' already exists in domain '{}'",
                group.name(),
                transaction.domain()
            )));
        }

        self.ensure_role_exists(transaction, rule.target()).await?;
        transaction.add_grouping(rule).await?;

        Ok(())
    }

    async fn update_role_in(
        &self,
        transaction: &mut PolicyTransaction,
        rule: &GroupingRule,
    ) -> AppResult<()> {
        current_group_role(transaction, rule.member()).await?;
        self.ensure_role_exists(transaction, rule.target()).await?;

        for existing in transaction.filter_groupings(Some(rule.member()), None).await? {
            if existing != *rule {
                transaction.remove_grouping(&existing).await?;
            }
        }
        transaction.add_grouping(rule).await?;

        Ok(())
    }

    async fn ensure_role_exists(
        &self,
        transaction: &mut PolicyTransaction,
        role: &Subject,
    ) -> AppResult<()> {
        let view = self.resolver.load_for_update(transaction).await?;
        if !view.role_exists(role.name()) {
            return Err(AppError::NotFound(format!(
                "role '{}' not found in domain '{}'",
                role.name(),
                transaction.domain()
            )));
        }

        Ok(())
    }
}

async fn current_group_role(
    transaction: &mut PolicyTransaction,
    group: &Subject,
) -> AppResult<String> {
    transaction
        .filter_groupings(Some(group), None)
        .await?
        .iter()
        .find_map(|rule| rule.target().as_role().map(str::to_owned))
        .ok_or_else(|| missing_group(group, transaction.domain()))
}

async fn delete_in(transaction: &mut PolicyTransaction, group: &Subject) -> AppResult<usize> {
    current_group_role(transaction, group).await?;

    let mut removed_members = 0;
    for membership in transaction.filter_groupings(None, Some(group)).await? {
        if transaction.remove_grouping(&membership).await?.is_applied() {
            removed_members += 1;
        }
    }
    for role_edge in transaction.filter_groupings(Some(group), None).await? {
        transaction.remove_grouping(&role_edge).await?;
    }

    Ok(removed_members)
}

fn missing_group(group: &Subject, domain: &DomainRef) -> AppError {
    AppError::NotFound(format!(
        "group '{}' does not exist in domain '{domain}'",
        group.name()
    ))
}

#[cfg(test)]
mod tests;
