use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use warden_core::{AppError, AppResult, CallerContext};
use warden_domain::{DomainRef, DomainType, GroupingRule, Subject};

use crate::{PolicyTransaction, PolicyWriter, RoleGraphResolver, RuleStore, WriteOutcome};

/// Direct role held by a user in a domain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RoleAssignment {
    /// User subject id.
    pub user_id: String,
    /// Assigned role.
    pub role: String,
}

/// Assigns roles to users and lists who holds what.
#[derive(Clone)]
pub struct RoleAssignmentService {
    writer: PolicyWriter,
    resolver: RoleGraphResolver,
    store: Arc<dyn RuleStore>,
}

impl RoleAssignmentService {
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

    /// Gives the user a role in the domain. Assigning a held role is a no-op.
    pub async fn assign_role(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        user_id: &str,
        role: &str,
    ) -> AppResult<WriteOutcome> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let rule = GroupingRule::role_assignment(user_id, role, domain.clone())?;

        let outcome = self
            .writer
            .within_timeout(&domain, async {
                let mut transaction = self.writer.begin(&domain).await?;
                let result = self.assign_in(&mut transaction, &rule).await;
                self.writer.finish(transaction, result).await
            })
            .await?;

        if outcome.is_applied() {
            info!(
                actor = %caller.subject(),
                domain = %domain,
                user_id = %user_id,
                role = %role,
                "assigned role"
            );
        }

        Ok(outcome)
    }

    /// Removes a directly assigned role. Removing an absent role is a no-op.
    pub async fn remove_role(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        user_id: &str,
        role: &str,
    ) -> AppResult<WriteOutcome> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let rule = GroupingRule::role_assignment(user_id, role, domain.clone())?;

        let outcome = self
            .writer
            .within_timeout(&domain, async {
                let mut transaction = self.writer.begin(&domain).await?;
                let result = transaction.remove_grouping(&rule).await;
                self.writer.finish(transaction, result).await
            })
            .await?;

        if outcome.is_applied() {
            info!(
                actor = %caller.subject(),
                domain = %domain,
                user_id = %user_id,
                role = %role,
                "removed role assignment"
            );
        }

        Ok(outcome)
    }

    /// Lists roles assigned directly to the user.
    pub async fn list_user_roles(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        user_id: &str,
    ) -> AppResult<Vec<String>> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let user = Subject::user(user_id)?;

        let mut roles: Vec<String> = self
            .store
            .filter_groupings(&domain, Some(&user), None)
            .await?
            .iter()
            .filter_map(|rule| rule.target().as_role().map(str::to_owned))
            .collect();
        roles.sort();

        Ok(roles)
    }

    /// Lists users the role is assigned to directly.
    pub async fn list_role_users(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
        role: &str,
    ) -> AppResult<Vec<String>> {
        let domain = domain.resolve_with(caller.organization_id())?;
        let role = Subject::role(role)?;

        let mut users: Vec<String> = self
            .store
            .filter_groupings(&domain, None, Some(&role))
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

    /// Lists every direct user to role assignment of the domain.
    pub async fn list_assignments(
        &self,
        caller: &CallerContext,
        domain: &DomainRef,
    ) -> AppResult<Vec<RoleAssignment>> {
        let domain = domain.resolve_with(caller.organization_id())?;

        let mut assignments: Vec<RoleAssignment> = self
            .store
            .filter_groupings(&domain, None, None)
            .await?
            .iter()
            .filter_map(|rule| match (rule.member(), rule.target()) {
                (Subject::User(user_id), Subject::Role(role)) => Some(RoleAssignment {
                    user_id: user_id.clone(),
                    role: role.clone(),
                }),
                _ => None,
            })
            .collect();
        assignments.sort();

        Ok(assignments)
    }

    /// Lists the domains of one type where the user holds a role directly or
    /// belongs to a group.
    pub async fn accessible_domains(
        &self,
        user_id: &str,
        domain_type: DomainType,
    ) -> AppResult<Vec<DomainRef>> {
        let user = Subject::user(user_id)?;
        self.store.list_domains_for_member(&user, domain_type).await
    }

    async fn assign_in(
        &self,
        transaction: &mut PolicyTransaction,
        rule: &GroupingRule,
    ) -> AppResult<WriteOutcome> {
        let view = self.resolver.load_for_update(transaction).await?;
        let role = rule.target().name();

        if !view.role_exists(role) {
            return Err(AppError::NotFound(format!(
                "role '{role}' not found in domain '{}'",
                transaction.domain()
            )));
        }

        transaction.add_grouping(rule).await
    }
}
