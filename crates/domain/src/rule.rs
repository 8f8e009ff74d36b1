use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use warden_core::{AppError, AppResult, validate_identifier};

use crate::{DomainRef, Subject};

/// Actions every built-in template draws from. Custom roles may use others.
pub const STANDARD_ACTIONS: &[&str] = &[
    "read", "write", "create", "update", "delete", "admin", "invite", "remove", "approve",
];

/// Resource type and action pair granted to a role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    resource: String,
    action: String,
}

impl Permission {
    /// Creates a validated permission.
    pub fn new(resource: &str, action: &str) -> AppResult<Self> {
        let resource = validate_token("resource", resource)?;
        let action = validate_token("action", action)?;

        Ok(Self { resource, action })
    }

    /// Returns the resource type tag.
    #[must_use]
    pub fn resource(&self) -> &str {
        self.resource.as_str()
    }

    /// Returns the action.
    #[must_use]
    pub fn action(&self) -> &str {
        self.action.as_str()
    }

    /// Returns whether the action belongs to the standard vocabulary.
    #[must_use]
    pub fn is_standard_action(&self) -> bool {
        STANDARD_ACTIONS.contains(&self.action.as_str())
    }
}

impl Display for Permission {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}.{}", self.resource, self.action)
    }
}

fn validate_token(kind: &str, value: &str) -> AppResult<String> {
    let value = validate_identifier(kind, value)?;
    if value.chars().any(char::is_whitespace) {
        return Err(AppError::Validation(format!(
            "{kind} '{value}' must not contain whitespace"
        )));
    }

    Ok(value)
}

/// Grant of one permission to a role within a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantRule {
    role: String,
    domain: DomainRef,
    permission: Permission,
}

impl GrantRule {
    /// Creates a validated grant rule.
    pub fn new(role: &str, domain: DomainRef, permission: Permission) -> AppResult<Self> {
        Ok(Self {
            role: validate_identifier("role name", role)?,
            domain,
            permission,
        })
    }

    /// Returns the granted role.
    #[must_use]
    pub fn role(&self) -> &str {
        self.role.as_str()
    }

    /// Returns the owning domain.
    #[must_use]
    pub fn domain(&self) -> &DomainRef {
        &self.domain
    }

    /// Returns the granted permission.
    #[must_use]
    pub fn permission(&self) -> &Permission {
        &self.permission
    }

    /// Returns the resource type of the granted permission.
    #[must_use]
    pub fn resource(&self) -> &str {
        self.permission.resource()
    }

    /// Returns the action of the granted permission.
    #[must_use]
    pub fn action(&self) -> &str {
        self.permission.action()
    }
}

/// Edge of the grouping graph within a domain.
///
/// Covers user role assignment, group membership, the role carried by a group
/// and role inheritance (the lower role is the member, its parent the target).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupingRule {
    member: Subject,
    target: Subject,
    domain: DomainRef,
}

impl GroupingRule {
    /// Creates a grouping rule after checking the edge shape.
    pub fn new(member: Subject, target: Subject, domain: DomainRef) -> AppResult<Self> {
        if member == target {
            return Err(AppError::Validation(format!(
                "grouping member and target must differ, got '{member}'"
            )));
        }

        match (&member, &target) {
            (_, Subject::User(_)) => Err(AppError::Validation(format!(
                "grouping target '{target}' cannot be a user"
            ))),
            (Subject::Role(_), Subject::Group(_)) => Err(AppError::Validation(format!(
                "role '{}' can only inherit from another role",
                member.name()
            ))),
            (Subject::Group(_), Subject::Group(_)) => Err(AppError::Validation(format!(
                "group '{}' cannot be nested in group '{}'",
                member.name(),
                target.name()
            ))),
            _ => Ok(Self {
                member,
                target,
                domain,
            }),
        }
    }

    /// Assigns a role directly to a user.
    pub fn role_assignment(user_id: &str, role: &str, domain: DomainRef) -> AppResult<Self> {
        Self::new(Subject::user(user_id)?, Subject::role(role)?, domain)
    }

    /// Adds a user to a group.
    pub fn group_membership(user_id: &str, group: &str, domain: DomainRef) -> AppResult<Self> {
        Self::new(Subject::user(user_id)?, Subject::group(group)?, domain)
    }

    /// Links a group to the role it carries.
    pub fn group_role(group: &str, role: &str, domain: DomainRef) -> AppResult<Self> {
        Self::new(Subject::group(group)?, Subject::role(role)?, domain)
    }

    /// Makes `child` inherit every grant of `parent`.
    pub fn role_inheritance(child: &str, parent: &str, domain: DomainRef) -> AppResult<Self> {
        Self::new(Subject::role(child)?, Subject::role(parent)?, domain)
    }

    /// Returns the member side of the edge.
    #[must_use]
    pub fn member(&self) -> &Subject {
        &self.member
    }

    /// Returns the target side of the edge.
    #[must_use]
    pub fn target(&self) -> &Subject {
        &self.target
    }

    /// Returns the owning domain.
    #[must_use]
    pub fn domain(&self) -> &DomainRef {
        &self.domain
    }

    /// Returns whether this edge is a role inheritance edge.
    #[must_use]
    pub fn is_inheritance(&self) -> bool {
        matches!(
            (&self.member, &self.target),
            (Subject::Role(_), Subject::Role(_))
        )
    }
}
