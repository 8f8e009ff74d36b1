use std::str::FromStr;

use serde::{Deserialize, Serialize};
use warden_core::AppError;

use crate::DomainType;

/// Readonly roles provisioned for every organization and canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltInRole {
    /// Full control of an organization.
    OrgOwner,
    /// Manages canvases, members, groups and roles of an organization.
    OrgAdmin,
    /// Read-only access to an organization.
    OrgViewer,
    /// Full control of a canvas.
    CanvasOwner,
    /// Manages stages, events and members of a canvas.
    CanvasAdmin,
    /// Read-only access to a canvas.
    CanvasViewer,
}

impl BuiltInRole {
    /// Returns the stable role name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrgOwner => "org_owner",
            Self::OrgAdmin => "org_admin",
            Self::OrgViewer => "org_viewer",
            Self::CanvasOwner => "canvas_owner",
            Self::CanvasAdmin => "canvas_admin",
            Self::CanvasViewer => "canvas_viewer",
        }
    }

    /// Returns all built-in roles.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[BuiltInRole] = &[
            BuiltInRole::OrgOwner,
            BuiltInRole::OrgAdmin,
            BuiltInRole::OrgViewer,
            BuiltInRole::CanvasOwner,
            BuiltInRole::CanvasAdmin,
            BuiltInRole::CanvasViewer,
        ];

        ALL
    }

    /// Returns the built-in role with this name, if any.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }

    /// Returns whether `name` is reserved for a built-in role.
    #[must_use]
    pub fn is_reserved(name: &str) -> bool {
        Self::from_name(name).is_some()
    }

    /// Returns the domain type this role belongs to.
    #[must_use]
    pub fn domain_type(&self) -> DomainType {
        match self {
            Self::OrgOwner | Self::OrgAdmin | Self::OrgViewer => DomainType::Org,
            Self::CanvasOwner | Self::CanvasAdmin | Self::CanvasViewer => DomainType::Canvas,
        }
    }

    /// Returns the role granted to the creator of a domain.
    #[must_use]
    pub fn owner_for(domain_type: DomainType) -> Self {
        match domain_type {
            DomainType::Org => Self::OrgOwner,
            DomainType::Canvas => Self::CanvasOwner,
        }
    }

    /// Returns the built-in roles of one domain type.
    pub fn for_domain_type(domain_type: DomainType) -> impl Iterator<Item = Self> {
        Self::all()
            .iter()
            .copied()
            .filter(move |role| role.domain_type() == domain_type)
    }

    /// Returns the catalog display name.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OrgOwner => "Owner",
            Self::OrgAdmin => "Admin",
            Self::OrgViewer => "Viewer",
            Self::CanvasOwner => "Owner",
            Self::CanvasAdmin => "Admin",
            Self::CanvasViewer => "Viewer",
        }
    }

    /// Returns the catalog description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::OrgOwner => "Full control of the organization, including deletion",
            Self::OrgAdmin => "Manages canvases, members, groups and roles",
            Self::OrgViewer => "Read-only access to organization resources",
            Self::CanvasOwner => "Full control of the canvas, including deletion",
            Self::CanvasAdmin => "Manages stages, events and canvas members",
            Self::CanvasViewer => "Read-only access to canvas resources",
        }
    }
}

impl FromStr for BuiltInRole {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "org_owner" => Ok(Self::OrgOwner),
            "org_admin" => Ok(Self::OrgAdmin),
            "org_viewer" => Ok(Self::OrgViewer),
            "canvas_owner" => Ok(Self::CanvasOwner),
            "canvas_admin" => Ok(Self::CanvasAdmin),
            "canvas_viewer" => Ok(Self::CanvasViewer),
            _ => Err(AppError::NotFound(format!(
                "'{value}' is not a built-in role"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::DomainType;

    use super::BuiltInRole;

    #[test]
    fn every_built_in_name_is_reserved() {
        for role in BuiltInRole::all() {
            assert!(BuiltInRole::is_reserved(role.as_str()));
        }
        assert!(!BuiltInRole::is_reserved("release_manager"));
    }

    #[test]
    fn owner_roles_match_domain_type() {
        assert_eq!(
            BuiltInRole::owner_for(DomainType::Canvas).domain_type(),
            DomainType::Canvas
        );
        assert_eq!(BuiltInRole::for_domain_type(DomainType::Org).count(), 3);
    }
}
