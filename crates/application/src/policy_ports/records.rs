use warden_domain::BuiltInRole;

/// Result of an idempotent rule mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The rule was inserted or removed.
    Applied,
    /// The store already matched the requested state.
    Unchanged,
}

impl WriteOutcome {
    /// Builds an outcome from a changed flag.
    #[must_use]
    pub fn from_changed(changed: bool) -> Self {
        if changed { Self::Applied } else { Self::Unchanged }
    }

    /// Returns whether the store changed.
    #[must_use]
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Catalog entry describing a role within one domain partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMetadata {
    /// Role name.
    pub role_name: String,
    /// Human-readable label.
    pub display_name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Indicates a built-in role whose grants cannot be changed.
    pub is_readonly: bool,
}

impl RoleMetadata {
    /// Returns the catalog entry for a built-in role.
    #[must_use]
    pub fn built_in(role: BuiltInRole) -> Self {
        Self {
            role_name: role.as_str().to_owned(),
            display_name: role.display_name().to_owned(),
            description: Some(role.description().to_owned()),
            is_readonly: true,
        }
    }

    /// Returns a catalog entry for a custom role.
    #[must_use]
    pub fn custom(role_name: &str, display_name: Option<&str>, description: Option<&str>) -> Self {
        Self {
            role_name: role_name.to_owned(),
            display_name: display_name.unwrap_or(role_name).to_owned(),
            description: description.map(str::to_owned),
            is_readonly: false,
        }
    }
}
