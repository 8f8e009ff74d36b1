use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use warden_core::{AppError, AppResult, validate_identifier};

/// Domain id marking an organization-owned global role catalog.
pub const GLOBAL_DOMAIN_ID: &str = "*";

const PARTITION_SEPARATOR: char = ':';

/// Kind of tenant resource a domain scopes policy to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainType {
    /// Organization-level domain.
    Org,
    /// Canvas-level domain nested under an organization.
    Canvas,
}

impl DomainType {
    /// Returns a stable storage value for this domain type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Org => "org",
            Self::Canvas => "canvas",
        }
    }

    /// Returns all known domain types.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[DomainType] = &[DomainType::Org, DomainType::Canvas];
        ALL
    }
}

impl FromStr for DomainType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "org" => Ok(Self::Org),
            "canvas" => Ok(Self::Canvas),
            _ => Err(AppError::Validation(format!(
                "unknown domain type '{value}'"
            ))),
        }
    }
}

impl Display for DomainType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Reference to the tenant-scoped domain a policy rule belongs to.
///
/// `organization_id` is the owning organization. It is required for global
/// catalogs (`domain_id == "*"`), where it selects whose catalog is meant, and
/// optional for canvases, where it enables fallback to that catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainRef {
    domain_type: DomainType,
    domain_id: String,
    organization_id: Option<String>,
}

impl DomainRef {
    /// Creates a validated domain reference without organization context.
    pub fn new(domain_type: DomainType, domain_id: impl Into<String>) -> AppResult<Self> {
        let domain_id = validate_identifier("domain id", domain_id.into().as_str())?;
        if domain_type == DomainType::Org && domain_id == GLOBAL_DOMAIN_ID {
            return Err(AppError::Validation(
                "organization domains cannot use the global domain id".to_owned(),
            ));
        }
        if domain_id != GLOBAL_DOMAIN_ID {
            ensure_partition_safe("domain id", domain_id.as_str())?;
        }

        Ok(Self {
            domain_type,
            domain_id,
            organization_id: None,
        })
    }

    /// Creates an organization domain reference.
    pub fn org(organization_id: impl Into<String>) -> AppResult<Self> {
        Self::new(DomainType::Org, organization_id)
    }

    /// Creates a canvas domain reference.
    pub fn canvas(canvas_id: impl Into<String>) -> AppResult<Self> {
        Self::new(DomainType::Canvas, canvas_id)
    }

    /// Creates a reference to the global canvas role catalog of an organization.
    pub fn global_canvas_catalog(organization_id: impl Into<String>) -> AppResult<Self> {
        Self::new(DomainType::Canvas, GLOBAL_DOMAIN_ID)?.with_organization(organization_id)
    }

    /// Rebuilds a reference from stored columns.
    pub fn from_parts(
        domain_type: DomainType,
        domain_id: impl Into<String>,
        organization_id: Option<String>,
    ) -> AppResult<Self> {
        let domain = Self::new(domain_type, domain_id)?;
        match organization_id {
            Some(organization_id) => domain.with_organization(organization_id),
            None => Ok(domain),
        }
    }

    /// Attaches the owning organization. Only canvas domains carry one.
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> AppResult<Self> {
        if self.domain_type != DomainType::Canvas {
            return Err(AppError::Validation(format!(
                "organization context applies to canvas domains only, got '{}'",
                self.domain_type
            )));
        }

        let organization_id =
            validate_identifier("organization id", organization_id.into().as_str())?;
        ensure_partition_safe("organization id", organization_id.as_str())?;

        self.organization_id = Some(organization_id);
        Ok(self)
    }

    /// Returns the domain type.
    #[must_use]
    pub fn domain_type(&self) -> DomainType {
        self.domain_type
    }

    /// Returns the domain identifier (`*` for global catalogs).
    #[must_use]
    pub fn domain_id(&self) -> &str {
        self.domain_id.as_str()
    }

    /// Returns the owning organization, if attached.
    #[must_use]
    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }

    /// Returns whether this reference addresses a global role catalog.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.domain_id == GLOBAL_DOMAIN_ID
    }

    /// Fills in missing organization context for global catalogs and canvases.
    ///
    /// Global catalogs without an owning organization fail because their rules
    /// cannot be partitioned.
    pub fn resolve_with(&self, caller_organization_id: Option<&str>) -> AppResult<Self> {
        if self.organization_id.is_some() || self.domain_type != DomainType::Canvas {
            return Ok(self.clone());
        }

        match caller_organization_id {
            Some(organization_id) => self.clone().with_organization(organization_id),
            None if self.is_global() => Err(AppError::Validation(
                "organization context required for global canvas roles".to_owned(),
            )),
            None => Ok(self.clone()),
        }
    }

    /// Fails when the reference cannot be mapped to a storage partition.
    pub fn ensure_partitioned(&self) -> AppResult<()> {
        if self.is_global() && self.organization_id.is_none() {
            return Err(AppError::Validation(
                "organization context required for global canvas roles".to_owned(),
            ));
        }

        Ok(())
    }

    /// Returns the storage partition key of this domain.
    ///
    /// Concrete domains partition on `type:id`; global catalogs partition on
    /// `canvas:*:<organization>`.
    #[must_use]
    pub fn partition_key(&self) -> String {
        match (&self.organization_id, self.is_global()) {
            (Some(organization_id), true) => format!(
                "{}:{}:{organization_id}",
                self.domain_type, GLOBAL_DOMAIN_ID
            ),
            _ => format!("{}:{}", self.domain_type, self.domain_id),
        }
    }

    /// Returns whether both references address the same storage partition.
    #[must_use]
    pub fn same_partition(&self, other: &DomainRef) -> bool {
        self.partition_key() == other.partition_key()
    }

    /// Returns the global catalog a canvas falls back to for roles it does not
    /// define itself.
    #[must_use]
    pub fn fallback_catalog(&self) -> Option<DomainRef> {
        if self.domain_type != DomainType::Canvas || self.is_global() {
            return None;
        }

        let organization_id = self.organization_id.as_ref()?;
        Some(Self {
            domain_type: DomainType::Canvas,
            domain_id: GLOBAL_DOMAIN_ID.to_owned(),
            organization_id: Some(organization_id.clone()),
        })
    }
}

impl Display for DomainRef {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.partition_key().as_str())
    }
}

/// Keeps partition keys unambiguous: concrete ids never contain the key
/// separator or the global marker.
fn ensure_partition_safe(kind: &str, value: &str) -> AppResult<()> {
    if value.contains(PARTITION_SEPARATOR) || value.contains(GLOBAL_DOMAIN_ID) {
        return Err(AppError::Validation(format!(
            "{kind} '{value}' must not contain '{PARTITION_SEPARATOR}' or '{GLOBAL_DOMAIN_ID}'"
        )));
    }

    Ok(())
}
