use serde::{Deserialize, Serialize};

/// Identity and tenancy context supplied by the host service with each
/// administrative call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    subject: String,
    organization_id: Option<String>,
}

impl CallerContext {
    /// Creates a caller context for an authenticated subject.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            organization_id: None,
        }
    }

    /// Attaches the organization the caller is acting within.
    #[must_use]
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Returns the stable subject identifier of the caller.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.subject.as_str()
    }

    /// Returns the organization the caller is acting within, if known.
    #[must_use]
    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }
}
