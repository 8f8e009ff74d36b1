use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use warden_core::{AppError, AppResult, validate_identifier};

/// Node kinds of the grouping graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// An end user.
    User,
    /// A named group of users.
    Group,
    /// A role carrying grants.
    Role,
}

impl SubjectKind {
    /// Returns the storage prefix for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Role => "role",
        }
    }
}

/// Typed member or target of a grouping rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Subject {
    /// An end user by subject id.
    User(String),
    /// A group by name.
    Group(String),
    /// A role by name.
    Role(String),
}

impl Subject {
    /// Creates a validated user subject.
    pub fn user(subject_id: &str) -> AppResult<Self> {
        Ok(Self::User(validate_identifier("subject id", subject_id)?))
    }

    /// Creates a validated group subject.
    pub fn group(name: &str) -> AppResult<Self> {
        Ok(Self::Group(validate_identifier("group name", name)?))
    }

    /// Creates a validated role subject.
    pub fn role(name: &str) -> AppResult<Self> {
        Ok(Self::Role(validate_identifier("role name", name)?))
    }

    /// Returns the node kind.
    #[must_use]
    pub fn kind(&self) -> SubjectKind {
        match self {
            Self::User(_) => SubjectKind::User,
            Self::Group(_) => SubjectKind::Group,
            Self::Role(_) => SubjectKind::Role,
        }
    }

    /// Returns the bare name without the kind prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::User(name) | Self::Group(name) | Self::Role(name) => name.as_str(),
        }
    }

    /// Returns the role name when this subject is a role.
    #[must_use]
    pub fn as_role(&self) -> Option<&str> {
        match self {
            Self::Role(name) => Some(name.as_str()),
            _ => None,
        }
    }

    /// Returns the stable storage encoding (`kind:name`).
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}:{}", self.kind().as_str(), self.name())
    }
}

impl FromStr for Subject {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some((kind, name)) = value.split_once(':') else {
            return Err(AppError::Validation(format!(
                "subject '{value}' is missing a kind prefix"
            )));
        };

        match kind {
            "user" => Self::user(name),
            "group" => Self::group(name),
            "role" => Self::role(name),
            _ => Err(AppError::Validation(format!(
                "unknown subject kind '{kind}' in '{value}'"
            ))),
        }
    }
}

impl Display for Subject {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}:{}", self.kind().as_str(), self.name())
    }
}
