use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use warden_core::{AppError, AppResult, validate_identifier};

use crate::{BuiltInRole, DomainRef, DomainType, GrantRule, GroupingRule, Permission, RoleGraph, Subject};

/// Placeholder accepted in the optional domain column of template rows.
pub const DOMAIN_PLACEHOLDER: &str = "{domain}";

const DEFAULT_ORG_TEMPLATE: &str = include_str!("../templates/org_policy.csv");
const DEFAULT_CANVAS_TEMPLATE: &str = include_str!("../templates/canvas_policy.csv");

/// One parameterized rule of a policy template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateRow {
    /// `p` row: grants `(resource, action)` to `role`.
    Grant {
        /// Granted role.
        role: String,
        /// Resource type tag.
        resource: String,
        /// Granted action.
        action: String,
    },
    /// `g` row: `lower_role` inherits every grant of `higher_role`.
    Inheritance {
        /// Inheriting role.
        lower_role: String,
        /// Parent role.
        higher_role: String,
    },
}

impl TemplateRow {
    /// Parses a flat row: a rule-kind tag followed by up to four fields.
    ///
    /// Accepted shapes are `p, role, resource, action`,
    /// `p, role, {domain}, resource, action`, `g, lower, higher` and
    /// `g, lower, higher, {domain}`.
    pub fn from_fields(fields: &[&str]) -> AppResult<Self> {
        match fields {
            ["p", role, resource, action] => Self::grant(role, resource, action),
            ["p", role, domain, resource, action] => {
                ensure_placeholder(domain)?;
                Self::grant(role, resource, action)
            }
            ["g", lower_role, higher_role] => Self::inheritance(lower_role, higher_role),
            ["g", lower_role, higher_role, domain] => {
                ensure_placeholder(domain)?;
                Self::inheritance(lower_role, higher_role)
            }
            [kind, ..] if *kind != "p" && *kind != "g" => Err(AppError::Validation(format!(
                "unknown template rule kind '{kind}'"
            ))),
            _ => Err(AppError::Validation(format!(
                "malformed template row with {} fields",
                fields.len()
            ))),
        }
    }

    fn grant(role: &str, resource: &str, action: &str) -> AppResult<Self> {
        let permission = Permission::new(resource, action)?;
        Ok(Self::Grant {
            role: validate_identifier("role name", role)?,
            resource: permission.resource().to_owned(),
            action: permission.action().to_owned(),
        })
    }

    fn inheritance(lower_role: &str, higher_role: &str) -> AppResult<Self> {
        Ok(Self::Inheritance {
            lower_role: validate_identifier("role name", lower_role)?,
            higher_role: validate_identifier("role name", higher_role)?,
        })
    }
}

fn ensure_placeholder(value: &str) -> AppResult<()> {
    if value != DOMAIN_PLACEHOLDER {
        return Err(AppError::Validation(format!(
            "template domain column must be '{DOMAIN_PLACEHOLDER}', got '{value}'"
        )));
    }

    Ok(())
}

/// Concrete rules produced by instantiating a template for one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateRules {
    /// Grant rules in template order.
    pub grants: Vec<GrantRule>,
    /// Inheritance edges in template order.
    pub groupings: Vec<GroupingRule>,
}

/// Validated policy template for one domain type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTemplate {
    domain_type: DomainType,
    owner_role: String,
    rows: Vec<TemplateRow>,
}

impl PolicyTemplate {
    /// Creates a template after checking that inheritance is single-parent and
    /// acyclic and that the owner role is defined.
    pub fn new(domain_type: DomainType, owner_role: &str, rows: Vec<TemplateRow>) -> AppResult<Self> {
        let owner_role = validate_identifier("owner role", owner_role)?;
        let mut graph = RoleGraph::new();

        for row in &rows {
            let TemplateRow::Inheritance {
                lower_role,
                higher_role,
            } = row
            else {
                continue;
            };

            if let Some(existing) = graph.parent_role(lower_role) {
                return Err(AppError::Validation(format!(
                    "template role '{lower_role}' already inherits from '{existing}'"
                )));
            }
            if graph.would_create_cycle(lower_role, higher_role) {
                return Err(AppError::Validation(format!(
                    "template inheritance '{lower_role}' -> '{higher_role}' creates a cycle"
                )));
            }
            graph.insert_edge(
                &Subject::Role(lower_role.clone()),
                &Subject::Role(higher_role.clone()),
            );
        }

        let template = Self {
            domain_type,
            owner_role,
            rows,
        };
        if !template.roles().contains(template.owner_role.as_str()) {
            return Err(AppError::Validation(format!(
                "owner role '{}' is not defined by the {} template",
                template.owner_role, domain_type
            )));
        }

        Ok(template)
    }

    /// Parses comma-separated rows. Blank lines and `#` comments are skipped.
    pub fn parse(domain_type: DomainType, owner_role: &str, source: &str) -> AppResult<Self> {
        let mut rows = Vec::new();

        for (line_number, line) in source.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let row = TemplateRow::from_fields(&fields).map_err(|error| {
                AppError::Validation(format!(
                    "{domain_type} template line {}: {error}",
                    line_number + 1
                ))
            })?;
            rows.push(row);
        }

        Self::new(domain_type, owner_role, rows)
    }

    /// Returns the template shipped for a domain type.
    pub fn default_for(domain_type: DomainType) -> AppResult<Self> {
        let source = match domain_type {
            DomainType::Org => DEFAULT_ORG_TEMPLATE,
            DomainType::Canvas => DEFAULT_CANVAS_TEMPLATE,
        };

        Self::parse(
            domain_type,
            BuiltInRole::owner_for(domain_type).as_str(),
            source,
        )
    }

    /// Returns the domain type this template provisions.
    #[must_use]
    pub fn domain_type(&self) -> DomainType {
        self.domain_type
    }

    /// Returns the role assigned to the domain creator.
    #[must_use]
    pub fn owner_role(&self) -> &str {
        self.owner_role.as_str()
    }

    /// Returns the template rows.
    #[must_use]
    pub fn rows(&self) -> &[TemplateRow] {
        &self.rows
    }

    /// Returns every role the template mentions.
    #[must_use]
    pub fn roles(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|row| match row {
                TemplateRow::Grant { role, .. } => vec![role.as_str()],
                TemplateRow::Inheritance {
                    lower_role,
                    higher_role,
                } => vec![lower_role.as_str(), higher_role.as_str()],
            })
            .collect()
    }

    /// Substitutes a concrete domain into every row.
    pub fn instantiate(&self, domain: &DomainRef) -> AppResult<TemplateRules> {
        if domain.domain_type() != self.domain_type {
            return Err(AppError::Validation(format!(
                "{} template cannot provision domain '{domain}'",
                self.domain_type
            )));
        }

        let mut rules = TemplateRules::default();
        for row in &self.rows {
            match row {
                TemplateRow::Grant {
                    role,
                    resource,
                    action,
                } => rules.grants.push(GrantRule::new(
                    role,
                    domain.clone(),
                    Permission::new(resource, action)?,
                )?),
                TemplateRow::Inheritance {
                    lower_role,
                    higher_role,
                } => rules.groupings.push(GroupingRule::role_inheritance(
                    lower_role,
                    higher_role,
                    domain.clone(),
                )?),
            }
        }

        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use warden_core::AppError;

    use crate::{BuiltInRole, DomainRef, DomainType};

    use super::{PolicyTemplate, TemplateRow};

    #[test]
    fn default_templates_define_every_built_in_role() {
        for domain_type in DomainType::all() {
            let template = PolicyTemplate::default_for(*domain_type)
                .unwrap_or_else(|error| panic!("{error}"));
            let roles = template.roles();

            for role in BuiltInRole::for_domain_type(*domain_type) {
                assert!(roles.contains(role.as_str()), "missing {}", role.as_str());
            }
        }
    }

    #[test]
    fn domain_column_must_be_placeholder() {
        assert!(TemplateRow::from_fields(&["p", "org_viewer", "{domain}", "org", "read"]).is_ok());
        assert!(TemplateRow::from_fields(&["p", "org_viewer", "org-1", "org", "read"]).is_err());
        assert!(TemplateRow::from_fields(&["x", "org_viewer", "org"]).is_err());
        assert!(TemplateRow::from_fields(&["g", "org_admin"]).is_err());
    }

    #[test]
    fn cyclic_template_is_rejected() {
        let source = "p, a, org, read\ng, a, b\ng, b, a\n";
        let result = PolicyTemplate::parse(DomainType::Org, "a", source);
        assert!(matches!(result, Err(AppError::Validation(message)) if message.contains("cycle")));
    }

    #[test]
    fn multiple_parents_are_rejected() {
        let source = "p, a, org, read\ng, a, b\ng, a, c\n";
        assert!(PolicyTemplate::parse(DomainType::Org, "a", source).is_err());
    }

    #[test]
    fn parse_errors_report_line_numbers() {
        let source = "# comment\n\np, org_owner, org\n";
        let result = PolicyTemplate::parse(DomainType::Org, "org_owner", source);
        assert!(matches!(result, Err(AppError::Validation(message)) if message.contains("line 3")));
    }

    #[test]
    fn instantiate_rejects_mismatched_domain_type() {
        let template =
            PolicyTemplate::default_for(DomainType::Org).unwrap_or_else(|error| panic!("{error}"));
        let canvas = DomainRef::canvas("c-1").unwrap_or_else(|error| panic!("{error}"));
        assert!(template.instantiate(&canvas).is_err());
    }

    #[test]
    fn instantiate_binds_every_rule_to_domain() {
        let template =
            PolicyTemplate::default_for(DomainType::Org).unwrap_or_else(|error| panic!("{error}"));
        let domain = DomainRef::org("org-1").unwrap_or_else(|error| panic!("{error}"));
        let rules = template
            .instantiate(&domain)
            .unwrap_or_else(|error| panic!("{error}"));

        assert!(!rules.grants.is_empty());
        assert_eq!(rules.groupings.len(), 2);
        assert!(rules.grants.iter().all(|rule| rule.domain() == &domain));
        assert!(rules.groupings.iter().all(|rule| rule.is_inheritance()));
    }
}
