use serde::Serialize;
use tracing::info;
use warden_core::{AppError, AppResult};
use warden_domain::{
    BuiltInRole, DomainRef, DomainType, GroupingRule, PolicyTemplate, TemplateRules,
};

use crate::{BoxFuture, PolicyTransaction, PolicyWriter, RoleMetadata};

/// Policy templates applied when a domain is provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTemplates {
    org: PolicyTemplate,
    canvas: PolicyTemplate,
}

impl PolicyTemplates {
    /// Creates a template set, checking each template targets its domain type.
    pub fn new(org: PolicyTemplate, canvas: PolicyTemplate) -> AppResult<Self> {
        if org.domain_type() != DomainType::Org || canvas.domain_type() != DomainType::Canvas {
            return Err(AppError::Validation(
                "policy templates must target org and canvas domains respectively".to_owned(),
            ));
        }

        Ok(Self { org, canvas })
    }

    /// Returns the templates shipped with the domain crate.
    pub fn defaults() -> AppResult<Self> {
        Self::new(
            PolicyTemplate::default_for(DomainType::Org)?,
            PolicyTemplate::default_for(DomainType::Canvas)?,
        )
    }

    /// Returns the template for a domain type.
    #[must_use]
    pub fn for_domain_type(&self, domain_type: DomainType) -> &PolicyTemplate {
        match domain_type {
            DomainType::Org => &self.org,
            DomainType::Canvas => &self.canvas,
        }
    }
}

/// Outcome of provisioning one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningSummary {
    /// Provisioned domain.
    pub domain: DomainRef,
    /// Grant rules written.
    pub grants_written: usize,
    /// Grouping rules written, including the owner assignment.
    pub groupings_written: usize,
    /// Roles recorded in the domain catalog.
    pub roles: Vec<String>,
}

/// Instantiates policy templates for new organizations and canvases.
#[derive(Clone)]
pub struct TenantProvisioner {
    writer: PolicyWriter,
    templates: PolicyTemplates,
}

impl TenantProvisioner {
    /// Creates a provisioner.
    #[must_use]
    pub fn new(writer: PolicyWriter, templates: PolicyTemplates) -> Self {
        Self { writer, templates }
    }

    /// Writes the template of the domain's type, the built-in role catalog and
    /// the owner assignment in one transaction.
    pub async fn provision(
        &self,
        domain: &DomainRef,
        owner_subject_id: &str,
    ) -> AppResult<ProvisioningSummary> {
        if domain.is_global() {
            return Err(AppError::Validation(format!(
                "global catalog '{domain}' is provisioned without an owner"
            )));
        }

        let template = self.templates.for_domain_type(domain.domain_type());
        let rules = template.instantiate(domain)?;
        let owner_assignment =
            GroupingRule::role_assignment(owner_subject_id, template.owner_role(), domain.clone())?;

        let summary = self
            .write_template(domain, template, rules, Some(owner_assignment))
            .await?;
        info!(
            domain = %domain,
            owner = %owner_subject_id,
            grants = summary.grants_written,
            groupings = summary.groupings_written,
            "provisioned domain policy"
        );

        Ok(summary)
    }

    /// Writes the canvas template into an organization's global catalog.
    pub async fn provision_global_catalog(
        &self,
        organization_id: &str,
    ) -> AppResult<ProvisioningSummary> {
        let catalog = DomainRef::global_canvas_catalog(organization_id)?;
        let template = self.templates.for_domain_type(DomainType::Canvas);
        let rules = template.instantiate(&catalog)?;

        let summary = self.write_template(&catalog, template, rules, None).await?;
        info!(
            domain = %catalog,
            grants = summary.grants_written,
            "provisioned global canvas catalog"
        );

        Ok(summary)
    }

    /// Runs `apply` in one transaction on the domain, committing on success
    /// and rolling back on error.
    pub async fn update_domain_policy<T, F>(&self, domain: &DomainRef, apply: F) -> AppResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut PolicyTransaction) -> BoxFuture<'t, AppResult<T>> + Send,
    {
        self.writer.update_domain_policy(domain, apply).await
    }

    async fn write_template(
        &self,
        domain: &DomainRef,
        template: &PolicyTemplate,
        rules: TemplateRules,
        owner_assignment: Option<GroupingRule>,
    ) -> AppResult<ProvisioningSummary> {
        self.writer
            .within_timeout(domain, async {
                let mut transaction = self.writer.begin(domain).await?;
                let result =
                    write_rules(&mut transaction, template, rules, owner_assignment).await;
                self.writer.finish(transaction, result).await
            })
            .await
    }
}

async fn write_rules(
    transaction: &mut PolicyTransaction,
    template: &PolicyTemplate,
    rules: TemplateRules,
    owner_assignment: Option<GroupingRule>,
) -> AppResult<ProvisioningSummary> {
    ensure_unprovisioned(transaction).await?;

    let mut summary = ProvisioningSummary {
        domain: transaction.domain().clone(),
        grants_written: 0,
        groupings_written: 0,
        roles: Vec::new(),
    };

    for rule in &rules.grants {
        if transaction.add_grant(rule).await?.is_applied() {
            summary.grants_written += 1;
        }
    }

    for rule in rules.groupings.iter().chain(owner_assignment.as_ref()) {
        if transaction.add_grouping(rule).await?.is_applied() {
            summary.groupings_written += 1;
        }
    }

    for role in template.roles() {
        let metadata = BuiltInRole::from_name(role)
            .map(RoleMetadata::built_in)
            .unwrap_or_else(|| RoleMetadata {
                is_readonly: true,
                ..RoleMetadata::custom(role, None, None)
            });
        transaction.save_role_metadata(&metadata).await?;
        summary.roles.push(role.to_owned());
    }

    Ok(summary)
}

async fn ensure_unprovisioned(transaction: &mut PolicyTransaction) -> AppResult<()> {
    let provisioned = !transaction.filter_grants(None).await?.is_empty()
        || !transaction.filter_groupings(None, None).await?.is_empty()
        || !transaction.list_role_metadata().await?.is_empty();

    if provisioned {
        return Err(AppError::Conflict(format!(
            "domain '{}' is already provisioned",
            transaction.domain()
        )));
    }

    Ok(())
}
