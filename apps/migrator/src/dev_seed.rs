use std::sync::Arc;

use tracing::info;
use warden_application::{DecisionCache, EngineConfig, PolicyEngine, PolicyTemplates, RuleStore};
use warden_core::{AppError, AppResult};
use warden_domain::DomainRef;

use crate::migrator_config::{DevSeedConfig, MigratorConfig};

/// Provisions the development organization and its global canvas catalog.
///
/// Already provisioned domains are left untouched, so the seed can run on
/// every start.
pub async fn run(
    store: Arc<dyn RuleStore>,
    cache: Option<Arc<dyn DecisionCache>>,
    config: &MigratorConfig,
    seed: &DevSeedConfig,
) -> AppResult<()> {
    let engine = PolicyEngine::new(
        store,
        cache,
        PolicyTemplates::defaults()?,
        EngineConfig {
            transaction_timeout: config.transaction_timeout,
            ..EngineConfig::default()
        },
    );
    let provisioner = engine.provisioner();
    let organization = DomainRef::org(seed.organization_id.as_str())?;

    match provisioner
        .provision(&organization, seed.owner_subject.as_str())
        .await
    {
        Ok(summary) => info!(
            domain = %summary.domain,
            owner = %seed.owner_subject,
            grants = summary.grants_written,
            groupings = summary.groupings_written,
            "provisioned development organization"
        ),
        Err(AppError::Conflict(_)) => {
            info!(domain = %organization, "development organization already provisioned");
        }
        Err(error) => return Err(error),
    }

    match provisioner
        .provision_global_catalog(seed.organization_id.as_str())
        .await
    {
        Ok(summary) => info!(
            domain = %summary.domain,
            grants = summary.grants_written,
            "provisioned global canvas catalog"
        ),
        Err(AppError::Conflict(_)) => info!(
            organization_id = %seed.organization_id,
            "global canvas catalog already provisioned"
        ),
        Err(error) => return Err(error),
    }

    Ok(())
}
