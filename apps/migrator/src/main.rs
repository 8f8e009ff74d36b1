//! Warden database migrator and development seeder.

#![forbid(unsafe_code)]

mod dev_seed;
mod migrator_config;

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_application::{DecisionCache, RuleStore};
use warden_core::{AppError, AppResult};
use warden_infrastructure::{PostgresRuleStore, RedisDecisionCache};

use crate::migrator_config::{MigratorConfig, RedisCacheConfig};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = MigratorConfig::load()?;
    let pool = connect_pool(config.database_url.as_str(), config.max_connections).await?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;
    info!("database migrations applied successfully");

    let Some(seed) = config.dev_seed.as_ref() else {
        return Ok(());
    };

    let store: Arc<dyn RuleStore> = Arc::new(PostgresRuleStore::new(pool));
    let cache = config
        .redis_cache
        .as_ref()
        .map(build_decision_cache)
        .transpose()?;

    dev_seed::run(store, cache, &config, seed).await
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn connect_pool(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn build_decision_cache(config: &RedisCacheConfig) -> AppResult<Arc<dyn DecisionCache>> {
    let client = redis::Client::open(config.url.as_str())
        .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))?;

    Ok(Arc::new(RedisDecisionCache::new(
        client,
        config.key_prefix.as_str(),
        config.ttl_seconds,
    )))
}
