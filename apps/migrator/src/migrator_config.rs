use std::env;
use std::time::Duration;

use warden_application::DEFAULT_TRANSACTION_TIMEOUT;
use warden_core::{AppError, AppResult};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CACHE_PREFIX: &str = "warden:policy";
const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// Organization provisioned on startup for local development.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevSeedConfig {
    pub organization_id: String,
    pub owner_subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisCacheConfig {
    pub url: String,
    pub key_prefix: String,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub transaction_timeout: Duration,
    pub redis_cache: Option<RedisCacheConfig>,
    pub dev_seed: Option<DevSeedConfig>,
}

impl MigratorConfig {
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = required(&lookup, "DATABASE_URL")?;
        let max_connections =
            parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(AppError::Validation(
                "DATABASE_MAX_CONNECTIONS must be greater than zero".to_owned(),
            ));
        }

        let default_timeout_ms =
            u64::try_from(DEFAULT_TRANSACTION_TIMEOUT.as_millis()).unwrap_or(u64::MAX);
        let timeout_ms = parse_or(&lookup, "POLICY_TRANSACTION_TIMEOUT_MS", default_timeout_ms)?;
        if timeout_ms == 0 {
            return Err(AppError::Validation(
                "POLICY_TRANSACTION_TIMEOUT_MS must be greater than zero".to_owned(),
            ));
        }

        let redis_cache = match optional(&lookup, "REDIS_URL") {
            Some(url) => Some(RedisCacheConfig {
                url,
                key_prefix: optional(&lookup, "POLICY_CACHE_PREFIX")
                    .unwrap_or_else(|| DEFAULT_CACHE_PREFIX.to_owned()),
                ttl_seconds: parse_or(
                    &lookup,
                    "POLICY_CACHE_TTL_SECONDS",
                    DEFAULT_CACHE_TTL_SECONDS,
                )?,
            }),
            None => None,
        };

        let dev_seed = match (
            optional(&lookup, "DEV_SEED_ORGANIZATION_ID"),
            optional(&lookup, "DEV_SEED_OWNER_SUBJECT"),
        ) {
            (Some(organization_id), Some(owner_subject)) => Some(DevSeedConfig {
                organization_id,
                owner_subject,
            }),
            (None, None) => None,
            _ => {
                return Err(AppError::Validation(
                    "DEV_SEED_ORGANIZATION_ID and DEV_SEED_OWNER_SUBJECT must be set together"
                        .to_owned(),
                ));
            }
        };

        Ok(Self {
            database_url,
            max_connections,
            transaction_timeout: Duration::from_millis(timeout_ms),
            redis_cache,
            dev_seed,
        })
    }
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required<F>(lookup: &F, name: &str) -> AppResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, name).ok_or_else(|| AppError::Validation(format!("{name} is required")))
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> AppResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(lookup, name) {
        Some(value) => value.parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}
