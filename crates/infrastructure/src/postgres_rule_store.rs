use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{Executor, FromRow, PgPool, Postgres};

use warden_application::{RoleMetadata, RuleStore, RuleTransaction};
use warden_core::{AppError, AppResult};
use warden_domain::{DomainRef, DomainType, GLOBAL_DOMAIN_ID, GrantRule, GroupingRule, Permission, Subject};

mod transaction;

use transaction::PostgresRuleTransaction;

/// PostgreSQL-backed rule store.
///
/// Every statement filters on the partition key; transactions serialize per
/// partition through a transaction-scoped advisory lock.
#[derive(Clone)]
pub struct PostgresRuleStore {
    pool: PgPool,
}

impl PostgresRuleStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct GrantRow {
    role_name: String,
    resource: String,
    action: String,
}

#[derive(Debug, FromRow)]
struct GroupingRow {
    member: String,
    target: String,
}

#[derive(Debug, FromRow)]
struct RoleMetadataRow {
    role_name: String,
    display_name: String,
    description: Option<String>,
    is_readonly: bool,
}

#[derive(Debug, FromRow)]
struct DomainRow {
    domain_type: String,
    domain_id: String,
    organization_id: Option<String>,
}

#[async_trait]
impl RuleStore for PostgresRuleStore {
    async fn filter_grants(
        &self,
        domain: &DomainRef,
        role: Option<&str>,
    ) -> AppResult<Vec<GrantRule>> {
        domain.ensure_partitioned()?;
        select_grants(&self.pool, domain, role).await
    }

    async fn filter_groupings(
        &self,
        domain: &DomainRef,
        member: Option<&Subject>,
        target: Option<&Subject>,
    ) -> AppResult<Vec<GroupingRule>> {
        domain.ensure_partitioned()?;
        select_groupings(&self.pool, domain, member, target).await
    }

    async fn list_role_metadata(&self, domain: &DomainRef) -> AppResult<Vec<RoleMetadata>> {
        domain.ensure_partitioned()?;
        select_role_metadata(&self.pool, domain).await
    }

    async fn list_domains_for_member(
        &self,
        member: &Subject,
        domain_type: DomainType,
    ) -> AppResult<Vec<DomainRef>> {
        let rows = sqlx::query_as::<_, DomainRow>(
            r#"
            SELECT DISTINCT ON (partition_key)
                domain_type,
                domain_id,
                organization_id
            FROM policy_grouping_rules
            WHERE member = $1
              AND domain_type = $2
              AND domain_id <> $3
            ORDER BY partition_key, organization_id NULLS LAST
            "#,
        )
        .bind(member.encode())
        .bind(domain_type.as_str())
        .bind(GLOBAL_DOMAIN_ID)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list {domain_type} domains for member '{member}': {error}"
            ))
        })?;

        rows.into_iter()
            .map(|row| {
                DomainRef::from_parts(
                    DomainType::from_str(row.domain_type.as_str())?,
                    row.domain_id,
                    row.organization_id,
                )
            })
            .collect()
    }

    async fn begin(&self, domain: &DomainRef) -> AppResult<Box<dyn RuleTransaction>> {
        domain.ensure_partitioned()?;
        let transaction = PostgresRuleTransaction::begin(&self.pool, domain).await?;
        Ok(Box::new(transaction))
    }
}

async fn select_grants<'e, E>(
    executor: E,
    domain: &DomainRef,
    role: Option<&str>,
) -> AppResult<Vec<GrantRule>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, GrantRow>(
        r#"
        SELECT role_name, resource, action
        FROM policy_grant_rules
        WHERE partition_key = $1
          AND ($2::text IS NULL OR role_name = $2)
        ORDER BY role_name, resource, action
        "#,
    )
    .bind(domain.partition_key())
    .bind(role)
    .fetch_all(executor)
    .await
    .map_err(|error| {
        AppError::Internal(format!(
            "failed to list grant rules for domain '{domain}': {error}"
        ))
    })?;

    rows.into_iter()
        .map(|row| {
            GrantRule::new(
                row.role_name.as_str(),
                domain.clone(),
                Permission::new(row.resource.as_str(), row.action.as_str())?,
            )
        })
        .collect()
}

async fn select_groupings<'e, E>(
    executor: E,
    domain: &DomainRef,
    member: Option<&Subject>,
    target: Option<&Subject>,
) -> AppResult<Vec<GroupingRule>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, GroupingRow>(
        r#"
        SELECT member, target
        FROM policy_grouping_rules
        WHERE partition_key = $1
          AND ($2::text IS NULL OR member = $2)
          AND ($3::text IS NULL OR target = $3)
        ORDER BY member, target
        "#,
    )
    .bind(domain.partition_key())
    .bind(member.map(Subject::encode))
    .bind(target.map(Subject::encode))
    .fetch_all(executor)
    .await
    .map_err(|error| {
        AppError::Internal(format!(
            "failed to list grouping rules for domain '{domain}': {error}"
        ))
    })?;

    rows.into_iter()
        .map(|row| {
            GroupingRule::new(
                Subject::from_str(row.member.as_str())?,
                Subject::from_str(row.target.as_str())?,
                domain.clone(),
            )
        })
        .collect()
}

async fn select_role_metadata<'e, E>(
    executor: E,
    domain: &DomainRef,
) -> AppResult<Vec<RoleMetadata>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, RoleMetadataRow>(
        r#"
        SELECT role_name, display_name, description, is_readonly
        FROM policy_role_metadata
        WHERE partition_key = $1
        ORDER BY role_name
        "#,
    )
    .bind(domain.partition_key())
    .fetch_all(executor)
    .await
    .map_err(|error| {
        AppError::Internal(format!(
            "failed to list role metadata for domain '{domain}': {error}"
        ))
    })?;

    Ok(rows
        .into_iter()
        .map(|row| RoleMetadata {
            role_name: row.role_name,
            display_name: row.display_name,
            description: row.description,
            is_readonly: row.is_readonly,
        })
        .collect())
}
