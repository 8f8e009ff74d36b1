use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use warden_application::{RoleMetadata, RuleTransaction, WriteOutcome};
use warden_core::{AppError, AppResult};
use warden_domain::{DomainRef, GrantRule, GroupingRule, Subject};

use super::{select_grants, select_groupings, select_role_metadata};

/// Database transaction holding the partition's advisory lock until it ends.
pub(super) struct PostgresRuleTransaction {
    transaction: Transaction<'static, Postgres>,
    domain: DomainRef,
    partition_key: String,
}

impl PostgresRuleTransaction {
    pub(super) async fn begin(pool: &PgPool, domain: &DomainRef) -> AppResult<Self> {
        let partition_key = domain.partition_key();
        let mut transaction = pool.begin().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to start policy transaction for domain '{domain}': {error}"
            ))
        })?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(partition_key.as_str())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to lock policy partition '{partition_key}': {error}"
                ))
            })?;

        Ok(Self {
            transaction,
            domain: domain.clone(),
            partition_key,
        })
    }

    fn organization_id(&self) -> Option<&str> {
        self.domain.organization_id()
    }
}

#[async_trait]
impl RuleTransaction for PostgresRuleTransaction {
    fn domain(&self) -> &DomainRef {
        &self.domain
    }

    async fn add_grant(&mut self, rule: &GrantRule) -> AppResult<WriteOutcome> {
        let organization_id = self.organization_id().map(str::to_owned);
        let result = sqlx::query(
            r#"
            INSERT INTO policy_grant_rules (
                partition_key,
                domain_type,
                domain_id,
                organization_id,
                role_name,
                resource,
                action
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (partition_key, role_name, resource, action) DO NOTHING
            "#,
        )
        .bind(self.partition_key.as_str())
        .bind(self.domain.domain_type().as_str())
        .bind(self.domain.domain_id())
        .bind(organization_id)
        .bind(rule.role())
        .bind(rule.resource())
        .bind(rule.action())
        .execute(&mut *self.transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to insert grant rule for role '{}' in '{}': {error}",
                rule.role(),
                self.partition_key
            ))
        })?;

        Ok(WriteOutcome::from_changed(result.rows_affected() > 0))
    }

    async fn remove_grant(&mut self, rule: &GrantRule) -> AppResult<WriteOutcome> {
        let result = sqlx::query(
            r#"
            DELETE FROM policy_grant_rules
            WHERE partition_key = $1
              AND role_name = $2
              AND resource = $3
              AND action = $4
            "#,
        )
        .bind(self.partition_key.as_str())
        .bind(rule.role())
        .bind(rule.resource())
        .bind(rule.action())
        .execute(&mut *self.transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to delete grant rule for role '{}' in '{}': {error}",
                rule.role(),
                self.partition_key
            ))
        })?;

        Ok(WriteOutcome::from_changed(result.rows_affected() > 0))
    }

    async fn add_grouping(&mut self, rule: &GroupingRule) -> AppResult<WriteOutcome> {
        let organization_id = self.organization_id().map(str::to_owned);
        let result = sqlx::query(
            r#"
            INSERT INTO policy_grouping_rules (
                partition_key,
                domain_type,
                domain_id,
                organization_id,
                member,
                target
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (partition_key, member, target) DO NOTHING
            "#,
        )
        .bind(self.partition_key.as_str())
        .bind(self.domain.domain_type().as_str())
        .bind(self.domain.domain_id())
        .bind(organization_id)
        .bind(rule.member().encode())
        .bind(rule.target().encode())
        .execute(&mut *self.transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to insert grouping '{}' -> '{}' in '{}': {error}",
                rule.member(),
                rule.target(),
                self.partition_key
            ))
        })?;

        Ok(WriteOutcome::from_changed(result.rows_affected() > 0))
    }

    async fn remove_grouping(&mut self, rule: &GroupingRule) -> AppResult<WriteOutcome> {
        let result = sqlx::query(
            r#"
            DELETE FROM policy_grouping_rules
            WHERE partition_key = $1
              AND member = $2
              AND target = $3
            "#,
        )
        .bind(self.partition_key.as_str())
        .bind(rule.member().encode())
        .bind(rule.target().encode())
        .execute(&mut *self.transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to delete grouping '{}' -> '{}' in '{}': {error}",
                rule.member(),
                rule.target(),
                self.partition_key
            ))
        })?;

        Ok(WriteOutcome::from_changed(result.rows_affected() > 0))
    }

    async fn filter_grants(&mut self, role: Option<&str>) -> AppResult<Vec<GrantRule>> {
        select_grants(&mut *self.transaction, &self.domain, role).await
    }

    async fn filter_groupings(
        &mut self,
        member: Option<&Subject>,
        target: Option<&Subject>,
    ) -> AppResult<Vec<GroupingRule>> {
        select_groupings(&mut *self.transaction, &self.domain, member, target).await
    }

    async fn list_role_metadata(&mut self) -> AppResult<Vec<RoleMetadata>> {
        select_role_metadata(&mut *self.transaction, &self.domain).await
    }

    async fn save_role_metadata(&mut self, metadata: &RoleMetadata) -> AppResult<WriteOutcome> {
        let organization_id = self.organization_id().map(str::to_owned);
        let result = sqlx::query(
            r#"
            INSERT INTO policy_role_metadata (
                partition_key,
                domain_type,
                domain_id,
                organization_id,
                role_name,
                display_name,
                description,
                is_readonly
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (partition_key, role_name) DO UPDATE
            SET
                display_name = EXCLUDED.display_name,
                description = EXCLUDED.description,
                is_readonly = EXCLUDED.is_readonly
            WHERE (
                policy_role_metadata.display_name,
                policy_role_metadata.description,
                policy_role_metadata.is_readonly
            ) IS DISTINCT FROM (
                EXCLUDED.display_name,
                EXCLUDED.description,
                EXCLUDED.is_readonly
            )
            "#,
        )
        .bind(self.partition_key.as_str())
        .bind(self.domain.domain_type().as_str())
        .bind(self.domain.domain_id())
        .bind(organization_id)
        .bind(metadata.role_name.as_str())
        .bind(metadata.display_name.as_str())
        .bind(metadata.description.as_deref())
        .bind(metadata.is_readonly)
        .execute(&mut *self.transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to save metadata for role '{}' in '{}': {error}",
                metadata.role_name, self.partition_key
            ))
        })?;

        Ok(WriteOutcome::from_changed(result.rows_affected() > 0))
    }

    async fn remove_role_metadata(&mut self, role_name: &str) -> AppResult<WriteOutcome> {
        let result = sqlx::query(
            r#"
            DELETE FROM policy_role_metadata
            WHERE partition_key = $1
              AND role_name = $2
            "#,
        )
        .bind(self.partition_key.as_str())
        .bind(role_name)
        .execute(&mut *self.transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to delete metadata for role '{role_name}' in '{}': {error}",
                self.partition_key
            ))
        })?;

        Ok(WriteOutcome::from_changed(result.rows_affected() > 0))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let Self {
            transaction,
            partition_key,
            ..
        } = *self;
        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit policy transaction for '{partition_key}': {error}"
            ))
        })
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        let Self {
            transaction,
            partition_key,
            ..
        } = *self;
        transaction.rollback().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to roll back policy transaction for '{partition_key}': {error}"
            ))
        })
    }
}
