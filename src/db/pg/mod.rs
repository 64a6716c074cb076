//! Postgres backend.
//!
//! Every operation checks out exactly one pooled connection (or one
//! transaction) and returns it when the guard drops, on success and on error.

mod access_log;
mod content;
mod integrations;
mod roles;
mod users;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::db::{AccessLogQuery, DalError, ListQuery, Page, Repository, UserQuery};
use crate::models::{
    AccessLog, ContentItem, ContentPatch, EntityKind, IntegrationKind, IntegrationRecord,
    NewAccessLog, NewContent, NewIntegrationRecord, NewUser, Permission, Role, RoleGrants,
    RoleSeed, User, UserPatch,
};

/// Builds the pool. `pool_size` connections are kept warm and up to
/// `max_overflow` more are opened under load.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DalError> {
    let options: PgConnectOptions = config
        .url
        .parse()
        .map_err(|e| DalError::InvalidInput(format!("invalid database url: {e}")))?;
    let options = options.options([(
        "statement_timeout",
        config.statement_timeout_ms.to_string(),
    )]);

    let pool = PgPoolOptions::new()
        .min_connections(config.pool_size)
        .max_connections((config.pool_size + config.max_overflow).max(1))
        .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
        .max_lifetime(Duration::from_secs(config.pool_recycle_secs))
        .test_before_acquire(true)
        .connect_with(options)
        .await?;

    tracing::info!(
        min = config.pool_size,
        max = config.pool_size + config.max_overflow,
        "Database pool ready"
    );
    Ok(pool)
}

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Repository for PgRepository {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn list_content(
        &self,
        kind: EntityKind,
        query: &ListQuery,
    ) -> Result<Page<ContentItem>, DalError> {
        content::list(&self.pool, kind, query).await
    }

    async fn get_content(
        &self,
        kind: EntityKind,
        id: i64,
    ) -> Result<Option<ContentItem>, DalError> {
        content::find_by_id(&self.pool, kind, id).await
    }

    async fn create_content(
        &self,
        kind: EntityKind,
        item: &NewContent,
        actor: Option<i64>,
    ) -> Result<ContentItem, DalError> {
        content::create(&self.pool, kind, item, actor).await
    }

    async fn update_content(
        &self,
        kind: EntityKind,
        id: i64,
        patch: &ContentPatch,
        actor: Option<i64>,
    ) -> Result<Option<ContentItem>, DalError> {
        content::update(&self.pool, kind, id, patch, actor).await
    }

    async fn soft_delete_content(
        &self,
        kind: EntityKind,
        id: i64,
        actor: Option<i64>,
    ) -> Result<bool, DalError> {
        content::soft_delete(&self.pool, kind, id, actor).await
    }

    async fn hard_delete_content(&self, kind: EntityKind, id: i64) -> Result<bool, DalError> {
        content::hard_delete(&self.pool, kind, id).await
    }

    async fn related_by_tags(
        &self,
        kind: EntityKind,
        tags: &[String],
        limit: u32,
        exclude_id: Option<i64>,
    ) -> Result<Vec<ContentItem>, DalError> {
        content::related_by_tags(&self.pool, kind, tags, limit, exclude_id).await
    }

    async fn list_users(&self, query: &UserQuery) -> Result<Page<User>, DalError> {
        users::list(&self.pool, query).await
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, DalError> {
        users::find_by_id(&self.pool, id).await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, DalError> {
        users::find_by_username(&self.pool, username).await
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, DalError> {
        users::create(&self.pool, user).await
    }

    async fn create_first_user(&self, user: &NewUser) -> Result<Option<User>, DalError> {
        users::create_first(&self.pool, user).await
    }

    async fn update_user(&self, id: i64, patch: &UserPatch) -> Result<Option<User>, DalError> {
        users::update(&self.pool, id, patch).await
    }

    async fn consume_backup_code(&self, user_id: i64, hash: &str) -> Result<bool, DalError> {
        users::consume_backup_code(&self.pool, user_id, hash).await
    }

    async fn list_roles(&self) -> Result<Vec<RoleGrants>, DalError> {
        roles::list(&self.pool).await
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, DalError> {
        roles::list_permissions(&self.pool).await
    }

    async fn create_role(&self, name: &str, description: &str) -> Result<Role, DalError> {
        roles::create(&self.pool, name, description).await
    }

    async fn permissions_for_roles(
        &self,
        roles: &[String],
    ) -> Result<BTreeSet<String>, DalError> {
        roles::permissions_for_roles(&self.pool, roles).await
    }

    async fn grant_permission(&self, role: &str, permission: &str) -> Result<bool, DalError> {
        roles::grant(&self.pool, role, permission).await
    }

    async fn seed_reference_data(&self, seeds: &[RoleSeed]) -> Result<(), DalError> {
        roles::seed(&self.pool, seeds).await
    }

    async fn append_access_log(&self, entry: &NewAccessLog) -> Result<AccessLog, DalError> {
        access_log::append(&self.pool, entry).await
    }

    async fn list_access_logs(
        &self,
        query: &AccessLogQuery,
    ) -> Result<Page<AccessLog>, DalError> {
        access_log::list(&self.pool, query).await
    }

    async fn put_integration_record(
        &self,
        record: &NewIntegrationRecord,
    ) -> Result<IntegrationRecord, DalError> {
        integrations::put(&self.pool, record).await
    }

    async fn list_integration_records(
        &self,
        kind: IntegrationKind,
    ) -> Result<Vec<IntegrationRecord>, DalError> {
        integrations::list(&self.pool, kind).await
    }
}

/// `ILIKE` pattern for a literal substring.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn count_to_total(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("crane"), "%crane%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }
}
