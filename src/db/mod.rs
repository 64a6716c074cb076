//! Data access layer.
//!
//! Business code talks to [`Repository`] only. Two implementations exist:
//! [`pg::PgRepository`] for production and [`file::FileRepository`], a
//! JSON-file store for development. The backend is chosen once at startup
//! from [`StorageConfig`] and injected as `Arc<dyn Repository>`.
//!
//! Expected absence is a value (`Option::None`, `false`, an empty page).
//! `DalError` is reserved for bad input and infrastructure failures.

pub mod file;
pub mod pg;
mod query;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::models::{
    AccessLog, ContentItem, ContentPatch, EntityKind, IntegrationKind, IntegrationRecord,
    NewAccessLog, NewContent, NewIntegrationRecord, NewUser, Permission, Role, RoleGrants,
    RoleSeed, User, UserPatch,
};

pub use query::{
    AccessLogQuery, ContentFilter, ListQuery, MAX_PER_PAGE, Page, PageRequest, Sort,
    SortDirection, SortKey, UserQuery, DEFAULT_PER_PAGE,
};

#[derive(Debug, thiserror::Error)]
pub enum DalError {
    /// Pool exhausted, connect failure or closed pool. Callers may retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for DalError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                DalError::Unavailable("timed out waiting for a pooled connection".to_string())
            }
            sqlx::Error::PoolClosed => DalError::Unavailable("connection pool closed".to_string()),
            sqlx::Error::Io(e) => DalError::Unavailable(format!("connection failed: {e}")),
            sqlx::Error::Tls(e) => DalError::Unavailable(format!("tls failure: {e}")),
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                tracing::debug!(
                    constraint = db_err.constraint().unwrap_or_default(),
                    "Unique violation: {}",
                    db_err.message()
                );
                DalError::Conflict("record already exists".to_string())
            }
            other => DalError::Database(other),
        }
    }
}

#[async_trait]
pub trait Repository: Send + Sync {
    fn backend_name(&self) -> &'static str;

    // Content

    async fn list_content(
        &self,
        kind: EntityKind,
        query: &ListQuery,
    ) -> Result<Page<ContentItem>, DalError>;

    async fn get_content(&self, kind: EntityKind, id: i64)
    -> Result<Option<ContentItem>, DalError>;

    async fn create_content(
        &self,
        kind: EntityKind,
        item: &NewContent,
        actor: Option<i64>,
    ) -> Result<ContentItem, DalError>;

    /// Overwrites only the fields present in `patch` and refreshes `updated_at`.
    async fn update_content(
        &self,
        kind: EntityKind,
        id: i64,
        patch: &ContentPatch,
        actor: Option<i64>,
    ) -> Result<Option<ContentItem>, DalError>;

    /// Flips the status to `deleted`. The row stays readable by id.
    async fn soft_delete_content(
        &self,
        kind: EntityKind,
        id: i64,
        actor: Option<i64>,
    ) -> Result<bool, DalError>;

    async fn hard_delete_content(&self, kind: EntityKind, id: i64) -> Result<bool, DalError>;

    /// Items sharing at least one tag, most shared tags first.
    async fn related_by_tags(
        &self,
        kind: EntityKind,
        tags: &[String],
        limit: u32,
        exclude_id: Option<i64>,
    ) -> Result<Vec<ContentItem>, DalError>;

    // Users

    async fn list_users(&self, query: &UserQuery) -> Result<Page<User>, DalError>;

    async fn get_user(&self, id: i64) -> Result<Option<User>, DalError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, DalError>;

    async fn create_user(&self, user: &NewUser) -> Result<User, DalError>;

    /// Creates `user` only if no user exists yet. Returns `None` otherwise.
    async fn create_first_user(&self, user: &NewUser) -> Result<Option<User>, DalError>;

    async fn update_user(&self, id: i64, patch: &UserPatch) -> Result<Option<User>, DalError>;

    /// Marks the unused backup code stored under `hash` as used, reading and
    /// writing under one lock. Returns `false` when no such unused code exists,
    /// so concurrent logins can accept a given code at most once.
    async fn consume_backup_code(&self, user_id: i64, hash: &str) -> Result<bool, DalError>;

    // Roles and permissions

    async fn list_roles(&self) -> Result<Vec<RoleGrants>, DalError>;

    async fn list_permissions(&self) -> Result<Vec<Permission>, DalError>;

    async fn create_role(&self, name: &str, description: &str) -> Result<Role, DalError>;

    /// Union of the permissions directly assigned to any of `roles`.
    async fn permissions_for_roles(&self, roles: &[String])
    -> Result<BTreeSet<String>, DalError>;

    /// Assigns `permission` to `role`, creating the permission row if needed.
    /// Returns `false` when the role does not exist.
    async fn grant_permission(&self, role: &str, permission: &str) -> Result<bool, DalError>;

    /// Inserts missing roles, permissions and grants. Never removes anything.
    async fn seed_reference_data(&self, seeds: &[RoleSeed]) -> Result<(), DalError>;

    // Audit

    async fn append_access_log(&self, entry: &NewAccessLog) -> Result<AccessLog, DalError>;

    async fn list_access_logs(&self, query: &AccessLogQuery)
    -> Result<Page<AccessLog>, DalError>;

    // External integration bookkeeping

    async fn put_integration_record(
        &self,
        record: &NewIntegrationRecord,
    ) -> Result<IntegrationRecord, DalError>;

    async fn list_integration_records(
        &self,
        kind: IntegrationKind,
    ) -> Result<Vec<IntegrationRecord>, DalError>;
}

/// Opens the configured backend. The relational backend also applies
/// pending migrations.
pub async fn open(storage: &StorageConfig) -> Result<Arc<dyn Repository>, DalError> {
    match storage {
        StorageConfig::Postgres(db) => {
            let pool = pg::connect(db).await?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| DalError::Unavailable(format!("migrations failed: {e}")))?;
            tracing::info!("Migrations applied");
            Ok(Arc::new(pg::PgRepository::new(pool)))
        }
        StorageConfig::Json { data_dir } => {
            tracing::warn!(
                dir = %data_dir.display(),
                "Using JSON file storage; single-process development mode only"
            );
            Ok(Arc::new(file::FileRepository::new(data_dir.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};

    #[derive(Debug, thiserror::Error)]
    #[error("duplicate key value violates unique constraint \"users_username_key\"")]
    struct UniqueViolation;

    impl DatabaseError for UniqueViolation {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint \"users_username_key\""
        }

        fn constraint(&self) -> Option<&str> {
            Some("users_username_key")
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn unique_violation_becomes_generic_conflict() {
        let err = DalError::from(sqlx::Error::Database(Box::new(UniqueViolation)));
        match err {
            DalError::Conflict(message) => assert_eq!(message, "record already exists"),
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    #[test]
    fn connection_failures_are_unavailable() {
        assert!(matches!(
            DalError::from(sqlx::Error::PoolTimedOut),
            DalError::Unavailable(_)
        ));
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(DalError::from(sqlx::Error::Io(io)), DalError::Unavailable(_)));
    }
}
