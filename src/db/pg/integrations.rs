use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db::DalError;
use crate::models::{IntegrationKind, IntegrationRecord, NewIntegrationRecord};

#[derive(sqlx::FromRow)]
struct IntegrationRow {
    id: i64,
    kind: String,
    key: Option<String>,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IntegrationRow> for IntegrationRecord {
    type Error = DalError;

    fn try_from(row: IntegrationRow) -> Result<Self, Self::Error> {
        let kind = IntegrationKind::parse(&row.kind).ok_or_else(|| {
            DalError::InvalidData(format!("integration record {} has unknown kind {}", row.id, row.kind))
        })?;
        Ok(IntegrationRecord {
            id: row.id,
            kind,
            key: row.key,
            payload: row.payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// NULL keys never collide under the unique constraint, so unkeyed records
/// always insert.
pub async fn put(pool: &PgPool, record: &NewIntegrationRecord) -> Result<IntegrationRecord, DalError> {
    let mut conn = pool.acquire().await?;
    let row = sqlx::query_as::<_, IntegrationRow>(
        "INSERT INTO integration_records (kind, key, payload) VALUES ($1, $2, $3)
         ON CONFLICT (kind, key) DO UPDATE SET payload = EXCLUDED.payload, updated_at = now()
         RETURNING *",
    )
    .bind(record.kind.as_str())
    .bind(&record.key)
    .bind(&record.payload)
    .fetch_one(&mut *conn)
    .await?;
    row.try_into()
}

pub async fn list(pool: &PgPool, kind: IntegrationKind) -> Result<Vec<IntegrationRecord>, DalError> {
    let mut conn = pool.acquire().await?;
    let rows = sqlx::query_as::<_, IntegrationRow>(
        "SELECT * FROM integration_records WHERE kind = $1 ORDER BY id",
    )
    .bind(kind.as_str())
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(IntegrationRecord::try_from).collect()
}
