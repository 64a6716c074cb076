use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{count_to_total, like_pattern};
use crate::db::{ContentFilter, DalError, ListQuery, Page, SortDirection, SortKey};
use crate::models::{ContentItem, ContentPatch, ContentStatus, EntityKind, NewContent, UserRef};

/// Row columns plus the creator/updater names joined from `users`. Every
/// query aliases the content relation as `t`.
const COLUMNS: &str = "t.id, t.title, t.category, t.summary, t.content, t.tags, t.status, \
     t.details, t.created_by, t.updated_by, t.created_at, t.updated_at, \
     c.username AS creator_username, c.display_name AS creator_display_name, \
     u.username AS updater_username, u.display_name AS updater_display_name";

const USER_JOINS: &str =
    "LEFT JOIN users c ON c.id = t.created_by LEFT JOIN users u ON u.id = t.updated_by";

#[derive(sqlx::FromRow)]
struct ContentRow {
    id: i64,
    title: String,
    category: String,
    summary: String,
    content: String,
    tags: Vec<String>,
    status: String,
    details: serde_json::Value,
    created_by: Option<i64>,
    updated_by: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    creator_username: Option<String>,
    creator_display_name: Option<String>,
    updater_username: Option<String>,
    updater_display_name: Option<String>,
}

impl ContentRow {
    fn into_item(self, kind: EntityKind) -> Result<ContentItem, DalError> {
        let status = ContentStatus::parse(&self.status).ok_or_else(|| {
            DalError::InvalidData(format!("{kind} {} has unknown status {}", self.id, self.status))
        })?;
        Ok(ContentItem {
            id: self.id,
            kind,
            title: self.title,
            category: self.category,
            summary: self.summary,
            content: self.content,
            tags: self.tags,
            status,
            details: self.details,
            created_by: self.created_by,
            updated_by: self.updated_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            creator: user_ref(self.created_by, self.creator_username, self.creator_display_name),
            updater: user_ref(self.updated_by, self.updater_username, self.updater_display_name),
        })
    }
}

fn user_ref(
    id: Option<i64>,
    username: Option<String>,
    display_name: Option<String>,
) -> Option<UserRef> {
    Some(UserRef {
        id: id?,
        username: username?,
        display_name: display_name.unwrap_or_default(),
    })
}

fn into_items(rows: Vec<ContentRow>, kind: EntityKind) -> Result<Vec<ContentItem>, DalError> {
    rows.into_iter().map(|row| row.into_item(kind)).collect()
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &ContentFilter) {
    if filter.statuses.is_empty() {
        qb.push(" WHERE t.status <> 'deleted'");
    } else {
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        qb.push(" WHERE t.status = ANY(").push_bind(statuses).push(")");
    }

    if let Some(category) = &filter.category {
        qb.push(" AND t.category = ").push_bind(category.clone());
    }
    if !filter.tags.is_empty() {
        qb.push(" AND t.tags @> ").push_bind(filter.tags.clone());
    }
    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        qb.push(" AND (t.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR t.summary ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR t.content ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(created_by) = filter.created_by {
        qb.push(" AND t.created_by = ").push_bind(created_by);
    }
    if let Some(from) = filter.updated_from {
        qb.push(" AND t.updated_at >= ").push_bind(from);
    }
    if let Some(to) = filter.updated_to {
        qb.push(" AND t.updated_at <= ").push_bind(to);
    }
}

fn order_by(query: &ListQuery) -> String {
    let dir = match query.sort.direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    match query.sort.key {
        SortKey::UpdatedAt => format!(" ORDER BY t.updated_at {dir}, t.id {dir}"),
        SortKey::CreatedAt => format!(" ORDER BY t.created_at {dir}, t.id {dir}"),
        // Byte order, matching the JSON backend.
        SortKey::Title => format!(" ORDER BY t.title COLLATE \"C\" {dir}, t.id {dir}"),
        SortKey::Id => format!(" ORDER BY t.id {dir}"),
    }
}

pub async fn list(
    pool: &PgPool,
    kind: EntityKind,
    query: &ListQuery,
) -> Result<Page<ContentItem>, DalError> {
    let table = kind.as_str();
    let mut conn = pool.acquire().await?;

    let mut count_qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {table} t"));
    push_filters(&mut count_qb, &query.filter);
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(&mut *conn)
        .await?;
    if total == 0 {
        return Ok(Page::empty(query.page));
    }

    let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM {table} t {USER_JOINS}"));
    push_filters(&mut qb, &query.filter);
    qb.push(order_by(query));
    qb.push(" LIMIT ")
        .push_bind(i64::from(query.page.per_page()))
        .push(" OFFSET ")
        .push_bind(i64::try_from(query.page.offset()).unwrap_or(i64::MAX));
    let rows: Vec<ContentRow> = qb.build_query_as().fetch_all(&mut *conn).await?;

    Ok(Page {
        items: into_items(rows, kind)?,
        total: count_to_total(total),
        page: query.page.page(),
        per_page: query.page.per_page(),
    })
}

pub async fn find_by_id(
    pool: &PgPool,
    kind: EntityKind,
    id: i64,
) -> Result<Option<ContentItem>, DalError> {
    let table = kind.as_str();
    let mut conn = pool.acquire().await?;
    let row = sqlx::query_as::<_, ContentRow>(&format!(
        "SELECT {COLUMNS} FROM {table} t {USER_JOINS} WHERE t.id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|r| r.into_item(kind)).transpose()
}

pub async fn create(
    pool: &PgPool,
    kind: EntityKind,
    item: &NewContent,
    actor: Option<i64>,
) -> Result<ContentItem, DalError> {
    let table = kind.as_str();
    let mut conn = pool.acquire().await?;
    let row = sqlx::query_as::<_, ContentRow>(&format!(
        "WITH t AS (
            INSERT INTO {table} (title, category, summary, content, tags, status, details, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) RETURNING *
         )
         SELECT {COLUMNS} FROM t {USER_JOINS}"
    ))
    .bind(&item.title)
    .bind(&item.category)
    .bind(&item.summary)
    .bind(&item.content)
    .bind(&item.tags)
    .bind(item.initial_status().as_str())
    .bind(&item.details)
    .bind(actor)
    .fetch_one(&mut *conn)
    .await?;
    row.into_item(kind)
}

pub async fn update(
    pool: &PgPool,
    kind: EntityKind,
    id: i64,
    patch: &ContentPatch,
    actor: Option<i64>,
) -> Result<Option<ContentItem>, DalError> {
    let table = kind.as_str();
    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "WITH t AS (UPDATE {table} SET updated_at = now(), updated_by = "
    ));
    qb.push_bind(actor);

    if let Some(title) = &patch.title {
        qb.push(", title = ").push_bind(title.clone());
    }
    if let Some(category) = &patch.category {
        qb.push(", category = ").push_bind(category.clone());
    }
    if let Some(summary) = &patch.summary {
        qb.push(", summary = ").push_bind(summary.clone());
    }
    if let Some(content) = &patch.content {
        qb.push(", content = ").push_bind(content.clone());
    }
    if let Some(tags) = &patch.tags {
        qb.push(", tags = ").push_bind(tags.clone());
    }
    if let Some(status) = patch.status {
        qb.push(", status = ").push_bind(status.as_str());
    }
    if let Some(details) = &patch.details {
        qb.push(", details = ").push_bind(details.clone());
    }

    qb.push(" WHERE id = ").push_bind(id);
    qb.push(format!(" RETURNING *) SELECT {COLUMNS} FROM t {USER_JOINS}"));

    let mut conn = pool.acquire().await?;
    let row: Option<ContentRow> = qb.build_query_as().fetch_optional(&mut *conn).await?;
    row.map(|r| r.into_item(kind)).transpose()
}

pub async fn soft_delete(
    pool: &PgPool,
    kind: EntityKind,
    id: i64,
    actor: Option<i64>,
) -> Result<bool, DalError> {
    let table = kind.as_str();
    let mut conn = pool.acquire().await?;
    let result = sqlx::query(&format!(
        "UPDATE {table} SET status = 'deleted', updated_at = now(), updated_by = $2 WHERE id = $1"
    ))
    .bind(id)
    .bind(actor)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn hard_delete(pool: &PgPool, kind: EntityKind, id: i64) -> Result<bool, DalError> {
    let table = kind.as_str();
    let mut conn = pool.acquire().await?;
    let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn related_by_tags(
    pool: &PgPool,
    kind: EntityKind,
    tags: &[String],
    limit: u32,
    exclude_id: Option<i64>,
) -> Result<Vec<ContentItem>, DalError> {
    if tags.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }
    let table = kind.as_str();
    let mut conn = pool.acquire().await?;
    let rows = sqlx::query_as::<_, ContentRow>(&format!(
        "SELECT {COLUMNS},
                (SELECT COUNT(*) FROM unnest(t.tags) AS tag WHERE tag = ANY($1)) AS overlap
         FROM {table} t {USER_JOINS}
         WHERE t.tags && $1
           AND t.status <> 'deleted'
           AND ($2::BIGINT IS NULL OR t.id <> $2)
         ORDER BY overlap DESC, t.updated_at DESC, t.id DESC
         LIMIT $3"
    ))
    .bind(tags)
    .bind(exclude_id)
    .bind(i64::from(limit))
    .fetch_all(&mut *conn)
    .await?;
    into_items(rows, kind)
}
