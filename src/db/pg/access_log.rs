use sqlx::{PgPool, Postgres, QueryBuilder};

use super::count_to_total;
use crate::db::{AccessLogQuery, DalError, Page};
use crate::models::{AccessLog, NewAccessLog};

const COLUMNS: &str = "id, logged_at, user_id, action, status, ip";

pub async fn append(pool: &PgPool, entry: &NewAccessLog) -> Result<AccessLog, DalError> {
    let mut conn = pool.acquire().await?;
    let log = sqlx::query_as::<_, AccessLog>(&format!(
        "INSERT INTO access_logs (user_id, action, status, ip)
         VALUES ($1, $2, $3, $4) RETURNING {COLUMNS}"
    ))
    .bind(entry.user_id)
    .bind(&entry.action)
    .bind(&entry.status)
    .bind(&entry.ip)
    .fetch_one(&mut *conn)
    .await?;
    Ok(log)
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &AccessLogQuery) {
    qb.push(" WHERE TRUE");
    if let Some(user_id) = query.user_id {
        qb.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(action) = &query.action {
        qb.push(" AND action = ").push_bind(action.clone());
    }
}

pub async fn list(pool: &PgPool, query: &AccessLogQuery) -> Result<Page<AccessLog>, DalError> {
    let mut conn = pool.acquire().await?;

    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM access_logs");
    push_filters(&mut count_qb, query);
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(&mut *conn)
        .await?;

    let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM access_logs"));
    push_filters(&mut qb, query);
    qb.push(" ORDER BY logged_at DESC, id DESC LIMIT ")
        .push_bind(i64::from(query.page.per_page()))
        .push(" OFFSET ")
        .push_bind(i64::try_from(query.page.offset()).unwrap_or(i64::MAX));
    let items: Vec<AccessLog> = qb.build_query_as().fetch_all(&mut *conn).await?;

    Ok(Page {
        items,
        total: count_to_total(total),
        page: query.page.page(),
        per_page: query.page.per_page(),
    })
}
