use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use super::{count_to_total, like_pattern};
use crate::db::{DalError, Page, UserQuery};
use crate::models::{BackupCode, NewUser, User, UserPatch, UserStatus};

const COLUMNS: &str = "u.id, u.username, u.display_name, u.email, u.department, u.status, \
     u.password_hash, u.mfa_secret, u.mfa_enabled, u.backup_codes, u.created_at, u.updated_at, \
     ARRAY(SELECT r.name FROM user_roles ur JOIN roles r ON r.id = ur.role_id \
           WHERE ur.user_id = u.id ORDER BY r.name) AS roles";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    display_name: String,
    email: Option<String>,
    department: Option<String>,
    status: String,
    password_hash: String,
    mfa_secret: Option<String>,
    mfa_enabled: bool,
    backup_codes: Json<Vec<BackupCode>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    roles: Vec<String>,
}

impl TryFrom<UserRow> for User {
    type Error = DalError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let status = UserStatus::parse(&row.status).ok_or_else(|| {
            DalError::InvalidData(format!("user {} has unknown status {}", row.id, row.status))
        })?;
        Ok(User {
            id: row.id,
            username: row.username,
            display_name: row.display_name,
            email: row.email,
            department: row.department,
            roles: row.roles,
            status,
            password_hash: row.password_hash,
            mfa_secret: row.mfa_secret,
            mfa_enabled: row.mfa_enabled,
            backup_codes: row.backup_codes.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &UserQuery) {
    qb.push(" WHERE TRUE");
    if let Some(search) = &query.search {
        let pattern = like_pattern(search);
        qb.push(" AND (u.username ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR u.display_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR u.email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(role) = &query.role {
        qb.push(
            " AND EXISTS (SELECT 1 FROM user_roles ur JOIN roles r ON r.id = ur.role_id \
             WHERE ur.user_id = u.id AND r.name = ",
        )
        .push_bind(role.clone())
        .push(")");
    }
    if let Some(status) = query.status {
        qb.push(" AND u.status = ").push_bind(status.as_str());
    }
}

pub async fn list(pool: &PgPool, query: &UserQuery) -> Result<Page<User>, DalError> {
    let mut conn = pool.acquire().await?;

    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM users u");
    push_filters(&mut count_qb, query);
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(&mut *conn)
        .await?;
    if total == 0 {
        return Ok(Page::empty(query.page));
    }

    let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM users u"));
    push_filters(&mut qb, query);
    qb.push(" ORDER BY u.id LIMIT ")
        .push_bind(i64::from(query.page.per_page()))
        .push(" OFFSET ")
        .push_bind(i64::try_from(query.page.offset()).unwrap_or(i64::MAX));
    let rows: Vec<UserRow> = qb.build_query_as().fetch_all(&mut *conn).await?;

    Ok(Page {
        items: rows
            .into_iter()
            .map(User::try_from)
            .collect::<Result<_, _>>()?,
        total: count_to_total(total),
        page: query.page.page(),
        per_page: query.page.per_page(),
    })
}

async fn fetch_by_id(conn: &mut PgConnection, id: i64) -> Result<Option<User>, DalError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {COLUMNS} FROM users u WHERE u.id = $1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.map(User::try_from).transpose()
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<User>, DalError> {
    let mut conn = pool.acquire().await?;
    fetch_by_id(&mut conn, id).await
}

pub async fn find_by_username(pool: &PgPool, username: &str) -> Result<Option<User>, DalError> {
    let mut conn = pool.acquire().await?;
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {COLUMNS} FROM users u WHERE u.username = $1"
    ))
    .bind(username)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(User::try_from).transpose()
}

/// Replaces the user's role set. Fails on any role name that does not exist.
async fn replace_roles(conn: &mut PgConnection, user_id: i64, roles: &[String]) -> Result<(), DalError> {
    let known: Vec<(i64, String)> =
        sqlx::query_as("SELECT id, name FROM roles WHERE name = ANY($1)")
            .bind(roles)
            .fetch_all(&mut *conn)
            .await?;
    if let Some(missing) = roles.iter().find(|r| !known.iter().any(|(_, name)| name == *r)) {
        return Err(DalError::InvalidInput(format!("unknown role: {missing}")));
    }

    sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    let ids: Vec<i64> = known.into_iter().map(|(id, _)| id).collect();
    sqlx::query("INSERT INTO user_roles (user_id, role_id) SELECT $1, unnest($2::BIGINT[])")
        .bind(user_id)
        .bind(ids)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn insert(conn: &mut PgConnection, user: &NewUser) -> Result<User, DalError> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO users (username, display_name, email, department, status, password_hash)
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
    )
    .bind(&user.username)
    .bind(&user.display_name)
    .bind(&user.email)
    .bind(&user.department)
    .bind(user.status.as_str())
    .bind(&user.password_hash)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match DalError::from(e) {
        DalError::Conflict(_) => {
            DalError::Conflict(format!("username {} is already taken", user.username))
        }
        other => other,
    })?;

    replace_roles(conn, id, &user.roles).await?;
    fetch_by_id(conn, id)
        .await?
        .ok_or_else(|| DalError::InvalidData(format!("user {id} vanished after insert")))
}

pub async fn create(pool: &PgPool, user: &NewUser) -> Result<User, DalError> {
    let mut tx = pool.begin().await?;
    let created = insert(&mut tx, user).await?;
    tx.commit().await?;
    Ok(created)
}

pub async fn create_first(pool: &PgPool, user: &NewUser) -> Result<Option<User>, DalError> {
    let mut tx = pool.begin().await?;
    // Serializes concurrent bootstrap attempts until commit.
    sqlx::query("SELECT pg_advisory_xact_lock(1)")
        .execute(&mut *tx)
        .await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&mut *tx)
        .await?;
    if existing > 0 {
        return Ok(None);
    }

    let created = insert(&mut tx, user).await?;
    tx.commit().await?;
    Ok(Some(created))
}

pub async fn update(pool: &PgPool, id: i64, patch: &UserPatch) -> Result<Option<User>, DalError> {
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE users SET updated_at = now()");
    if let Some(display_name) = &patch.display_name {
        qb.push(", display_name = ").push_bind(display_name.clone());
    }
    if let Some(email) = &patch.email {
        qb.push(", email = ").push_bind(email.clone());
    }
    if let Some(department) = &patch.department {
        qb.push(", department = ").push_bind(department.clone());
    }
    if let Some(status) = patch.status {
        qb.push(", status = ").push_bind(status.as_str());
    }
    if let Some(password_hash) = &patch.password_hash {
        qb.push(", password_hash = ").push_bind(password_hash.clone());
    }
    if let Some(secret) = &patch.mfa_secret {
        qb.push(", mfa_secret = ").push_bind(secret.clone());
    }
    if let Some(enabled) = patch.mfa_enabled {
        qb.push(", mfa_enabled = ").push_bind(enabled);
    }
    if let Some(codes) = &patch.backup_codes {
        qb.push(", backup_codes = ").push_bind(Json(codes.clone()));
    }
    qb.push(" WHERE id = ").push_bind(id).push(" RETURNING id");

    let mut tx = pool.begin().await?;
    let updated: Option<i64> = qb.build_query_scalar().fetch_optional(&mut *tx).await?;
    if updated.is_none() {
        return Ok(None);
    }
    if let Some(roles) = &patch.roles {
        replace_roles(&mut tx, id, roles).await?;
    }
    let user = fetch_by_id(&mut tx, id).await?;
    tx.commit().await?;
    Ok(user)
}

/// The row lock serialises concurrent logins for one user; the loser sees the
/// code already marked used.
pub async fn consume_backup_code(pool: &PgPool, id: i64, hash: &str) -> Result<bool, DalError> {
    let mut tx = pool.begin().await?;
    let codes: Option<Json<Vec<BackupCode>>> =
        sqlx::query_scalar("SELECT backup_codes FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(Json(mut codes)) = codes else {
        return Ok(false);
    };
    let Some(code) = codes.iter_mut().find(|c| !c.used && c.hash == hash) else {
        return Ok(false);
    };
    code.used = true;
    code.used_at = Some(Utc::now());

    sqlx::query("UPDATE users SET backup_codes = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(Json(codes))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}
