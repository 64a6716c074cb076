use std::collections::BTreeSet;

use sqlx::{PgConnection, PgPool};

use crate::db::DalError;
use crate::models::{Permission, Role, RoleGrants, RoleSeed};

#[derive(sqlx::FromRow)]
struct RoleGrantsRow {
    id: i64,
    name: String,
    description: String,
    permissions: Vec<String>,
}

pub async fn list(pool: &PgPool) -> Result<Vec<RoleGrants>, DalError> {
    let mut conn = pool.acquire().await?;
    let rows = sqlx::query_as::<_, RoleGrantsRow>(
        "SELECT r.id, r.name, r.description,
                ARRAY(SELECT p.name FROM role_permissions rp
                      JOIN permissions p ON p.id = rp.permission_id
                      WHERE rp.role_id = r.id ORDER BY p.name) AS permissions
         FROM roles r ORDER BY r.name",
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| RoleGrants {
            role: Role {
                id: row.id,
                name: row.name,
                description: row.description,
            },
            permissions: row.permissions,
        })
        .collect())
}

pub async fn list_permissions(pool: &PgPool) -> Result<Vec<Permission>, DalError> {
    let mut conn = pool.acquire().await?;
    let permissions = sqlx::query_as::<_, Permission>(
        "SELECT id, name, resource, action FROM permissions ORDER BY name",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(permissions)
}

pub async fn create(pool: &PgPool, name: &str, description: &str) -> Result<Role, DalError> {
    let mut conn = pool.acquire().await?;
    sqlx::query_as::<_, Role>(
        "INSERT INTO roles (name, description) VALUES ($1, $2) RETURNING id, name, description",
    )
    .bind(name)
    .bind(description)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match DalError::from(e) {
        DalError::Conflict(_) => DalError::Conflict(format!("role {name} already exists")),
        other => other,
    })
}

pub async fn permissions_for_roles(
    pool: &PgPool,
    roles: &[String],
) -> Result<BTreeSet<String>, DalError> {
    if roles.is_empty() {
        return Ok(BTreeSet::new());
    }
    let mut conn = pool.acquire().await?;
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT p.name FROM permissions p
         JOIN role_permissions rp ON rp.permission_id = p.id
         JOIN roles r ON r.id = rp.role_id
         WHERE r.name = ANY($1)",
    )
    .bind(roles)
    .fetch_all(&mut *conn)
    .await?;
    Ok(names.into_iter().collect())
}

/// Returns the id of the permission `name`, inserting it when missing.
async fn ensure_permission(conn: &mut PgConnection, name: &str) -> Result<i64, DalError> {
    let (resource, action) = Permission::split_name(name)
        .ok_or_else(|| DalError::InvalidInput(format!("invalid permission name: {name}")))?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO permissions (name, resource, action) VALUES ($1, $2, $3)
         ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
         RETURNING id",
    )
    .bind(name)
    .bind(resource)
    .bind(action)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

async fn link(conn: &mut PgConnection, role_id: i64, permission_id: i64) -> Result<(), DalError> {
    sqlx::query(
        "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)
         ON CONFLICT DO NOTHING",
    )
    .bind(role_id)
    .bind(permission_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn grant(pool: &PgPool, role: &str, permission: &str) -> Result<bool, DalError> {
    let mut tx = pool.begin().await?;
    let role_id: Option<i64> = sqlx::query_scalar("SELECT id FROM roles WHERE name = $1")
        .bind(role)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(role_id) = role_id else {
        return Ok(false);
    };

    let permission_id = ensure_permission(&mut tx, permission).await?;
    link(&mut tx, role_id, permission_id).await?;
    tx.commit().await?;
    Ok(true)
}

pub async fn seed(pool: &PgPool, seeds: &[RoleSeed]) -> Result<(), DalError> {
    let mut tx = pool.begin().await?;
    for seed in seeds {
        let role_id: i64 = sqlx::query_scalar(
            "INSERT INTO roles (name, description) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id",
        )
        .bind(&seed.name)
        .bind(&seed.description)
        .fetch_one(&mut *tx)
        .await?;

        for name in &seed.permissions {
            let permission_id = ensure_permission(&mut tx, name).await?;
            link(&mut tx, role_id, permission_id).await?;
        }
    }
    tx.commit().await?;
    Ok(())
}
