use std::sync::LazyLock;

use axum::Json;
use axum::extract::{Path, State};
use regex::Regex;
use serde::Deserialize;

use crate::auth::Principal;
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::{Permission, RoleGrants};
use crate::net::ClientIp;
use crate::routes::{ApiResponse, Body, ok};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Deserialize)]
pub struct GrantRequest {
    pub permission: String,
}

static ROLE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").unwrap());

/// `resource.action`, both parts snake_case.
static PERMISSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*\.[a-z][a-z0-9_]*$").unwrap());

fn validate_role_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if !ROLE_NAME_RE.is_match(name) {
        return Err(AppError::Validation(
            "Role names use lowercase letters, digits and underscores".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn validate_permission(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if !PERMISSION_RE.is_match(name) {
        return Err(AppError::Validation(format!(
            "Permission '{name}' must look like resource.action"
        )));
    }
    Ok(name.to_string())
}

pub async fn list(
    principal: Principal,
    State(state): State<SharedState>,
) -> Result<Json<ApiResponse<Vec<RoleGrants>>>, AppError> {
    principal.require("roles.read")?;
    Ok(ok(state.repo.list_roles().await?))
}

pub async fn list_permissions(
    principal: Principal,
    State(state): State<SharedState>,
) -> Result<Json<ApiResponse<Vec<Permission>>>, AppError> {
    principal.require("roles.read")?;
    Ok(ok(state.repo.list_permissions().await?))
}

/// New roles are composed from permission rows; nothing in code checks role
/// names.
pub async fn create(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Body(req): Body<CreateRoleRequest>,
) -> Result<Json<ApiResponse<RoleGrants>>, AppError> {
    principal.require("roles.update")?;

    let name = validate_role_name(&req.name)?;
    let permissions = req
        .permissions
        .iter()
        .map(|p| validate_permission(p))
        .collect::<Result<Vec<_>, _>>()?;

    let role = state.repo.create_role(&name, req.description.trim()).await?;
    for permission in &permissions {
        state.repo.grant_permission(&role.name, permission).await?;
    }

    tracing::info!(role = %role.name, grants = permissions.len(), "Role created");
    audit::log_access(state.repo.as_ref(), Some(principal.id()), "roles.create", "success", ip)
        .await;

    let mut permissions = permissions;
    permissions.sort();
    permissions.dedup();
    Ok(ok(RoleGrants { role, permissions }))
}

pub async fn grant(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Path(name): Path<String>,
    Body(req): Body<GrantRequest>,
) -> Result<Json<ApiResponse<RoleGrants>>, AppError> {
    principal.require("roles.update")?;

    let permission = validate_permission(&req.permission)?;
    if !state.repo.grant_permission(&name, &permission).await? {
        return Err(AppError::NotFound(format!("Role '{name}' not found")));
    }

    audit::log_access(state.repo.as_ref(), Some(principal.id()), "roles.grant", "success", ip)
        .await;

    let grants = state
        .repo
        .list_roles()
        .await?
        .into_iter()
        .find(|r| r.role.name == name)
        .ok_or_else(|| AppError::NotFound(format!("Role '{name}' not found")))?;
    Ok(ok(grants))
}
