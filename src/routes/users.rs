use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use crate::auth::{Principal, password};
use crate::db::{PageRequest, UserQuery};
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::{NewUser, UserPatch, UserProfile, UserStatus};
use crate::net::ClientIp;
use crate::routes::{
    ApiResponse, Body, Params, PathParam, ok, paginated, validate_new_password, validate_username,
};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct UserListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub search: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Absent fields are left alone. An empty `email` or `department` clears it.
#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    pub roles: Option<Vec<String>>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub new_password: String,
}

fn parse_status(raw: &str) -> Result<UserStatus, AppError> {
    UserStatus::parse(raw).ok_or_else(|| AppError::Validation(format!("Unknown status: {raw}")))
}

fn optional_text(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub async fn list(
    principal: Principal,
    State(state): State<SharedState>,
    Params(params): Params<UserListParams>,
) -> Result<Json<ApiResponse<Vec<UserProfile>>>, AppError> {
    principal.require("users.read")?;

    let query = UserQuery {
        search: optional_text(params.search),
        role: optional_text(params.role),
        status: params.status.as_deref().map(parse_status).transpose()?,
        page: PageRequest::from_params(params.page, params.per_page),
    };
    let page = state.repo.list_users(&query).await?;
    Ok(paginated(page.map(UserProfile::from)))
}

pub async fn get(
    principal: Principal,
    State(state): State<SharedState>,
    PathParam(id): PathParam<i64>,
) -> Result<Json<ApiResponse<UserProfile>>, AppError> {
    if id != principal.id() {
        principal.require("users.read")?;
    }
    let user = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(ok(UserProfile::from(user)))
}

pub async fn create(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Body(req): Body<CreateUserRequest>,
) -> Result<Json<ApiResponse<UserProfile>>, AppError> {
    principal.require("users.create")?;

    let username = validate_username(&req.username)?;
    validate_new_password(&req.password)?;

    let new_user = NewUser {
        display_name: optional_text(req.display_name).unwrap_or_else(|| username.clone()),
        username,
        email: optional_text(req.email),
        department: optional_text(req.department),
        password_hash: password::hash(&req.password).map_err(AppError::Internal)?,
        roles: req.roles,
        status: UserStatus::Active,
    };
    let user = state.repo.create_user(&new_user).await?;

    tracing::info!(user_id = user.id, created_by = principal.id(), "User created");
    audit::log_access(state.repo.as_ref(), Some(principal.id()), "users.create", "success", ip)
        .await;

    Ok(ok(UserProfile::from(user)))
}

pub async fn update(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    PathParam(id): PathParam<i64>,
    Body(req): Body<UpdateUserRequest>,
) -> Result<Json<ApiResponse<UserProfile>>, AppError> {
    principal.require("users.update")?;

    let patch = UserPatch {
        display_name: match req.display_name {
            Some(name) if name.trim().is_empty() => {
                return Err(AppError::Validation("Display name cannot be empty".to_string()));
            }
            other => other.map(|n| n.trim().to_string()),
        },
        email: req.email.map(|e| optional_text(Some(e))),
        department: req.department.map(|d| optional_text(Some(d))),
        roles: req.roles,
        status: req.status.as_deref().map(parse_status).transpose()?,
        ..UserPatch::default()
    };

    let user = state
        .repo
        .update_user(id, &patch)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    audit::log_access(state.repo.as_ref(), Some(principal.id()), "users.update", "success", ip)
        .await;

    Ok(ok(UserProfile::from(user)))
}

/// Administrative reset. Also clears the second factor so a user who lost
/// their authenticator can enroll again.
pub async fn reset_password(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    PathParam(id): PathParam<i64>,
    Body(req): Body<ResetPasswordRequest>,
) -> Result<Json<ApiResponse<UserProfile>>, AppError> {
    principal.require("users.update")?;
    validate_new_password(&req.new_password)?;

    let patch = UserPatch {
        password_hash: Some(password::hash(&req.new_password).map_err(AppError::Internal)?),
        mfa_enabled: Some(false),
        mfa_secret: Some(None),
        backup_codes: Some(Vec::new()),
        ..UserPatch::default()
    };
    let user = state
        .repo
        .update_user(id, &patch)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    tracing::info!(user_id = id, reset_by = principal.id(), "Password reset");
    audit::log_access(
        state.repo.as_ref(),
        Some(principal.id()),
        "users.reset_password",
        "success",
        ip,
    )
    .await;

    Ok(ok(UserProfile::from(user)))
}
