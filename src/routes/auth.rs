use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::auth::Principal;
use crate::auth::jwt::{Claims, encode_token};
use crate::auth::{mfa, password};
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::{NewUser, User, UserPatch, UserProfile, UserStatus};
use crate::net::ClientIp;
use crate::routes::{ApiResponse, Body, ok, validate_new_password, validate_username};
use crate::state::SharedState;

/// Role given to the account created by first-run registration.
const BOOTSTRAP_ROLE: &str = "admin";

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub mfa_code: Option<String>,
    pub backup_code: Option<String>,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: UserProfile,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user: UserProfile,
    pub permissions: Vec<String>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn issue_token(state: &SharedState, user: &User) -> Result<TokenResponse, AppError> {
    let ttl = state.config.token_ttl_minutes;
    let claims = Claims::new(user.id, &user.username, ttl);
    let access_token =
        encode_token(&claims, &state.config.jwt_secret).map_err(AppError::Internal)?;
    Ok(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: ttl * 60,
        user: UserProfile::from(user),
    })
}

/// First-run bootstrap: creates the initial administrator. Refused once any
/// user exists.
pub async fn register(
    State(state): State<SharedState>,
    ip: ClientIp,
    Body(req): Body<RegisterRequest>,
) -> Result<Json<ApiResponse<TokenResponse>>, AppError> {
    let username = validate_username(&req.username)?;
    validate_new_password(&req.password)?;

    let pw_hash = password::hash(&req.password).map_err(AppError::Internal)?;
    let new_user = NewUser {
        display_name: req
            .display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| username.clone()),
        username,
        email: req.email.filter(|e| !e.trim().is_empty()),
        department: None,
        password_hash: pw_hash,
        roles: vec![BOOTSTRAP_ROLE.to_string()],
        status: UserStatus::Active,
    };

    let user = state
        .repo
        .create_first_user(&new_user)
        .await?
        .ok_or_else(|| {
            AppError::Forbidden(
                "Registration is disabled. Contact your system administrator.".to_string(),
            )
        })?;

    tracing::info!(user_id = user.id, "Bootstrap administrator registered");
    audit::log_access(state.repo.as_ref(), Some(user.id), "register", "success", ip).await;

    Ok(ok(issue_token(&state, &user)?))
}

pub async fn login(
    State(state): State<SharedState>,
    ip: ClientIp,
    Body(req): Body<LoginRequest>,
) -> Result<Json<ApiResponse<TokenResponse>>, AppError> {
    let repo = state.repo.as_ref();

    if let Err(retry_after) = state.login_limiter.check(&req.username) {
        audit::log_access(repo, None, "login", "rate_limited", ip).await;
        return Err(AppError::RateLimited(format!(
            "Too many login attempts. Try again in {retry_after} seconds."
        )));
    }

    let user = repo.find_user_by_username(&req.username).await?;
    let Some(mut user) = user.filter(|u| u.is_active() && password::verify(&req.password, &u.password_hash))
    else {
        state.login_limiter.record_failure(&req.username);
        audit::log_access(repo, None, "login", "failure", ip).await;
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    };

    if password::needs_rehash(&user.password_hash) {
        let upgraded = password::hash(&req.password).map_err(AppError::Internal)?;
        let patch = UserPatch {
            password_hash: Some(upgraded),
            ..UserPatch::default()
        };
        if let Some(updated) = repo.update_user(user.id, &patch).await? {
            user = updated;
            tracing::info!(user_id = user.id, "Legacy password hash upgraded to bcrypt");
        }
    }

    if user.mfa_enabled {
        let passed = match (req.mfa_code.as_deref(), req.backup_code.as_deref()) {
            (Some(code), _) => {
                mfa::verify_code(user.mfa_secret.as_deref(), code, mfa::DEFAULT_WINDOW)
            }
            (None, Some(candidate)) => consume_backup_code(&state, &user, candidate).await?,
            (None, None) => return Err(AppError::MfaRequired),
        };
        if !passed {
            state.login_limiter.record_failure(&req.username);
            audit::log_access(repo, Some(user.id), "login", "mfa_failure", ip).await;
            return Err(AppError::Unauthorized(
                "Invalid verification code".to_string(),
            ));
        }
    }

    state.login_limiter.reset(&req.username);
    audit::log_access(repo, Some(user.id), "login", "success", ip).await;

    Ok(ok(issue_token(&state, &user)?))
}

/// Accepts the first unused backup code matching `candidate`. The repository
/// marks it used atomically, so a code raced by two logins is accepted once.
async fn consume_backup_code(
    state: &SharedState,
    user: &User,
    candidate: &str,
) -> Result<bool, AppError> {
    let Some(code) = user
        .backup_codes
        .iter()
        .find(|c| !c.used && mfa::verify_backup_code(&c.hash, candidate))
    else {
        return Ok(false);
    };

    if !state.repo.consume_backup_code(user.id, &code.hash).await? {
        tracing::warn!(user_id = user.id, "Backup code was already consumed");
        return Ok(false);
    }

    tracing::info!(
        user_id = user.id,
        remaining = user.remaining_backup_codes().saturating_sub(1),
        "Backup code used"
    );
    Ok(true)
}

pub async fn me(principal: Principal) -> Json<ApiResponse<MeResponse>> {
    ok(MeResponse {
        permissions: principal.permissions.iter().map(str::to_string).collect(),
        user: UserProfile::from(principal.user),
    })
}

pub async fn change_password(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Body(req): Body<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, AppError> {
    if !password::verify(&req.current_password, &principal.user.password_hash) {
        return Err(AppError::Validation(
            "Current password is incorrect".to_string(),
        ));
    }
    validate_new_password(&req.new_password)?;

    let pw_hash = password::hash(&req.new_password).map_err(AppError::Internal)?;
    let patch = UserPatch {
        password_hash: Some(pw_hash),
        ..UserPatch::default()
    };
    state
        .repo
        .update_user(principal.id(), &patch)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    audit::log_access(state.repo.as_ref(), Some(principal.id()), "change_password", "success", ip)
        .await;

    Ok(ok(MessageResponse {
        message: "Password updated".to_string(),
    }))
}
