use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::auth::Principal;
use crate::auth::{mfa, password};
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::{BackupCode, UserPatch};
use crate::net::ClientIp;
use crate::routes::{ApiResponse, Body, ok};
use crate::state::SharedState;

#[derive(Serialize)]
pub struct MfaStatus {
    pub enabled: bool,
    pub backup_codes_remaining: usize,
}

#[derive(Serialize)]
pub struct MfaSetup {
    pub secret: String,
    pub provisioning_uri: String,
    /// `data:image/png;base64,...`
    pub qr_code: String,
}

#[derive(Deserialize)]
pub struct EnableRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct PasswordConfirm {
    pub password: String,
}

#[derive(Serialize)]
pub struct BackupCodes {
    /// Shown once. Only hashes are stored.
    pub backup_codes: Vec<String>,
}

pub async fn status(principal: Principal) -> Json<ApiResponse<MfaStatus>> {
    ok(MfaStatus {
        enabled: principal.user.mfa_enabled,
        backup_codes_remaining: principal.user.remaining_backup_codes(),
    })
}

/// Generates a fresh secret and stores it as pending. It only takes effect
/// once `enable` confirms a code from the authenticator.
pub async fn setup(
    principal: Principal,
    State(state): State<SharedState>,
) -> Result<Json<ApiResponse<MfaSetup>>, AppError> {
    if principal.user.mfa_enabled {
        return Err(AppError::Conflict(
            "Two-factor authentication is already enabled".to_string(),
        ));
    }

    let secret = mfa::generate_secret();
    let uri = mfa::provisioning_uri(&principal.user.username, &secret, &state.config.mfa_issuer)
        .map_err(AppError::Internal)?;
    let qr = mfa::render_qr_base64(&uri).map_err(AppError::Internal)?;

    let patch = UserPatch {
        mfa_secret: Some(Some(secret.clone())),
        ..UserPatch::default()
    };
    state.repo.update_user(principal.id(), &patch).await?;

    Ok(ok(MfaSetup {
        secret,
        provisioning_uri: uri,
        qr_code: format!("data:image/png;base64,{qr}"),
    }))
}

fn issue_backup_codes() -> Result<(Vec<String>, Vec<BackupCode>), AppError> {
    let plain = mfa::generate_backup_codes(mfa::BACKUP_CODE_COUNT);
    let hashed = plain
        .iter()
        .map(|code| mfa::hash_backup_code(code).map(BackupCode::new))
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::Internal)?;
    Ok((plain, hashed))
}

pub async fn enable(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Body(req): Body<EnableRequest>,
) -> Result<Json<ApiResponse<BackupCodes>>, AppError> {
    if principal.user.mfa_enabled {
        return Err(AppError::Conflict(
            "Two-factor authentication is already enabled".to_string(),
        ));
    }
    let Some(secret) = principal.user.mfa_secret.as_deref() else {
        return Err(AppError::Validation(
            "Run two-factor setup before enabling it".to_string(),
        ));
    };
    if !mfa::verify_code(Some(secret), &req.code, mfa::DEFAULT_WINDOW) {
        return Err(AppError::Validation("Invalid verification code".to_string()));
    }

    let (plain, hashed) = issue_backup_codes()?;
    let patch = UserPatch {
        mfa_enabled: Some(true),
        backup_codes: Some(hashed),
        ..UserPatch::default()
    };
    state.repo.update_user(principal.id(), &patch).await?;

    tracing::info!(user_id = principal.id(), "Two-factor authentication enabled");
    audit::log_access(state.repo.as_ref(), Some(principal.id()), "mfa_enable", "success", ip).await;

    Ok(ok(BackupCodes {
        backup_codes: plain,
    }))
}

fn confirm_password(principal: &Principal, password: &str) -> Result<(), AppError> {
    if password::verify(password, &principal.user.password_hash) {
        Ok(())
    } else {
        Err(AppError::Unauthorized("Password is incorrect".to_string()))
    }
}

pub async fn disable(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Body(req): Body<PasswordConfirm>,
) -> Result<Json<ApiResponse<MfaStatus>>, AppError> {
    confirm_password(&principal, &req.password)?;

    let patch = UserPatch {
        mfa_enabled: Some(false),
        mfa_secret: Some(None),
        backup_codes: Some(Vec::new()),
        ..UserPatch::default()
    };
    state.repo.update_user(principal.id(), &patch).await?;

    tracing::info!(user_id = principal.id(), "Two-factor authentication disabled");
    audit::log_access(state.repo.as_ref(), Some(principal.id()), "mfa_disable", "success", ip).await;

    Ok(ok(MfaStatus {
        enabled: false,
        backup_codes_remaining: 0,
    }))
}

/// Replaces every recovery code, used or not.
pub async fn regenerate_backup_codes(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Body(req): Body<PasswordConfirm>,
) -> Result<Json<ApiResponse<BackupCodes>>, AppError> {
    confirm_password(&principal, &req.password)?;
    if !principal.user.mfa_enabled {
        return Err(AppError::Validation(
            "Two-factor authentication is not enabled".to_string(),
        ));
    }

    let (plain, hashed) = issue_backup_codes()?;
    let patch = UserPatch {
        backup_codes: Some(hashed),
        ..UserPatch::default()
    };
    state.repo.update_user(principal.id(), &patch).await?;

    audit::log_access(
        state.repo.as_ref(),
        Some(principal.id()),
        "mfa_backup_codes",
        "success",
        ip,
    )
    .await;

    Ok(ok(BackupCodes {
        backup_codes: plain,
    }))
}
