pub mod access_logs;
pub mod auth;
pub mod content;
pub mod integrations;
pub mod mfa;
pub mod roles;
pub mod users;

use axum::Json;
use axum::Router;
use std::sync::LazyLock;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use axum::routing::{get, post};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::db::Page;
use crate::error::AppError;
use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Auth
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/me", get(auth::me))
        .route("/api/v1/auth/change-password", post(auth::change_password))
        // MFA
        .route("/api/v1/auth/mfa/status", get(mfa::status))
        .route("/api/v1/auth/mfa/setup", post(mfa::setup))
        .route("/api/v1/auth/mfa/enable", post(mfa::enable))
        .route("/api/v1/auth/mfa/disable", post(mfa::disable))
        .route("/api/v1/auth/mfa/backup-codes", post(mfa::regenerate_backup_codes))
        // Users
        .route("/api/v1/users", get(users::list).post(users::create))
        .route("/api/v1/users/{id}", get(users::get).put(users::update))
        .route(
            "/api/v1/users/{id}/reset-password",
            post(users::reset_password),
        )
        // Roles
        .route("/api/v1/roles", get(roles::list).post(roles::create))
        .route("/api/v1/roles/{name}/permissions", post(roles::grant))
        .route("/api/v1/permissions", get(roles::list_permissions))
        // Audit
        .route("/api/v1/access-logs", get(access_logs::list))
        // External sync bookkeeping
        .route(
            "/api/v1/integrations/{kind}",
            get(integrations::list).post(integrations::put),
        )
        // Content collections
        .route("/api/v1/{kind}", get(content::list).post(content::create))
        .route(
            "/api/v1/{kind}/{id}",
            get(content::get)
                .put(content::update)
                .delete(content::delete),
        )
        .route("/api/v1/{kind}/{id}/related", get(content::related))
        .route("/api/v1/{kind}/{id}/submit", post(content::submit))
        .route("/api/v1/{kind}/{id}/approve", post(content::approve))
        .route("/api/v1/{kind}/{id}/reject", post(content::reject))
}

/// Success envelope. List responses also carry `pagination`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u64,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
        pagination: None,
    })
}

pub fn paginated<T: Serialize>(page: Page<T>) -> Json<ApiResponse<Vec<T>>> {
    let pagination = Pagination {
        page: page.page,
        per_page: page.per_page,
        total_items: page.total,
        total_pages: page.total_pages(),
    };
    Json(ApiResponse {
        success: true,
        data: page.items,
        pagination: Some(pagination),
    })
}

/// `Json` whose rejection renders as a validation error envelope.
pub struct Body<T>(pub T);

impl<S, T> FromRequest<S> for Body<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| AppError::Validation(e.body_text()))?;
        Ok(Body(value))
    }
}

/// `Query` whose rejection renders as a validation error envelope.
pub struct Params<T>(pub T);

impl<S, T> FromRequestParts<S> for Params<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e: QueryRejection| AppError::Validation(e.body_text()))?;
        Ok(Params(value))
    }
}

/// `Path` whose rejection renders as a validation error envelope.
pub struct PathParam<T>(pub T);

impl<S, T> FromRequestParts<S> for PathParam<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e: PathRejection| AppError::Validation(e.body_text()))?;
        Ok(PathParam(value))
    }
}

/// Usernames end up in TOTP account labels, which cannot contain `:`.
static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._@-]{0,63}$").unwrap());

pub fn validate_username(username: &str) -> Result<String, AppError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AppError::Validation("Username is required".to_string()));
    }
    if !USERNAME_RE.is_match(username) {
        return Err(AppError::Validation(
            "Usernames use letters, digits and . _ @ - (at most 64 characters)".to_string(),
        ));
    }
    Ok(username.to_string())
}

/// Minimum length for any password set through the API.
pub const MIN_PASSWORD_LEN: usize = 8;

pub fn validate_new_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_reject_label_separators() {
        assert_eq!(validate_username("  tanaka.k ").unwrap(), "tanaka.k");
        assert!(validate_username("site-lead@tokyo").is_ok());
        let long = "a".repeat(65);
        for bad in ["", "   ", "ops:admin", "two words", "-lead", long.as_str()] {
            assert!(validate_username(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
