use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use crate::auth::Principal;
use crate::db::{AccessLogQuery, PageRequest};
use crate::error::AppError;
use crate::models::AccessLog;
use crate::routes::{ApiResponse, Params, paginated};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct AccessLogParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub user_id: Option<i64>,
    pub action: Option<String>,
}

/// Newest first.
pub async fn list(
    principal: Principal,
    State(state): State<SharedState>,
    Params(params): Params<AccessLogParams>,
) -> Result<Json<ApiResponse<Vec<AccessLog>>>, AppError> {
    principal.require("access_logs.read")?;

    let query = AccessLogQuery {
        user_id: params.user_id,
        action: params.action.filter(|a| !a.trim().is_empty()),
        page: PageRequest::from_params(params.page, params.per_page),
    };
    Ok(paginated(state.repo.list_access_logs(&query).await?))
}
