use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use crate::auth::Principal;
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::{IntegrationKind, IntegrationRecord, NewIntegrationRecord};
use crate::net::ClientIp;
use crate::routes::{ApiResponse, Body, ok};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct PutRecordRequest {
    pub key: Option<String>,
    pub payload: serde_json::Value,
}

fn parse_kind(raw: &str) -> Result<IntegrationKind, AppError> {
    IntegrationKind::parse(raw)
        .ok_or_else(|| AppError::NotFound(format!("Unknown integration collection: {raw}")))
}

pub async fn list(
    principal: Principal,
    State(state): State<SharedState>,
    Path(kind): Path<String>,
) -> Result<Json<ApiResponse<Vec<IntegrationRecord>>>, AppError> {
    principal.require("integrations.read")?;
    let kind = parse_kind(&kind)?;
    Ok(ok(state.repo.list_integration_records(kind).await?))
}

/// Keyed records upsert on `(kind, key)`; unkeyed ones append.
pub async fn put(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Path(kind): Path<String>,
    Body(req): Body<PutRecordRequest>,
) -> Result<Json<ApiResponse<IntegrationRecord>>, AppError> {
    principal.require("integrations.update")?;
    let kind = parse_kind(&kind)?;
    if !req.payload.is_object() {
        return Err(AppError::Validation("payload must be an object".to_string()));
    }

    let record = NewIntegrationRecord {
        kind,
        key: req.key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()),
        payload: req.payload,
    };
    let stored = state.repo.put_integration_record(&record).await?;

    audit::log_access(
        state.repo.as_ref(),
        Some(principal.id()),
        &format!("integrations.{}", kind.as_str()),
        "success",
        ip,
    )
    .await;

    Ok(ok(stored))
}
