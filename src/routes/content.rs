use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Principal;
use crate::db::{ContentFilter, ListQuery, PageRequest, Sort, SortDirection, SortKey};
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::{ContentItem, ContentPatch, ContentStatus, EntityKind, NewContent};
use crate::net::ClientIp;
use crate::notify::{Notification, NotificationKind, Targets, templates};
use crate::policy::{Action, required};
use crate::routes::{ApiResponse, Body, Params, ok, paginated};
use crate::state::SharedState;

pub const DEFAULT_RELATED_LIMIT: u32 = 5;
pub const MAX_RELATED_LIMIT: u32 = 20;

/// Roles asked to review a submission.
const REVIEW_ROLES: [&str; 2] = ["reviewer", "admin"];

#[derive(Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub category: Option<String>,
    /// Comma separated; every tag must be present.
    pub tags: Option<String>,
    pub search: Option<String>,
    /// Comma separated status names.
    pub status: Option<String>,
    pub created_by: Option<i64>,
    pub updated_from: Option<String>,
    pub updated_to: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub hard: bool,
}

#[derive(Deserialize)]
pub struct RelatedParams {
    pub limit: Option<u32>,
}

fn parse_kind(raw: &str) -> Result<EntityKind, AppError> {
    EntityKind::parse(raw).ok_or_else(|| AppError::NotFound(format!("Unknown collection: {raw}")))
}

fn parse_target(kind: &str, id: &str) -> Result<(EntityKind, i64), AppError> {
    let kind = parse_kind(kind)?;
    let id = id
        .parse()
        .map_err(|_| AppError::NotFound(format!("{kind} item not found")))?;
    Ok((kind, id))
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_timestamp(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    raw.map(|value| {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| AppError::Validation(format!("{name} must be an RFC 3339 timestamp")))
    })
    .transpose()
}

impl ListParams {
    fn into_query(self, kind: EntityKind, principal: &Principal) -> Result<ListQuery, AppError> {
        let statuses = split_csv(self.status.as_deref())
            .iter()
            .map(|s| {
                ContentStatus::parse(s)
                    .ok_or_else(|| AppError::Validation(format!("Unknown status: {s}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if statuses.contains(&ContentStatus::Deleted) {
            principal.require(&required(kind, Action::Delete))?;
        }

        let key = match self.sort.as_deref() {
            Some(s) => SortKey::parse(s)
                .ok_or_else(|| AppError::Validation(format!("Unknown sort key: {s}")))?,
            None => SortKey::default(),
        };
        let direction = match self.order.as_deref() {
            Some(s) => SortDirection::parse(s)
                .ok_or_else(|| AppError::Validation(format!("Unknown sort order: {s}")))?,
            None => SortDirection::default(),
        };

        Ok(ListQuery {
            filter: ContentFilter {
                category: self.category.filter(|c| !c.trim().is_empty()),
                tags: split_csv(self.tags.as_deref()),
                search: self.search.filter(|s| !s.trim().is_empty()),
                statuses,
                created_by: self.created_by,
                updated_from: parse_timestamp("updated_from", self.updated_from.as_deref())?,
                updated_to: parse_timestamp("updated_to", self.updated_to.as_deref())?,
            },
            page: PageRequest::from_params(self.page, self.per_page),
            sort: Sort { key, direction },
        })
    }
}

/// Loads an item that has not been soft-deleted.
async fn load_live(state: &SharedState, kind: EntityKind, id: i64) -> Result<ContentItem, AppError> {
    state
        .repo
        .get_content(kind, id)
        .await?
        .filter(|item| item.status != ContentStatus::Deleted)
        .ok_or_else(|| AppError::NotFound(format!("{kind} item not found")))
}

fn actor_name(principal: &Principal) -> &str {
    &principal.user.display_name
}

pub async fn list(
    principal: Principal,
    State(state): State<SharedState>,
    Path(kind): Path<String>,
    Params(params): Params<ListParams>,
) -> Result<Json<ApiResponse<Vec<ContentItem>>>, AppError> {
    let kind = parse_kind(&kind)?;
    principal.require(&required(kind, Action::Read))?;

    let query = params.into_query(kind, &principal)?;
    let page = state.repo.list_content(kind, &query).await?;
    Ok(paginated(page))
}

/// Deleted items stay addressable by id for callers allowed to delete.
pub async fn get(
    principal: Principal,
    State(state): State<SharedState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<ContentItem>>, AppError> {
    let (kind, id) = parse_target(&kind, &id)?;
    principal.require(&required(kind, Action::Read))?;

    let item = state
        .repo
        .get_content(kind, id)
        .await?
        .filter(|item| {
            item.status != ContentStatus::Deleted || principal.has(&required(kind, Action::Delete))
        })
        .ok_or_else(|| AppError::NotFound(format!("{kind} item not found")))?;
    Ok(ok(item))
}

pub async fn create(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Path(kind): Path<String>,
    Body(req): Body<NewContent>,
) -> Result<Json<ApiResponse<ContentItem>>, AppError> {
    let kind = parse_kind(&kind)?;
    principal.require(&required(kind, Action::Create))?;

    let new_item = req.validate(kind).map_err(AppError::Validation)?;
    let initial = new_item.initial_status();
    match initial {
        ContentStatus::Draft | ContentStatus::Pending => {}
        ContentStatus::Approved | ContentStatus::Published => {
            principal.require(&required(kind, Action::Approve))?;
        }
        other => {
            return Err(AppError::Validation(format!(
                "Items cannot be created as {}",
                other.as_str()
            )));
        }
    }

    let item = state
        .repo
        .create_content(kind, &new_item, Some(principal.id()))
        .await?;

    tracing::info!(kind = kind.as_str(), id = item.id, "Content created");
    audit::log_access(
        state.repo.as_ref(),
        Some(principal.id()),
        &format!("{kind}.create"),
        "success",
        ip,
    )
    .await;

    if kind == EntityKind::Incidents {
        let severity = kind.severity(&item.details).unwrap_or("unknown");
        state.notifier.dispatch(
            Notification {
                kind: NotificationKind::IncidentReported,
                subject: format!("[{severity}] Incident reported: {}", item.title),
                body: templates::render_incident_reported(
                    &item.title,
                    severity,
                    actor_name(&principal),
                ),
            },
            Targets::roles(state.config.incident_notify_roles.iter().cloned()),
        );
    }
    if item.status == ContentStatus::Pending {
        request_review(&state, &principal, &item);
    }

    Ok(ok(item))
}

pub async fn update(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Path((kind, id)): Path<(String, String)>,
    Body(req): Body<ContentPatch>,
) -> Result<Json<ApiResponse<ContentItem>>, AppError> {
    let (kind, id) = parse_target(&kind, &id)?;
    principal.require(&required(kind, Action::Update))?;

    if req.is_empty() {
        return Err(AppError::Validation("No fields to update".to_string()));
    }
    let patch = req.validate(kind).map_err(AppError::Validation)?;

    let current = load_live(&state, kind, id).await?;
    if let Some(next) = patch.status {
        if !current.status.can_transition_to(next) {
            return Err(AppError::Validation(format!(
                "Cannot move from {} to {}",
                current.status.as_str(),
                next.as_str()
            )));
        }
        if next != current.status && next.is_review_outcome() {
            principal.require(&required(kind, Action::Approve))?;
        }
    }

    let item = state
        .repo
        .update_content(kind, id, &patch, Some(principal.id()))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{kind} item not found")))?;

    audit::log_access(
        state.repo.as_ref(),
        Some(principal.id()),
        &format!("{kind}.update"),
        "success",
        ip,
    )
    .await;

    Ok(ok(item))
}

#[derive(Serialize)]
pub struct Deleted {
    pub id: i64,
    pub hard: bool,
}

pub async fn delete(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Path((kind, id)): Path<(String, String)>,
    Params(params): Params<DeleteParams>,
) -> Result<Json<ApiResponse<Deleted>>, AppError> {
    let (kind, id) = parse_target(&kind, &id)?;
    principal.require(&required(kind, Action::Delete))?;

    let removed = if params.hard {
        principal.require(&required(kind, Action::Purge))?;
        state.repo.hard_delete_content(kind, id).await?
    } else {
        load_live(&state, kind, id).await?;
        state
            .repo
            .soft_delete_content(kind, id, Some(principal.id()))
            .await?
    };
    if !removed {
        return Err(AppError::NotFound(format!("{kind} item not found")));
    }

    let action = if params.hard { "purge" } else { "delete" };
    tracing::info!(kind = kind.as_str(), id, action, "Content removed");
    audit::log_access(
        state.repo.as_ref(),
        Some(principal.id()),
        &format!("{kind}.{action}"),
        "success",
        ip,
    )
    .await;

    Ok(ok(Deleted {
        id,
        hard: params.hard,
    }))
}

pub async fn related(
    principal: Principal,
    State(state): State<SharedState>,
    Path((kind, id)): Path<(String, String)>,
    Params(params): Params<RelatedParams>,
) -> Result<Json<ApiResponse<Vec<ContentItem>>>, AppError> {
    let (kind, id) = parse_target(&kind, &id)?;
    principal.require(&required(kind, Action::Read))?;

    let item = load_live(&state, kind, id).await?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RELATED_LIMIT)
        .clamp(1, MAX_RELATED_LIMIT);
    let items = state
        .repo
        .related_by_tags(kind, &item.tags, limit, Some(item.id))
        .await?;
    Ok(ok(items))
}

fn request_review(state: &SharedState, principal: &Principal, item: &ContentItem) {
    state.notifier.dispatch(
        Notification {
            kind: NotificationKind::ApprovalRequested,
            subject: format!("Review requested: {}", item.title),
            body: templates::render_approval_requested(
                item.kind,
                &item.title,
                actor_name(principal),
            ),
        },
        Targets::roles(REVIEW_ROLES.map(str::to_string)),
    );
}

/// `draft` or `rejected` to `pending`.
pub async fn submit(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<ContentItem>>, AppError> {
    let (kind, id) = parse_target(&kind, &id)?;
    principal.require(&required(kind, Action::Update))?;

    let current = load_live(&state, kind, id).await?;
    if !matches!(current.status, ContentStatus::Draft | ContentStatus::Rejected) {
        return Err(AppError::Conflict(format!(
            "Only draft or rejected items can be submitted (current: {})",
            current.status.as_str()
        )));
    }

    let item = state
        .repo
        .update_content(
            kind,
            id,
            &ContentPatch::status(ContentStatus::Pending),
            Some(principal.id()),
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{kind} item not found")))?;

    audit::log_access(
        state.repo.as_ref(),
        Some(principal.id()),
        &format!("{kind}.submit"),
        "success",
        ip,
    )
    .await;
    request_review(&state, &principal, &item);

    Ok(ok(item))
}

pub async fn approve(
    principal: Principal,
    state: State<SharedState>,
    ip: ClientIp,
    path: Path<(String, String)>,
) -> Result<Json<ApiResponse<ContentItem>>, AppError> {
    review(principal, state, ip, path, true).await
}

pub async fn reject(
    principal: Principal,
    state: State<SharedState>,
    ip: ClientIp,
    path: Path<(String, String)>,
) -> Result<Json<ApiResponse<ContentItem>>, AppError> {
    review(principal, state, ip, path, false).await
}

async fn review(
    principal: Principal,
    State(state): State<SharedState>,
    ip: ClientIp,
    Path((kind, id)): Path<(String, String)>,
    approved: bool,
) -> Result<Json<ApiResponse<ContentItem>>, AppError> {
    let (kind, id) = parse_target(&kind, &id)?;
    principal.require(&required(kind, Action::Approve))?;

    let current = load_live(&state, kind, id).await?;
    if current.status != ContentStatus::Pending {
        return Err(AppError::Conflict(format!(
            "Only pending items can be reviewed (current: {})",
            current.status.as_str()
        )));
    }

    let (next, notification_kind, verb) = if approved {
        (ContentStatus::Approved, NotificationKind::ContentApproved, "approve")
    } else {
        (ContentStatus::Rejected, NotificationKind::ContentRejected, "reject")
    };

    let item = state
        .repo
        .update_content(kind, id, &ContentPatch::status(next), Some(principal.id()))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{kind} item not found")))?;

    tracing::info!(kind = kind.as_str(), id, outcome = verb, "Content reviewed");
    audit::log_access(
        state.repo.as_ref(),
        Some(principal.id()),
        &format!("{kind}.{verb}"),
        "success",
        ip,
    )
    .await;

    if let Some(creator) = item.created_by {
        let outcome = if approved { "approved" } else { "rejected" };
        state.notifier.dispatch(
            Notification {
                kind: notification_kind,
                subject: format!("Your {kind} item was {outcome}: {}", item.title),
                body: templates::render_review_outcome(
                    kind,
                    &item.title,
                    approved,
                    actor_name(&principal),
                ),
            },
            Targets::users([creator]),
        );
    }

    Ok(ok(item))
}
