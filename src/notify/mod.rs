//! Outbound notifications.
//!
//! Recipient resolution is a pure function over a user list. The [`Notifier`]
//! applies the configured type filter first, loads users, resolves addresses
//! and delivers in a background task so the triggering request never waits on
//! or fails because of mail delivery.

mod mailer;
pub mod templates;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::{DalError, PageRequest, Repository, UserQuery, MAX_PER_PAGE};
use crate::models::User;

pub use mailer::SystemMailer;
pub use templates::MessageBody;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    IncidentReported,
    ApprovalRequested,
    ContentApproved,
    ContentRejected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::IncidentReported => "incident_reported",
            NotificationKind::ApprovalRequested => "approval_requested",
            NotificationKind::ContentApproved => "content_approved",
            NotificationKind::ContentRejected => "content_rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "incident_reported" => Some(NotificationKind::IncidentReported),
            "approval_requested" => Some(NotificationKind::ApprovalRequested),
            "content_approved" => Some(NotificationKind::ContentApproved),
            "content_rejected" => Some(NotificationKind::ContentRejected),
            _ => None,
        }
    }
}

/// Global opt-out. `None` sends every type; `Some(set)` sends only the listed
/// types, so an empty set silences everything.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    enabled: Option<HashSet<NotificationKind>>,
}

impl NotificationFilter {
    pub fn new(enabled: Option<HashSet<NotificationKind>>) -> Self {
        Self { enabled }
    }

    pub fn allows(&self, kind: NotificationKind) -> bool {
        self.enabled.as_ref().is_none_or(|set| set.contains(&kind))
    }
}

/// Who a notification goes to: explicit users, members of roles, or both.
#[derive(Debug, Clone, Default)]
pub struct Targets {
    pub user_ids: Vec<i64>,
    pub roles: Vec<String>,
}

impl Targets {
    pub fn users(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            user_ids: ids.into_iter().collect(),
            roles: Vec::new(),
        }
    }

    pub fn roles(roles: impl IntoIterator<Item = String>) -> Self {
        Self {
            user_ids: Vec::new(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty() && self.roles.is_empty()
    }
}

/// Emails of users whose id is targeted or whose roles intersect the targeted
/// roles, in `users` order, each address once. Users without an email are
/// skipped. Empty targets resolve to nobody.
pub fn resolve_recipients(users: &[User], user_ids: &[i64], roles: &[String]) -> Vec<String> {
    if user_ids.is_empty() && roles.is_empty() {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for user in users {
        let targeted =
            user_ids.contains(&user.id) || user.roles.iter().any(|r| roles.contains(r));
        if !targeted {
            continue;
        }
        let Some(email) = user.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) else {
            continue;
        };
        if seen.insert(email.to_lowercase()) {
            out.push(email.to_string());
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub subject: String,
    pub body: MessageBody,
}

pub struct Notifier {
    repo: Arc<dyn Repository>,
    mailer: Option<Arc<SystemMailer>>,
    filter: NotificationFilter,
}

impl Notifier {
    pub fn new(
        repo: Arc<dyn Repository>,
        mailer: Option<Arc<SystemMailer>>,
        filter: NotificationFilter,
    ) -> Self {
        Self {
            repo,
            mailer,
            filter,
        }
    }

    /// Queues delivery and returns immediately.
    pub fn dispatch(&self, notification: Notification, targets: Targets) {
        if !self.filter.allows(notification.kind) {
            tracing::debug!(kind = notification.kind.as_str(), "Notification type disabled");
            return;
        }
        if targets.is_empty() {
            return;
        }

        let repo = self.repo.clone();
        let mailer = self.mailer.clone();
        tokio::spawn(async move {
            if let Err(e) = deliver(repo.as_ref(), mailer.as_deref(), &notification, &targets).await
            {
                tracing::warn!(kind = notification.kind.as_str(), "Notification delivery failed: {e}");
            }
        });
    }
}

async fn deliver(
    repo: &dyn Repository,
    mailer: Option<&SystemMailer>,
    notification: &Notification,
    targets: &Targets,
) -> Result<(), DalError> {
    let users: Vec<User> = active_users(repo).await?;
    let recipients = resolve_recipients(&users, &targets.user_ids, &targets.roles);
    if recipients.is_empty() {
        tracing::debug!(kind = notification.kind.as_str(), "No recipients resolved");
        return Ok(());
    }

    let Some(mailer) = mailer else {
        tracing::info!(
            kind = notification.kind.as_str(),
            recipients = recipients.len(),
            "SMTP not configured; notification not sent"
        );
        return Ok(());
    };

    for to in &recipients {
        if let Err(e) = mailer.deliver(to, notification).await {
            tracing::warn!(kind = notification.kind.as_str(), "Failed to send notification: {e}");
        }
    }
    tracing::info!(
        kind = notification.kind.as_str(),
        recipients = recipients.len(),
        "Notification sent"
    );
    Ok(())
}

async fn active_users(repo: &dyn Repository) -> Result<Vec<User>, DalError> {
    let mut users = Vec::new();
    let mut page_no = 1;
    loop {
        let page = repo
            .list_users(&UserQuery {
                page: PageRequest::new(page_no, MAX_PER_PAGE),
                ..UserQuery::default()
            })
            .await?;
        let last = u64::from(page_no) >= page.total_pages();
        users.extend(page.items.into_iter().filter(User::is_active));
        if last {
            break;
        }
        page_no += 1;
    }
    Ok(users)
}
