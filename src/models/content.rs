use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const MAX_TITLE_LEN: usize = 200;
const MAX_TAGS: usize = 50;
const INCIDENT_SEVERITIES: [&str; 4] = ["low", "medium", "high", "critical"];

/// Content collections. The string form doubles as table name, JSON file
/// stem and permission resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Knowledge,
    Sop,
    Incidents,
    Consultations,
    Regulations,
    Projects,
    Experts,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Knowledge,
        EntityKind::Sop,
        EntityKind::Incidents,
        EntityKind::Consultations,
        EntityKind::Regulations,
        EntityKind::Projects,
        EntityKind::Experts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Knowledge => "knowledge",
            EntityKind::Sop => "sop",
            EntityKind::Incidents => "incidents",
            EntityKind::Consultations => "consultations",
            EntityKind::Regulations => "regulations",
            EntityKind::Projects => "projects",
            EntityKind::Experts => "experts",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        EntityKind::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Checks the kind-specific fields carried in `details`.
    pub fn validate_details(&self, details: &Value) -> Result<(), String> {
        let Some(fields) = details.as_object() else {
            return Err("details must be an object".to_string());
        };

        match self {
            EntityKind::Incidents => {
                let severity = fields
                    .get("severity")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "incidents require a severity".to_string())?;
                if !INCIDENT_SEVERITIES.contains(&severity) {
                    return Err(format!(
                        "severity must be one of {}",
                        INCIDENT_SEVERITIES.join(", ")
                    ));
                }
            }
            EntityKind::Sop => {
                if let Some(version) = fields.get("version") {
                    if !version.is_string() {
                        return Err("version must be a string".to_string());
                    }
                }
                if let Some(date) = fields.get("revision_date") {
                    let valid = date
                        .as_str()
                        .is_some_and(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").is_ok());
                    if !valid {
                        return Err("revision_date must be a YYYY-MM-DD date".to_string());
                    }
                }
            }
            EntityKind::Projects => {
                if let Some(members) = fields.get("members") {
                    let valid = members
                        .as_array()
                        .is_some_and(|m| m.iter().all(Value::is_i64));
                    if !valid {
                        return Err("members must be a list of user ids".to_string());
                    }
                }
                if let Some(milestones) = fields.get("milestones") {
                    let valid = milestones.as_array().is_some_and(|m| {
                        m.iter()
                            .all(|entry| entry.get("name").is_some_and(Value::is_string))
                    });
                    if !valid {
                        return Err("milestones must be objects with a name".to_string());
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Incident severity; `None` for every other kind.
    pub fn severity<'a>(&self, details: &'a Value) -> Option<&'a str> {
        match self {
            EntityKind::Incidents => details.get("severity").and_then(Value::as_str),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Draft,
    Pending,
    Approved,
    Published,
    Rejected,
    Archived,
    Deleted,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Pending => "pending",
            ContentStatus::Approved => "approved",
            ContentStatus::Published => "published",
            ContentStatus::Rejected => "rejected",
            ContentStatus::Archived => "archived",
            ContentStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ContentStatus::Draft),
            "pending" => Some(ContentStatus::Pending),
            "approved" => Some(ContentStatus::Approved),
            "published" => Some(ContentStatus::Published),
            "rejected" => Some(ContentStatus::Rejected),
            "archived" => Some(ContentStatus::Archived),
            "deleted" => Some(ContentStatus::Deleted),
            _ => None,
        }
    }

    /// States that only a reviewer may move an item into.
    pub fn is_review_outcome(&self) -> bool {
        matches!(
            self,
            ContentStatus::Approved | ContentStatus::Published | ContentStatus::Rejected
        )
    }

    pub fn can_transition_to(&self, next: ContentStatus) -> bool {
        use ContentStatus::*;
        match (self, next) {
            (from, to) if *from == to => true,
            (_, Deleted) => false,
            (Draft | Rejected, Pending) => true,
            (Pending, Approved | Rejected | Draft) => true,
            (Approved, Published) => true,
            (Draft | Approved | Published | Rejected, Archived) => true,
            (Archived, Draft) => true,
            _ => false,
        }
    }
}

/// Denormalized creator/editor reference loaded alongside content rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: i64,
    pub username: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub kind: EntityKind,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: ContentStatus,
    #[serde(default = "empty_object")]
    pub details: Value,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updater: Option<UserRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewContent {
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: Option<ContentStatus>,
    #[serde(default = "empty_object")]
    pub details: Value,
}

impl NewContent {
    /// Trims text fields, normalizes tags and checks the kind-specific details.
    pub fn validate(mut self, kind: EntityKind) -> Result<Self, String> {
        self.title = validate_title(&self.title)?;
        self.category = validate_category(&self.category)?;
        self.summary = self.summary.trim().to_string();
        self.tags = normalize_tags(&self.tags)?;
        kind.validate_details(&self.details)?;
        Ok(self)
    }

    pub fn initial_status(&self) -> ContentStatus {
        self.status.unwrap_or(ContentStatus::Draft)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentPatch {
    pub title: Option<String>,
    pub category: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub status: Option<ContentStatus>,
    pub details: Option<Value>,
}

impl ContentPatch {
    pub fn status(status: ContentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn validate(mut self, kind: EntityKind) -> Result<Self, String> {
        if let Some(title) = &self.title {
            self.title = Some(validate_title(title)?);
        }
        if let Some(category) = &self.category {
            self.category = Some(validate_category(category)?);
        }
        if let Some(summary) = &self.summary {
            self.summary = Some(summary.trim().to_string());
        }
        if let Some(tags) = &self.tags {
            self.tags = Some(normalize_tags(tags)?);
        }
        if let Some(details) = &self.details {
            kind.validate_details(details)?;
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.category.is_none()
            && self.summary.is_none()
            && self.content.is_none()
            && self.tags.is_none()
            && self.status.is_none()
            && self.details.is_none()
    }
}

fn validate_title(title: &str) -> Result<String, String> {
    let title = title.trim();
    if title.is_empty() {
        return Err("title is required".to_string());
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(format!("title must be at most {MAX_TITLE_LEN} characters"));
    }
    Ok(title.to_string())
}

fn validate_category(category: &str) -> Result<String, String> {
    let category = category.trim();
    if category.is_empty() {
        return Err("category is required".to_string());
    }
    Ok(category.to_string())
}

/// Trims, drops blanks and removes duplicates while keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>, String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    if out.len() > MAX_TAGS {
        return Err(format!("at most {MAX_TAGS} tags are allowed"));
    }
    Ok(out)
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
