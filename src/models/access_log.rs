use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only audit row. There is no update or delete path for these.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessLog {
    pub id: i64,
    #[sqlx(rename = "logged_at")]
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub action: String,
    pub status: String,
    pub ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAccessLog {
    pub user_id: Option<i64>,
    pub action: String,
    pub status: String,
    pub ip: Option<String>,
}
