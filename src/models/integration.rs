use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping collections owned by the Microsoft 365 sync collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    Ms365SyncConfig,
    Ms365SyncHistory,
    Ms365FileMapping,
}

impl IntegrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationKind::Ms365SyncConfig => "ms365_sync_config",
            IntegrationKind::Ms365SyncHistory => "ms365_sync_history",
            IntegrationKind::Ms365FileMapping => "ms365_file_mapping",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ms365_sync_config" => Some(IntegrationKind::Ms365SyncConfig),
            "ms365_sync_history" => Some(IntegrationKind::Ms365SyncHistory),
            "ms365_file_mapping" => Some(IntegrationKind::Ms365FileMapping),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationRecord {
    pub id: i64,
    pub kind: IntegrationKind,
    pub key: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A keyed record replaces the existing `(kind, key)` entry; an unkeyed one
/// is always appended.
#[derive(Debug, Clone)]
pub struct NewIntegrationRecord {
    pub kind: IntegrationKind,
    pub key: Option<String>,
    pub payload: serde_json::Value,
}
