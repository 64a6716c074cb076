use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted user record. Carries credential material, so it is never
/// handed to API clients directly; see [`UserProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub status: UserStatus,
    pub password_hash: String,
    pub mfa_secret: Option<String>,
    #[serde(default)]
    pub mfa_enabled: bool,
    #[serde(default)]
    pub backup_codes: Vec<BackupCode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn remaining_backup_codes(&self) -> usize {
        self.backup_codes.iter().filter(|c| !c.used).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Inactive,
    Locked,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Locked => "locked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(UserStatus::Active),
            "inactive" => Some(UserStatus::Inactive),
            "locked" => Some(UserStatus::Locked),
            _ => None,
        }
    }
}

/// One hashed recovery code. Consumption is recorded by the caller that
/// accepted the code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupCode {
    pub hash: String,
    #[serde(default)]
    pub used: bool,
    #[serde(default)]
    pub used_at: Option<DateTime<Utc>>,
}

impl BackupCode {
    pub fn new(hash: String) -> Self {
        Self {
            hash,
            used: false,
            used_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub status: UserStatus,
}

/// Partial update. `None` keeps the stored value; the nested options on
/// nullable columns distinguish "leave alone" from "clear".
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub display_name: Option<String>,
    pub email: Option<Option<String>>,
    pub department: Option<Option<String>>,
    pub roles: Option<Vec<String>>,
    pub status: Option<UserStatus>,
    pub password_hash: Option<String>,
    pub mfa_secret: Option<Option<String>>,
    pub mfa_enabled: Option<bool>,
    pub backup_codes: Option<Vec<BackupCode>>,
}

/// Client-facing projection of a [`User`].
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub roles: Vec<String>,
    pub status: UserStatus,
    pub mfa_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            department: user.department.clone(),
            roles: user.roles.clone(),
            status: user.status,
            mfa_enabled: user.mfa_enabled,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        UserProfile::from(&user)
    }
}
