use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// A permission string of the form `resource.action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Permission {
    pub id: i64,
    pub name: String,
    pub resource: String,
    pub action: String,
}

impl Permission {
    /// Splits `resource.action` at the last dot.
    pub fn split_name(name: &str) -> Option<(&str, &str)> {
        let (resource, action) = name.rsplit_once('.')?;
        if resource.is_empty() || action.is_empty() {
            return None;
        }
        Some((resource, action))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: i64,
    pub permission_id: i64,
}

/// A role together with the permissions directly assigned to it.
#[derive(Debug, Clone, Serialize)]
pub struct RoleGrants {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<String>,
}

/// Reference data inserted at startup when missing.
#[derive(Debug, Clone)]
pub struct RoleSeed {
    pub name: String,
    pub description: String,
    pub permissions: Vec<String>,
}
