//! Role to permission resolution.
//!
//! Permissions are plain `resource.action` strings held as data; a check is a
//! set-membership test against the union of the caller's role grants. No role
//! name is special-cased anywhere in the code paths that enforce access.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::models::{EntityKind, RoleSeed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Approve,
    Delete,
    /// Physical removal.
    Purge,
}

impl Action {
    pub const CONTENT: [Action; 6] = [
        Action::Read,
        Action::Create,
        Action::Update,
        Action::Approve,
        Action::Delete,
        Action::Purge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Approve => "approve",
            Action::Delete => "delete",
            Action::Purge => "purge",
        }
    }
}

pub fn permission(resource: &str, action: Action) -> String {
    format!("{resource}.{}", action.as_str())
}

/// Permission guarding `action` on a content collection.
pub fn required(kind: EntityKind, action: Action) -> String {
    permission(kind.as_str(), action)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    pub fn contains(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<BTreeSet<String>> for PermissionSet {
    fn from(set: BTreeSet<String>) -> Self {
        Self(set)
    }
}

impl FromIterator<String> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Union of the grants of every role in `user_roles`. Roles missing from
/// `grants` contribute nothing.
pub fn effective_permissions(
    grants: &BTreeMap<String, BTreeSet<String>>,
    user_roles: &[String],
) -> PermissionSet {
    user_roles
        .iter()
        .filter_map(|role| grants.get(role))
        .flatten()
        .cloned()
        .collect()
}

fn content_grants(actions: &[Action]) -> Vec<String> {
    EntityKind::ALL
        .iter()
        .flat_map(|kind| actions.iter().map(move |a| required(*kind, *a)))
        .collect()
}

/// Reference roles inserted at startup when missing.
pub fn default_role_seeds() -> Vec<RoleSeed> {
    let mut admin = content_grants(&Action::CONTENT);
    admin.extend(
        [
            "users.read",
            "users.create",
            "users.update",
            "roles.read",
            "roles.update",
            "access_logs.read",
            "integrations.read",
            "integrations.update",
        ]
        .map(str::to_string),
    );

    let mut safety = content_grants(&[Action::Read]);
    safety.extend(
        [Action::Create, Action::Update, Action::Approve]
            .iter()
            .map(|a| required(EntityKind::Incidents, *a)),
    );

    vec![
        RoleSeed {
            name: "admin".into(),
            description: "Full access including user management".into(),
            permissions: admin,
        },
        RoleSeed {
            name: "editor".into(),
            description: "Creates and edits content".into(),
            permissions: content_grants(&[Action::Read, Action::Create, Action::Update]),
        },
        RoleSeed {
            name: "reviewer".into(),
            description: "Approves or rejects submitted content".into(),
            permissions: content_grants(&[Action::Read, Action::Approve]),
        },
        RoleSeed {
            name: "safety_manager".into(),
            description: "Owns incident reporting".into(),
            permissions: safety,
        },
        RoleSeed {
            name: "viewer".into(),
            description: "Read-only staff access".into(),
            permissions: content_grants(&[Action::Read]),
        },
        RoleSeed {
            name: "partner".into(),
            description: "External partner, read-only".into(),
            permissions: content_grants(&[Action::Read]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grants() -> BTreeMap<String, BTreeSet<String>> {
        default_role_seeds()
            .into_iter()
            .map(|seed| (seed.name, seed.permissions.into_iter().collect()))
            .collect()
    }

    #[test]
    fn union_of_two_roles() {
        let mut grants = BTreeMap::new();
        grants.insert(
            "reader".to_string(),
            BTreeSet::from(["knowledge.read".to_string()]),
        );
        grants.insert(
            "author".to_string(),
            BTreeSet::from(["knowledge.create".to_string()]),
        );

        let reader_only = effective_permissions(&grants, &["reader".into()]);
        assert!(!reader_only.contains("knowledge.create"));

        let both = effective_permissions(&grants, &["reader".into(), "author".into()]);
        assert!(both.contains("knowledge.read"));
        assert!(both.contains("knowledge.create"));
        assert_eq!(both.len(), 2);
    }

    #[test]
    fn unknown_roles_grant_nothing() {
        let perms = effective_permissions(&grants(), &["ghost".into()]);
        assert!(perms.is_empty());
    }

    #[test]
    fn partner_is_read_only() {
        let perms = effective_permissions(&grants(), &["partner".into()]);
        assert!(perms.iter().all(|p| p.ends_with(".read")));
        assert!(perms.contains(&required(EntityKind::Sop, Action::Read)));
    }

    #[test]
    fn safety_manager_approves_incidents_only() {
        let perms = effective_permissions(&grants(), &["safety_manager".into()]);
        assert!(perms.contains("incidents.approve"));
        assert!(!perms.contains("knowledge.approve"));
        assert!(perms.contains("knowledge.read"));
    }

    #[test]
    fn only_admin_may_purge() {
        let grants = grants();
        for (role, perms) in &grants {
            let purges = perms.iter().any(|p| p.ends_with(".purge"));
            assert_eq!(purges, role == "admin", "{role}");
        }
    }
}
