//! JSON-file backend.
//!
//! Every call re-reads the whole collection file and scans it linearly; there
//! are no indexes. Ids are assigned as `max(id) + 1`. All writes in this
//! process pass through one writer gate, so id assignment and
//! read-modify-write cycles never interleave. Two processes sharing a data
//! directory are NOT supported: they can hand out the same id or overwrite
//! each other's changes. Production deployments use the relational backend.

mod store;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::db::{AccessLogQuery, DalError, ListQuery, Page, Repository, UserQuery};
use crate::models::{
    AccessLog, ContentItem, ContentPatch, ContentStatus, EntityKind, IntegrationKind,
    IntegrationRecord, NewAccessLog, NewContent, NewIntegrationRecord, NewUser, Permission, Role,
    RoleGrants, RolePermission, RoleSeed, User, UserPatch, UserRef,
};
use crate::policy;

pub use store::JsonStore;

const USERS: &str = "users";
const ROLES: &str = "roles";
const PERMISSIONS: &str = "permissions";
const ROLE_PERMISSIONS: &str = "role_permissions";
const ACCESS_LOGS: &str = "access_logs";
const INTEGRATIONS: &str = "integration_records";

pub struct FileRepository {
    store: JsonStore,
    writer: Mutex<()>,
}

impl FileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(dir),
            writer: Mutex::new(()),
        }
    }

    /// Loads the user table once and fills creator/updater references.
    async fn attach_refs(&self, items: &mut [ContentItem]) -> Result<(), DalError> {
        if items.is_empty() {
            return Ok(());
        }
        let users: Vec<User> = self.store.load(USERS).await?;
        let refs: HashMap<i64, UserRef> = users
            .into_iter()
            .map(|u| {
                (
                    u.id,
                    UserRef {
                        id: u.id,
                        username: u.username,
                        display_name: u.display_name,
                    },
                )
            })
            .collect();

        for item in items.iter_mut() {
            item.creator = item.created_by.and_then(|id| refs.get(&id).cloned());
            item.updater = item.updated_by.and_then(|id| refs.get(&id).cloned());
        }
        Ok(())
    }

    /// Role name to granted permission names.
    async fn grant_map(&self) -> Result<BTreeMap<String, BTreeSet<String>>, DalError> {
        let roles: Vec<Role> = self.store.load(ROLES).await?;
        let permissions: Vec<Permission> = self.store.load(PERMISSIONS).await?;
        let grants: Vec<RolePermission> = self.store.load(ROLE_PERMISSIONS).await?;

        let names: HashMap<i64, &str> = permissions
            .iter()
            .map(|p| (p.id, p.name.as_str()))
            .collect();
        Ok(roles
            .iter()
            .map(|role| {
                let granted = grants
                    .iter()
                    .filter(|g| g.role_id == role.id)
                    .filter_map(|g| names.get(&g.permission_id).map(|n| n.to_string()))
                    .collect();
                (role.name.clone(), granted)
            })
            .collect())
    }

    async fn ensure_roles_exist(&self, roles: &[String]) -> Result<(), DalError> {
        let known: Vec<Role> = self.store.load(ROLES).await?;
        for role in roles {
            if !known.iter().any(|r| &r.name == role) {
                return Err(DalError::InvalidInput(format!("unknown role: {role}")));
            }
        }
        Ok(())
    }

    /// Caller must hold the writer gate.
    async fn insert_user(&self, users: &mut Vec<User>, user: &NewUser) -> Result<User, DalError> {
        if users.iter().any(|u| u.username == user.username) {
            return Err(DalError::Conflict(format!(
                "username {} is already taken",
                user.username
            )));
        }
        self.ensure_roles_exist(&user.roles).await?;

        let now = Utc::now();
        let created = User {
            id: next_id(users.iter().map(|u| u.id)),
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            department: user.department.clone(),
            roles: dedupe(&user.roles),
            status: user.status,
            password_hash: user.password_hash.clone(),
            mfa_secret: None,
            mfa_enabled: false,
            backup_codes: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        users.push(created.clone());
        self.store.save(USERS, users).await?;
        Ok(created)
    }
}

#[async_trait]
impl Repository for FileRepository {
    fn backend_name(&self) -> &'static str {
        "json"
    }

    async fn list_content(
        &self,
        kind: EntityKind,
        query: &ListQuery,
    ) -> Result<Page<ContentItem>, DalError> {
        let items: Vec<ContentItem> = self.store.load(kind.as_str()).await?;
        let mut matching: Vec<ContentItem> = items
            .into_iter()
            .filter(|item| query.filter.matches(item))
            .collect();
        matching.sort_by(|a, b| query.sort.compare(a, b));

        let mut page = Page::from_sorted(matching, query.page);
        self.attach_refs(&mut page.items).await?;
        Ok(page)
    }

    async fn get_content(
        &self,
        kind: EntityKind,
        id: i64,
    ) -> Result<Option<ContentItem>, DalError> {
        let items: Vec<ContentItem> = self.store.load(kind.as_str()).await?;
        let Some(item) = items.into_iter().find(|item| item.id == id) else {
            return Ok(None);
        };
        let mut found = [item];
        self.attach_refs(&mut found).await?;
        let [item] = found;
        Ok(Some(item))
    }

    async fn create_content(
        &self,
        kind: EntityKind,
        item: &NewContent,
        actor: Option<i64>,
    ) -> Result<ContentItem, DalError> {
        let _guard = self.writer.lock().await;
        let mut items: Vec<ContentItem> = self.store.load(kind.as_str()).await?;

        let now = Utc::now();
        let created = ContentItem {
            id: next_id(items.iter().map(|i| i.id)),
            kind,
            title: item.title.clone(),
            category: item.category.clone(),
            summary: item.summary.clone(),
            content: item.content.clone(),
            tags: item.tags.clone(),
            status: item.initial_status(),
            details: item.details.clone(),
            created_by: actor,
            updated_by: actor,
            created_at: now,
            updated_at: now,
            creator: None,
            updater: None,
        };
        items.push(created.clone());
        self.store.save(kind.as_str(), &items).await?;

        let mut out = [created];
        self.attach_refs(&mut out).await?;
        let [created] = out;
        Ok(created)
    }

    async fn update_content(
        &self,
        kind: EntityKind,
        id: i64,
        patch: &ContentPatch,
        actor: Option<i64>,
    ) -> Result<Option<ContentItem>, DalError> {
        let _guard = self.writer.lock().await;
        let mut items: Vec<ContentItem> = self.store.load(kind.as_str()).await?;
        let Some(item) = items.iter_mut().find(|item| item.id == id) else {
            return Ok(None);
        };

        apply_content_patch(item, patch);
        item.updated_at = Utc::now();
        item.updated_by = actor;
        let updated = item.clone();
        self.store.save(kind.as_str(), &items).await?;

        let mut out = [updated];
        self.attach_refs(&mut out).await?;
        let [updated] = out;
        Ok(Some(updated))
    }

    async fn soft_delete_content(
        &self,
        kind: EntityKind,
        id: i64,
        actor: Option<i64>,
    ) -> Result<bool, DalError> {
        let _guard = self.writer.lock().await;
        let mut items: Vec<ContentItem> = self.store.load(kind.as_str()).await?;
        let Some(item) = items.iter_mut().find(|item| item.id == id) else {
            return Ok(false);
        };
        item.status = ContentStatus::Deleted;
        item.updated_at = Utc::now();
        item.updated_by = actor;
        self.store.save(kind.as_str(), &items).await?;
        Ok(true)
    }

    async fn hard_delete_content(&self, kind: EntityKind, id: i64) -> Result<bool, DalError> {
        let _guard = self.writer.lock().await;
        let mut items: Vec<ContentItem> = self.store.load(kind.as_str()).await?;
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            return Ok(false);
        }
        self.store.save(kind.as_str(), &items).await?;
        Ok(true)
    }

    async fn related_by_tags(
        &self,
        kind: EntityKind,
        tags: &[String],
        limit: u32,
        exclude_id: Option<i64>,
    ) -> Result<Vec<ContentItem>, DalError> {
        if tags.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let items: Vec<ContentItem> = self.store.load(kind.as_str()).await?;

        let mut scored: Vec<(usize, ContentItem)> = items
            .into_iter()
            .filter(|item| item.status != ContentStatus::Deleted && Some(item.id) != exclude_id)
            .map(|item| (item.tags.iter().filter(|t| tags.contains(t)).count(), item))
            .filter(|(overlap, _)| *overlap > 0)
            .collect();
        scored.sort_by(|(oa, a), (ob, b)| {
            ob.cmp(oa)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| b.id.cmp(&a.id))
        });

        let mut related: Vec<ContentItem> = scored
            .into_iter()
            .take(limit as usize)
            .map(|(_, item)| item)
            .collect();
        self.attach_refs(&mut related).await?;
        Ok(related)
    }

    async fn list_users(&self, query: &UserQuery) -> Result<Page<User>, DalError> {
        let mut users: Vec<User> = self.store.load(USERS).await?;
        let needle = query.search.as_ref().map(|s| s.to_lowercase());

        users.retain(|u| {
            if let Some(role) = &query.role {
                if !u.roles.contains(role) {
                    return false;
                }
            }
            if let Some(status) = query.status {
                if u.status != status {
                    return false;
                }
            }
            if let Some(needle) = &needle {
                let email = u.email.as_deref().unwrap_or("");
                let hit = [u.username.as_str(), u.display_name.as_str(), email]
                    .iter()
                    .any(|field| field.to_lowercase().contains(needle));
                if !hit {
                    return false;
                }
            }
            true
        });
        users.sort_by_key(|u| u.id);
        Ok(Page::from_sorted(users, query.page))
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, DalError> {
        let users: Vec<User> = self.store.load(USERS).await?;
        Ok(users.into_iter().find(|u| u.id == id))
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, DalError> {
        let users: Vec<User> = self.store.load(USERS).await?;
        Ok(users.into_iter().find(|u| u.username == username))
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, DalError> {
        let _guard = self.writer.lock().await;
        let mut users: Vec<User> = self.store.load(USERS).await?;
        self.insert_user(&mut users, user).await
    }

    async fn create_first_user(&self, user: &NewUser) -> Result<Option<User>, DalError> {
        let _guard = self.writer.lock().await;
        let mut users: Vec<User> = self.store.load(USERS).await?;
        if !users.is_empty() {
            return Ok(None);
        }
        self.insert_user(&mut users, user).await.map(Some)
    }

    async fn update_user(&self, id: i64, patch: &UserPatch) -> Result<Option<User>, DalError> {
        let _guard = self.writer.lock().await;
        if let Some(roles) = &patch.roles {
            self.ensure_roles_exist(roles).await?;
        }

        let mut users: Vec<User> = self.store.load(USERS).await?;
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        apply_user_patch(user, patch);
        user.updated_at = Utc::now();
        let updated = user.clone();
        self.store.save(USERS, &users).await?;
        Ok(Some(updated))
    }

    async fn consume_backup_code(&self, user_id: i64, hash: &str) -> Result<bool, DalError> {
        let _guard = self.writer.lock().await;
        let mut users: Vec<User> = self.store.load(USERS).await?;
        let Some(user) = users.iter_mut().find(|u| u.id == user_id) else {
            return Ok(false);
        };
        let Some(code) = user.backup_codes.iter_mut().find(|c| !c.used && c.hash == hash) else {
            return Ok(false);
        };
        let now = Utc::now();
        code.used = true;
        code.used_at = Some(now);
        user.updated_at = now;
        self.store.save(USERS, &users).await?;
        Ok(true)
    }

    async fn list_roles(&self) -> Result<Vec<RoleGrants>, DalError> {
        let mut roles: Vec<Role> = self.store.load(ROLES).await?;
        let mut grants = self.grant_map().await?;

        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles
            .into_iter()
            .map(|role| RoleGrants {
                permissions: grants
                    .remove(&role.name)
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
                role,
            })
            .collect())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, DalError> {
        let mut permissions: Vec<Permission> = self.store.load(PERMISSIONS).await?;
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn create_role(&self, name: &str, description: &str) -> Result<Role, DalError> {
        let _guard = self.writer.lock().await;
        let mut roles: Vec<Role> = self.store.load(ROLES).await?;
        if roles.iter().any(|r| r.name == name) {
            return Err(DalError::Conflict(format!("role {name} already exists")));
        }
        let role = Role {
            id: next_id(roles.iter().map(|r| r.id)),
            name: name.to_string(),
            description: description.to_string(),
        };
        roles.push(role.clone());
        self.store.save(ROLES, &roles).await?;
        Ok(role)
    }

    async fn permissions_for_roles(
        &self,
        roles: &[String],
    ) -> Result<BTreeSet<String>, DalError> {
        if roles.is_empty() {
            return Ok(BTreeSet::new());
        }
        let grants = self.grant_map().await?;
        Ok(policy::effective_permissions(&grants, roles)
            .iter()
            .map(str::to_string)
            .collect())
    }

    async fn grant_permission(&self, role: &str, permission: &str) -> Result<bool, DalError> {
        let _guard = self.writer.lock().await;
        let roles: Vec<Role> = self.store.load(ROLES).await?;
        let Some(role_id) = roles.iter().find(|r| r.name == role).map(|r| r.id) else {
            return Ok(false);
        };

        let mut permissions: Vec<Permission> = self.store.load(PERMISSIONS).await?;
        let mut grants: Vec<RolePermission> = self.store.load(ROLE_PERMISSIONS).await?;
        let (permission_id, created) = ensure_permission(&mut permissions, permission)?;
        if created {
            self.store.save(PERMISSIONS, &permissions).await?;
        }

        let grant = RolePermission {
            role_id,
            permission_id,
        };
        if !grants.contains(&grant) {
            grants.push(grant);
            self.store.save(ROLE_PERMISSIONS, &grants).await?;
        }
        Ok(true)
    }

    async fn seed_reference_data(&self, seeds: &[RoleSeed]) -> Result<(), DalError> {
        let _guard = self.writer.lock().await;
        let mut roles: Vec<Role> = self.store.load(ROLES).await?;
        let mut permissions: Vec<Permission> = self.store.load(PERMISSIONS).await?;
        let mut grants: Vec<RolePermission> = self.store.load(ROLE_PERMISSIONS).await?;

        for seed in seeds {
            let role_id = match roles.iter().find(|r| r.name == seed.name) {
                Some(role) => role.id,
                None => {
                    let role = Role {
                        id: next_id(roles.iter().map(|r| r.id)),
                        name: seed.name.clone(),
                        description: seed.description.clone(),
                    };
                    let id = role.id;
                    roles.push(role);
                    id
                }
            };
            for name in &seed.permissions {
                let (permission_id, _) = ensure_permission(&mut permissions, name)?;
                let grant = RolePermission {
                    role_id,
                    permission_id,
                };
                if !grants.contains(&grant) {
                    grants.push(grant);
                }
            }
        }

        self.store.save(ROLES, &roles).await?;
        self.store.save(PERMISSIONS, &permissions).await?;
        self.store.save(ROLE_PERMISSIONS, &grants).await?;
        Ok(())
    }

    async fn append_access_log(&self, entry: &NewAccessLog) -> Result<AccessLog, DalError> {
        let _guard = self.writer.lock().await;
        let mut logs: Vec<AccessLog> = self.store.load(ACCESS_LOGS).await?;
        let log = AccessLog {
            id: next_id(logs.iter().map(|l| l.id)),
            timestamp: Utc::now(),
            user_id: entry.user_id,
            action: entry.action.clone(),
            status: entry.status.clone(),
            ip: entry.ip.clone(),
        };
        logs.push(log.clone());
        self.store.save(ACCESS_LOGS, &logs).await?;
        Ok(log)
    }

    async fn list_access_logs(
        &self,
        query: &AccessLogQuery,
    ) -> Result<Page<AccessLog>, DalError> {
        let mut logs: Vec<AccessLog> = self.store.load(ACCESS_LOGS).await?;
        logs.retain(|log| {
            query.user_id.is_none_or(|id| log.user_id == Some(id))
                && query.action.as_ref().is_none_or(|a| &log.action == a)
        });
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(Page::from_sorted(logs, query.page))
    }

    async fn put_integration_record(
        &self,
        record: &NewIntegrationRecord,
    ) -> Result<IntegrationRecord, DalError> {
        let _guard = self.writer.lock().await;
        let mut records: Vec<IntegrationRecord> = self.store.load(INTEGRATIONS).await?;
        let now = Utc::now();

        let existing = record.key.as_ref().and_then(|key| {
            records
                .iter_mut()
                .find(|r| r.kind == record.kind && r.key.as_ref() == Some(key))
        });

        let stored = match existing {
            Some(found) => {
                found.payload = record.payload.clone();
                found.updated_at = now;
                found.clone()
            }
            None => {
                let created = IntegrationRecord {
                    id: next_id(records.iter().map(|r| r.id)),
                    kind: record.kind,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    created_at: now,
                    updated_at: now,
                };
                records.push(created.clone());
                created
            }
        };
        self.store.save(INTEGRATIONS, &records).await?;
        Ok(stored)
    }

    async fn list_integration_records(
        &self,
        kind: IntegrationKind,
    ) -> Result<Vec<IntegrationRecord>, DalError> {
        let mut records: Vec<IntegrationRecord> = self.store.load(INTEGRATIONS).await?;
        records.retain(|r| r.kind == kind);
        records.sort_by_key(|r| r.id);
        Ok(records)
    }
}

fn next_id(ids: impl Iterator<Item = i64>) -> i64 {
    ids.max().unwrap_or(0) + 1
}

fn dedupe(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        if !out.contains(value) {
            out.push(value.clone());
        }
    }
    out
}

/// Returns the id of `name`, appending a new permission row when missing.
fn ensure_permission(
    permissions: &mut Vec<Permission>,
    name: &str,
) -> Result<(i64, bool), DalError> {
    if let Some(existing) = permissions.iter().find(|p| p.name == name) {
        return Ok((existing.id, false));
    }
    let (resource, action) = Permission::split_name(name)
        .ok_or_else(|| DalError::InvalidInput(format!("invalid permission name: {name}")))?;
    let permission = Permission {
        id: next_id(permissions.iter().map(|p| p.id)),
        name: name.to_string(),
        resource: resource.to_string(),
        action: action.to_string(),
    };
    let id = permission.id;
    permissions.push(permission);
    Ok((id, true))
}

fn apply_content_patch(item: &mut ContentItem, patch: &ContentPatch) {
    if let Some(title) = &patch.title {
        item.title = title.clone();
    }
    if let Some(category) = &patch.category {
        item.category = category.clone();
    }
    if let Some(summary) = &patch.summary {
        item.summary = summary.clone();
    }
    if let Some(content) = &patch.content {
        item.content = content.clone();
    }
    if let Some(tags) = &patch.tags {
        item.tags = tags.clone();
    }
    if let Some(status) = patch.status {
        item.status = status;
    }
    if let Some(details) = &patch.details {
        item.details = details.clone();
    }
}

fn apply_user_patch(user: &mut User, patch: &UserPatch) {
    if let Some(display_name) = &patch.display_name {
        user.display_name = display_name.clone();
    }
    if let Some(email) = &patch.email {
        user.email = email.clone();
    }
    if let Some(department) = &patch.department {
        user.department = department.clone();
    }
    if let Some(roles) = &patch.roles {
        user.roles = dedupe(roles);
    }
    if let Some(status) = patch.status {
        user.status = status;
    }
    if let Some(password_hash) = &patch.password_hash {
        user.password_hash = password_hash.clone();
    }
    if let Some(secret) = &patch.mfa_secret {
        user.mfa_secret = secret.clone();
    }
    if let Some(enabled) = patch.mfa_enabled {
        user.mfa_enabled = enabled;
    }
    if let Some(codes) = &patch.backup_codes {
        user.backup_codes = codes.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ContentFilter, PageRequest};
    use crate::models::UserStatus;
    use serde_json::json;
    use std::sync::Arc;

    fn repo() -> (tempfile::TempDir, FileRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileRepository::new(dir.path());
        (dir, repo)
    }

    fn seeds() -> Vec<RoleSeed> {
        vec![
            RoleSeed {
                name: "editor".into(),
                description: "Edits content".into(),
                permissions: vec!["knowledge.read".into(), "knowledge.create".into()],
            },
            RoleSeed {
                name: "reviewer".into(),
                description: "Reviews content".into(),
                permissions: vec!["knowledge.read".into(), "knowledge.approve".into()],
            },
        ]
    }

    fn new_user(username: &str, roles: &[&str]) -> NewUser {
        NewUser {
            username: username.to_string(),
            display_name: format!("{username} display"),
            email: Some(format!("{username}@example.com")),
            department: None,
            password_hash: "x".into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            status: UserStatus::Active,
        }
    }

    fn new_content(title: &str, category: &str, tags: &[&str]) -> NewContent {
        NewContent {
            title: title.to_string(),
            category: category.to_string(),
            summary: String::new(),
            content: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            status: Some(ContentStatus::Published),
            details: json!({}),
        }
    }

    #[tokio::test]
    async fn ids_are_sequential_and_refs_attached() {
        let (_dir, repo) = repo();
        repo.seed_reference_data(&seeds()).await.unwrap();
        let author = repo.create_user(&new_user("sato", &["editor"])).await.unwrap();

        let first = repo
            .create_content(EntityKind::Knowledge, &new_content("A", "safety", &[]), Some(author.id))
            .await
            .unwrap();
        let second = repo
            .create_content(EntityKind::Knowledge, &new_content("B", "safety", &[]), Some(author.id))
            .await
            .unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(second.creator.as_ref().map(|c| c.username.as_str()), Some("sato"));

        let page = repo
            .list_content(EntityKind::Knowledge, &ListQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(page.items.iter().all(|i| i.updater.is_some()));
    }

    #[tokio::test]
    async fn backup_code_is_consumed_once_under_contention() {
        let (_dir, repo) = repo();
        repo.seed_reference_data(&seeds()).await.unwrap();
        let user = repo.create_user(&new_user("kudo", &["editor"])).await.unwrap();
        let codes = ["h0", "h1", "h2"]
            .iter()
            .map(|h| crate::models::BackupCode::new(h.to_string()))
            .collect();
        let patch = UserPatch {
            backup_codes: Some(codes),
            ..UserPatch::default()
        };
        repo.update_user(user.id, &patch).await.unwrap();

        let user_id = user.id;
        let repo = Arc::new(repo);
        let mut handles = Vec::new();
        for hash in ["h0", "h0", "h0", "h1", "h2"] {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.consume_backup_code(user_id, hash).await.unwrap()
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 3);

        let stored = repo.get_user(user_id).await.unwrap().unwrap();
        assert!(stored.backup_codes.iter().all(|c| c.used && c.used_at.is_some()));
        assert!(!repo.consume_backup_code(user_id, "h1").await.unwrap());
        assert!(!repo.consume_backup_code(9_999, "h0").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_creates_get_distinct_ids() {
        let (_dir, repo) = repo();
        let repo = Arc::new(repo);

        let mut handles = Vec::new();
        for i in 0..10 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.create_content(
                    EntityKind::Sop,
                    &new_content(&format!("SOP {i}"), "quality", &[]),
                    None,
                )
                .await
                .unwrap()
                .id
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        assert_eq!(ids, (1..=10).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn filter_and_pagination_report_total() {
        let (_dir, repo) = repo();
        for i in 0..5 {
            let category = if i < 3 { "safety" } else { "quality" };
            repo.create_content(
                EntityKind::Knowledge,
                &new_content(&format!("Item {i}"), category, &[]),
                None,
            )
            .await
            .unwrap();
        }

        let query = ListQuery {
            filter: ContentFilter {
                category: Some("safety".into()),
                ..ContentFilter::default()
            },
            page: PageRequest::new(1, 2),
            ..ListQuery::default()
        };
        let page = repo.list_content(EntityKind::Knowledge, &query).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_pages(), 2);
        assert!(page.items.iter().all(|i| i.category == "safety"));
    }

    #[tokio::test]
    async fn soft_delete_hides_from_lists_but_not_lookup() {
        let (_dir, repo) = repo();
        let item = repo
            .create_content(EntityKind::Incidents, &new_content("Fall", "safety", &[]), None)
            .await
            .unwrap();

        assert!(repo.soft_delete_content(EntityKind::Incidents, item.id, None).await.unwrap());
        let page = repo
            .list_content(EntityKind::Incidents, &ListQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);

        let found = repo.get_content(EntityKind::Incidents, item.id).await.unwrap().unwrap();
        assert_eq!(found.status, ContentStatus::Deleted);

        assert!(repo.hard_delete_content(EntityKind::Incidents, item.id).await.unwrap());
        assert!(repo.get_content(EntityKind::Incidents, item.id).await.unwrap().is_none());
        assert!(!repo.hard_delete_content(EntityKind::Incidents, item.id).await.unwrap());
    }

    #[tokio::test]
    async fn update_missing_item_is_none() {
        let (_dir, repo) = repo();
        let patch = ContentPatch::status(ContentStatus::Pending);
        let out = repo
            .update_content(EntityKind::Sop, 42, &patch, None)
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn related_items_rank_by_overlap() {
        let (_dir, repo) = repo();
        let base = repo
            .create_content(EntityKind::Knowledge, &new_content("Base", "c", &["a", "b", "c"]), None)
            .await
            .unwrap();
        let one = repo
            .create_content(EntityKind::Knowledge, &new_content("One", "c", &["a"]), None)
            .await
            .unwrap();
        let two = repo
            .create_content(EntityKind::Knowledge, &new_content("Two", "c", &["a", "b"]), None)
            .await
            .unwrap();
        repo.create_content(EntityKind::Knowledge, &new_content("None", "c", &["z"]), None)
            .await
            .unwrap();

        let related = repo
            .related_by_tags(EntityKind::Knowledge, &base.tags, 5, Some(base.id))
            .await
            .unwrap();
        let ids: Vec<i64> = related.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![two.id, one.id]);
    }

    #[tokio::test]
    async fn duplicate_username_conflicts_and_unknown_role_is_rejected() {
        let (_dir, repo) = repo();
        repo.seed_reference_data(&seeds()).await.unwrap();
        repo.create_user(&new_user("kim", &["editor"])).await.unwrap();

        let dup = repo.create_user(&new_user("kim", &["editor"])).await;
        assert!(matches!(dup, Err(DalError::Conflict(_))));

        let bad = repo.create_user(&new_user("lee", &["wizard"])).await;
        assert!(matches!(bad, Err(DalError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn first_user_only_once() {
        let (_dir, repo) = repo();
        repo.seed_reference_data(&seeds()).await.unwrap();
        assert!(repo.create_first_user(&new_user("root", &["editor"])).await.unwrap().is_some());
        assert!(repo.create_first_user(&new_user("other", &["editor"])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn permissions_union_across_roles() {
        let (_dir, repo) = repo();
        repo.seed_reference_data(&seeds()).await.unwrap();
        // Seeding twice must not duplicate anything.
        repo.seed_reference_data(&seeds()).await.unwrap();

        let perms = repo
            .permissions_for_roles(&["editor".into(), "reviewer".into()])
            .await
            .unwrap();
        let perms: Vec<&str> = perms.iter().map(String::as_str).collect();
        assert_eq!(perms, vec!["knowledge.approve", "knowledge.create", "knowledge.read"]);
        assert_eq!(repo.list_permissions().await.unwrap().len(), 3);

        assert!(repo.grant_permission("editor", "sop.read").await.unwrap());
        assert!(!repo.grant_permission("ghost", "sop.read").await.unwrap());
        let editor = repo
            .permissions_for_roles(&["editor".into()])
            .await
            .unwrap();
        assert!(editor.contains("sop.read"));
    }

    #[tokio::test]
    async fn integration_records_upsert_by_key() {
        let (_dir, repo) = repo();
        let put = |key: Option<&str>, n: i64| NewIntegrationRecord {
            kind: IntegrationKind::Ms365FileMapping,
            key: key.map(str::to_string),
            payload: json!({ "n": n }),
        };

        let first = repo.put_integration_record(&put(Some("drive/a"), 1)).await.unwrap();
        let second = repo.put_integration_record(&put(Some("drive/a"), 2)).await.unwrap();
        assert_eq!(first.id, second.id);
        repo.put_integration_record(&put(None, 3)).await.unwrap();
        repo.put_integration_record(&put(None, 4)).await.unwrap();

        let records = repo
            .list_integration_records(IntegrationKind::Ms365FileMapping)
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].payload, json!({ "n": 2 }));
    }

    #[tokio::test]
    async fn access_logs_newest_first() {
        let (_dir, repo) = repo();
        for action in ["login", "logout", "login"] {
            repo.append_access_log(&NewAccessLog {
                user_id: Some(1),
                action: action.into(),
                status: "success".into(),
                ip: None,
            })
            .await
            .unwrap();
        }
        let page = repo
            .list_access_logs(&AccessLogQuery {
                action: Some("login".into()),
                ..AccessLogQuery::default()
            })
            .await
            .unwrap();
        let ids: Vec<i64> = page.items.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }
}
