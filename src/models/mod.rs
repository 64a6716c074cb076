mod access_log;
mod content;
mod integration;
mod role;
mod user;

pub use access_log::{AccessLog, NewAccessLog};
pub use content::{ContentItem, ContentPatch, ContentStatus, EntityKind, NewContent, UserRef};
pub use integration::{IntegrationKind, IntegrationRecord, NewIntegrationRecord};
pub use role::{Permission, Role, RoleGrants, RolePermission, RoleSeed};
pub use user::{BackupCode, NewUser, User, UserPatch, UserProfile, UserStatus};
