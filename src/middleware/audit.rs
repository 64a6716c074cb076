use crate::db::Repository;
use crate::models::NewAccessLog;
use crate::net::ClientIp;

/// Append an access log entry. Called explicitly by handlers; a failed append
/// is logged and never fails the request.
pub async fn log_access(
    repo: &dyn Repository,
    user_id: Option<i64>,
    action: &str,
    status: &str,
    ip: ClientIp,
) {
    let entry = NewAccessLog {
        user_id,
        action: action.to_string(),
        status: status.to_string(),
        ip: ip.to_string_opt(),
    };
    if let Err(e) = repo.append_access_log(&entry).await {
        tracing::warn!(action, status, "Failed to append access log: {e}");
    }
}
