use std::sync::Arc;

use crate::config::Config;
use crate::db::Repository;
use crate::notify::Notifier;
use crate::rate_limit::LoginRateLimiter;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub config: Config,
    pub notifier: Notifier,
    pub login_limiter: LoginRateLimiter,
}
