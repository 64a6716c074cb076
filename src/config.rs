use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;

use ipnet::IpNet;

use crate::notify::NotificationKind;

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub mfa_issuer: String,
    pub host: IpAddr,
    pub port: u16,
    pub trusted_proxies: Vec<IpNet>,
    pub log_level: String,
    pub notify_types: Option<HashSet<NotificationKind>>,
    pub incident_notify_roles: Vec<String>,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    Postgres(DatabaseConfig),
    Json { data_dir: PathBuf },
}

impl StorageConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StorageConfig::Postgres(_) => "postgres",
            StorageConfig::Json { .. } => "json",
        }
    }
}

/// Pool sizing for the relational backend. `pool_size` connections are kept
/// warm and up to `max_overflow` more are opened under load.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub max_overflow: u32,
    pub pool_timeout_secs: u64,
    pub pool_recycle_secs: u64,
    pub statement_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let storage = match env_or("SITEKB_STORAGE", "postgres").as_str() {
            "postgres" => StorageConfig::Postgres(DatabaseConfig {
                url: env_required("DATABASE_URL")?,
                pool_size: env_parse("SITEKB_DB_POOL_SIZE", "10")?,
                max_overflow: env_parse("SITEKB_DB_MAX_OVERFLOW", "20")?,
                pool_timeout_secs: env_parse("SITEKB_DB_POOL_TIMEOUT_SECS", "30")?,
                pool_recycle_secs: env_parse("SITEKB_DB_POOL_RECYCLE_SECS", "3600")?,
                statement_timeout_ms: env_parse("SITEKB_DB_STATEMENT_TIMEOUT_MS", "30000")?,
            }),
            "json" => StorageConfig::Json {
                data_dir: PathBuf::from(env_or("SITEKB_DATA_DIR", "./data")),
            },
            other => return Err(format!("Invalid SITEKB_STORAGE '{other}' (expected postgres or json)")),
        };

        let jwt_secret = env_required("JWT_SECRET")?;
        let token_ttl_minutes: i64 = env_parse("SITEKB_TOKEN_TTL_MINUTES", "60")?;
        let mfa_issuer = env_or("SITEKB_MFA_ISSUER", "SiteKB");

        let host: IpAddr = env_parse("SITEKB_HOST", "0.0.0.0")?;
        let port: u16 = env_parse("SITEKB_PORT", "8000")?;

        let trusted_proxies: Vec<IpNet> = env_or("SITEKB_TRUSTED_PROXIES", "")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse()
                    .map_err(|e| format!("Invalid SITEKB_TRUSTED_PROXIES entry '{s}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let log_level = env_or("SITEKB_LOG_LEVEL", "info");

        let notify_types = match std::env::var("SITEKB_NOTIFY_TYPES").ok() {
            Some(raw) => Some(parse_notify_types(&raw)?),
            None => None,
        };

        let incident_notify_roles = split_list(&env_or(
            "SITEKB_INCIDENT_NOTIFY_ROLES",
            "admin,safety_manager",
        ));

        let smtp = match (
            std::env::var("SITEKB_SMTP_HOST").ok(),
            std::env::var("SITEKB_SMTP_PORT").ok(),
            std::env::var("SITEKB_SMTP_USER").ok(),
            std::env::var("SITEKB_SMTP_PASS").ok(),
            std::env::var("SITEKB_SMTP_FROM").ok(),
        ) {
            (Some(host), Some(port), Some(user), Some(pass), Some(from)) => Some(SmtpConfig {
                host,
                port: port
                    .parse()
                    .map_err(|e| format!("Invalid SITEKB_SMTP_PORT: {e}"))?,
                user,
                pass,
                from,
            }),
            _ => None,
        };

        Ok(Config {
            storage,
            jwt_secret,
            token_ttl_minutes,
            mfa_issuer,
            host,
            port,
            trusted_proxies,
            log_level,
            notify_types,
            incident_notify_roles,
            smtp,
        })
    }
}

/// Parses the enabled notification type list. An empty list disables every type.
pub fn parse_notify_types(raw: &str) -> Result<HashSet<NotificationKind>, String> {
    split_list(raw)
        .iter()
        .map(|name| {
            NotificationKind::parse(name)
                .ok_or_else(|| format!("Invalid SITEKB_NOTIFY_TYPES entry '{name}'"))
        })
        .collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))
}
