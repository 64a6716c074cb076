#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use tempfile::TempDir;

use sitekb::auth::password;
use sitekb::config::{Config, StorageConfig};
use sitekb::db::Repository;
use sitekb::db::file::FileRepository;
use sitekb::models::{NewUser, User, UserStatus};
use sitekb::policy;

pub const PASSWORD: &str = "correct-horse-9";

/// A running test server backed by a throwaway JSON data directory.
pub struct TestApp {
    pub addr: SocketAddr,
    pub repo: Arc<dyn Repository>,
    pub client: Client,
    _data_dir: TempDir,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Insert a user holding `roles` directly through the repository.
    pub async fn create_user(&self, username: &str, roles: &[&str]) -> User {
        let user = NewUser {
            username: username.to_string(),
            display_name: username.to_string(),
            email: Some(format!("{username}@site.test")),
            department: None,
            password_hash: password::hash(PASSWORD).unwrap(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            status: UserStatus::Active,
        };
        self.repo.create_user(&user).await.unwrap()
    }

    /// Send a JSON request, optionally with a bearer token, and return the
    /// decoded body (`null` when empty) with the status.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> (Value, StatusCode) {
        let mut req = self.client.request(method.clone(), self.url(path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .await
            .unwrap_or_else(|e| panic!("{method} {path} failed: {e}"));
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        (body, status)
    }

    pub async fn login(&self, body: &Value) -> (Value, StatusCode) {
        self.send(Method::POST, "/api/v1/auth/login", None, Some(body))
            .await
    }

    /// Create a user with `roles` and return an access token for them.
    pub async fn token_for(&self, username: &str, roles: &[&str]) -> String {
        self.create_user(username, roles).await;
        let (body, status) = self
            .login(&json!({ "username": username, "password": PASSWORD }))
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["data"]["access_token"].as_str().unwrap().to_string()
    }

    pub async fn get_auth(&self, path: &str, token: &str) -> (Value, StatusCode) {
        self.send(Method::GET, path, Some(token), None).await
    }

    pub async fn post_auth(&self, path: &str, token: &str, body: &Value) -> (Value, StatusCode) {
        self.send(Method::POST, path, Some(token), Some(body)).await
    }

    pub async fn put_auth(&self, path: &str, token: &str, body: &Value) -> (Value, StatusCode) {
        self.send(Method::PUT, path, Some(token), Some(body)).await
    }

    pub async fn delete_auth(&self, path: &str, token: &str) -> (Value, StatusCode) {
        self.send(Method::DELETE, path, Some(token), None).await
    }
}

pub fn test_config(data_dir: PathBuf) -> Config {
    Config {
        storage: StorageConfig::Json { data_dir },
        jwt_secret: "test-jwt-secret-that-is-long-enough".to_string(),
        token_ttl_minutes: 60,
        mfa_issuer: "SiteKB Test".to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        trusted_proxies: vec![],
        log_level: "warn".to_string(),
        notify_types: None,
        incident_notify_roles: vec!["admin".to_string(), "safety_manager".to_string()],
        smtp: None,
    }
}

/// Spawn a test app on a fresh JSON data directory with the default roles seeded.
pub async fn spawn_app() -> TestApp {
    let data_dir = TempDir::new().expect("Failed to create temp dir");
    let repo: Arc<dyn Repository> = Arc::new(FileRepository::new(data_dir.path()));
    repo.seed_reference_data(&policy::default_role_seeds())
        .await
        .expect("Failed to seed roles");

    let config = test_config(data_dir.path().to_path_buf());
    let (app, _state) = sitekb::build_app(repo.clone(), config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Server failed");
    });

    let client = Client::new();

    TestApp {
        addr,
        repo,
        client,
        _data_dir: data_dir,
    }
}
