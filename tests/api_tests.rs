mod common;

use reqwest::StatusCode;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, Secret, TOTP};

use common::PASSWORD;
use sitekb::models::{NewUser, UserStatus};

fn current_code(secret: &str) -> String {
    let bytes = Secret::Encoded(secret.to_string()).to_bytes().unwrap();
    TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, None, "test".to_string())
        .unwrap()
        .generate_current()
        .unwrap()
}

async fn create_item(app: &common::TestApp, token: &str, kind: &str, body: Value) -> Value {
    let (resp, status) = app.post_auth(&format!("/api/v1/{kind}"), token, &body).await;
    assert_eq!(status, StatusCode::OK, "create {kind} failed: {resp}");
    resp["data"].clone()
}

// ── Health ──────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_backend() {
    let app = common::spawn_app().await;

    let resp = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "json");
}

// ── Registration & Auth ─────────────────────────────────────────

#[tokio::test]
async fn register_bootstraps_only_the_first_admin() {
    let app = common::spawn_app().await;

    let resp = app
        .client
        .post(app.url("/api/v1/auth/register"))
        .json(&json!({ "username": "founder", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["user"]["roles"], json!(["admin"]));
    assert!(body["data"]["access_token"].is_string());

    let resp = app
        .client
        .post(app.url("/api/v1/auth/register"))
        .json(&json!({ "username": "second", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn login_returns_bearer_token_and_profile() {
    let app = common::spawn_app().await;
    app.create_user("tanaka", &["editor"]).await;

    let (body, status) = app
        .login(&json!({ "username": "tanaka", "password": PASSWORD }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["token_type"], "Bearer");
    assert_eq!(body["data"]["expires_in"], 3600);
    assert_eq!(body["data"]["user"]["username"], "tanaka");
    assert!(body["data"]["user"].get("password_hash").is_none());

    let token = body["data"]["access_token"].as_str().unwrap();
    let (me, status) = app.get_auth("/api/v1/auth/me", token).await;
    assert_eq!(status, StatusCode::OK);
    let perms: Vec<&str> = me["data"]["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(perms.contains(&"knowledge.create"));
    assert!(!perms.contains(&"knowledge.approve"));
}

#[tokio::test]
async fn login_failures_share_one_message() {
    let app = common::spawn_app().await;
    app.create_user("suzuki", &["viewer"]).await;

    let (wrong_pw, status) = app
        .login(&json!({ "username": "suzuki", "password": "not-the-password" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (unknown, status) = app
        .login(&json!({ "username": "nobody", "password": PASSWORD }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_pw["error"]["message"], unknown["error"]["message"]);
    assert_eq!(wrong_pw["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn inactive_user_cannot_log_in() {
    let app = common::spawn_app().await;
    let user = app.create_user("retired", &["viewer"]).await;
    let patch = sitekb::models::UserPatch {
        status: Some(UserStatus::Inactive),
        ..Default::default()
    };
    app.repo.update_user(user.id, &patch).await.unwrap();

    let (_, status) = app
        .login(&json!({ "username": "retired", "password": PASSWORD }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn repeated_failures_are_rate_limited() {
    let app = common::spawn_app().await;
    app.create_user("yamada", &["viewer"]).await;

    for _ in 0..5 {
        let (_, status) = app
            .login(&json!({ "username": "yamada", "password": "wrong-password" }))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (body, status) = app
        .login(&json!({ "username": "yamada", "password": PASSWORD }))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn legacy_sha256_hash_is_upgraded_on_login() {
    let app = common::spawn_app().await;
    let legacy = hex::encode(Sha256::digest(PASSWORD.as_bytes()));
    let user = app
        .repo
        .create_user(&NewUser {
            username: "legacy".to_string(),
            display_name: "Legacy".to_string(),
            email: None,
            department: None,
            password_hash: legacy.clone(),
            roles: vec!["viewer".to_string()],
            status: UserStatus::Active,
        })
        .await
        .unwrap();

    let (_, status) = app
        .login(&json!({ "username": "legacy", "password": PASSWORD }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let stored = app.repo.get_user(user.id).await.unwrap().unwrap();
    assert_ne!(stored.password_hash, legacy);
    assert!(stored.password_hash.starts_with("$2"));

    let (_, status) = app
        .login(&json!({ "username": "legacy", "password": PASSWORD }))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn change_password_requires_current_password() {
    let app = common::spawn_app().await;
    let token = app.token_for("kimura", &["viewer"]).await;

    let (_, status) = app
        .post_auth(
            "/api/v1/auth/change-password",
            &token,
            &json!({ "current_password": "guess", "new_password": "another-pass-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, status) = app
        .post_auth(
            "/api/v1/auth/change-password",
            &token,
            &json!({ "current_password": PASSWORD, "new_password": "short" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, status) = app
        .post_auth(
            "/api/v1/auth/change-password",
            &token,
            &json!({ "current_password": PASSWORD, "new_password": "another-pass-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, status) = app
        .login(&json!({ "username": "kimura", "password": "another-pass-1" }))
        .await;
    assert_eq!(status, StatusCode::OK);
}

// ── MFA ─────────────────────────────────────────────────────────

#[tokio::test]
async fn mfa_enrollment_and_login() {
    let app = common::spawn_app().await;
    let token = app.token_for("ito", &["editor"]).await;

    let (setup, status) = app.post_auth("/api/v1/auth/mfa/setup", &token, &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let secret = setup["data"]["secret"].as_str().unwrap().to_string();
    assert!(
        setup["data"]["provisioning_uri"]
            .as_str()
            .unwrap()
            .starts_with("otpauth://totp/")
    );
    assert!(
        setup["data"]["qr_code"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,")
    );

    // Pending secret alone does not turn MFA on.
    let (status_body, _) = app.get_auth("/api/v1/auth/mfa/status", &token).await;
    assert_eq!(status_body["data"]["enabled"], false);

    let (_, status) = app
        .post_auth("/api/v1/auth/mfa/enable", &token, &json!({ "code": "000000x" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (enabled, status) = app
        .post_auth(
            "/api/v1/auth/mfa/enable",
            &token,
            &json!({ "code": current_code(&secret) }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(enabled["data"]["backup_codes"].as_array().unwrap().len(), 10);

    let (body, status) = app
        .login(&json!({ "username": "ito", "password": PASSWORD }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "MFA_REQUIRED");

    let (_, status) = app
        .login(&json!({ "username": "ito", "password": PASSWORD, "mfa_code": current_code(&secret) }))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn backup_code_is_single_use() {
    let app = common::spawn_app().await;
    let token = app.token_for("sasaki", &["viewer"]).await;

    let (setup, _) = app.post_auth("/api/v1/auth/mfa/setup", &token, &json!({})).await;
    let secret = setup["data"]["secret"].as_str().unwrap().to_string();
    let (enabled, _) = app
        .post_auth(
            "/api/v1/auth/mfa/enable",
            &token,
            &json!({ "code": current_code(&secret) }),
        )
        .await;
    let code = enabled["data"]["backup_codes"][0]
        .as_str()
        .unwrap()
        .to_lowercase();

    let login = json!({ "username": "sasaki", "password": PASSWORD, "backup_code": code });
    let (body, status) = app.login(&login).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, status) = app.login(&login).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let fresh = body["data"]["access_token"].as_str().unwrap();
    let (status_body, _) = app.get_auth("/api/v1/auth/mfa/status", fresh).await;
    assert_eq!(status_body["data"]["enabled"], true);
    assert_eq!(status_body["data"]["backup_codes_remaining"], 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_logins_accept_a_backup_code_once() {
    let app = common::spawn_app().await;
    let token = app.token_for("morita", &["viewer"]).await;

    let (setup, _) = app.post_auth("/api/v1/auth/mfa/setup", &token, &json!({})).await;
    let secret = setup["data"]["secret"].as_str().unwrap().to_string();
    let (enabled, _) = app
        .post_auth(
            "/api/v1/auth/mfa/enable",
            &token,
            &json!({ "code": current_code(&secret) }),
        )
        .await;
    let codes: Vec<String> = enabled["data"]["backup_codes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap().to_string())
        .collect();
    let with_code =
        |code: &str| json!({ "username": "morita", "password": PASSWORD, "backup_code": code });

    let same = with_code(&codes[0]);
    let (a, b, c, d) = tokio::join!(
        app.login(&same),
        app.login(&same),
        app.login(&same),
        app.login(&same)
    );
    let accepted = [a.1, b.1, c.1, d.1]
        .iter()
        .filter(|s| **s == StatusCode::OK)
        .count();
    assert_eq!(accepted, 1);

    // Two different codes at once must both stick as used.
    let (first, second) = (with_code(&codes[1]), with_code(&codes[2]));
    let ((body, s1), (_, s2)) = tokio::join!(app.login(&first), app.login(&second));
    assert_eq!(s1, StatusCode::OK, "{body}");
    assert_eq!(s2, StatusCode::OK);

    let fresh = body["data"]["access_token"].as_str().unwrap();
    let (status_body, _) = app.get_auth("/api/v1/auth/mfa/status", fresh).await;
    assert_eq!(status_body["data"]["backup_codes_remaining"], 7);

    let (_, status) = app.login(&first).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn mfa_disable_requires_password() {
    let app = common::spawn_app().await;
    let token = app.token_for("endo", &["viewer"]).await;

    let (setup, _) = app.post_auth("/api/v1/auth/mfa/setup", &token, &json!({})).await;
    let secret = setup["data"]["secret"].as_str().unwrap().to_string();
    app.post_auth(
        "/api/v1/auth/mfa/enable",
        &token,
        &json!({ "code": current_code(&secret) }),
    )
    .await;

    let (_, status) = app
        .post_auth("/api/v1/auth/mfa/disable", &token, &json!({ "password": "wrong" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, status) = app
        .post_auth("/api/v1/auth/mfa/disable", &token, &json!({ "password": PASSWORD }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, status) = app
        .login(&json!({ "username": "endo", "password": PASSWORD }))
        .await;
    assert_eq!(status, StatusCode::OK);
}

// ── Authorization ───────────────────────────────────────────────

#[tokio::test]
async fn missing_token_is_401_and_missing_permission_is_403() {
    let app = common::spawn_app().await;
    let viewer = app.token_for("partner_a", &["partner"]).await;

    let resp = app.client.get(app.url("/api/v1/knowledge")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let (_, status) = app.get_auth("/api/v1/knowledge", &viewer).await;
    assert_eq!(status, StatusCode::OK);

    let (body, status) = app
        .post_auth(
            "/api/v1/knowledge",
            &viewer,
            &json!({ "title": "Nope", "category": "safety" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (_, status) = app.get_auth("/api/v1/users", &viewer).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn new_role_is_composed_from_permission_rows() {
    let app = common::spawn_app().await;
    let admin = app.token_for("root", &["admin"]).await;

    let (body, status) = app
        .post_auth(
            "/api/v1/roles",
            &admin,
            &json!({ "name": "auditor", "description": "Reads regulations", "permissions": ["regulations.read"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["permissions"], json!(["regulations.read"]));

    let auditor = app.token_for("audit1", &["auditor"]).await;
    let (_, status) = app.get_auth("/api/v1/regulations", &auditor).await;
    assert_eq!(status, StatusCode::OK);
    let (_, status) = app.get_auth("/api/v1/sop", &auditor).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, status) = app
        .post_auth(
            "/api/v1/roles/auditor/permissions",
            &admin,
            &json!({ "permission": "sop.read" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, status) = app.get_auth("/api/v1/sop", &auditor).await;
    assert_eq!(status, StatusCode::OK);

    let (_, status) = app
        .post_auth(
            "/api/v1/roles/ghost/permissions",
            &admin,
            &json!({ "permission": "sop.read" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Content ─────────────────────────────────────────────────────

#[tokio::test]
async fn list_filters_and_paginates() {
    let app = common::spawn_app().await;
    let editor = app.token_for("editor1", &["editor"]).await;

    for i in 0..5 {
        create_item(
            &app,
            &editor,
            "knowledge",
            json!({ "title": format!("Rebar spacing {i}"), "category": "structure", "tags": ["rebar"] }),
        )
        .await;
    }
    create_item(
        &app,
        &editor,
        "knowledge",
        json!({ "title": "Hot work permit", "category": "safety", "content": "Fire watch for 30 minutes" }),
    )
    .await;

    let (body, status) = app
        .get_auth("/api/v1/knowledge?category=structure&per_page=2", &editor)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total_items"], 5);
    assert_eq!(body["pagination"]["total_pages"], 3);
    assert_eq!(body["pagination"]["page"], 1);

    let (body, _) = app
        .get_auth("/api/v1/knowledge?category=structure&per_page=2&page=3", &editor)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (body, _) = app.get_auth("/api/v1/knowledge?search=FIRE%20WATCH", &editor).await;
    assert_eq!(body["pagination"]["total_items"], 1);
    assert_eq!(body["data"][0]["title"], "Hot work permit");

    let (body, _) = app.get_auth("/api/v1/knowledge?tags=rebar", &editor).await;
    assert_eq!(body["pagination"]["total_items"], 5);

    let (body, status) = app.get_auth("/api/v1/knowledge?sort=colour", &editor).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn content_carries_creator_reference() {
    let app = common::spawn_app().await;
    let editor = app.token_for("writer", &["editor"]).await;

    let item = create_item(
        &app,
        &editor,
        "sop",
        json!({ "title": "Crane lift", "category": "lifting", "details": { "version": "1.0", "revision_date": "2024-05-01" } }),
    )
    .await;
    assert_eq!(item["status"], "draft");
    assert_eq!(item["creator"]["username"], "writer");

    let (body, _) = app
        .get_auth(&format!("/api/v1/sop/{}", item["id"]), &editor)
        .await;
    assert_eq!(body["data"]["details"]["version"], "1.0");
}

#[tokio::test]
async fn unknown_collection_and_bad_details_are_rejected() {
    let app = common::spawn_app().await;
    let admin = app.token_for("root", &["admin"]).await;

    let (_, status) = app.get_auth("/api/v1/widgets", &admin).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (body, status) = app
        .post_auth(
            "/api/v1/incidents",
            &admin,
            &json!({ "title": "Fall from ladder", "category": "fall" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (_, status) = app
        .post_auth(
            "/api/v1/incidents",
            &admin,
            &json!({ "title": "Fall from ladder", "category": "fall", "details": { "severity": "high" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn approval_workflow() {
    let app = common::spawn_app().await;
    let editor = app.token_for("author", &["editor"]).await;
    let reviewer = app.token_for("checker", &["reviewer"]).await;

    let item = create_item(
        &app,
        &editor,
        "knowledge",
        json!({ "title": "Formwork stripping", "category": "concrete" }),
    )
    .await;
    let base = format!("/api/v1/knowledge/{}", item["id"]);

    let (_, status) = app.post_auth(&format!("{base}/approve"), &reviewer, &json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (body, status) = app.post_auth(&format!("{base}/submit"), &editor, &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");

    let (_, status) = app.post_auth(&format!("{base}/approve"), &editor, &json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, status) = app
        .put_auth(&base, &editor, &json!({ "status": "approved" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (body, status) = app.post_auth(&format!("{base}/approve"), &reviewer, &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "approved");
    assert_eq!(body["data"]["updater"]["username"], "checker");

    let (_, status) = app.post_auth(&format!("{base}/reject"), &reviewer, &json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn update_validates_patch_and_transitions() {
    let app = common::spawn_app().await;
    let editor = app.token_for("editor2", &["editor"]).await;

    let item = create_item(
        &app,
        &editor,
        "consultations",
        json!({ "title": "Soil report", "category": "geotech" }),
    )
    .await;
    let path = format!("/api/v1/consultations/{}", item["id"]);

    let (_, status) = app.put_auth(&path, &editor, &json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, status) = app
        .put_auth(&path, &editor, &json!({ "status": "archived" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, status) = app
        .put_auth(&path, &editor, &json!({ "status": "pending" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (body, status) = app
        .put_auth(&path, &editor, &json!({ "title": "  Soil report rev B  " }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["title"], "Soil report rev B");
}

#[tokio::test]
async fn soft_and_hard_delete() {
    let app = common::spawn_app().await;
    let admin = app.token_for("root", &["admin"]).await;
    let viewer = app.token_for("reader", &["viewer"]).await;

    let item = create_item(
        &app,
        &admin,
        "regulations",
        json!({ "title": "Working at height", "category": "law" }),
    )
    .await;
    let path = format!("/api/v1/regulations/{}", item["id"]);

    let (_, status) = app.delete_auth(&path, &viewer).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, status) = app.delete_auth(&path, &admin).await;
    assert_eq!(status, StatusCode::OK);

    let (body, _) = app.get_auth("/api/v1/regulations", &admin).await;
    assert_eq!(body["pagination"]["total_items"], 0);

    let (_, status) = app.get_auth(&path, &viewer).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (body, status) = app.get_auth(&path, &admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "deleted");

    let (body, _) = app.get_auth("/api/v1/regulations?status=deleted", &admin).await;
    assert_eq!(body["pagination"]["total_items"], 1);
    let (_, status) = app.get_auth("/api/v1/regulations?status=deleted", &viewer).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, status) = app.delete_auth(&format!("{path}?hard=true"), &admin).await;
    assert_eq!(status, StatusCode::OK);
    let (_, status) = app.get_auth(&path, &admin).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn related_items_rank_by_shared_tags() {
    let app = common::spawn_app().await;
    let editor = app.token_for("editor3", &["editor"]).await;

    let source = create_item(
        &app,
        &editor,
        "knowledge",
        json!({ "title": "Pump truck setup", "category": "concrete", "tags": ["pump", "concrete", "outrigger"] }),
    )
    .await;
    let one = create_item(
        &app,
        &editor,
        "knowledge",
        json!({ "title": "Slump test", "category": "concrete", "tags": ["concrete"] }),
    )
    .await;
    let two = create_item(
        &app,
        &editor,
        "knowledge",
        json!({ "title": "Outrigger pads", "category": "plant", "tags": ["pump", "outrigger"] }),
    )
    .await;
    create_item(
        &app,
        &editor,
        "knowledge",
        json!({ "title": "Tower crane", "category": "plant", "tags": ["crane"] }),
    )
    .await;

    let (body, status) = app
        .get_auth(&format!("/api/v1/knowledge/{}/related", source["id"]), &editor)
        .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![two["id"].as_i64().unwrap(), one["id"].as_i64().unwrap()]);
}

// ── Users & audit ───────────────────────────────────────────────

#[tokio::test]
async fn malformed_usernames_and_user_ids_get_the_error_envelope() {
    let app = common::spawn_app().await;
    let admin = app.token_for("root", &["admin"]).await;

    let (body, status) = app
        .post_auth(
            "/api/v1/users",
            &admin,
            &json!({ "username": "ops:admin", "password": "welcome-123" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (body, status) = app
        .send(
            reqwest::Method::POST,
            "/api/v1/auth/register",
            None,
            Some(&json!({ "username": "bad name", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    for (body, status) in [
        app.get_auth("/api/v1/users/abc", &admin).await,
        app.put_auth("/api/v1/users/abc", &admin, &json!({ "roles": ["viewer"] }))
            .await,
        app.post_auth(
            "/api/v1/users/abc/reset-password",
            &admin,
            &json!({ "new_password": "welcome-123" }),
        )
        .await,
    ] {
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR", "{body}");
    }
}

#[tokio::test]
async fn admin_manages_users() {
    let app = common::spawn_app().await;
    let admin = app.token_for("root", &["admin"]).await;

    let (body, status) = app
        .post_auth(
            "/api/v1/users",
            &admin,
            &json!({ "username": "newhire", "password": "welcome-123", "email": "newhire@site.test", "roles": ["viewer"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let id = body["data"]["id"].as_i64().unwrap();

    let (_, status) = app
        .post_auth(
            "/api/v1/users",
            &admin,
            &json!({ "username": "newhire", "password": "welcome-123" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (body, status) = app
        .put_auth(
            &format!("/api/v1/users/{id}"),
            &admin,
            &json!({ "roles": ["editor"], "email": "" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["roles"], json!(["editor"]));
    assert_eq!(body["data"]["email"], Value::Null);

    let (body, _) = app.get_auth("/api/v1/users?role=editor", &admin).await;
    assert_eq!(body["pagination"]["total_items"], 1);

    let (_, status) = app
        .post_auth(
            &format!("/api/v1/users/{id}/reset-password"),
            &admin,
            &json!({ "new_password": "fresh-start-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, status) = app
        .login(&json!({ "username": "newhire", "password": "fresh-start-1" }))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn access_log_records_logins_newest_first() {
    let app = common::spawn_app().await;
    let admin = app.token_for("root", &["admin"]).await;
    app.login(&json!({ "username": "root", "password": "bad-password" }))
        .await;

    let (body, status) = app
        .get_auth("/api/v1/access-logs?action=login", &admin)
        .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["status"], "failure");
    assert_eq!(entries[1]["status"], "success");
    assert_eq!(entries[0]["ip"], "127.0.0.1");

    let viewer = app.token_for("reader", &["viewer"]).await;
    let (_, status) = app.get_auth("/api/v1/access-logs", &viewer).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn integration_records_upsert_by_key() {
    let app = common::spawn_app().await;
    let admin = app.token_for("root", &["admin"]).await;
    let path = "/api/v1/integrations/ms365_file_mapping";

    app.post_auth(path, &admin, &json!({ "key": "doc-1", "payload": { "drive_id": "a" } }))
        .await;
    let (_, status) = app
        .post_auth(path, &admin, &json!({ "key": "doc-1", "payload": { "drive_id": "b" } }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (body, _) = app.get_auth(path, &admin).await;
    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["payload"]["drive_id"], "b");

    let (_, status) = app.get_auth("/api/v1/integrations/dropbox", &admin).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
