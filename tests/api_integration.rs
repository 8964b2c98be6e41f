use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

use elunsad_access::create_app;

async fn setup() -> Result<(TempDir, SqlitePool, Router)> {
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok((dir, pool, app))
}

async fn send(app: &Router, req: Request<Body>) -> Result<(StatusCode, Value)> {
    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes)?
    };
    Ok((status, value))
}

async fn register(app: &Router, name: &str, email: &str) -> Result<(String, String)> {
    let req = Request::builder()
        .method("POST")
        .uri("/auth/register")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "name": name, "email": email, "password": "password123" }).to_string(),
        ))?;

    let (status, value) = send(app, req).await?;
    if status != StatusCode::CREATED {
        panic!("register failed: {} - {}", status, value);
    }

    let token = value
        .get("token")
        .and_then(|v| v.as_str())
        .context("missing token")?
        .to_string();
    let user_id = value
        .get("user")
        .and_then(|u| u.get("id"))
        .and_then(|v| v.as_str())
        .context("missing user id")?
        .to_string();

    Ok((token, user_id))
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, token: Option<&str>, payload: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let body = payload.map(|v| Body::from(v.to_string())).unwrap_or_else(Body::empty);
    builder.body(body).unwrap()
}

fn delete(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn full_access_flow() -> Result<()> {
    let (_dir, _pool, app) = setup().await?;

    // -- first applicant registers; no roles yet
    let (maria_token, maria_id) = register(&app, "Maria Santos", "maria@example.com").await?;

    let (status, caps) = send(&app, get("/access/capabilities", Some(&maria_token))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(caps["identity_id"], maria_id.as_str());
    assert_eq!(caps["roles"], json!([]));
    assert_eq!(caps["is_admin"], false);
    assert_eq!(caps["is_business_owner"], false);
    assert!(caps.get("error").is_none(), "no fault expected: {}", caps);

    // -- admin-only area redirects a roleless user to their dashboard
    let (status, decision) = send(
        &app,
        get("/access/decision?route_class=admin-only", Some(&maria_token)),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision["decision"], "deny_redirect");
    assert_eq!(decision["redirect_to"], "/dashboard");

    // -- anonymous callers: public allows, the rest require auth
    let (_, decision) = send(&app, get("/access/decision?route_class=public", None)).await?;
    assert_eq!(decision["decision"], "allow");
    let (_, decision) = send(&app, get("/access/decision?route_class=authenticated-only", None)).await?;
    assert_eq!(decision["decision"], "require_auth");

    // -- unknown route class is rejected before any resolution
    let (status, _) = send(&app, get("/access/decision?route_class=staff-only", None)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // -- first-admin bootstrap
    let (status, outcome) = send(&app, post("/access/bootstrap", Some(&maria_token), None)).await?;
    assert_eq!(status, StatusCode::CREATED, "bootstrap failed: {}", outcome);
    assert_eq!(outcome["outcome"], "granted");

    // the grant invalidated the cache: the next resolve sees the new role
    let (_, caps) = send(&app, get("/access/capabilities", Some(&maria_token))).await?;
    assert_eq!(caps["is_admin"], true);
    assert_eq!(caps["roles"], json!(["office_staff"]));

    let (_, decision) = send(
        &app,
        get("/access/decision?route_class=admin-only", Some(&maria_token)),
    )
    .await?;
    assert_eq!(decision["decision"], "allow");

    // admins get bounced out of applicant-only areas
    let (_, decision) = send(
        &app,
        get("/access/decision?route_class=authenticated-only", Some(&maria_token)),
    )
    .await?;
    assert_eq!(decision["decision"], "deny_redirect");
    assert_eq!(decision["redirect_to"], "/admin");

    // -- second applicant
    let (ben_token, ben_id) = register(&app, "Ben Reyes", "ben@example.com").await?;

    // a non-admin cannot manage roles
    let (status, _) = send(
        &app,
        post(
            &format!("/access/users/{}/roles", maria_id),
            Some(&ben_token),
            Some(json!({ "role": "business_owner" })),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // a second bootstrap is rejected outright
    let (status, _) = send(&app, post("/access/bootstrap", Some(&ben_token), None)).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // -- admin grants business_owner to ben; the repeat is a reported no-op
    let grant_uri = format!("/access/users/{}/roles", ben_id);
    let (status, outcome) = send(
        &app,
        post(&grant_uri, Some(&maria_token), Some(json!({ "role": "business_owner" }))),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(outcome["outcome"], "granted");

    let (status, outcome) = send(
        &app,
        post(&grant_uri, Some(&maria_token), Some(json!({ "role": "business_owner" }))),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "already_granted");

    // a tag outside the closed set never reaches the store
    let (status, _) = send(
        &app,
        post(&grant_uri, Some(&maria_token), Some(json!({ "role": "super_admin" }))),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // -- assignment listing and the subject's own view
    let (status, assignments) = send(&app, get(&grant_uri, Some(&maria_token))).await?;
    assert_eq!(status, StatusCode::OK);
    let assignments = assignments.as_array().context("expected an array")?.clone();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0]["role"], "business_owner");

    let (_, caps) = send(&app, get("/access/capabilities", Some(&ben_token))).await?;
    assert_eq!(caps["is_business_owner"], true);
    assert_eq!(caps["is_admin"], false);

    // -- revoke, then the idempotent repeat
    let revoke_uri = format!("/access/users/{}/roles/business_owner", ben_id);
    let (status, outcome) = send(&app, delete(&revoke_uri, &maria_token)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "revoked");

    let (status, outcome) = send(&app, delete(&revoke_uri, &maria_token)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "not_granted");

    // revocation invalidated ben's cached capabilities
    let (_, caps) = send(&app, get("/access/capabilities", Some(&ben_token))).await?;
    assert_eq!(caps["is_business_owner"], false);

    Ok(())
}

#[tokio::test]
async fn explicit_refresh_re_resolves() -> Result<()> {
    let (_dir, pool, app) = setup().await?;

    let (token, user_id) = register(&app, "Maria Santos", "maria@example.com").await?;

    // prime the cache
    let (_, caps) = send(&app, get("/access/capabilities", Some(&token))).await?;
    assert_eq!(caps["is_admin"], false);

    // grant behind the gate's back, straight into the table
    sqlx::query("INSERT INTO role_assignments (identity_id, role, assigned_at) VALUES (?, ?, ?)")
        .bind(&user_id)
        .bind("office_staff")
        .bind(chrono::Utc::now())
        .execute(&pool)
        .await?;

    // the plain read still serves the cached view
    let (_, caps) = send(&app, get("/access/capabilities", Some(&token))).await?;
    assert_eq!(caps["is_admin"], false);

    // the explicit refresh drops the entry and re-fetches
    let (status, caps) = send(&app, post("/access/capabilities/refresh", Some(&token), None)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(caps["is_admin"], true);

    Ok(())
}

#[tokio::test]
async fn role_mutations_land_in_the_activity_log() -> Result<()> {
    let (_dir, pool, app) = setup().await?;

    let (token, _maria_id) = register(&app, "Maria Santos", "maria@example.com").await?;
    let (status, _) = send(&app, post("/access/bootstrap", Some(&token), None)).await?;
    assert_eq!(status, StatusCode::CREATED);

    let (_, ben_id) = register(&app, "Ben Reyes", "ben@example.com").await?;
    let (status, _) = send(
        &app,
        post(
            &format!("/access/users/{}/roles", ben_id),
            Some(&token),
            Some(json!({ "role": "business_owner" })),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    // the listener drains the bus asynchronously
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM activity_log WHERE event_name IN ('role_assignment.granted', 'role_assignment.bootstrapped')",
    )
    .fetch_one(&pool)
    .await?;
    assert!(count >= 2, "expected grant events in the activity log, found {}", count);

    let severity: String = sqlx::query_scalar(
        "SELECT severity FROM activity_log WHERE event_name = 'role_assignment.granted' LIMIT 1",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(severity, "critical");

    Ok(())
}
