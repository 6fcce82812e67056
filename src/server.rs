//!
//! gatehouse HTTP server
//! ---------------------
//! This module defines the Axum-based HTTP API for gatehouse.
//!
//! Responsibilities:
//! - Login endpoint exchanging JSON credentials for a bearer session token.
//! - User-directory query endpoint gated on the token's Read right.
//! - Logout endpoint revoking the presented token.
//! - Cross-origin pre-flight (OPTIONS) answered with 200 on every path.
//! - First-run seeding of a default admin credential and demo users,
//!   plus startup configuration logs.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, info};

use crate::error::AppError;
use crate::identity::{AccessRight, Account, Authorizer, Credential};
use crate::storage::{
    CredentialDb, CredentialStore, TokenDb, TokenStore, User, UserDb, UserStore,
};

/// Shared server state injected into all handlers.
///
/// Holds the authorizer (which owns the credential and token store handles)
/// and the user-directory store consumed by the query flow.
#[derive(Clone)]
pub struct AppState {
    pub authorizer: Arc<Authorizer>,
    pub users: Arc<dyn UserStore>,
}

impl AppState {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        tokens: Arc<dyn TokenStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self { authorizer: Arc::new(Authorizer::new(credentials, tokens)), users }
    }
}

fn log_startup_folders(db_root: &str) {
    let cwd = std::env::current_dir().ok();
    let exe = std::env::current_exe().ok();
    let db_env = std::env::var("GATEHOUSE_DB_FOLDER").ok();
    info!(
        target: "startup",
        "gatehouse starting. Folder configuration: cwd={:?}, exe={:?}, db_root_param={:?}, GATEHOUSE_DB_FOLDER_env={:?}",
        cwd, exe, db_root, db_env
    );
}

/// Start the gatehouse HTTP server bound to the given port.
///
/// This opens the stores under `db_root`, seeds a default admin credential on
/// first run, seeds demo directory records when the directory is empty, and
/// mounts all HTTP routes.
pub async fn run_with_ports(http_port: u16, db_root: &str) -> anyhow::Result<()> {
    log_startup_folders(db_root);

    std::fs::create_dir_all(db_root)
        .with_context(|| format!("Failed to create or access database root: {}", db_root))?;

    let first_run = !std::path::Path::new(db_root).join("credentials.json").exists();
    let credentials: Arc<dyn CredentialStore> = Arc::new(
        CredentialDb::open(db_root)
            .with_context(|| format!("While opening credential store under: {}", db_root))?,
    );
    if first_run {
        ensure_default_admin(&*credentials)?;
    }

    let tokens: Arc<dyn TokenStore> = Arc::new(
        TokenDb::open(db_root)
            .with_context(|| format!("While opening token store under: {}", db_root))?,
    );
    let users: Arc<dyn UserStore> = Arc::new(
        UserDb::open(db_root)
            .with_context(|| format!("While opening user store under: {}", db_root))?,
    );

    // On first startup with an empty directory, create a few demo records so
    // the query endpoint has something to return.
    if users.count()? == 0 {
        if let Err(e) = create_demo_users(&*users) {
            tracing::warn!("Failed to create demo users: {}", e);
        }
    }

    let app_state = AppState::new(credentials, tokens, users);

    let app = Router::new()
        .route("/", get(|| async { "gatehouse ok" }).options(preflight))
        .route("/login", post(login).options(preflight))
        .route("/users", get(get_users).options(preflight))
        .route("/logout", post(logout).options(preflight))
        .fallback(unmatched)
        .with_state(app_state);

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// Backward-compatible entry that uses defaults
/// Convenience entry point using the default port (8080) and db root "data".
pub async fn run() -> anyhow::Result<()> {
    run_with_ports(8080, "data").await
}

/// Seed the default admin credential carrying every access right.
fn ensure_default_admin(credentials: &dyn CredentialStore) -> anyhow::Result<()> {
    let admin = Credential {
        username: "admin".to_string(),
        password: "admin".to_string(),
        access_rights: vec![
            AccessRight::Create.code(),
            AccessRight::Read.code(),
            AccessRight::Update.code(),
            AccessRight::Delete.code(),
        ],
    };
    credentials.insert(&admin)?;
    info!(target: "startup", "Seeded default admin credential");
    Ok(())
}

/// Populate the user directory with a handful of demo records on first run.
fn create_demo_users(users: &dyn UserStore) -> anyhow::Result<()> {
    let demo = [
        User { id: "u-1".into(), name: "Ana Ramirez".into(), age: 22, email: "ana@example.com".into(), working_position: 2 },
        User { id: "u-2".into(), name: "Bob Fields".into(), age: 31, email: "bob@example.com".into(), working_position: 0 },
        User { id: "u-3".into(), name: "Carol Anand".into(), age: 45, email: "carol@example.com".into(), working_position: 3 },
    ];
    for user in &demo {
        users.put(user)?;
    }
    info!(target: "startup", "Seeded {} demo users", demo.len());
    Ok(())
}

/// Cross-origin pre-flight: respond OK with no body and no auth check.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Fallback for unrouted requests. OPTIONS still gets the pre-flight OK;
/// everything else is left to the transport default.
pub async fn unmatched(method: Method, uri: Uri) -> StatusCode {
    if method == Method::OPTIONS {
        return StatusCode::OK;
    }
    info!(target: "gatehouse::server", "unrouted request: {} {}", method, uri);
    StatusCode::NOT_FOUND
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Map a protocol denial to its fixed status and body text.
fn deny(err: AppError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.message().to_string()).into_response()
}

/// Map a store/parse failure to the fixed 500 response shape.
fn internal_error(err: anyhow::Error) -> Response {
    let app = AppError::from(err);
    error!("request failed: {}", app);
    let status =
        StatusCode::from_u16(app.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, format!("Internal error: {}", app.message())).into_response()
}

/// Login flow: parse the body as JSON credentials and exchange them for a
/// session token. Bad credentials are a 404 with a fixed text, body/parse and
/// store failures are a 500 with the underlying message.
pub async fn login(State(state): State<AppState>, body: Bytes) -> Response {
    let account: Account = match serde_json::from_slice(&body) {
        Ok(a) => a,
        Err(e) => return internal_error(anyhow::Error::new(e)),
    };
    match state.authorizer.issue_token(&account) {
        Ok(Some(token)) => (StatusCode::CREATED, Json(token)).into_response(),
        Ok(None) => deny(AppError::not_found("bad_credentials", "wrong username or password")),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    #[serde(default)]
    pub name: Option<String>,
}

/// Query flow: require a non-empty `name` parameter, then gate the directory
/// lookup on the Read right of the presented bearer token.
pub async fn get_users(
    State(state): State<AppState>,
    Query(params): Query<UsersQuery>,
    headers: HeaderMap,
) -> Response {
    let name = params.name.unwrap_or_default();
    if name.is_empty() {
        return deny(AppError::user("missing_name", "Missing name parameter in the request!"));
    }
    let token = bearer_token(&headers);
    match state.authorizer.authorized(token.as_deref(), AccessRight::Read) {
        Ok(true) => {}
        Ok(false) => return deny(AppError::auth("unauthorized", "Unauthorized operation!")),
        Err(e) => return internal_error(e),
    }
    match state.users.find_by_name(&name) {
        Ok(found) => (StatusCode::OK, Json(found)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// Logout flow: revoke the presented token. An absent or unknown token is
/// rejected without any directory access.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers).filter(|t| !t.is_empty()) else {
        return deny(AppError::auth("unauthorized", "Unauthorized operation!"));
    };
    match state.authorizer.revoke_token(&token) {
        Ok(true) => (StatusCode::OK, Json(serde_json::json!({"status":"ok"}))).into_response(),
        Ok(false) => deny(AppError::auth("unauthorized", "Unauthorized operation!")),
        Err(e) => internal_error(e),
    }
}
