use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::access::{
    spawn_invalidation_listener, AccessConfig, AccessGate, JwtSessionResolver, RoleStore,
    SessionNotifier, SessionResolver, SqliteRoleStore,
};
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{auth, capabilities, health, roles};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub roles: Arc<dyn RoleStore>,
    pub gate: Arc<AccessGate>,
    pub sessions: Arc<dyn SessionResolver>,
    pub notifier: Arc<SessionNotifier>,
    pub event_bus: EventBus,
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt = Arc::new(JwtConfig::from_env()?);

    // The gate gets its collaborators injected here; nothing reaches for
    // globals further down.
    let roles: Arc<dyn RoleStore> = Arc::new(SqliteRoleStore::new(pool.clone()));
    let gate = Arc::new(AccessGate::new(roles.clone(), AccessConfig::from_env()));
    let sessions: Arc<dyn SessionResolver> = Arc::new(JwtSessionResolver::new(jwt.clone()));

    let notifier = Arc::new(SessionNotifier::new());
    spawn_invalidation_listener(gate.clone(), notifier.subscribe());

    let (event_bus, event_rx) = init_event_bus();
    tokio::spawn(start_activity_listener(event_rx, pool.clone()));

    let state = AppState {
        pool,
        jwt,
        roles,
        gate,
        sessions,
        notifier,
        event_bus,
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let access_routes = Router::new()
        .route("/capabilities", get(capabilities::get_capabilities))
        .route("/capabilities/refresh", post(capabilities::refresh_capabilities))
        .route("/decision", get(capabilities::decision))
        .route("/bootstrap", post(roles::bootstrap_admin))
        .route("/users/:user_id/roles", get(roles::list_user_roles).post(roles::grant_role))
        .route("/users/:user_id/roles/:role", delete(roles::revoke_role));

    let router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/access", access_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .merge(crate::docs::swagger_routes());

    Ok(router)
}
