//! Proxy Runtime bootstrap (§4.2/§4.3): wires the Config Service and Usage
//! Pipeline together, builds the two public-facing routers plus the admin
//! router, and runs all three `axum::serve` tasks to completion under one
//! graceful-shutdown signal. Grounded in the teacher's `server.rs`
//! bind-three-listeners-under-one-select! shape, trimmed down from its
//! provider-registry/OAuth/quota bookkeeping to this spec's scope.

use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

use crate::adapters::AdapterRegistry;
use crate::config::EnvConfig;
use crate::config_store::ConfigStore;
use crate::crypto::EncryptionKey;
use crate::domain::EndpointKind;
use crate::error::AppError;
use crate::handlers::pipeline::{AppState, EndpointCtx};
use crate::handlers::{admin, chat_completions, completions, health, models};
use crate::usage::UsageRecorder;

const USAGE_QUEUE_CAPACITY: usize = 10_000;

/// Distinguishes the three fatal-startup classes (§6/§7) so `main` can map
/// each to its own process exit code without re-deriving the reason from
/// an opaque `AppError`.
pub enum StartupError {
    Config(AppError),
    Migration(AppError),
    Bind(std::io::Error),
}

impl StartupError {
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::Config(_) => 1,
            StartupError::Migration(_) => 2,
            StartupError::Bind(_) => 3,
        }
    }
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::Config(e) => write!(f, "configuration error: {e}"),
            StartupError::Migration(e) => write!(f, "migration failed: {e}"),
            StartupError::Bind(e) => write!(f, "failed to bind listener: {e}"),
        }
    }
}

pub async fn run(env: EnvConfig) -> Result<(), StartupError> {
    let key = EncryptionKey::load_or_create(&env.encryption_key_path).map_err(StartupError::Config)?;

    let pool = crate::db::connect(&env.database_path)
        .await
        .map_err(StartupError::Config)?;
    crate::db::migrate(&pool).await.map_err(StartupError::Migration)?;

    crate::auth::seed_if_missing(&pool, env.initial_password.as_deref())
        .await
        .map_err(StartupError::Config)?;

    let config_store = ConfigStore::new(pool.clone(), key);
    let report = config_store.reload().await.map_err(StartupError::Config)?;
    tracing::info!(loaded = report.loaded, failed = report.failed.len(), "initial config load");

    let usage = UsageRecorder::new(USAGE_QUEUE_CAPACITY);
    usage.clone().spawn_writer(pool.clone());

    let http_client = reqwest::Client::builder()
        .build()
        .map_err(|e| StartupError::Config(AppError::Upstream(e)))?;

    let app_state = AppState {
        config_store,
        adapters: Arc::new(AdapterRegistry::new()),
        usage,
        http_client,
        semaphore: Arc::new(Semaphore::new(env.max_in_flight_upstream)),
        env: Arc::new(env.clone()),
        db_pool: pool,
        in_flight: Arc::new(AtomicU64::new(0)),
    };

    let general = bind(env.proxy_port_general).await?;
    let special = bind(env.proxy_port_special).await?;
    let admin_listener = bind(env.web_ui_port).await?;

    let general_router = build_router(EndpointKind::General, app_state.clone());
    let special_router = build_router(EndpointKind::Special, app_state.clone());
    let admin = admin_router(app_state);

    tracing::info!(
        general = env.proxy_port_general,
        special = env.proxy_port_special,
        admin = env.web_ui_port,
        "llm-bridge listening"
    );

    let general_serve = axum::serve(general, general_router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal());
    let special_serve = axum::serve(special, special_router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal());
    let admin_serve = axum::serve(admin_listener, admin.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    let (g, s, a) = tokio::join!(general_serve, special_serve, admin_serve);
    g.map_err(|e| StartupError::Bind(e))?;
    s.map_err(|e| StartupError::Bind(e))?;
    a.map_err(|e| StartupError::Bind(e))?;

    Ok(())
}

async fn bind(port: u16) -> Result<TcpListener, StartupError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr).await.map_err(StartupError::Bind)
}

/// Builds one of the two public proxy routers. Identical route table on
/// both ports — only the `EndpointKind` baked into the shared state differs,
/// which is what gates `/v1/models` and endpoint-visibility checks.
pub fn build_router(kind: EndpointKind, state: AppState) -> Router {
    let ctx = EndpointCtx { app: state, kind };

    Router::new()
        .route("/v1/models", get(models::list_models))
        .route("/v1/chat/completions", post(chat_completions::chat_completions))
        .route("/v1/completions", post(completions::completions))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// The admin-only router: config reload and the dashboard aggregations.
/// Never mounted on the general/special proxy ports.
fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/reload", post(admin::reload))
        .route("/admin/dashboard/clients", get(admin::client_leaderboard))
        .route("/admin/dashboard/models", get(admin::model_leaderboard))
        .route("/admin/dashboard/timeseries", get(admin::time_series))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionKey;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let key = EncryptionKey::load_or_create(&dir.path().join(".key")).unwrap();
        AppState {
            config_store: ConfigStore::new(pool.clone(), key),
            adapters: Arc::new(AdapterRegistry::new()),
            usage: UsageRecorder::new(16),
            http_client: reqwest::Client::new(),
            semaphore: Arc::new(Semaphore::new(4)),
            env: Arc::new(test_env()),
            db_pool: pool,
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    fn test_env() -> EnvConfig {
        EnvConfig {
            log_level: "info".to_string(),
            data_dir: ".".into(),
            database_path: ":memory:".into(),
            encryption_key_path: ".key".into(),
            initial_password: None,
            web_ui_port: 0,
            proxy_port_general: 0,
            proxy_port_special: 0,
            max_in_flight_upstream: 4,
            upstream_total_timeout_secs: 5,
            upstream_ttfb_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn health_is_reachable_on_both_proxy_routers() {
        let state = test_state().await;
        for kind in [EndpointKind::General, EndpointKind::Special] {
            let router = build_router(kind, state.clone());
            let response = router
                .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), axum::http::StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn models_list_is_empty_with_no_configs() {
        let state = test_state().await;
        let router = build_router(EndpointKind::General, state);
        let response = router
            .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_router_exposes_reload() {
        let state = test_state().await;
        let router = admin_router(state);
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/reload")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
