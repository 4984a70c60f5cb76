pub mod adapters;
pub mod auth;
pub mod config;
pub mod config_store;
pub mod crypto;
pub mod dashboard;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod models;
pub mod server;
pub mod streaming;
pub mod usage;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the global tracing subscriber. `RUST_LOG` takes precedence
/// when set; otherwise `log_level` (from `EnvConfig`, i.e. the `LOG_LEVEL`
/// env var) is used as the default filter directive. `LOG_FORMAT=json`
/// switches to structured JSON output for log aggregation; anything else
/// (including unset) keeps the human-readable compact format.
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
