//! Environment-driven runtime configuration. Unlike `ConfigStore` (the
//! database-backed catalogue of upstream providers), this is the small set
//! of process-level knobs read once at startup.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub log_level: String,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub encryption_key_path: PathBuf,
    pub initial_password: Option<String>,
    pub web_ui_port: u16,
    pub proxy_port_general: u16,
    pub proxy_port_special: u16,
    pub max_in_flight_upstream: usize,
    pub upstream_total_timeout_secs: u64,
    pub upstream_ttfb_timeout_secs: u64,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let data_dir = env_path("DATA_DIR").unwrap_or_else(|| PathBuf::from("."));

        let database_path =
            env_path("DATABASE_PATH").unwrap_or_else(|| data_dir.join("clads_llm_bridge.db"));

        let encryption_key_path =
            env_path("ENCRYPTION_KEY_PATH").unwrap_or_else(|| data_dir.join(".encryption_key"));

        // PROXY_PORT is a legacy alias for PROXY_PORT_GENERAL.
        let legacy_proxy_port = env_u16("PROXY_PORT");

        Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            data_dir,
            database_path,
            encryption_key_path,
            initial_password: std::env::var("INITIAL_PASSWORD").ok(),
            web_ui_port: env_u16("WEB_UI_PORT").unwrap_or(4322),
            proxy_port_general: env_u16("PROXY_PORT_GENERAL")
                .or(legacy_proxy_port)
                .unwrap_or(4321),
            proxy_port_special: env_u16("PROXY_PORT_SPECIAL").unwrap_or(4333),
            max_in_flight_upstream: std::env::var("MAX_IN_FLIGHT_UPSTREAM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(256),
            upstream_total_timeout_secs: std::env::var("UPSTREAM_TOTAL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
            upstream_ttfb_timeout_secs: std::env::var("UPSTREAM_TTFB_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_u16(key: &str) -> Option<u16> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn legacy_proxy_port_aliases_general() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("PROXY_PORT_GENERAL");
        std::env::set_var("PROXY_PORT", "9999");
        let cfg = EnvConfig::from_env();
        assert_eq!(cfg.proxy_port_general, 9999);
        std::env::remove_var("PROXY_PORT");
    }

    #[test]
    fn defaults_match_spec() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("PROXY_PORT_GENERAL");
        std::env::remove_var("PROXY_PORT_SPECIAL");
        std::env::remove_var("WEB_UI_PORT");
        std::env::remove_var("PROXY_PORT");
        let cfg = EnvConfig::from_env();
        assert_eq!(cfg.proxy_port_general, 4321);
        assert_eq!(cfg.proxy_port_special, 4333);
        assert_eq!(cfg.web_ui_port, 4322);
    }
}
