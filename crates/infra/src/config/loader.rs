//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. If `CRMSYNC_DB_PATH` is set, build the configuration from defaults plus
//!    `CRMSYNC_*` overrides
//! 2. Otherwise probe for a config file (JSON or TOML)
//! 3. With no file either, run on defaults
//!
//! HubSpot secrets (`CRMSYNC_HUBSPOT_ACCESS_TOKEN`,
//! `CRMSYNC_HUBSPOT_WEBHOOK_SECRET`) are always read from the environment
//! when present, so they never have to live in a config file.
//!
//! ## Environment Variables
//! - `CRMSYNC_DB_PATH`, `CRMSYNC_DB_POOL_SIZE`
//! - `CRMSYNC_HUBSPOT_BASE_URL`, `CRMSYNC_HUBSPOT_TIMEOUT_SECONDS`,
//!   `CRMSYNC_HUBSPOT_BATCH_SIZE`, `CRMSYNC_HUBSPOT_MAX_RATE_LIMIT_RETRIES`
//! - `CRMSYNC_RATE_LIMIT_MAX_REQUESTS`, `CRMSYNC_RATE_LIMIT_INTERVAL_MS`,
//!   `CRMSYNC_RATE_LIMIT_DAILY`, `CRMSYNC_RATE_LIMIT_QUEUE` (bool)
//! - `CRMSYNC_BREAKER_FAILURE_THRESHOLD`, `CRMSYNC_BREAKER_RESET_TIMEOUT_MS`
//! - `CRMSYNC_QUEUE_MAX_CONCURRENCY`, `CRMSYNC_QUEUE_POLL_DELAY_MS`,
//!   `CRMSYNC_QUEUE_MAX_RETRIES`, `CRMSYNC_QUEUE_RETENTION_DAYS`
//! - `CRMSYNC_BIND_ADDR`
//! - `CRMSYNC_LOG_FILTER`, `CRMSYNC_LOG_JSON` (bool)
//!
//! ## File Locations
//! `config.{json,toml}` and `crmsync.{json,toml}` in the working directory,
//! its parent, then next to the executable.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crmsync_domain::{Config, CrmSyncError, Result};

const ENV_DB_PATH: &str = "CRMSYNC_DB_PATH";
const ENV_ACCESS_TOKEN: &str = "CRMSYNC_HUBSPOT_ACCESS_TOKEN";
const ENV_WEBHOOK_SECRET: &str = "CRMSYNC_HUBSPOT_WEBHOOK_SECRET";

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `CrmSyncError::Config` if an environment value or the config
/// file is invalid.
pub fn load() -> Result<Config> {
    if std::env::var_os(ENV_DB_PATH).is_some() {
        let config = load_from_env()?;
        tracing::info!("Configuration loaded from environment variables");
        return Ok(config);
    }

    let mut config = match probe_config_paths() {
        Some(path) => load_from_file(Some(path))?,
        None => {
            tracing::warn!("No configuration found, using defaults");
            Config::default()
        }
    };
    apply_secrets(&mut config);
    Ok(config)
}

/// Load configuration from environment variables
///
/// `CRMSYNC_DB_PATH` is required; every other variable overrides the
/// corresponding default when set.
///
/// # Errors
/// Returns `CrmSyncError::Config` if `CRMSYNC_DB_PATH` is missing or a value
/// cannot be parsed.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();

    config.database.path = env_var(ENV_DB_PATH)?;
    config.database.pool_size = env_parse("CRMSYNC_DB_POOL_SIZE", config.database.pool_size)?;

    let hubspot = &mut config.hubspot;
    if let Some(base_url) = env_opt("CRMSYNC_HUBSPOT_BASE_URL") {
        hubspot.base_url = base_url;
    }
    hubspot.timeout_seconds = env_parse("CRMSYNC_HUBSPOT_TIMEOUT_SECONDS", hubspot.timeout_seconds)?;
    hubspot.batch_size = env_parse("CRMSYNC_HUBSPOT_BATCH_SIZE", hubspot.batch_size)?;
    hubspot.max_rate_limit_retries =
        env_parse("CRMSYNC_HUBSPOT_MAX_RATE_LIMIT_RETRIES", hubspot.max_rate_limit_retries)?;

    let rate_limit = &mut config.rate_limit;
    rate_limit.max_requests = env_parse("CRMSYNC_RATE_LIMIT_MAX_REQUESTS", rate_limit.max_requests)?;
    rate_limit.interval_ms = env_parse("CRMSYNC_RATE_LIMIT_INTERVAL_MS", rate_limit.interval_ms)?;
    rate_limit.daily_limit = env_parse("CRMSYNC_RATE_LIMIT_DAILY", rate_limit.daily_limit)?;
    rate_limit.enable_queue = env_bool("CRMSYNC_RATE_LIMIT_QUEUE", rate_limit.enable_queue);

    let breaker = &mut config.circuit_breaker;
    breaker.failure_threshold =
        env_parse("CRMSYNC_BREAKER_FAILURE_THRESHOLD", breaker.failure_threshold)?;
    breaker.reset_timeout_ms =
        env_parse("CRMSYNC_BREAKER_RESET_TIMEOUT_MS", breaker.reset_timeout_ms)?;

    let queue = &mut config.queue;
    queue.max_concurrency = env_parse("CRMSYNC_QUEUE_MAX_CONCURRENCY", queue.max_concurrency)?;
    queue.poll_delay_ms = env_parse("CRMSYNC_QUEUE_POLL_DELAY_MS", queue.poll_delay_ms)?;
    queue.default_max_retries = env_parse("CRMSYNC_QUEUE_MAX_RETRIES", queue.default_max_retries)?;
    queue.retention_days = env_parse("CRMSYNC_QUEUE_RETENTION_DAYS", queue.retention_days)?;

    if let Some(bind_addr) = env_opt("CRMSYNC_BIND_ADDR") {
        config.server.bind_addr = bind_addr;
    }
    if let Some(filter) = env_opt("CRMSYNC_LOG_FILTER") {
        config.logging.filter = filter;
    }
    config.logging.json = env_bool("CRMSYNC_LOG_JSON", config.logging.json);

    apply_secrets(&mut config);
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. Format is detected by
/// extension.
///
/// # Errors
/// Returns `CrmSyncError::Config` if the file is missing or malformed.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CrmSyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            CrmSyncError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CrmSyncError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CrmSyncError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CrmSyncError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(CrmSyncError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file among the standard locations.
pub fn probe_config_paths() -> Option<PathBuf> {
    const NAMES: [&str; 4] = ["config.toml", "config.json", "crmsync.toml", "crmsync.json"];
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.join(".."));
        dirs.insert(0, cwd);
    }
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }

    dirs.iter().flat_map(|dir| NAMES.iter().map(move |name| dir.join(name))).find(|p| p.exists())
}

fn apply_secrets(config: &mut Config) {
    if let Some(token) = env_opt(ENV_ACCESS_TOKEN) {
        config.hubspot.access_token = Some(token);
    }
    if let Some(secret) = env_opt(ENV_WEBHOOK_SECRET) {
        config.hubspot.webhook_secret = Some(secret);
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| CrmSyncError::Config(format!("Missing required environment variable: {key}")))
}

/// Set, non-empty variable
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CrmSyncError::Config(format!("Invalid value for {key}: {e}"))),
        None => Ok(default),
    }
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tempfile::TempDir;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: [&str; 8] = [
        ENV_DB_PATH,
        "CRMSYNC_DB_POOL_SIZE",
        "CRMSYNC_QUEUE_MAX_CONCURRENCY",
        "CRMSYNC_RATE_LIMIT_QUEUE",
        "CRMSYNC_BIND_ADDR",
        "CRMSYNC_LOG_JSON",
        ENV_ACCESS_TOKEN,
        ENV_WEBHOOK_SECRET,
    ];

    fn clear_env() {
        for key in ALL_VARS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn env_bool_parsing() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());

        for (raw, expected) in [("1", true), ("TRUE", true), ("on", true), ("no", false), ("0", false)] {
            std::env::set_var("CRMSYNC_TEST_BOOL", raw);
            assert_eq!(env_bool("CRMSYNC_TEST_BOOL", !expected), expected, "value {raw}");
        }
        std::env::remove_var("CRMSYNC_TEST_BOOL");
        assert!(env_bool("CRMSYNC_TEST_BOOL", true));
    }

    #[test]
    fn load_from_env_overrides_defaults() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();

        std::env::set_var(ENV_DB_PATH, "/tmp/crmsync-test.db");
        std::env::set_var("CRMSYNC_DB_POOL_SIZE", "3");
        std::env::set_var("CRMSYNC_QUEUE_MAX_CONCURRENCY", "4");
        std::env::set_var("CRMSYNC_RATE_LIMIT_QUEUE", "yes");
        std::env::set_var("CRMSYNC_BIND_ADDR", "0.0.0.0:9000");
        std::env::set_var(ENV_ACCESS_TOKEN, "pat-na1-test");

        let config = load_from_env().unwrap();
        clear_env();

        assert_eq!(config.database.path, "/tmp/crmsync-test.db");
        assert_eq!(config.database.pool_size, 3);
        assert_eq!(config.queue.max_concurrency, 4);
        assert!(config.rate_limit.enable_queue);
        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.hubspot.access_token.as_deref(), Some("pat-na1-test"));
        assert_eq!(config.hubspot.webhook_secret, None);
        assert_eq!(config.queue.retention_days, 30);
    }

    #[test]
    fn load_from_env_requires_db_path() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();

        assert!(matches!(load_from_env(), Err(CrmSyncError::Config(_))));
    }

    #[test]
    fn load_from_env_rejects_invalid_number() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();
        std::env::set_var(ENV_DB_PATH, "/tmp/crmsync-test.db");
        std::env::set_var("CRMSYNC_DB_POOL_SIZE", "many");

        let result = load_from_env();
        clear_env();

        match result {
            Err(CrmSyncError::Config(message)) => assert!(message.contains("CRMSYNC_DB_POOL_SIZE")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn loads_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [database]
            path = "queue.db"

            [hubspot]
            batch_size = 50

            [logging]
            json = true
            "#,
        )
        .unwrap();

        let config = load_from_file(Some(path)).unwrap();
        assert_eq!(config.database.path, "queue.db");
        assert_eq!(config.hubspot.batch_size, 50);
        assert!(config.logging.json);
        assert_eq!(config.queue.max_concurrency, 10);
    }

    #[test]
    fn loads_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crmsync.json");
        std::fs::write(&path, r#"{"queue": {"poll_delay_ms": 250}}"#).unwrap();

        let config = load_from_file(Some(path)).unwrap();
        assert_eq!(config.queue.poll_delay_ms, 250);
    }

    #[test]
    fn missing_file_is_config_error() {
        let result = load_from_file(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(matches!(result, Err(CrmSyncError::Config(_))));
    }

    #[test]
    fn rejects_invalid_and_unsupported_formats() {
        let json = parse_config(r#"{ "queue": "#, Path::new("config.json"));
        assert!(matches!(json, Err(CrmSyncError::Config(_))));

        let yaml = parse_config("queue: {}", Path::new("config.yaml"));
        assert!(matches!(yaml, Err(CrmSyncError::Config(message)) if message.contains("yaml")));
    }
}
