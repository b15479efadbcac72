// Daemon runtime configuration.
//
// Resolved exactly once at process start from environment variables and
// passed explicitly to every component afterwards.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Settings document file name, directly under the data directory.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Immutable daemon configuration.
///
/// Constructed via [`DaemonConfig::from_env`] which reads environment
/// variables and falls back to container-friendly defaults.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Root of all persisted documents.
    pub data_dir: PathBuf,
    /// Subdirectory of `data_dir` holding environment documents.
    pub environments_dir: String,
    /// Path prefix of the storage API (`/api`), without trailing slash.
    pub api_prefix: String,
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Maximum accepted request body size.
    pub body_limit_bytes: usize,
    /// Mock-serving engine executable.
    pub engine_bin: String,
    /// Arguments appended verbatim to the engine command line.
    pub engine_args: Vec<String>,
    /// Environment files to bootstrap, in order.
    pub data_files: Vec<String>,
    /// Port assigned to the first synthesized environment.
    pub base_port: u16,
    /// Positional overrides for synthesized environment names.
    pub environment_names: Vec<String>,
    /// Whether the engine should watch data files for changes.
    pub watch: bool,
    /// Engine file polling interval.
    pub poll_interval: Duration,
    /// Static client assets served for unmatched routes.
    pub static_dir: Option<PathBuf>,
    /// Log filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl DaemonConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `MOCKSMITH_DATA_DIR` | `./data` |
    /// | `MOCKSMITH_ENVIRONMENTS_DIR` | `environments` |
    /// | `MOCKSMITH_API_PREFIX` | `/api` |
    /// | `MOCKSMITH_HOST` | `0.0.0.0` |
    /// | `MOCKSMITH_PORT` | `8080` |
    /// | `MOCKSMITH_BODY_LIMIT_BYTES` | `10485760` |
    /// | `MOCKSMITH_ENGINE_BIN` | `mocksmith-engine` |
    /// | `MOCKSMITH_ENGINE_ARGS` | *(none, whitespace-separated)* |
    /// | `MOCKSMITH_DATA_FILES` | `environment.json` (comma-separated) |
    /// | `MOCKSMITH_BASE_PORT` | `3000` |
    /// | `MOCKSMITH_ENVIRONMENT_NAMES` | *(none, comma-separated)* |
    /// | `MOCKSMITH_WATCH` | `true` |
    /// | `MOCKSMITH_POLL_INTERVAL_MS` | `2000` |
    /// | `MOCKSMITH_STATIC_DIR` | *(none)* |
    /// | `MOCKSMITH_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    pub fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let data_dir = env("MOCKSMITH_DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| "./data".into());
        let environments_dir =
            env("MOCKSMITH_ENVIRONMENTS_DIR").unwrap_or_else(|_| "environments".into());
        let api_prefix = normalize_prefix(&env("MOCKSMITH_API_PREFIX").unwrap_or_else(|_| "/api".into()));

        let host = env("MOCKSMITH_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = parse_or(env("MOCKSMITH_PORT").ok(), 8080u16);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let body_limit_bytes = parse_or(env("MOCKSMITH_BODY_LIMIT_BYTES").ok(), 10 * 1024 * 1024);
        let engine_bin = env("MOCKSMITH_ENGINE_BIN").unwrap_or_else(|_| "mocksmith-engine".into());
        let engine_args = env("MOCKSMITH_ENGINE_ARGS")
            .map(|raw| raw.split_whitespace().map(ToOwned::to_owned).collect())
            .unwrap_or_default();

        let data_files = match env("MOCKSMITH_DATA_FILES") {
            Ok(raw) => split_list(&raw).into_iter().filter(|file| !file.is_empty()).collect(),
            Err(_) => vec!["environment.json".to_string()],
        };
        let base_port = parse_or(env("MOCKSMITH_BASE_PORT").ok(), 3000u16);
        let environment_names =
            env("MOCKSMITH_ENVIRONMENT_NAMES").map(|raw| split_list(&raw)).unwrap_or_default();

        let watch = env("MOCKSMITH_WATCH").map(|raw| parse_flag(&raw)).unwrap_or(true);
        let poll_interval =
            Duration::from_millis(parse_or(env("MOCKSMITH_POLL_INTERVAL_MS").ok(), 2000u64));

        let static_dir = env("MOCKSMITH_STATIC_DIR")
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        let log_filter = env("MOCKSMITH_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self {
            data_dir,
            environments_dir,
            api_prefix,
            listen_addr,
            body_limit_bytes,
            engine_bin,
            engine_args,
            data_files,
            base_port,
            environment_names,
            watch,
            poll_interval,
            static_dir,
            log_filter,
        }
    }

    /// Append command-line passthrough arguments for the engine.
    ///
    /// Only meant for `main`, before the value is shared.
    pub fn with_extra_engine_args(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.engine_args.extend(extra);
        self
    }

    /// Directory holding environment documents.
    pub fn environments_path(&self) -> PathBuf {
        self.data_dir.join(&self.environments_dir)
    }

    /// Path of the singleton settings document.
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE_NAME)
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|value| value.trim().parse().ok()).unwrap_or(default)
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|item| item.trim().to_string()).collect()
}

fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
