//! Application-level configuration loading: coordination backend and match timings.

use std::{env, fs, io::ErrorKind, path::PathBuf, str::FromStr, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::MatchSettings;

/// Default location on disk where the binary looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/connect4.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CONNECT4_CONFIG_PATH";
const ENDPOINT_ENV: &str = "CONNECT4_ENDPOINT";
const NAMESPACE_ENV: &str = "CONNECT4_NAMESPACE";
const BACKEND_ENV: &str = "CONNECT4_BACKEND";

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:2379";
const DEFAULT_NAMESPACE: &str = "/connect4";
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(15);

/// Coordination service implementation to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// etcd reached through its v3 JSON gateway.
    Etcd,
    /// In-process service; only useful for a single-process demo.
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "etcd" => Ok(Backend::Etcd),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("unknown backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Coordination service implementation.
    pub backend: Backend,
    /// Base URL of the etcd gateway.
    pub endpoint: String,
    /// Root path of the match entries.
    pub namespace: String,
    /// Lease TTL; presence markers vanish this long after a crash.
    pub session_timeout: Duration,
    /// Protocol timings.
    pub settings: MatchSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Etcd,
            endpoint: DEFAULT_ENDPOINT.into(),
            namespace: DEFAULT_NAMESPACE.into(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            settings: MatchSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, then apply environment overrides.
    ///
    /// A missing or unreadable file falls back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        backend = ?app_config.backend,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };
        config.with_overrides(|key| env::var(key).ok())
    }

    /// Apply `CONNECT4_*` overrides read through `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(endpoint) = lookup(ENDPOINT_ENV) {
            self.endpoint = endpoint;
        }
        if let Some(namespace) = lookup(NAMESPACE_ENV) {
            self.namespace = namespace;
        }
        if let Some(backend) = lookup(BACKEND_ENV) {
            match backend.parse() {
                Ok(backend) => self.backend = backend,
                Err(err) => warn!(error = %err, "ignoring {BACKEND_ENV}"),
            }
        }
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    backend: Option<String>,
    endpoint: Option<String>,
    namespace: Option<String>,
    session_timeout_secs: Option<u64>,
    turn_timeout_secs: Option<u64>,
    disconnect_grace_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let backend = match value.backend.as_deref().map(str::parse::<Backend>) {
            Some(Ok(backend)) => backend,
            Some(Err(err)) => {
                warn!(error = %err, "unknown backend in config; using etcd");
                defaults.backend
            }
            None => defaults.backend,
        };
        let secs = |value: Option<u64>, fallback: Duration| {
            value
                .filter(|secs| *secs > 0)
                .map_or(fallback, Duration::from_secs)
        };

        Self {
            backend,
            endpoint: value.endpoint.unwrap_or(defaults.endpoint),
            namespace: value.namespace.unwrap_or(defaults.namespace),
            session_timeout: secs(value.session_timeout_secs, defaults.session_timeout),
            settings: MatchSettings {
                turn_timeout: secs(value.turn_timeout_secs, defaults.settings.turn_timeout),
                disconnect_grace: secs(
                    value.disconnect_grace_secs,
                    defaults.settings.disconnect_grace,
                ),
                poll_interval: value
                    .poll_interval_ms
                    .filter(|ms| *ms > 0)
                    .map_or(defaults.settings.poll_interval, Duration::from_millis),
            },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
