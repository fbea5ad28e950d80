//! Shared application configuration.
//!
//! Loaded by layering defaults, a YAML config file, and CLI flags (see
//! the server binary's `config` module for the actual layering code);
//! this type is the merged result both the bootstrap composition root
//! and the HTTP layer read from.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parsed form of the `log-level` configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(format!("unrecognized log level: {other}")),
        }
    }
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Credentials for a remote backend, set only via environment variable
/// override (never checked into the YAML config file).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteBackendCredentials {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

/// Application-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen port for the HTTP/event server.
    pub port: u16,

    /// Backend source tags to enable, e.g. `["dummy", "local"]`.
    pub backends: Vec<String>,

    /// Directory the `local` backend walks at startup.
    pub local_music_dir: Option<String>,

    /// Directory the `upload` backend writes submitted files into.
    pub upload_dir: Option<String>,

    /// Parsed `log-level` key.
    pub log_level: LogLevel,

    /// Path (or bare name, resolved via `PATH`) to the media player binary.
    pub media_player_binary: String,
    /// Extra flags passed through to the media player binary.
    pub media_player_extra_flags: Vec<String>,

    /// Plaintext admin password checked by `POST /admin`.
    pub admin_password: Option<String>,

    /// Subscriber ids granted admin privileges at startup, in addition to
    /// any later promoted via `/admin`.
    #[serde(default)]
    pub admin_ids: HashSet<Uuid>,

    /// Credentials for remote backends, keyed by backend source tag.
    /// Populated only from the environment override pass, never the
    /// YAML file.
    #[serde(default)]
    pub remote_backend_credentials: std::collections::HashMap<String, RemoteBackendCredentials>,

    /// External playlist references to load at startup.
    #[serde(default)]
    pub playlists: Vec<String>,

    /// Added to every queued track's weight on every `add` (§4.F).
    #[serde(default)]
    pub time_bonus: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            backends: vec!["dummy".to_string()],
            local_music_dir: None,
            upload_dir: None,
            log_level: LogLevel::Info,
            media_player_binary: "mpv".to_string(),
            media_player_extra_flags: Vec::new(),
            admin_password: None,
            admin_ids: HashSet::new(),
            remote_backend_credentials: std::collections::HashMap::new(),
            playlists: Vec::new(),
            time_bonus: 0.0,
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file, falling back to defaults for
    /// any field the file omits.
    pub fn from_yaml_str(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Applies a narrow environment-variable override pass reserved for
    /// backend credentials (§6's "Environment" clause): every other
    /// configuration key is expected to arrive via the file or CLI flags.
    pub fn apply_env_overrides(&mut self) {
        for backend in &self.backends {
            let key_var = format!("JUKELINE_{}_API_KEY", backend.to_uppercase());
            let secret_var = format!("JUKELINE_{}_API_SECRET", backend.to_uppercase());
            let key = std::env::var(&key_var).ok();
            let secret = std::env::var(&secret_var).ok();
            if key.is_some() || secret.is_some() {
                let creds = self
                    .remote_backend_credentials
                    .entry(backend.clone())
                    .or_default();
                if let Some(key) = key {
                    creds.api_key = Some(key);
                }
                if let Some(secret) = secret {
                    creds.api_secret = Some(secret);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sensible_values() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.backends, vec!["dummy".to_string()]);
        assert_eq!(config.time_bonus, 0.0);
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("bogus".parse::<LogLevel>().is_err());
    }

    #[test]
    fn from_yaml_str_overlays_only_specified_fields() {
        let yaml = "port: 9090\nbackends: [\"local\"]\n";
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.backends, vec!["local".to_string()]);
    }

    #[test]
    fn env_overrides_populate_credentials_for_enabled_backends_only() {
        std::env::set_var("JUKELINE_REMOTE-A_API_KEY", "secret-key");
        let mut config = Config {
            backends: vec!["remote-a".to_string()],
            ..Config::default()
        };
        config.apply_env_overrides();
        assert_eq!(
            config
                .remote_backend_credentials
                .get("remote-a")
                .and_then(|c| c.api_key.as_deref()),
            Some("secret-key")
        );
        std::env::remove_var("JUKELINE_REMOTE-A_API_KEY");
    }
}
