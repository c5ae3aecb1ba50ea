//! Tutor Configuration
//!
//! Settings are resolved in layers: built-in defaults, then an optional TOML
//! file, then environment variables. Binaries apply their CLI flags last.
//!
//! # File Format
//!
//! ```toml
//! listen_addr = "127.0.0.1:8000"
//! ollama_host = "127.0.0.1"
//! ollama_port = 11435
//! default_model = "llama3"
//! max_context_messages = 20
//! request_timeout_secs = 120
//! frame_channel_capacity = 64
//! greet_on_create = false
//!
//! [limits]
//! max_message_size = 4096
//! max_situation_size = 1024
//! ```
//!
//! # Environment Variables
//!
//! - `ROLEPLAY_LISTEN`: HTTP listen address
//! - `OLLAMA_HOST`: Ollama host, either `host` or `host:port`
//! - `OLLAMA_PORT`: Ollama port
//! - `ROLEPLAY_MODEL`: default model
//! - `ROLEPLAY_MAX_CONTEXT`: history messages included in prompts
//! - `ROLEPLAY_TIMEOUT`: adapter request timeout in seconds
//! - `ROLEPLAY_GREET`: "1" or "true" to precompute a greeting on session creation

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::security::TutorLimits;
use crate::session::DEFAULT_MODEL;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Resolved tutor configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorConfig {
    /// HTTP listen address for the daemon
    pub listen_addr: String,
    /// Ollama host
    pub ollama_host: String,
    /// Ollama port
    pub ollama_port: u16,
    /// Model used when a request does not name one
    pub default_model: String,
    /// Maximum history messages rendered into a prompt
    pub max_context_messages: usize,
    /// Adapter request timeout in seconds
    pub request_timeout_secs: u64,
    /// Buffered frames per in-flight turn
    pub frame_channel_capacity: usize,
    /// Precompute an opening turn when a session is created
    pub greet_on_create: bool,
    /// Input limits
    pub limits: TutorLimits,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
            ollama_host: "127.0.0.1".to_string(),
            ollama_port: 11435,
            default_model: DEFAULT_MODEL.to_string(),
            max_context_messages: 20,
            request_timeout_secs: 120,
            frame_channel_capacity: 64,
            greet_on_create: false,
            limits: TutorLimits::default(),
        }
    }
}

impl TutorConfig {
    /// Create configuration from defaults and environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration: defaults, then `path` (or the default path when it
    /// exists), then environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => load_config_from_path(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => load_config_from_path(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from an environment lookup
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("ROLEPLAY_LISTEN") {
            self.listen_addr = addr;
        }

        if let Some(host) = lookup("OLLAMA_HOST") {
            // OLLAMA_HOST is commonly given as host:port
            match host.rsplit_once(':').map(|(h, p)| (h, p.parse::<u16>())) {
                Some((h, Ok(port))) => {
                    self.ollama_host = h.to_string();
                    self.ollama_port = port;
                }
                _ => self.ollama_host = host,
            }
        }

        parse_into(&lookup, "OLLAMA_PORT", &mut self.ollama_port);

        if let Some(model) = lookup("ROLEPLAY_MODEL").filter(|m| !m.trim().is_empty()) {
            self.default_model = model;
        }

        parse_into(&lookup, "ROLEPLAY_MAX_CONTEXT", &mut self.max_context_messages);
        parse_into(&lookup, "ROLEPLAY_TIMEOUT", &mut self.request_timeout_secs);

        if let Some(greet) = lookup("ROLEPLAY_GREET") {
            self.greet_on_create = greet == "1" || greet.eq_ignore_ascii_case("true");
        }
    }

    /// Reject values the tutor cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_model.trim().is_empty() {
            return Err(ConfigError::Invalid("default_model must not be empty".to_string()));
        }
        if self.frame_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "frame_channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable environment value"),
        }
    }
}

/// Default config file location: `$XDG_CONFIG_HOME/roleplay/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("roleplay").join("config.toml"))
}

/// Load configuration from a TOML file over the defaults
pub fn load_config_from_path(path: &Path) -> Result<TutorConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: TutorConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = ?path, "Loaded configuration file");
    Ok(config)
}
