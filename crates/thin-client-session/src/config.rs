//! Session configuration.

use std::{net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thin_client_core::PROTOCOL_VERSION;
use thin_client_transport::TransportKind;

/// Assigner queried when no URL is configured.
pub const DEFAULT_ASSIGNER_URL: &str = "https://localhost/assignment";

/// Retries after a cancelled token request before escalating.
pub const DEFAULT_MAX_TOKEN_RETRIES: u32 = 3;

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Fixed engine used instead of asking the assigner.
///
/// Meant for development against a local engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOverride {
    pub endpoint: SocketAddr,
    pub transport: TransportKind,

    /// Token sent in the start-connection handshake.
    #[serde(default)]
    pub client_token: String,

    /// PEM certificate pinned for SSL engines.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,
}

/// Configuration of one connection session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub assigner_url: String,
    pub protocol_version: u32,
    pub max_token_retries: u32,
    pub engine_override: Option<EngineOverride>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            assigner_url: DEFAULT_ASSIGNER_URL.to_string(),
            protocol_version: PROTOCOL_VERSION,
            max_token_retries: DEFAULT_MAX_TOKEN_RETRIES,
            engine_override: None,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or a value is out of range.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns error if a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol_version == 0 {
            return Err(ConfigError::Invalid(
                "protocol_version must be positive".to_string(),
            ));
        }
        if self.engine_override.is_none()
            && !(self.assigner_url.starts_with("https://")
                || self.assigner_url.starts_with("http://"))
        {
            return Err(ConfigError::Invalid(format!(
                "assigner_url is not an http(s) URL: {}",
                self.assigner_url
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_assigner_url(mut self, url: impl Into<String>) -> Self {
        self.assigner_url = url.into();
        self
    }

    #[must_use]
    pub const fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    #[must_use]
    pub const fn with_max_token_retries(mut self, retries: u32) -> Self {
        self.max_token_retries = retries;
        self
    }

    #[must_use]
    pub fn with_engine_override(mut self, engine: EngineOverride) -> Self {
        self.engine_override = Some(engine);
        self
    }
}
