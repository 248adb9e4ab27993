use facecheck_core::env::{env_string, env_u16};
use facecheck_core::{ConfigError, FetchConfig, VerifierConfig};
use std::time::Duration;

/// Server configuration, loaded from environment variables.
pub struct Config {
    /// Interface to bind (default: 0.0.0.0).
    pub host: String,
    /// TCP port (default: 5000).
    pub port: u16,
    /// Outbound image fetching.
    pub fetch: FetchConfig,
    /// Face verification backend.
    pub verifier: VerifierConfig,
}

impl Config {
    /// Load configuration from `FACECHECK_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_string("FACECHECK_HOST", "0.0.0.0"),
            port: env_u16("FACECHECK_PORT", 5000),
            fetch: FetchConfig::from_env(),
            verifier: VerifierConfig::from_env()?,
        })
    }

    /// Largest accepted form body. Both fields may carry a base64 data URI
    /// (4/3 of the image size each), plus field names and URI headers.
    pub fn form_limit(&self) -> usize {
        self.fetch.max_bytes.saturating_mul(3).saturating_add(4096)
    }

    /// How long a handler waits on the engine: its own run plus one queued
    /// job ahead of it.
    pub fn engine_timeout(&self) -> Duration {
        self.verifier.verify_timeout.saturating_mul(2)
    }
}
