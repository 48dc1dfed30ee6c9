//! Server configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! YAML or TOML file, then `TIMBEL__`-prefixed environment variables with
//! `__` separating sections (`TIMBEL__STORE__BACKEND=postgres`).

use anyhow::{Context, bail};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use timbel_auth::TokenVerifier;
use timbel_monitor::MonitorConfig;
use timbel_trace::TracingConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenConfig,
    pub store: StoreConfig,
    pub monitor: MonitorConfig,
    pub auth: AuthConfig,
    pub tracing: TracingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub bind: String,
    /// Upper bound on draining open connections after a shutdown signal.
    pub shutdown_timeout_seconds: u64,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            shutdown_timeout_seconds: 30,
        }
    }
}

impl ListenConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: Option<String>,
    pub max_connections: u32,
    /// Apply embedded migrations on startup.
    pub migrate: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: None,
            max_connections: 10,
            migrate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub secret: Option<String>,
    pub issuer: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: None,
            issuer: "timbel".to_string(),
        }
    }
}

impl AuthConfig {
    fn secret(&self) -> anyhow::Result<&str> {
        match self.secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(secret),
            _ => bail!("auth.secret is required when auth is enabled"),
        }
    }

    /// Token verifier, or `None` when authentication is disabled.
    pub fn verifier(&self) -> anyhow::Result<Option<TokenVerifier>> {
        if !self.enabled {
            return Ok(None);
        }
        let verifier = TokenVerifier::hs256(self.secret()?.as_bytes(), &self.issuer)?;
        Ok(Some(verifier))
    }

    pub fn signing_secret(&self) -> anyhow::Result<&[u8]> {
        Ok(self.secret()?.as_bytes())
    }
}

impl ServerConfig {
    /// Load defaults, the optional file and the process environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(env)
            .build()
            .context("failed to load configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.backend == StoreBackend::Postgres
            && self.store.url.as_deref().is_none_or(str::is_empty)
        {
            bail!("store.url is required for the postgres backend");
        }
        if self.auth.enabled {
            self.auth.secret()?;
        }
        self.monitor.validate()?;
        Ok(())
    }
}

fn environment() -> Environment {
    Environment::with_prefix("TIMBEL")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(vars))
    }

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}", std::process::id(), name));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::load_with(None, env(&[])).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.monitor, MonitorConfig::default());
        assert!(!config.auth.enabled);
        assert!(config.auth.verifier().unwrap().is_none());
    }

    #[test]
    fn test_file_then_environment() {
        let path = write_temp(
            "timbel.yaml",
            "server:\n  bind: 127.0.0.1:9000\nmonitor:\n  log_retention: 50\nstore:\n  backend: postgres\n  url: postgres://file/db\n",
        );

        let config = ServerConfig::load_with(
            Some(&path),
            env(&[
                ("TIMBEL__STORE__URL", "postgres://env/db"),
                ("TIMBEL__MONITOR__HISTORY_MAX_LIMIT", "500"),
            ]),
        )
        .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(config.store.url.as_deref(), Some("postgres://env/db"));
        assert_eq!(config.monitor.log_retention, 50);
        assert_eq!(config.monitor.history_max_limit, 500);
    }

    #[test]
    fn test_validation() {
        let err = ServerConfig::load_with(None, env(&[("TIMBEL__STORE__BACKEND", "postgres")]))
            .unwrap_err();
        assert!(err.to_string().contains("store.url"));

        let err = ServerConfig::load_with(None, env(&[("TIMBEL__AUTH__ENABLED", "true")]))
            .unwrap_err();
        assert!(err.to_string().contains("auth.secret"));

        let config = ServerConfig::load_with(
            None,
            env(&[
                ("TIMBEL__AUTH__ENABLED", "true"),
                ("TIMBEL__AUTH__SECRET", "s3cret"),
            ]),
        )
        .unwrap();
        assert!(config.auth.verifier().unwrap().is_some());
    }

    #[test]
    fn test_zero_monitor_limits_rejected() {
        let err = ServerConfig::load_with(None, env(&[("TIMBEL__MONITOR__LOG_READ_LIMIT", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("monitor.log_read_limit"));

        let err = ServerConfig::load_with(
            None,
            env(&[
                ("TIMBEL__MONITOR__HISTORY_MAX_LIMIT", "0"),
                ("TIMBEL__MONITOR__HISTORY_DEFAULT_LIMIT", "0"),
            ]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("monitor.history"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let missing = std::env::temp_dir().join("timbel-does-not-exist.yaml");
        assert!(ServerConfig::load_with(Some(&missing), env(&[])).is_err());
    }
}
