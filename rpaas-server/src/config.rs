//! Server configuration
//!
//! Scalars come from the environment (a `.env` file is honoured); structured
//! settings such as the cluster list live in an optional YAML file pointed at
//! by `RPAAS_CONFIG`. Environment variables win over the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use rpaas_operator::kubernetes::{KubernetesSettings, DEFAULT_DEBUG_IMAGE};
use rpaas_operator::purge::{
    PurgeSettings, DEFAULT_BULK_CONCURRENCY, DEFAULT_PURGE_CONCURRENCY, DEFAULT_PURGE_PORT,
    DEFAULT_PURGE_TIMEOUT,
};
use rpaas_operator::ClusterConfig;
use serde::Deserialize;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:9999";
pub const DEFAULT_NAMESPACE: &str = "rpaasv2";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_EXTRA_FILE_MAX_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub tls_certificate: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub api_username: String,
    pub api_password: String,
    pub namespace: String,
    pub service_name: Option<String>,
    pub debug_image: String,
    pub websocket_allowed_origins: Vec<String>,
    pub purge: PurgeSettings,
    pub purge_bulk_concurrency: usize,
    pub shutdown_timeout: Duration,
    pub extra_file_max_size: usize,
    pub clusters: Vec<ClusterConfig>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            tls_certificate: None,
            tls_key: None,
            api_username: String::new(),
            api_password: String::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            service_name: None,
            debug_image: DEFAULT_DEBUG_IMAGE.to_string(),
            websocket_allowed_origins: Vec::new(),
            purge: PurgeSettings::default(),
            purge_bulk_concurrency: DEFAULT_BULK_CONCURRENCY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            extra_file_max_size: DEFAULT_EXTRA_FILE_MAX_SIZE,
            clusters: Vec::new(),
            log_format: LogFormat::Text,
        }
    }
}

// ============================================================================
// YAML file
// ============================================================================

/// Layout of the `RPAAS_CONFIG` file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FileConfig {
    pub listen: Option<String>,
    pub tls_certificate: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub namespace: Option<String>,
    pub service_name: Option<String>,
    pub debug_image: Option<String>,
    pub websocket_allowed_origins: Vec<String>,
    pub purge: FilePurge,
    /// Seconds
    pub shutdown_timeout: Option<u64>,
    pub extra_file_max_size: Option<usize>,
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FilePurge {
    pub port: Option<u16>,
    /// Seconds
    pub timeout: Option<u64>,
    pub concurrency: Option<usize>,
    pub bulk_concurrency: Option<usize>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match std::env::var("RPAAS_CONFIG") {
            Ok(path) if !path.is_empty() => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path))?;
                Some(
                    serde_yaml::from_str::<FileConfig>(&raw)
                        .with_context(|| format!("Failed to parse config file {}", path))?,
                )
            }
            _ => None,
        };

        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Builds the config from a parsed file and an environment lookup.
    pub fn from_sources<F>(file: Option<FileConfig>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file.unwrap_or_default();
        let env = |key: &str| env(key).filter(|v| !v.is_empty());
        let defaults = Config::default();

        let purge = PurgeSettings {
            port: match env("RPAAS_PURGE_PORT") {
                Some(v) => v.parse().context("RPAAS_PURGE_PORT must be a valid port number")?,
                None => file.purge.port.unwrap_or(DEFAULT_PURGE_PORT),
            },
            timeout: match env("RPAAS_PURGE_TIMEOUT") {
                Some(v) => Duration::from_secs(
                    v.parse()
                        .context("RPAAS_PURGE_TIMEOUT must be a number of seconds")?,
                ),
                None => file
                    .purge
                    .timeout
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_PURGE_TIMEOUT),
            },
            concurrency: match env("RPAAS_PURGE_CONCURRENCY") {
                Some(v) => v
                    .parse()
                    .context("RPAAS_PURGE_CONCURRENCY must be a positive number")?,
                None => file.purge.concurrency.unwrap_or(DEFAULT_PURGE_CONCURRENCY),
            },
        };

        let purge_bulk_concurrency = match env("RPAAS_PURGE_BULK_CONCURRENCY") {
            Some(v) => v
                .parse()
                .context("RPAAS_PURGE_BULK_CONCURRENCY must be a positive number")?,
            None => file
                .purge
                .bulk_concurrency
                .unwrap_or(DEFAULT_BULK_CONCURRENCY),
        };

        if purge.concurrency == 0 || purge_bulk_concurrency == 0 {
            anyhow::bail!("purge concurrency must be at least 1");
        }

        let shutdown_timeout = match env("RPAAS_SHUTDOWN_TIMEOUT") {
            Some(v) => Duration::from_secs(
                v.parse()
                    .context("RPAAS_SHUTDOWN_TIMEOUT must be a number of seconds")?,
            ),
            None => file
                .shutdown_timeout
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
        };

        let extra_file_max_size = match env("RPAAS_EXTRA_FILE_MAX_SIZE") {
            Some(v) => v
                .parse()
                .context("RPAAS_EXTRA_FILE_MAX_SIZE must be a number of bytes")?,
            None => file
                .extra_file_max_size
                .unwrap_or(DEFAULT_EXTRA_FILE_MAX_SIZE),
        };

        let websocket_allowed_origins = match env("RPAAS_WEBSOCKET_ALLOWED_ORIGINS") {
            Some(v) => v
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            None => file.websocket_allowed_origins,
        };

        let log_format = match env("RPAAS_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            Some("text") | None => LogFormat::Text,
            Some(other) => anyhow::bail!("RPAAS_LOG_FORMAT must be text or json, got {}", other),
        };

        let config = Self {
            listen: env("RPAAS_LISTEN")
                .or(file.listen)
                .unwrap_or(defaults.listen),
            tls_certificate: env("RPAAS_TLS_CERTIFICATE")
                .map(PathBuf::from)
                .or(file.tls_certificate),
            tls_key: env("RPAAS_TLS_KEY").map(PathBuf::from).or(file.tls_key),
            api_username: env("API_USERNAME").unwrap_or_default(),
            api_password: env("API_PASSWORD").unwrap_or_default(),
            namespace: env("RPAAS_NAMESPACE")
                .or(file.namespace)
                .unwrap_or(defaults.namespace),
            service_name: env("RPAAS_SERVICE_NAME").or(file.service_name),
            debug_image: env("RPAAS_DEBUG_IMAGE")
                .or(file.debug_image)
                .unwrap_or(defaults.debug_image),
            websocket_allowed_origins,
            purge,
            purge_bulk_concurrency,
            shutdown_timeout,
            extra_file_max_size,
            clusters: file.clusters,
            log_format,
        };

        if config.tls_certificate.is_some() != config.tls_key.is_some() {
            anyhow::bail!("RPAAS_TLS_CERTIFICATE and RPAAS_TLS_KEY must be set together");
        }

        Ok(config)
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_certificate.is_some() && self.tls_key.is_some()
    }

    pub fn auth_enabled(&self) -> bool {
        !self.api_username.is_empty() || !self.api_password.is_empty()
    }

    pub fn kubernetes_settings(&self) -> KubernetesSettings {
        KubernetesSettings {
            namespace: self.namespace.clone(),
            service_name: self.service_name.clone(),
            debug_image: self.debug_image.clone(),
            ..Default::default()
        }
    }
}
