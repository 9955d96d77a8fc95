//! Shared Kubernetes client utilities

use std::time::Duration;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use rpaas_models::RpaasError;

/// Connection settings for one target cluster
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    /// kubeconfig context to use; in-cluster or the current context when unset
    pub context: Option<String>,
    /// Alternative kubeconfig path
    pub kubeconfig: Option<String>,
    pub connect_timeout: Option<Duration>,
    /// Read timeout for request/response calls. Streaming clients leave it unset.
    pub read_timeout: Option<Duration>,
}

/// Get a Kubernetes client for the given settings
pub async fn get_k8s_client(settings: &ClientSettings) -> Result<Client> {
    let mut config = match (&settings.kubeconfig, &settings.context) {
        (None, None) => Config::infer()
            .await
            .context("Failed to infer Kubernetes config")?,
        (path, context) => {
            let options = KubeConfigOptions {
                context: context.clone(),
                ..Default::default()
            };
            match path {
                Some(path) => {
                    let kubeconfig = Kubeconfig::read_from(path)
                        .with_context(|| format!("Failed to read kubeconfig {}", path))?;
                    Config::from_custom_kubeconfig(kubeconfig, &options)
                        .await
                        .context("Failed to load kubeconfig")?
                }
                None => Config::from_kubeconfig(&options)
                    .await
                    .context("Failed to load kubeconfig")?,
            }
        }
    };

    if settings.connect_timeout.is_some() {
        config.connect_timeout = settings.connect_timeout;
    }
    config.read_timeout = settings.read_timeout;

    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// Classifies a Kubernetes API failure into the domain taxonomy.
pub fn classify(err: kube::Error) -> RpaasError {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => RpaasError::not_found(response.message),
            409 => RpaasError::conflict(response.message),
            400 | 422 => RpaasError::validation(response.message),
            _ => RpaasError::Internal(anyhow::anyhow!(
                "kubernetes api error {}: {}",
                response.code,
                response.message
            )),
        },
        kube::Error::HyperError(e) => {
            RpaasError::bad_gateway(format!("kubernetes api unreachable: {}", e))
        }
        kube::Error::Service(e) => {
            RpaasError::bad_gateway(format!("kubernetes api unreachable: {}", e))
        }
        other => RpaasError::Internal(anyhow::Error::new(other)),
    }
}

/// Like [`classify`], with a friendlier message for 404.
pub fn classify_not_found(err: kube::Error, message: impl FnOnce() -> String) -> RpaasError {
    match err {
        kube::Error::Api(response) if response.code == 404 => RpaasError::not_found(message()),
        other => classify(other),
    }
}

/// Returns `Ok(None)` on 404 instead of an error.
pub fn optional<T>(result: std::result::Result<T, kube::Error>) -> rpaas_models::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
        Err(e) => Err(classify(e)),
    }
}
