//! Target factory: hands out the [`Manager`] for a cluster
//!
//! One manager per configured cluster, built on first use and cached for
//! the life of the process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rpaas_models::{Result, RpaasError};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::k8s_client::ClientSettings;
use crate::kubernetes::{KubernetesManager, KubernetesSettings};
use crate::manager::Manager;
use crate::purge::PurgeSettings;

/// Name used when no cluster is configured explicitly
pub const DEFAULT_CLUSTER: &str = "default";

#[async_trait]
pub trait ManagerFactory: Send + Sync {
    /// `None` selects the default target.
    async fn manager(&self, cluster: Option<&str>) -> Result<Arc<dyn Manager>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    /// kubeconfig context; in-cluster credentials when unset
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub kubeconfig: Option<String>,
    /// Overrides the global namespace for this cluster
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub default: bool,
}

/// Always returns the same manager, whatever the selector says.
pub struct StaticFactory {
    manager: Arc<dyn Manager>,
}

impl StaticFactory {
    pub fn new(manager: Arc<dyn Manager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ManagerFactory for StaticFactory {
    async fn manager(&self, _cluster: Option<&str>) -> Result<Arc<dyn Manager>> {
        Ok(self.manager.clone())
    }
}

struct ClusterSlot {
    config: ClusterConfig,
    manager: OnceCell<Arc<dyn Manager>>,
}

/// Kubernetes managers keyed by cluster name
pub struct ClusterFactory {
    slots: HashMap<String, ClusterSlot>,
    default_cluster: String,
    settings: KubernetesSettings,
    purge: PurgeSettings,
}

impl ClusterFactory {
    pub fn new(
        clusters: Vec<ClusterConfig>,
        settings: KubernetesSettings,
        purge: PurgeSettings,
    ) -> Self {
        let clusters = if clusters.is_empty() {
            vec![ClusterConfig {
                name: DEFAULT_CLUSTER.to_string(),
                default: true,
                ..Default::default()
            }]
        } else {
            clusters
        };

        let default_cluster = clusters
            .iter()
            .find(|c| c.default)
            .or_else(|| clusters.first())
            .map(|c| c.name.clone())
            .unwrap_or_else(|| DEFAULT_CLUSTER.to_string());

        let slots = clusters
            .into_iter()
            .map(|config| {
                (
                    config.name.clone(),
                    ClusterSlot {
                        config,
                        manager: OnceCell::new(),
                    },
                )
            })
            .collect();

        Self {
            slots,
            default_cluster,
            settings,
            purge,
        }
    }

    pub fn default_cluster(&self) -> &str {
        &self.default_cluster
    }

    pub fn cluster_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.keys().cloned().collect();
        names.sort();
        names
    }

    async fn connect(&self, slot: &ClusterSlot) -> Result<Arc<dyn Manager>> {
        let config = &slot.config;
        let settings = KubernetesSettings {
            namespace: config
                .namespace
                .clone()
                .unwrap_or_else(|| self.settings.namespace.clone()),
            cluster_name: Some(config.name.clone()),
            ..self.settings.clone()
        };
        let client_settings = ClientSettings {
            context: config.context.clone(),
            kubeconfig: config.kubeconfig.clone(),
            ..Default::default()
        };
        match KubernetesManager::connect(client_settings, settings, self.purge.clone()).await {
            Ok(manager) => {
                info!(cluster = %config.name, "Connected to cluster");
                Ok(Arc::new(manager) as Arc<dyn Manager>)
            }
            Err(e) => {
                error!(cluster = %config.name, error = ?e, "Failed to connect to cluster");
                Err(RpaasError::bad_gateway(format!(
                    "could not connect to cluster {}",
                    config.name
                )))
            }
        }
    }
}

#[async_trait]
impl ManagerFactory for ClusterFactory {
    async fn manager(&self, cluster: Option<&str>) -> Result<Arc<dyn Manager>> {
        let name = cluster.unwrap_or(&self.default_cluster);
        let slot = self
            .slots
            .get(name)
            .ok_or_else(|| RpaasError::bad_gateway(format!("cluster {} not found", name)))?;
        slot.manager
            .get_or_try_init(|| self.connect(slot))
            .await
            .cloned()
    }
}
