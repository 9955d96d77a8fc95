//! Custom resources reconciled by the rpaas operator
//!
//! The control plane never reconciles these; it only reads and writes the
//! desired state and lets the operator converge the data plane.

use std::collections::BTreeMap;

use kube::CustomResource;
use rpaas_models::{
    AllowedUpstream, Autoscale, BlockContext, ConfigurationBlock, Route,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// RpaasInstance
// ============================================================================

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "extensions.tsuru.io",
    version = "v1alpha1",
    kind = "RpaasInstance",
    plural = "rpaasinstances",
    namespaced,
    status = "RpaasInstanceStatus",
    printcolumn = r#"{"name":"Plan", "type":"string", "jsonPath":".spec.planName"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RpaasInstanceSpec {
    pub plan_name: String,

    /// Desired replicas; ignored while `autoscale` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flavors: Vec<String>,

    /// Applications this instance proxies to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<InstanceBind>,

    /// NGINX fragments keyed by context name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blocks: BTreeMap<String, BlockValue>,

    /// Server blocks scoped to a single `server_name`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_blocks: Vec<ServerBlock>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<TlsSecret>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscale: Option<InstanceAutoscale>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_upstreams: Vec<UpstreamSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_files: Option<ExtraFilesRef>,

    #[serde(default)]
    pub pod_template: PodTemplate,

    /// Scales the data plane to zero and pauses autoscaling
    #[serde(default)]
    pub shutdown: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RpaasInstanceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct InstanceBind {
    pub name: String,
    pub host: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct BlockValue {
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub extend: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerBlock {
    pub server_name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub extend: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(rename = "forceHTTPS", default)]
    pub force_https: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSecret {
    /// Certificate name as seen by tenants (`default` when unnamed)
    pub name: String,
    pub secret_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceAutoscale {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    pub max_replicas: i32,
    #[serde(
        rename = "targetCPUUtilizationPercentage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_cpu: Option<i32>,
    #[serde(
        rename = "targetMemoryUtilizationPercentage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_memory: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_requests_per_second: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct UpstreamSpec {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ExtraFilesRef {
    /// ConfigMap holding the file contents
    pub name: String,
    /// ConfigMap key -> file name relative to the nginx config dir
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct PodTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

// ============================================================================
// Plans and flavors
// ============================================================================

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "extensions.tsuru.io",
    version = "v1alpha1",
    kind = "RpaasPlan",
    plural = "rpaasplans",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RpaasPlanSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "extensions.tsuru.io",
    version = "v1alpha1",
    kind = "RpaasFlavor",
    plural = "rpaasflavors",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RpaasFlavorSpec {
    #[serde(default)]
    pub description: String,
}

// ============================================================================
// Conversions between wire types and the CR representation
// ============================================================================

impl From<&Route> for Location {
    fn from(route: &Route) -> Self {
        Location {
            path: route.path.clone(),
            server_name: route.server_name.clone(),
            destination: route.destination.clone(),
            force_https: route.https_only,
            content: route.content.clone(),
        }
    }
}

impl From<&Location> for Route {
    fn from(location: &Location) -> Self {
        Route {
            path: location.path.clone(),
            server_name: location.server_name.clone(),
            destination: location.destination.clone(),
            https_only: location.force_https,
            content: location.content.clone(),
        }
    }
}

impl From<&Autoscale> for InstanceAutoscale {
    fn from(policy: &Autoscale) -> Self {
        InstanceAutoscale {
            min_replicas: policy.min_replicas,
            max_replicas: policy.max_replicas.unwrap_or_default(),
            target_cpu: policy.cpu,
            target_memory: policy.memory,
            target_requests_per_second: policy.rps,
        }
    }
}

impl From<&InstanceAutoscale> for Autoscale {
    fn from(spec: &InstanceAutoscale) -> Self {
        Autoscale {
            min_replicas: spec.min_replicas,
            max_replicas: Some(spec.max_replicas),
            cpu: spec.target_cpu,
            memory: spec.target_memory,
            rps: spec.target_requests_per_second,
        }
    }
}

impl From<&AllowedUpstream> for UpstreamSpec {
    fn from(upstream: &AllowedUpstream) -> Self {
        UpstreamSpec {
            host: upstream.host.clone(),
            port: upstream.port,
        }
    }
}

impl From<&UpstreamSpec> for AllowedUpstream {
    fn from(spec: &UpstreamSpec) -> Self {
        AllowedUpstream {
            host: spec.host.clone(),
            port: spec.port,
        }
    }
}

impl RpaasInstanceSpec {
    /// Flattens context blocks and server blocks into the wire list.
    pub fn configuration_blocks(&self) -> Vec<ConfigurationBlock> {
        let mut blocks: Vec<ConfigurationBlock> = self
            .blocks
            .iter()
            .filter_map(|(context, block)| {
                let context = context.parse::<BlockContext>().ok()?;
                Some(ConfigurationBlock {
                    context,
                    content: block.value.clone(),
                    server_name: None,
                    extend: block.extend,
                })
            })
            .collect();
        blocks.extend(self.server_blocks.iter().map(|block| ConfigurationBlock {
            context: BlockContext::Server,
            content: block.content.clone(),
            server_name: Some(block.server_name.clone()),
            extend: block.extend,
        }));
        blocks
    }

    /// Drops the block of `context`; a server name drops only that host's
    /// server block. Returns whether anything was removed.
    pub fn remove_block(&mut self, context: BlockContext, server_name: Option<&str>) -> bool {
        match server_name {
            Some(server_name) => {
                let before = self.server_blocks.len();
                self.server_blocks.retain(|b| b.server_name != server_name);
                self.server_blocks.len() != before
            }
            None => self.blocks.remove(context.as_str()).is_some(),
        }
    }

    pub fn routes(&self) -> Vec<Route> {
        self.locations.iter().map(Route::from).collect()
    }

    pub fn access_control_list(&self) -> Vec<AllowedUpstream> {
        self.allowed_upstreams.iter().map(AllowedUpstream::from).collect()
    }
}
