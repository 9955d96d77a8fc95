//! Rich read-only info document returned by `GET /resources/:instance/info`
//!
//! Field order is part of the wire contract: serde emits struct fields in
//! declaration order, so do not reorder them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::acl::AllowedUpstream;
use crate::autoscale::Autoscale;
use crate::block::ConfigurationBlock;
use crate::instance::{Bind, MetadataItem};
use crate::route::Route;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressType {
    ClusterExternal,
    ClusterInternal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAddress {
    #[serde(rename = "type")]
    pub address_type: AddressType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodPort {
    pub name: String,
    pub port: i32,
    #[serde(default)]
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodMetrics {
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodError {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub count: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(rename = "hostIP", default)]
    pub host_ip: String,
    pub ready: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub restarts: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ports: Vec<PodPort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PodMetrics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PodError>,
}

impl PodInfo {
    /// Age in whole seconds relative to `now`.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.created_at.map(|created| (now - created).num_seconds().max(0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoCertificate {
    pub name: String,
    /// Secret holding the pair in the instance namespace
    #[serde(rename = "secretName", default)]
    pub secret_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<DateTime<Utc>>,
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub annotations: Vec<MetadataItem>,
    #[serde(default)]
    pub labels: Vec<MetadataItem>,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub flavors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub shutdown: bool,
    #[serde(default)]
    pub addresses: Vec<InstanceAddress>,
    #[serde(default)]
    pub pods: Vec<PodInfo>,
    #[serde(default)]
    pub certificates: Vec<InfoCertificate>,
    #[serde(default)]
    pub blocks: Vec<ConfigurationBlock>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscale: Option<Autoscale>,
    #[serde(default)]
    pub binds: Vec<Bind>,
    #[serde(default)]
    pub acls: Vec<AllowedUpstream>,
    #[serde(default)]
    pub events: Vec<Event>,
}

/// Per-pod summary returned by `GET /resources/:instance/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    pub name: String,
    pub address: String,
    pub ready: bool,
}
