//! Kubernetes backed [`Manager`]
//!
//! Reads and writes the operator's custom resources plus the few core objects
//! the operator expects us to own (certificate secrets, the extra files
//! ConfigMap). Pods are only ever read, exec'd into or attached to.

mod attach;
mod files;
mod pods;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Event as K8sEvent, Pod, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use rpaas_models::info::{AddressType, InfoCertificate, InstanceAddress};
use rpaas_models::{
    AllowedUpstream, Autoscale, Bind, BindAppArgs, BlockContext, CertificateInfo,
    ConfigurationBlock, CreateArgs, ExtraFile, Flavor, Instance, InstanceInfo, KeyPair, Metadata,
    MetadataItem, Plan, PodStatus, PurgeArgs, Result, Route, RpaasError, UpdateArgs,
};
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, info};

use crate::crd::{
    BlockValue, InstanceAutoscale, InstanceBind, Location, RpaasFlavor, RpaasInstance,
    RpaasInstanceSpec, RpaasPlan, ServerBlock, TlsSecret, UpstreamSpec,
};
use crate::k8s_client::{classify, classify_not_found, get_k8s_client, optional, ClientSettings};
use crate::manager::{ExecArgs, ExecOutcome, LogArgs, Manager, Replica};
use crate::names::{self, annotations, labels, NGINX_CONTAINER};
use crate::purge::{CachePurger, PurgeSettings};

/// Field manager used for server side apply
const FIELD_MANAGER: &str = "rpaas-api";

pub const DEFAULT_DEBUG_IMAGE: &str = "tsuru/netshoot";
const EPHEMERAL_READY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct KubernetesSettings {
    pub namespace: String,
    /// Service (tenancy group) stamped on created instances
    pub service_name: Option<String>,
    /// Cluster name reported back in `Instance::cluster`
    pub cluster_name: Option<String>,
    pub debug_image: String,
    pub api_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            namespace: "rpaasv2".to_string(),
            service_name: None,
            cluster_name: None,
            debug_image: DEFAULT_DEBUG_IMAGE.to_string(),
            api_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

pub struct KubernetesManager {
    /// Request/response calls, bounded by `api_timeout`
    client: Client,
    /// exec, attach and log streams; no read timeout
    stream_client: Client,
    settings: KubernetesSettings,
    purger: CachePurger,
}

impl KubernetesManager {
    pub async fn connect(
        client_settings: ClientSettings,
        settings: KubernetesSettings,
        purge: PurgeSettings,
    ) -> anyhow::Result<Self> {
        let client = get_k8s_client(&ClientSettings {
            connect_timeout: Some(settings.connect_timeout),
            read_timeout: Some(settings.api_timeout),
            ..client_settings.clone()
        })
        .await?;
        let stream_client = get_k8s_client(&ClientSettings {
            connect_timeout: Some(settings.connect_timeout),
            read_timeout: None,
            ..client_settings
        })
        .await?;
        let purger = CachePurger::new(purge)?;

        info!(
            namespace = %settings.namespace,
            cluster = settings.cluster_name.as_deref().unwrap_or("default"),
            "Kubernetes manager ready"
        );

        Ok(Self {
            client,
            stream_client,
            settings,
            purger,
        })
    }

    // ========================================================================
    // API handles
    // ========================================================================

    fn instances(&self) -> Api<RpaasInstance> {
        Api::namespaced(self.client.clone(), &self.settings.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.settings.namespace)
    }

    fn stream_pods(&self) -> Api<Pod> {
        Api::namespaced(self.stream_client.clone(), &self.settings.namespace)
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.settings.namespace)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn get_rpaas(&self, name: &str) -> Result<RpaasInstance> {
        self.instances()
            .get(name)
            .await
            .map_err(|e| classify_not_found(e, || format!("rpaas instance \"{}\" not found", name)))
    }

    /// Read-modify-write of an instance. A concurrent writer surfaces as a
    /// `Conflict` through the resource version check.
    async fn modify<F>(&self, name: &str, f: F) -> Result<RpaasInstance>
    where
        F: FnOnce(&mut RpaasInstance) -> Result<()> + Send,
    {
        let mut instance = self.get_rpaas(name).await?;
        f(&mut instance)?;
        self.instances()
            .replace(name, &PostParams::default(), &instance)
            .await
            .map_err(classify)
    }

    async fn instance_pods(&self, name: &str) -> Result<Vec<Pod>> {
        let selector = names::instance_selector(name);
        let pods = self
            .pods()
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(classify)?;
        Ok(pods.items)
    }

    /// Picks the requested pod or the first ready one.
    async fn pick_pod(&self, name: &str, pod: Option<&str>) -> Result<Pod> {
        match pod {
            Some(pod_name) => {
                let pod = self
                    .pods()
                    .get(pod_name)
                    .await
                    .map_err(|e| classify_not_found(e, || format!("pod \"{}\" not found", pod_name)))?;
                if pod.labels().get(labels::INSTANCE_NAME).map(String::as_str) != Some(name) {
                    return Err(RpaasError::not_found(format!(
                        "pod \"{}\" not found in instance \"{}\"",
                        pod_name, name
                    )));
                }
                Ok(pod)
            }
            None => self
                .instance_pods(name)
                .await?
                .into_iter()
                .find(|p| pods::is_ready(p) && !pods::is_terminating(p))
                .ok_or_else(|| {
                    RpaasError::not_found(format!("no running pods found for instance \"{}\"", name))
                }),
        }
    }

    async fn resolve_plan(&self, plan: &str) -> Result<String> {
        let plans: Api<RpaasPlan> = Api::namespaced(self.client.clone(), &self.settings.namespace);
        if plan.is_empty() {
            let list = plans.list(&ListParams::default()).await.map_err(classify)?;
            return list
                .items
                .iter()
                .find(|p| p.spec.default)
                .map(|p| p.name_any())
                .ok_or_else(|| RpaasError::validation("no default plan found"));
        }
        match optional(plans.get(plan).await)? {
            Some(_) => Ok(plan.to_string()),
            None => Err(RpaasError::validation(format!("invalid plan \"{}\"", plan))),
        }
    }

    async fn ensure_flavors(&self, flavors: &[String]) -> Result<()> {
        let api: Api<RpaasFlavor> = Api::namespaced(self.client.clone(), &self.settings.namespace);
        for flavor in flavors {
            if optional(api.get(flavor).await)?.is_none() {
                return Err(RpaasError::validation(format!("flavor \"{}\" not found", flavor)));
            }
        }
        Ok(())
    }

    fn to_instance(&self, rpaas: &RpaasInstance) -> Instance {
        let instance_labels = rpaas.labels();
        let instance_annotations = rpaas.annotations();
        Instance {
            name: rpaas.name_any(),
            service: instance_labels.get(labels::SERVICE_NAME).cloned(),
            cluster: self.settings.cluster_name.clone(),
            plan: rpaas.spec.plan_name.clone(),
            team: instance_labels.get(labels::TEAM_OWNER).cloned().unwrap_or_default(),
            description: instance_annotations
                .get(annotations::DESCRIPTION)
                .cloned()
                .unwrap_or_default(),
            tags: decode_tags(instance_annotations.get(annotations::TAGS)),
            flavors: rpaas.spec.flavors.clone(),
            replicas: rpaas.spec.replicas,
            shutdown: rpaas.spec.shutdown,
        }
    }

    async fn addresses(&self, name: &str) -> Result<Vec<InstanceAddress>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.settings.namespace);
        let service_name = names::instance_service(name);
        let Some(service) = optional(services.get(&service_name).await)? else {
            return Ok(Vec::new());
        };

        let mut addresses = Vec::new();
        let ingress = service
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.clone())
            .unwrap_or_default();
        if ingress.is_empty() {
            addresses.push(InstanceAddress {
                address_type: AddressType::ClusterExternal,
                hostname: None,
                ip: None,
                status: "pending".to_string(),
            });
        }
        for entry in ingress {
            addresses.push(InstanceAddress {
                address_type: AddressType::ClusterExternal,
                hostname: entry.hostname,
                ip: entry.ip,
                status: "ready".to_string(),
            });
        }
        if let Some(cluster_ip) = service.spec.as_ref().and_then(|s| s.cluster_ip.clone()) {
            addresses.push(InstanceAddress {
                address_type: AddressType::ClusterInternal,
                hostname: Some(format!(
                    "{}.{}.svc.cluster.local",
                    service_name, self.settings.namespace
                )),
                ip: Some(cluster_ip),
                status: "ready".to_string(),
            });
        }
        Ok(addresses)
    }

    async fn events_for(&self, object: &str) -> Result<Vec<K8sEvent>> {
        let events: Api<K8sEvent> = Api::namespaced(self.client.clone(), &self.settings.namespace);
        let selector = format!("involvedObject.name={}", object);
        let list = events
            .list(&ListParams::default().fields(&selector))
            .await
            .map_err(classify)?;
        Ok(list.items)
    }

    async fn certificate_pem(&self, secret_name: &str) -> Result<Option<String>> {
        let secret = optional(self.secrets().get(secret_name).await)?;
        Ok(secret
            .and_then(|s| s.data)
            .and_then(|data| data.get("tls.crt").cloned())
            .map(|pem| String::from_utf8_lossy(&pem.0).into_owned()))
    }

    async fn wait_ephemeral_running(
        &self,
        pod: &str,
        container: &str,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<()> {
        let pods = self.pods();
        let wait = async {
            loop {
                let current = pods.get(pod).await.map_err(classify)?;
                let state = current
                    .status
                    .as_ref()
                    .and_then(|s| s.ephemeral_container_statuses.as_ref())
                    .and_then(|statuses| statuses.iter().find(|c| c.name == container))
                    .and_then(|c| c.state.clone());
                if let Some(state) = state {
                    if state.running.is_some() {
                        return Ok::<(), RpaasError>(());
                    }
                    if let Some(terminated) = state.terminated {
                        return Err(RpaasError::Internal(anyhow::anyhow!(
                            "debug container exited before attach: {}",
                            terminated.reason.unwrap_or_default()
                        )));
                    }
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(RpaasError::Internal(anyhow::anyhow!("debug session cancelled"))),
            result = tokio::time::timeout(EPHEMERAL_READY_TIMEOUT, wait) => {
                result.map_err(|_| RpaasError::Internal(anyhow::anyhow!(
                    "debug container {} did not start in time", container
                )))?
            }
        }
    }
}

fn encode_tags(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_default()
}

fn decode_tags(raw: Option<&String>) -> Vec<String> {
    raw.and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

fn to_items(map: &BTreeMap<String, String>) -> Vec<MetadataItem> {
    map.iter()
        .map(|(name, value)| MetadataItem {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

fn check_reserved(items: &[MetadataItem]) -> Result<()> {
    match items.iter().find(|i| i.name.starts_with("rpaas.extensions.tsuru.io/")) {
        Some(item) => Err(RpaasError::validation(format!(
            "metadata key \"{}\" uses a reserved prefix",
            item.name
        ))),
        None => Ok(()),
    }
}

fn location_key(location: &Location) -> (Option<&str>, &str) {
    (location.server_name.as_deref(), location.path.as_str())
}

#[async_trait]
impl Manager for KubernetesManager {
    async fn create_instance(&self, args: CreateArgs) -> Result<()> {
        args.validate()?;
        let plan = self.resolve_plan(&args.plan).await?;
        let flavors = args.all_flavors();
        self.ensure_flavors(&flavors).await?;

        if optional(self.instances().get(&args.name).await)?.is_some() {
            return Err(RpaasError::conflict(format!(
                "rpaas instance named \"{}\" already exists",
                args.name
            )));
        }

        let mut instance_labels = BTreeMap::new();
        instance_labels.insert(labels::INSTANCE_NAME.to_string(), args.name.clone());
        instance_labels.insert(labels::TEAM_OWNER.to_string(), args.team.clone());
        instance_labels.insert(labels::PLAN_NAME.to_string(), plan.clone());
        if let Some(service) = &self.settings.service_name {
            instance_labels.insert(labels::SERVICE_NAME.to_string(), service.clone());
        }

        let mut instance_annotations = BTreeMap::new();
        instance_annotations.insert(annotations::DESCRIPTION.to_string(), args.description.clone());
        instance_annotations.insert(annotations::TAGS.to_string(), encode_tags(&args.tags));

        let mut instance = RpaasInstance::new(
            &args.name,
            RpaasInstanceSpec {
                plan_name: plan,
                flavors,
                ..Default::default()
            },
        );
        instance.metadata.namespace = Some(self.settings.namespace.clone());
        instance.metadata.labels = Some(instance_labels);
        instance.metadata.annotations = Some(instance_annotations);

        self.instances()
            .create(&PostParams::default(), &instance)
            .await
            .map_err(classify)?;
        info!(instance = %args.name, team = %args.team, "Instance created");
        Ok(())
    }

    async fn delete_instance(&self, name: &str) -> Result<()> {
        self.instances()
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| classify_not_found(e, || format!("rpaas instance \"{}\" not found", name)))?;
        info!(instance = %name, "Instance deleted");
        Ok(())
    }

    async fn update_instance(&self, name: &str, args: UpdateArgs) -> Result<()> {
        args.validate()?;
        let plan = if args.plan.is_empty() {
            None
        } else {
            Some(self.resolve_plan(&args.plan).await?)
        };
        let flavors = args.all_flavors();
        self.ensure_flavors(&flavors).await?;

        self.modify(name, |instance| {
            if let Some(plan) = plan {
                instance
                    .labels_mut()
                    .insert(labels::PLAN_NAME.to_string(), plan.clone());
                instance.spec.plan_name = plan;
            }
            if !args.team.is_empty() {
                instance
                    .labels_mut()
                    .insert(labels::TEAM_OWNER.to_string(), args.team.clone());
            }
            let instance_annotations = instance.annotations_mut();
            instance_annotations.insert(annotations::DESCRIPTION.to_string(), args.description.clone());
            instance_annotations.insert(annotations::TAGS.to_string(), encode_tags(&args.tags));
            instance.spec.flavors = flavors;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn get_instance(&self, name: &str) -> Result<Instance> {
        let rpaas = self.get_rpaas(name).await?;
        Ok(self.to_instance(&rpaas))
    }

    async fn get_instance_info(&self, name: &str) -> Result<InstanceInfo> {
        let rpaas = self.get_rpaas(name).await?;
        let instance = self.to_instance(&rpaas);

        let mut pod_infos = Vec::new();
        for pod in self.instance_pods(name).await? {
            let events = self.events_for(&pod.name_any()).await?;
            pod_infos.push(pods::info(&pod, &events));
        }

        let events = self
            .events_for(name)
            .await?
            .iter()
            .map(pods::event)
            .collect();

        let spec = &rpaas.spec;
        Ok(InstanceInfo {
            name: instance.name,
            service: instance.service,
            cluster: instance.cluster,
            description: instance.description,
            team: instance.team,
            tags: instance.tags,
            annotations: to_items(&spec.pod_template.annotations),
            labels: to_items(&spec.pod_template.labels),
            plan: instance.plan,
            flavors: instance.flavors,
            replicas: instance.replicas,
            shutdown: instance.shutdown,
            addresses: self.addresses(name).await?,
            pods: pod_infos,
            certificates: spec
                .tls
                .iter()
                .map(|tls| InfoCertificate {
                    name: tls.name.clone(),
                    secret_name: tls.secret_name.clone(),
                })
                .collect(),
            blocks: spec.configuration_blocks(),
            routes: spec.routes(),
            autoscale: spec.autoscale.as_ref().map(Autoscale::from),
            binds: spec
                .binds
                .iter()
                .map(|b| Bind {
                    name: b.name.clone(),
                    host: b.host.clone(),
                })
                .collect(),
            acls: spec.access_control_list(),
            events,
        })
    }

    async fn get_instance_address(&self, name: &str) -> Result<String> {
        self.get_rpaas(name).await?;
        let addresses = self.addresses(name).await?;
        let external = addresses
            .iter()
            .filter(|a| a.address_type == AddressType::ClusterExternal)
            .find_map(|a| a.ip.clone().or_else(|| a.hostname.clone()));
        Ok(external.unwrap_or_default())
    }

    async fn get_instance_status(&self, name: &str) -> Result<Vec<PodStatus>> {
        self.get_rpaas(name).await?;
        Ok(self.instance_pods(name).await?.iter().map(pods::status).collect())
    }

    async fn get_plans(&self) -> Result<Vec<Plan>> {
        let api: Api<RpaasPlan> = Api::namespaced(self.client.clone(), &self.settings.namespace);
        let list = api.list(&ListParams::default()).await.map_err(classify)?;
        Ok(list
            .items
            .iter()
            .map(|p| Plan {
                name: p.name_any(),
                description: p.spec.description.clone(),
                default: p.spec.default,
            })
            .collect())
    }

    async fn get_flavors(&self) -> Result<Vec<Flavor>> {
        let api: Api<RpaasFlavor> = Api::namespaced(self.client.clone(), &self.settings.namespace);
        let list = api.list(&ListParams::default()).await.map_err(classify)?;
        Ok(list
            .items
            .iter()
            .map(|f| Flavor {
                name: f.name_any(),
                description: f.spec.description.clone(),
            })
            .collect())
    }

    async fn scale(&self, name: &str, replicas: i32) -> Result<()> {
        if replicas < 0 {
            return Err(RpaasError::validation(format!("invalid quantity: {}", replicas)));
        }
        self.modify(name, |instance| {
            instance.spec.replicas = Some(replicas);
            Ok(())
        })
        .await?;
        info!(instance = %name, replicas, "Instance scaled");
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.modify(name, |instance| {
            instance.spec.shutdown = false;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.modify(name, |instance| {
            instance.spec.shutdown = true;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.modify(name, |instance| {
            instance
                .spec
                .pod_template
                .annotations
                .insert(annotations::RESTARTED_AT.to_string(), now);
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn update_certificate(&self, name: &str, cert_name: &str, pair: KeyPair) -> Result<()> {
        let rpaas = self.get_rpaas(name).await?;
        let secret_name = names::certificate_secret(name, cert_name);

        let mut data = BTreeMap::new();
        data.insert(
            "tls.crt".to_string(),
            ByteString(pair.certificate_pem().as_bytes().to_vec()),
        );
        data.insert("tls.key".to_string(), ByteString(pair.key_pem().as_bytes().to_vec()));

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(secret_name.clone()),
                namespace: Some(self.settings.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    labels::INSTANCE_NAME.to_string(),
                    name.to_string(),
                )])),
                annotations: Some(BTreeMap::from([(
                    annotations::CERTIFICATE_NAME.to_string(),
                    cert_name.to_string(),
                )])),
                owner_references: rpaas.controller_owner_ref(&()).map(|owner| vec![owner]),
                ..Default::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            data: Some(data),
            ..Default::default()
        };
        self.secrets()
            .patch(
                &secret_name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&secret),
            )
            .await
            .map_err(classify)?;

        let cert_name = cert_name.to_string();
        self.modify(name, move |instance| {
            let entry = TlsSecret {
                name: cert_name.clone(),
                secret_name,
            };
            match instance.spec.tls.iter_mut().find(|t| t.name == cert_name) {
                Some(existing) => *existing = entry,
                None => instance.spec.tls.push(entry),
            }
            Ok(())
        })
        .await?;
        info!(instance = %name, "Certificate updated");
        Ok(())
    }

    async fn get_certificates(&self, name: &str) -> Result<Vec<CertificateInfo>> {
        let rpaas = self.get_rpaas(name).await?;
        let mut certificates = Vec::new();
        for tls in &rpaas.spec.tls {
            if let Some(pem) = self.certificate_pem(&tls.secret_name).await? {
                certificates.push(CertificateInfo {
                    name: tls.name.clone(),
                    certificate: pem,
                });
            }
        }
        Ok(certificates)
    }

    async fn delete_certificate(&self, name: &str, cert_name: &str) -> Result<()> {
        let mut secret_name = None;
        self.modify(name, |instance| {
            let position = instance
                .spec
                .tls
                .iter()
                .position(|t| t.name == cert_name)
                .ok_or_else(|| {
                    RpaasError::not_found(format!("certificate \"{}\" does not exist", cert_name))
                })?;
            secret_name = Some(instance.spec.tls.remove(position).secret_name);
            Ok(())
        })
        .await?;

        if let Some(secret_name) = secret_name {
            optional(self.secrets().delete(&secret_name, &DeleteParams::default()).await)?;
        }
        Ok(())
    }

    async fn list_blocks(&self, name: &str) -> Result<Vec<ConfigurationBlock>> {
        Ok(self.get_rpaas(name).await?.spec.configuration_blocks())
    }

    async fn update_block(&self, name: &str, block: ConfigurationBlock) -> Result<()> {
        block.validate()?;
        self.modify(name, |instance| {
            match &block.server_name {
                Some(server_name) => {
                    let entry = ServerBlock {
                        server_name: server_name.clone(),
                        content: block.content.clone(),
                        extend: block.extend,
                    };
                    let blocks = &mut instance.spec.server_blocks;
                    match blocks.iter_mut().find(|b| &b.server_name == server_name) {
                        Some(existing) => *existing = entry,
                        None => blocks.push(entry),
                    }
                }
                None => {
                    instance.spec.blocks.insert(
                        block.context.as_str().to_string(),
                        BlockValue {
                            value: block.content.clone(),
                            extend: block.extend,
                        },
                    );
                }
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn delete_block(
        &self,
        name: &str,
        context: BlockContext,
        server_name: Option<&str>,
    ) -> Result<()> {
        self.modify(name, |instance| {
            if !instance.spec.remove_block(context, server_name) {
                return Err(RpaasError::not_found(format!(
                    "block \"{}\" does not exist",
                    context
                )));
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn get_routes(&self, name: &str) -> Result<Vec<Route>> {
        Ok(self.get_rpaas(name).await?.spec.routes())
    }

    async fn update_route(&self, name: &str, route: Route) -> Result<()> {
        let route = route.normalized();
        route.validate()?;
        let location = Location::from(&route);
        self.modify(name, |instance| {
            let key = (route.server_name.as_deref(), route.path.as_str());
            let locations = &mut instance.spec.locations;
            match locations.iter_mut().find(|l| location_key(l) == key) {
                Some(existing) => *existing = location,
                None => locations.push(location),
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn delete_route(&self, name: &str, server_name: Option<&str>, path: &str) -> Result<()> {
        self.modify(name, |instance| {
            let locations = &mut instance.spec.locations;
            let before = locations.len();
            locations.retain(|l| location_key(l) != (server_name, path));
            if locations.len() == before {
                return Err(RpaasError::not_found("path does not exist"));
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn get_autoscale(&self, name: &str) -> Result<Autoscale> {
        self.get_rpaas(name)
            .await?
            .spec
            .autoscale
            .as_ref()
            .map(Autoscale::from)
            .ok_or_else(|| RpaasError::not_found("autoscale not found"))
    }

    async fn create_autoscale(&self, name: &str, policy: Autoscale) -> Result<()> {
        policy.validate()?;
        self.modify(name, |instance| {
            instance.spec.autoscale = Some(InstanceAutoscale::from(&policy));
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn update_autoscale(&self, name: &str, patch: Autoscale) -> Result<()> {
        self.modify(name, |instance| {
            let current = instance
                .spec
                .autoscale
                .as_ref()
                .map(Autoscale::from)
                .unwrap_or_default();
            let merged = current.merge(&patch);
            merged.validate()?;
            instance.spec.autoscale = Some(InstanceAutoscale::from(&merged));
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn delete_autoscale(&self, name: &str) -> Result<()> {
        self.modify(name, |instance| {
            instance.spec.autoscale = None;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn bind_app(&self, name: &str, args: BindAppArgs) -> Result<()> {
        args.validate()?;
        let host = args
            .app_internal_hosts
            .first()
            .or_else(|| args.app_hosts.first())
            .cloned()
            .unwrap_or_default();
        self.modify(name, |instance| {
            if instance.spec.binds.iter().any(|b| b.name == args.app_name) {
                return Err(RpaasError::conflict(
                    "instance already bound with this application",
                ));
            }
            instance.spec.binds.push(InstanceBind {
                name: args.app_name.clone(),
                host,
            });
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn unbind_app(&self, name: &str, app_name: &str) -> Result<()> {
        self.modify(name, |instance| {
            let before = instance.spec.binds.len();
            instance.spec.binds.retain(|b| b.name != app_name);
            if instance.spec.binds.len() == before {
                return Err(RpaasError::not_found("app not found"));
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn purge_targets(&self, name: &str) -> Result<Vec<Replica>> {
        self.get_rpaas(name).await?;
        Ok(self
            .instance_pods(name)
            .await?
            .iter()
            .filter(|p| pods::is_ready(p) && !pods::is_terminating(p))
            .filter_map(|p| {
                Some(Replica {
                    name: p.name_any(),
                    ip: pods::pod_ip(p)?,
                })
            })
            .collect())
    }

    async fn purge_cache(&self, name: &str, args: PurgeArgs) -> Result<usize> {
        let replicas = self.purge_targets(name).await?;
        if replicas.is_empty() {
            return Err(RpaasError::not_found(format!(
                "no running pods found for instance \"{}\"",
                name
            )));
        }
        self.purger.purge(name, &replicas, &args).await
    }

    async fn exec(&self, name: &str, args: ExecArgs) -> Result<ExecOutcome> {
        let pod = self.pick_pod(name, args.options.pod.as_deref()).await?;
        let pod_name = pod.name_any();
        let container = args
            .options
            .container
            .clone()
            .unwrap_or_else(|| NGINX_CONTAINER.to_string());
        let params = attach::attach_params(&args.options, &container);

        debug!(instance = %name, pod = %pod_name, container = %container, "Starting exec");
        let process = self
            .stream_pods()
            .exec(&pod_name, args.options.command.clone(), &params)
            .await
            .map_err(classify)?;
        attach::run_attached(process, args).await
    }

    async fn debug(&self, name: &str, args: ExecArgs) -> Result<ExecOutcome> {
        let pod = self.pick_pod(name, args.options.pod.as_deref()).await?;
        let pod_name = pod.name_any();
        let image = args
            .options
            .image
            .clone()
            .unwrap_or_else(|| self.settings.debug_image.clone());
        let target = args
            .options
            .container
            .clone()
            .unwrap_or_else(|| NGINX_CONTAINER.to_string());
        let container = format!("debugger-{}", Utc::now().timestamp_millis());

        let mut ephemeral = serde_json::json!({
            "name": container,
            "image": image,
            "stdin": args.options.interactive,
            "tty": args.options.tty,
            "targetContainerName": target,
            "securityContext": { "privileged": false },
        });
        if !args.options.command.is_empty() {
            ephemeral["command"] = serde_json::json!(args.options.command);
        }
        let patch = serde_json::json!({ "spec": { "ephemeralContainers": [ephemeral] } });

        info!(instance = %name, pod = %pod_name, image = %image, "Starting debug container");
        self.pods()
            .patch_ephemeral_containers(&pod_name, &PatchParams::default(), &Patch::Strategic(patch))
            .await
            .map_err(classify)?;
        self.wait_ephemeral_running(&pod_name, &container, &args.cancel)
            .await?;

        let params = attach::attach_params(&args.options, &container);
        let process = self
            .stream_pods()
            .attach(&pod_name, &params)
            .await
            .map_err(classify)?;
        attach::run_attached(process, args).await
    }

    async fn log(&self, name: &str, mut args: LogArgs) -> Result<()> {
        let targets = match args.options.pod.as_deref() {
            Some(pod) => vec![self.pick_pod(name, Some(pod)).await?],
            None => self.instance_pods(name).await?,
        };
        if targets.is_empty() {
            return Err(RpaasError::not_found(format!(
                "no pods found for instance \"{}\"",
                name
            )));
        }

        let params = LogParams {
            container: Some(
                args.options
                    .container
                    .clone()
                    .unwrap_or_else(|| NGINX_CONTAINER.to_string()),
            ),
            follow: args.options.follow,
            tail_lines: args.options.lines,
            since_seconds: args.options.since,
            timestamps: args.options.timestamp,
            ..Default::default()
        };

        let prefixed = targets.len() > 1;
        let mut streams = Vec::with_capacity(targets.len());
        for pod in &targets {
            let pod_name = pod.name_any();
            let reader = self
                .stream_pods()
                .log_stream(&pod_name, &params)
                .await
                .map_err(classify)?;
            let prefix = prefixed.then(|| pod_name.clone());
            streams.push(Box::pin(attach::log_lines(Box::pin(reader.compat()), prefix)));
        }

        let merged = futures::stream::select_all(streams);
        attach::copy_logs(merged, &mut args.sink, &args.cancel).await
    }

    async fn create_extra_files(&self, name: &str, new_files: Vec<ExtraFile>) -> Result<()> {
        let rpaas = self.get_rpaas(name).await?;
        let mut current = self.read_extra_files(&rpaas).await?;
        for file in &new_files {
            if current.contains_key(&file.name) {
                return Err(RpaasError::conflict(format!(
                    "file \"{}\" already exists",
                    file.name
                )));
            }
        }
        for file in new_files {
            current.insert(file.name, file.content);
        }
        self.write_extra_files(&rpaas, current).await
    }

    async fn get_extra_files(&self, name: &str) -> Result<Vec<ExtraFile>> {
        let rpaas = self.get_rpaas(name).await?;
        Ok(self
            .read_extra_files(&rpaas)
            .await?
            .into_iter()
            .map(|(name, content)| ExtraFile { name, content })
            .collect())
    }

    async fn update_extra_files(&self, name: &str, changed: Vec<ExtraFile>) -> Result<()> {
        let rpaas = self.get_rpaas(name).await?;
        let mut current = self.read_extra_files(&rpaas).await?;
        for file in &changed {
            if !current.contains_key(&file.name) {
                return Err(RpaasError::not_found(format!(
                    "file \"{}\" does not exist",
                    file.name
                )));
            }
        }
        for file in changed {
            current.insert(file.name, file.content);
        }
        self.write_extra_files(&rpaas, current).await
    }

    async fn delete_extra_file(&self, name: &str, file_name: &str) -> Result<()> {
        let rpaas = self.get_rpaas(name).await?;
        let mut current = self.read_extra_files(&rpaas).await?;
        if current.remove(file_name).is_none() {
            return Err(RpaasError::not_found(format!(
                "file \"{}\" does not exist",
                file_name
            )));
        }
        self.write_extra_files(&rpaas, current).await
    }

    async fn add_allowed_upstream(&self, name: &str, upstream: AllowedUpstream) -> Result<()> {
        let upstream = upstream.normalized();
        upstream.validate()?;
        let spec = UpstreamSpec::from(&upstream);
        self.modify(name, |instance| {
            if !instance.spec.allowed_upstreams.contains(&spec) {
                instance.spec.allowed_upstreams.push(spec);
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn get_access_control_list(&self, name: &str) -> Result<Vec<AllowedUpstream>> {
        Ok(self.get_rpaas(name).await?.spec.access_control_list())
    }

    async fn delete_allowed_upstream(&self, name: &str, upstream: AllowedUpstream) -> Result<()> {
        let spec = UpstreamSpec::from(&upstream.normalized());
        self.modify(name, |instance| {
            let upstreams = &mut instance.spec.allowed_upstreams;
            let before = upstreams.len();
            upstreams.retain(|u| u != &spec);
            if upstreams.len() == before {
                return Err(RpaasError::not_found(format!(
                    "upstream {} not found",
                    spec.host
                )));
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn get_metadata(&self, name: &str) -> Result<Metadata> {
        let rpaas = self.get_rpaas(name).await?;
        Ok(Metadata {
            labels: to_items(&rpaas.spec.pod_template.labels),
            annotations: to_items(&rpaas.spec.pod_template.annotations),
        })
    }

    async fn set_metadata(&self, name: &str, metadata: Metadata) -> Result<()> {
        metadata.validate()?;
        check_reserved(&metadata.labels)?;
        check_reserved(&metadata.annotations)?;
        self.modify(name, |instance| {
            let template = &mut instance.spec.pod_template;
            for item in &metadata.labels {
                template.labels.insert(item.name.clone(), item.value.clone());
            }
            for item in &metadata.annotations {
                template
                    .annotations
                    .insert(item.name.clone(), item.value.clone());
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn unset_metadata(&self, name: &str, metadata: Metadata) -> Result<()> {
        metadata.validate()?;
        self.modify(name, |instance| {
            let template = &mut instance.spec.pod_template;
            for item in &metadata.labels {
                template.labels.remove(&item.name);
            }
            for item in &metadata.annotations {
                template.annotations.remove(&item.name);
            }
            Ok(())
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_annotation() {
        let tags = vec!["a,b".to_string(), "c".to_string()];
        let raw = encode_tags(&tags);
        assert_eq!(decode_tags(Some(&raw)), tags);
        assert!(decode_tags(None).is_empty());
        assert!(decode_tags(Some(&"not json".to_string())).is_empty());
    }

    #[test]
    fn reserved_metadata_prefix_is_rejected() {
        let items = vec![MetadataItem {
            name: "rpaas.extensions.tsuru.io/team-owner".to_string(),
            value: "x".to_string(),
        }];
        assert!(check_reserved(&items).is_err());
        let items = vec![MetadataItem {
            name: "app.kubernetes.io/part-of".to_string(),
            value: "x".to_string(),
        }];
        assert!(check_reserved(&items).is_ok());
    }

    #[test]
    fn location_keys_include_server_name() {
        let location = Location {
            path: "/".to_string(),
            server_name: Some("example.com".to_string()),
            ..Default::default()
        };
        assert_eq!(location_key(&location), (Some("example.com"), "/"));
    }
}
