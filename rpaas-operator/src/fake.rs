//! In-memory [`Manager`] for tests
//!
//! Keeps every instance in a map, records the name of each method called and
//! lets a test inject failures or script exec sessions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::BoxFuture;
use rpaas_models::{
    AllowedUpstream, Autoscale, Bind, BindAppArgs, BlockContext, CertificateInfo,
    ConfigurationBlock, CreateArgs, ExtraFile, Flavor, Instance, InstanceInfo, KeyPair, Metadata,
    MetadataItem, Plan, PodStatus, PurgeArgs, Result, Route, RpaasError, UpdateArgs,
};
use tokio::io::AsyncWriteExt;

use crate::manager::{ExecArgs, ExecOutcome, LogArgs, Manager, Replica};

pub type ExecHandler =
    Arc<dyn Fn(ExecArgs) -> BoxFuture<'static, Result<ExecOutcome>> + Send + Sync>;

type Failure = Arc<dyn Fn() -> RpaasError + Send + Sync>;

#[derive(Debug, Clone, Default)]
struct FakeInstance {
    instance: Instance,
    blocks: Vec<ConfigurationBlock>,
    routes: Vec<Route>,
    certificates: BTreeMap<String, String>,
    autoscale: Option<Autoscale>,
    binds: Vec<Bind>,
    acl: Vec<AllowedUpstream>,
    files: BTreeMap<String, Vec<u8>>,
    metadata: Metadata,
}

#[derive(Default)]
struct FakeState {
    instances: BTreeMap<String, FakeInstance>,
    plans: Vec<Plan>,
    flavors: Vec<Flavor>,
    replicas: usize,
    failing_purge_paths: HashSet<String>,
    log_lines: Vec<String>,
}

#[derive(Default)]
pub struct FakeManager {
    state: Mutex<FakeState>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, Failure>>,
    exec_handler: Mutex<Option<ExecHandler>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn instance_not_found(name: &str) -> RpaasError {
    RpaasError::not_found(format!("rpaas instance \"{}\" not found", name))
}

impl FakeManager {
    pub fn new() -> Self {
        let manager = Self::default();
        {
            let mut state = lock(&manager.state);
            state.replicas = 1;
            state.plans = vec![Plan {
                name: "small".to_string(),
                description: "small plan".to_string(),
                default: true,
            }];
            state.flavors = vec![Flavor {
                name: "orange".to_string(),
                description: "orange flavor".to_string(),
            }];
        }
        manager
    }

    pub fn with_instance(self, name: &str) -> Self {
        lock(&self.state).instances.insert(
            name.to_string(),
            FakeInstance {
                instance: Instance {
                    name: name.to_string(),
                    plan: "small".to_string(),
                    team: "team-one".to_string(),
                    replicas: Some(1),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        self
    }

    /// Number of replicas reported by `purge_targets`
    pub fn with_replicas(self, replicas: usize) -> Self {
        lock(&self.state).replicas = replicas;
        self
    }

    pub fn with_log_lines(self, lines: &[&str]) -> Self {
        lock(&self.state).log_lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Purging `path` fails on the second replica
    pub fn fail_purge_for(&self, path: &str) {
        lock(&self.state).failing_purge_paths.insert(path.to_string());
    }

    /// Makes every later call to `method` return the error built by `err`.
    pub fn fail(&self, method: &str, err: impl Fn() -> RpaasError + Send + Sync + 'static) {
        lock(&self.failures).insert(method.to_string(), Arc::new(err));
    }

    pub fn on_exec<F>(&self, handler: F)
    where
        F: Fn(ExecArgs) -> BoxFuture<'static, Result<ExecOutcome>> + Send + Sync + 'static,
    {
        *lock(&self.exec_handler) = Some(Arc::new(handler));
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn was_called(&self, method: &str) -> bool {
        lock(&self.calls).iter().any(|c| c == method)
    }

    pub fn autoscale_of(&self, name: &str) -> Option<Autoscale> {
        lock(&self.state).instances.get(name).and_then(|i| i.autoscale.clone())
    }

    pub fn certificate_of(&self, name: &str, cert_name: &str) -> Option<String> {
        lock(&self.state)
            .instances
            .get(name)
            .and_then(|i| i.certificates.get(cert_name).cloned())
    }

    fn record(&self, method: &str) -> Result<()> {
        lock(&self.calls).push(method.to_string());
        match lock(&self.failures).get(method) {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }

    fn with<T>(&self, name: &str, f: impl FnOnce(&mut FakeInstance) -> Result<T>) -> Result<T> {
        let mut state = lock(&self.state);
        let instance = state
            .instances
            .get_mut(name)
            .ok_or_else(|| instance_not_found(name))?;
        f(instance)
    }
}

fn merge_items(target: &mut Vec<MetadataItem>, items: &[MetadataItem]) {
    for item in items {
        match target.iter_mut().find(|t| t.name == item.name) {
            Some(existing) => existing.value = item.value.clone(),
            None => target.push(item.clone()),
        }
    }
}

#[async_trait]
impl Manager for FakeManager {
    async fn create_instance(&self, args: CreateArgs) -> Result<()> {
        self.record("create_instance")?;
        let mut state = lock(&self.state);
        if state.instances.contains_key(&args.name) {
            return Err(RpaasError::conflict(format!(
                "rpaas instance named \"{}\" already exists",
                args.name
            )));
        }
        let flavors = args.all_flavors();
        state.instances.insert(
            args.name.clone(),
            FakeInstance {
                instance: Instance {
                    name: args.name,
                    plan: args.plan,
                    team: args.team,
                    description: args.description,
                    tags: args.tags,
                    flavors,
                    replicas: Some(1),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn delete_instance(&self, name: &str) -> Result<()> {
        self.record("delete_instance")?;
        lock(&self.state)
            .instances
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| instance_not_found(name))
    }

    async fn update_instance(&self, name: &str, args: UpdateArgs) -> Result<()> {
        self.record("update_instance")?;
        let flavors = args.all_flavors();
        self.with(name, |i| {
            if !args.plan.is_empty() {
                i.instance.plan = args.plan;
            }
            if !args.team.is_empty() {
                i.instance.team = args.team;
            }
            i.instance.description = args.description;
            i.instance.tags = args.tags;
            i.instance.flavors = flavors;
            Ok(())
        })
    }

    async fn get_instance(&self, name: &str) -> Result<Instance> {
        self.record("get_instance")?;
        self.with(name, |i| Ok(i.instance.clone()))
    }

    async fn get_instance_info(&self, name: &str) -> Result<InstanceInfo> {
        self.record("get_instance_info")?;
        self.with(name, |i| {
            Ok(InstanceInfo {
                name: i.instance.name.clone(),
                team: i.instance.team.clone(),
                plan: i.instance.plan.clone(),
                description: i.instance.description.clone(),
                tags: i.instance.tags.clone(),
                flavors: i.instance.flavors.clone(),
                replicas: i.instance.replicas,
                shutdown: i.instance.shutdown,
                blocks: i.blocks.clone(),
                routes: i.routes.clone(),
                autoscale: i.autoscale.clone(),
                binds: i.binds.clone(),
                acls: i.acl.clone(),
                annotations: i.metadata.annotations.clone(),
                labels: i.metadata.labels.clone(),
                ..Default::default()
            })
        })
    }

    async fn get_instance_address(&self, name: &str) -> Result<String> {
        self.record("get_instance_address")?;
        self.with(name, |_| Ok("127.0.0.1".to_string()))
    }

    async fn get_instance_status(&self, name: &str) -> Result<Vec<PodStatus>> {
        self.record("get_instance_status")?;
        let replicas = lock(&self.state).replicas;
        self.with(name, |_| {
            Ok((0..replicas)
                .map(|n| PodStatus {
                    name: format!("{}-{}", name, n),
                    address: format!("10.0.0.{}", n + 1),
                    ready: true,
                })
                .collect())
        })
    }

    async fn get_plans(&self) -> Result<Vec<Plan>> {
        self.record("get_plans")?;
        Ok(lock(&self.state).plans.clone())
    }

    async fn get_flavors(&self) -> Result<Vec<Flavor>> {
        self.record("get_flavors")?;
        Ok(lock(&self.state).flavors.clone())
    }

    async fn scale(&self, name: &str, replicas: i32) -> Result<()> {
        self.record("scale")?;
        self.with(name, |i| {
            i.instance.replicas = Some(replicas);
            Ok(())
        })
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.record("start")?;
        self.with(name, |i| {
            i.instance.shutdown = false;
            Ok(())
        })
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.record("stop")?;
        self.with(name, |i| {
            i.instance.shutdown = true;
            Ok(())
        })
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.record("restart")?;
        self.with(name, |_| Ok(()))
    }

    async fn update_certificate(&self, name: &str, cert_name: &str, pair: KeyPair) -> Result<()> {
        self.record("update_certificate")?;
        self.with(name, |i| {
            i.certificates
                .insert(cert_name.to_string(), pair.certificate_pem().to_string());
            Ok(())
        })
    }

    async fn get_certificates(&self, name: &str) -> Result<Vec<CertificateInfo>> {
        self.record("get_certificates")?;
        self.with(name, |i| {
            Ok(i.certificates
                .iter()
                .map(|(name, pem)| CertificateInfo {
                    name: name.clone(),
                    certificate: pem.clone(),
                })
                .collect())
        })
    }

    async fn delete_certificate(&self, name: &str, cert_name: &str) -> Result<()> {
        self.record("delete_certificate")?;
        self.with(name, |i| {
            i.certificates.remove(cert_name).map(|_| ()).ok_or_else(|| {
                RpaasError::not_found(format!("certificate \"{}\" does not exist", cert_name))
            })
        })
    }

    async fn list_blocks(&self, name: &str) -> Result<Vec<ConfigurationBlock>> {
        self.record("list_blocks")?;
        self.with(name, |i| Ok(i.blocks.clone()))
    }

    async fn update_block(&self, name: &str, block: ConfigurationBlock) -> Result<()> {
        self.record("update_block")?;
        self.with(name, |i| {
            i.blocks
                .retain(|b| !(b.context == block.context && b.server_name == block.server_name));
            i.blocks.push(block);
            Ok(())
        })
    }

    async fn delete_block(
        &self,
        name: &str,
        context: BlockContext,
        server_name: Option<&str>,
    ) -> Result<()> {
        self.record("delete_block")?;
        self.with(name, |i| {
            let before = i.blocks.len();
            i.blocks
                .retain(|b| b.context != context || b.server_name.as_deref() != server_name);
            if i.blocks.len() == before {
                return Err(RpaasError::not_found(format!(
                    "block \"{}\" does not exist",
                    context
                )));
            }
            Ok(())
        })
    }

    async fn get_routes(&self, name: &str) -> Result<Vec<Route>> {
        self.record("get_routes")?;
        self.with(name, |i| Ok(i.routes.clone()))
    }

    async fn update_route(&self, name: &str, route: Route) -> Result<()> {
        self.record("update_route")?;
        self.with(name, |i| {
            match i
                .routes
                .iter_mut()
                .find(|r| r.same_key(route.server_name.as_deref(), &route.path))
            {
                Some(existing) => *existing = route,
                None => i.routes.push(route),
            }
            Ok(())
        })
    }

    async fn delete_route(&self, name: &str, server_name: Option<&str>, path: &str) -> Result<()> {
        self.record("delete_route")?;
        self.with(name, |i| {
            let before = i.routes.len();
            i.routes.retain(|r| !r.same_key(server_name, path));
            if i.routes.len() == before {
                return Err(RpaasError::not_found("path does not exist"));
            }
            Ok(())
        })
    }

    async fn get_autoscale(&self, name: &str) -> Result<Autoscale> {
        self.record("get_autoscale")?;
        self.with(name, |i| {
            i.autoscale
                .clone()
                .ok_or_else(|| RpaasError::not_found("autoscale not found"))
        })
    }

    async fn create_autoscale(&self, name: &str, policy: Autoscale) -> Result<()> {
        self.record("create_autoscale")?;
        policy.validate()?;
        self.with(name, |i| {
            i.autoscale = Some(policy);
            Ok(())
        })
    }

    async fn update_autoscale(&self, name: &str, patch: Autoscale) -> Result<()> {
        self.record("update_autoscale")?;
        self.with(name, |i| {
            let merged = i.autoscale.clone().unwrap_or_default().merge(&patch);
            merged.validate()?;
            i.autoscale = Some(merged);
            Ok(())
        })
    }

    async fn delete_autoscale(&self, name: &str) -> Result<()> {
        self.record("delete_autoscale")?;
        self.with(name, |i| {
            i.autoscale = None;
            Ok(())
        })
    }

    async fn bind_app(&self, name: &str, args: BindAppArgs) -> Result<()> {
        self.record("bind_app")?;
        self.with(name, |i| {
            if i.binds.iter().any(|b| b.name == args.app_name) {
                return Err(RpaasError::conflict(
                    "instance already bound with this application",
                ));
            }
            let host = args
                .app_internal_hosts
                .first()
                .or_else(|| args.app_hosts.first())
                .cloned()
                .unwrap_or_default();
            i.binds.push(Bind {
                name: args.app_name,
                host,
            });
            Ok(())
        })
    }

    async fn unbind_app(&self, name: &str, app_name: &str) -> Result<()> {
        self.record("unbind_app")?;
        self.with(name, |i| {
            let before = i.binds.len();
            i.binds.retain(|b| b.name != app_name);
            if i.binds.len() == before {
                return Err(RpaasError::not_found("app not found"));
            }
            Ok(())
        })
    }

    async fn purge_targets(&self, name: &str) -> Result<Vec<Replica>> {
        self.record("purge_targets")?;
        let replicas = lock(&self.state).replicas;
        self.with(name, |_| {
            Ok((0..replicas)
                .map(|n| Replica {
                    name: format!("{}-{}", name, n),
                    ip: "127.0.0.1".to_string(),
                })
                .collect())
        })
    }

    async fn purge_cache(&self, name: &str, args: PurgeArgs) -> Result<usize> {
        self.record("purge_cache")?;
        let (replicas, failing) = {
            let state = lock(&self.state);
            (state.replicas, state.failing_purge_paths.contains(&args.path))
        };
        self.with(name, |_| Ok(()))?;
        // yield so bulk items really interleave
        tokio::task::yield_now().await;
        if failing {
            return Err(RpaasError::Internal(anyhow::anyhow!(
                "failed to purge {} on 1 of {} servers: {}-1: timeout",
                args.path,
                replicas,
                name
            )));
        }
        Ok(replicas)
    }

    async fn exec(&self, name: &str, args: ExecArgs) -> Result<ExecOutcome> {
        self.record("exec")?;
        self.run_exec(name, args).await
    }

    async fn debug(&self, name: &str, args: ExecArgs) -> Result<ExecOutcome> {
        self.record("debug")?;
        self.run_exec(name, args).await
    }

    async fn log(&self, name: &str, mut args: LogArgs) -> Result<()> {
        self.record("log")?;
        let lines = lock(&self.state).log_lines.clone();
        self.with(name, |_| Ok(()))?;
        for line in lines {
            args.sink
                .write_all(format!("{}\n", line).as_bytes())
                .await
                .map_err(anyhow::Error::from)?;
        }
        if args.options.follow {
            args.cancel.cancelled().await;
        }
        Ok(())
    }

    async fn create_extra_files(&self, name: &str, files: Vec<ExtraFile>) -> Result<()> {
        self.record("create_extra_files")?;
        self.with(name, |i| {
            if let Some(existing) = files.iter().find(|f| i.files.contains_key(&f.name)) {
                return Err(RpaasError::conflict(format!(
                    "file \"{}\" already exists",
                    existing.name
                )));
            }
            for file in files {
                i.files.insert(file.name, file.content);
            }
            Ok(())
        })
    }

    async fn get_extra_files(&self, name: &str) -> Result<Vec<ExtraFile>> {
        self.record("get_extra_files")?;
        self.with(name, |i| {
            Ok(i.files
                .iter()
                .map(|(name, content)| ExtraFile {
                    name: name.clone(),
                    content: content.clone(),
                })
                .collect())
        })
    }

    async fn update_extra_files(&self, name: &str, files: Vec<ExtraFile>) -> Result<()> {
        self.record("update_extra_files")?;
        self.with(name, |i| {
            if let Some(missing) = files.iter().find(|f| !i.files.contains_key(&f.name)) {
                return Err(RpaasError::not_found(format!(
                    "file \"{}\" does not exist",
                    missing.name
                )));
            }
            for file in files {
                i.files.insert(file.name, file.content);
            }
            Ok(())
        })
    }

    async fn delete_extra_file(&self, name: &str, file_name: &str) -> Result<()> {
        self.record("delete_extra_file")?;
        self.with(name, |i| {
            i.files.remove(file_name).map(|_| ()).ok_or_else(|| {
                RpaasError::not_found(format!("file \"{}\" does not exist", file_name))
            })
        })
    }

    async fn add_allowed_upstream(&self, name: &str, upstream: AllowedUpstream) -> Result<()> {
        self.record("add_allowed_upstream")?;
        self.with(name, |i| {
            if !i.acl.contains(&upstream) {
                i.acl.push(upstream);
            }
            Ok(())
        })
    }

    async fn get_access_control_list(&self, name: &str) -> Result<Vec<AllowedUpstream>> {
        self.record("get_access_control_list")?;
        self.with(name, |i| Ok(i.acl.clone()))
    }

    async fn delete_allowed_upstream(&self, name: &str, upstream: AllowedUpstream) -> Result<()> {
        self.record("delete_allowed_upstream")?;
        self.with(name, |i| {
            let before = i.acl.len();
            i.acl.retain(|u| u != &upstream);
            if i.acl.len() == before {
                return Err(RpaasError::not_found(format!(
                    "upstream {} not found",
                    upstream.host
                )));
            }
            Ok(())
        })
    }

    async fn get_metadata(&self, name: &str) -> Result<Metadata> {
        self.record("get_metadata")?;
        self.with(name, |i| Ok(i.metadata.clone()))
    }

    async fn set_metadata(&self, name: &str, metadata: Metadata) -> Result<()> {
        self.record("set_metadata")?;
        self.with(name, |i| {
            merge_items(&mut i.metadata.labels, &metadata.labels);
            merge_items(&mut i.metadata.annotations, &metadata.annotations);
            Ok(())
        })
    }

    async fn unset_metadata(&self, name: &str, metadata: Metadata) -> Result<()> {
        self.record("unset_metadata")?;
        self.with(name, |i| {
            let labels: HashSet<&str> = metadata.labels.iter().map(|l| l.name.as_str()).collect();
            let annotations: HashSet<&str> =
                metadata.annotations.iter().map(|a| a.name.as_str()).collect();
            i.metadata.labels.retain(|l| !labels.contains(l.name.as_str()));
            i.metadata
                .annotations
                .retain(|a| !annotations.contains(a.name.as_str()));
            Ok(())
        })
    }
}

impl FakeManager {
    async fn run_exec(&self, name: &str, mut args: ExecArgs) -> Result<ExecOutcome> {
        self.with(name, |_| Ok(()))?;
        let handler = lock(&self.exec_handler).clone();
        match handler {
            Some(handler) => handler(args).await,
            None => {
                let output = format!("{}\n", args.options.command.join(" "));
                args.stdout
                    .write_all(output.as_bytes())
                    .await
                    .map_err(anyhow::Error::from)?;
                Ok(ExecOutcome::success())
            }
        }
    }
}
