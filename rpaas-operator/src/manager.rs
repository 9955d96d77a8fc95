//! The capability set the control plane consumes from the operator
//!
//! Handlers only ever talk to a `dyn Manager`. The Kubernetes implementation
//! lives in [`crate::kubernetes`]; tests use the in-memory one from
//! [`crate::fake`].
//!
//! Cancellation: plain request/response methods are cancelled by dropping the
//! future. Streaming methods run until the command ends, the peer goes away or
//! the [`CancellationToken`] in their args fires, whichever comes first.

use std::fmt;

use async_trait::async_trait;
use rpaas_models::{
    AllowedUpstream, Autoscale, BindAppArgs, BlockContext, CertificateInfo, ConfigurationBlock,
    CreateArgs, ExecOptions, ExtraFile, Flavor, Instance, InstanceInfo, KeyPair, LogOptions,
    Metadata, Plan, PodStatus, PurgeArgs, Result, Route, TerminalSize, UpdateArgs,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ============================================================================
// Streaming arguments
// ============================================================================

/// Everything an exec or debug session needs: what to run plus the IO ends.
pub struct ExecArgs {
    pub options: ExecOptions,
    /// `None` unless the session is interactive
    pub stdin: Option<BoxedReader>,
    pub stdout: BoxedWriter,
    /// Ignored when a TTY is requested; the terminal merges both streams
    pub stderr: BoxedWriter,
    /// Terminal size updates after the initial one from `options`
    pub resize: Option<mpsc::Receiver<TerminalSize>>,
    pub cancel: CancellationToken,
}

impl fmt::Debug for ExecArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecArgs")
            .field("options", &self.options)
            .field("stdin", &self.stdin.is_some())
            .field("resize", &self.resize.is_some())
            .finish_non_exhaustive()
    }
}

/// How a remote command ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub exit_code: Option<i32>,
}

impl ExecOutcome {
    pub fn success() -> Self {
        Self { exit_code: Some(0) }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.exit_code, None | Some(0))
    }
}

pub struct LogArgs {
    pub options: LogOptions,
    pub sink: BoxedWriter,
    pub cancel: CancellationToken,
}

impl fmt::Debug for LogArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogArgs")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// One live data plane replica the purge engine can reach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    pub name: String,
    pub ip: String,
}

// ============================================================================
// Manager
// ============================================================================

#[async_trait]
pub trait Manager: Send + Sync {
    // Instances
    async fn create_instance(&self, args: CreateArgs) -> Result<()>;
    async fn delete_instance(&self, name: &str) -> Result<()>;
    async fn update_instance(&self, name: &str, args: UpdateArgs) -> Result<()>;
    async fn get_instance(&self, name: &str) -> Result<Instance>;
    async fn get_instance_info(&self, name: &str) -> Result<InstanceInfo>;
    async fn get_instance_address(&self, name: &str) -> Result<String>;
    async fn get_instance_status(&self, name: &str) -> Result<Vec<PodStatus>>;

    async fn get_plans(&self) -> Result<Vec<Plan>>;
    async fn get_flavors(&self) -> Result<Vec<Flavor>>;

    async fn scale(&self, name: &str, replicas: i32) -> Result<()>;
    async fn start(&self, name: &str) -> Result<()>;
    async fn stop(&self, name: &str) -> Result<()>;
    async fn restart(&self, name: &str) -> Result<()>;

    // Certificates
    async fn update_certificate(&self, name: &str, cert_name: &str, pair: KeyPair) -> Result<()>;
    async fn get_certificates(&self, name: &str) -> Result<Vec<CertificateInfo>>;
    async fn delete_certificate(&self, name: &str, cert_name: &str) -> Result<()>;

    // Blocks and routes
    async fn list_blocks(&self, name: &str) -> Result<Vec<ConfigurationBlock>>;
    async fn update_block(&self, name: &str, block: ConfigurationBlock) -> Result<()>;
    /// With a server name only that host's server block is removed.
    async fn delete_block(
        &self,
        name: &str,
        context: BlockContext,
        server_name: Option<&str>,
    ) -> Result<()>;

    async fn get_routes(&self, name: &str) -> Result<Vec<Route>>;
    async fn update_route(&self, name: &str, route: Route) -> Result<()>;
    async fn delete_route(&self, name: &str, server_name: Option<&str>, path: &str) -> Result<()>;

    // Autoscale
    async fn get_autoscale(&self, name: &str) -> Result<Autoscale>;
    async fn create_autoscale(&self, name: &str, policy: Autoscale) -> Result<()>;
    async fn update_autoscale(&self, name: &str, patch: Autoscale) -> Result<()>;
    async fn delete_autoscale(&self, name: &str) -> Result<()>;

    // Binds
    async fn bind_app(&self, name: &str, args: BindAppArgs) -> Result<()>;
    async fn unbind_app(&self, name: &str, app_name: &str) -> Result<()>;

    // Cache purge
    /// Live replicas the purge fan-out should reach.
    async fn purge_targets(&self, name: &str) -> Result<Vec<Replica>>;
    /// Purges one path on every live replica, returning how many acknowledged.
    async fn purge_cache(&self, name: &str, args: PurgeArgs) -> Result<usize>;

    // Streaming
    async fn exec(&self, name: &str, args: ExecArgs) -> Result<ExecOutcome>;
    async fn debug(&self, name: &str, args: ExecArgs) -> Result<ExecOutcome>;
    async fn log(&self, name: &str, args: LogArgs) -> Result<()>;

    // Extra files
    async fn create_extra_files(&self, name: &str, files: Vec<ExtraFile>) -> Result<()>;
    async fn get_extra_files(&self, name: &str) -> Result<Vec<ExtraFile>>;
    async fn update_extra_files(&self, name: &str, files: Vec<ExtraFile>) -> Result<()>;
    async fn delete_extra_file(&self, name: &str, file_name: &str) -> Result<()>;

    // Access control list
    async fn add_allowed_upstream(&self, name: &str, upstream: AllowedUpstream) -> Result<()>;
    async fn get_access_control_list(&self, name: &str) -> Result<Vec<AllowedUpstream>>;
    async fn delete_allowed_upstream(&self, name: &str, upstream: AllowedUpstream) -> Result<()>;

    // Metadata
    async fn get_metadata(&self, name: &str) -> Result<Metadata>;
    async fn set_metadata(&self, name: &str, metadata: Metadata) -> Result<()>;
    async fn unset_metadata(&self, name: &str, metadata: Metadata) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_exit_code_counts_as_success() {
        assert!(ExecOutcome::default().is_success());
        assert!(ExecOutcome::success().is_success());
        assert!(!ExecOutcome { exit_code: Some(2) }.is_success());
    }
}
