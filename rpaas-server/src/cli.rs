use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// rpaas - NGINX as a Service control plane
#[derive(Parser, Debug)]
#[command(name = "rpaas", author, version, about, long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(subcommand)]
    pub mode: Mode,
}

/// Where CLI commands send their requests
#[derive(clap::Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Service name, used to go through the Tsuru proxy
    #[arg(short = 's', long, global = true, env = "RPAAS_SERVICE")]
    pub service: Option<String>,

    /// Instance name
    #[arg(short = 'i', long, global = true)]
    pub instance: Option<String>,

    /// Control plane URL; skips Tsuru when set
    #[arg(long, global = true, env = "RPAAS_URL")]
    pub url: Option<String>,

    /// HTTP Basic user for direct access
    #[arg(long, global = true, env = "RPAAS_USER")]
    pub user: Option<String>,

    /// HTTP Basic password for direct access
    #[arg(long, global = true, env = "RPAAS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Target cluster (X-Tsuru-Cluster-Name)
    #[arg(long, global = true, env = "RPAAS_CLUSTER")]
    pub cluster: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Run the API server
    Serve,

    /// Show everything about an instance
    Info {
        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Set the number of replicas
    Scale {
        /// Desired replicas
        #[arg(short, long)]
        quantity: i32,
    },

    /// Manage the autoscaling policy
    Autoscale {
        #[command(subcommand)]
        command: AutoscaleCommand,
    },

    /// Manage NGINX configuration blocks
    Blocks {
        #[command(subcommand)]
        command: BlockCommand,
    },

    /// Manage custom routes
    Routes {
        #[command(subcommand)]
        command: RouteCommand,
    },

    /// Manage TLS certificates
    Certificates {
        #[command(subcommand)]
        command: CertificateCommand,
    },

    /// Manage upstreams the instance may reach
    Acl {
        #[command(subcommand)]
        command: AclCommand,
    },

    /// Manage files mounted next to the NGINX configuration
    ExtraFiles {
        #[command(subcommand)]
        command: ExtraFileCommand,
    },

    /// Purge cached objects
    Purge {
        /// Path to purge
        #[arg(short, long, required_unless_present = "file")]
        path: Option<String>,

        /// Send the path as given instead of its canonical form
        #[arg(long)]
        preserve_path: bool,

        /// Extra request header, as "Name: value" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// JSON file with a list of purges to run in bulk
        #[arg(short, long, conflicts_with = "path")]
        file: Option<PathBuf>,
    },

    /// Run a command in an instance pod
    Exec {
        #[command(flatten)]
        session: SessionArgs,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Open an interactive shell in an instance pod
    Shell {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Run a command in an ephemeral debug container
    Debug {
        #[command(flatten)]
        session: SessionArgs,

        /// Debug container image (server default when omitted)
        #[arg(long)]
        image: Option<String>,

        /// Command and arguments (image entrypoint when omitted)
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Show NGINX logs
    Logs {
        /// Pod name
        #[arg(short, long)]
        pod: Option<String>,

        /// Container name
        #[arg(short, long)]
        container: Option<String>,

        /// Number of lines to show
        #[arg(short = 'n', long)]
        lines: Option<i64>,

        /// Only lines newer than this many seconds
        #[arg(long)]
        since: Option<i64>,

        /// Follow log output
        #[arg(short, long)]
        follow: bool,

        /// Prefix lines with timestamps
        #[arg(long)]
        timestamp: bool,
    },

    /// Resume a stopped instance
    Start,

    /// Scale an instance down to zero, suspending autoscaling
    Stop,

    /// Roll every replica
    Restart,

    /// Manage pod labels and annotations
    Metadata {
        #[command(subcommand)]
        command: MetadataCommand,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Pod name (any ready replica when omitted)
    #[arg(short, long)]
    pub pod: Option<String>,

    /// Container name
    #[arg(short, long)]
    pub container: Option<String>,

    /// Allocate a terminal
    #[arg(short, long)]
    pub tty: bool,

    /// Forward stdin
    #[arg(short = 'I', long)]
    pub interactive: bool,
}

#[derive(Subcommand, Debug)]
pub enum AutoscaleCommand {
    /// Show the current policy
    Get {
        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Create a policy
    Add {
        #[command(flatten)]
        policy: AutoscaleArgs,
    },

    /// Change fields of the current policy
    Update {
        #[command(flatten)]
        policy: AutoscaleArgs,
    },

    /// Remove the policy
    Remove,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct AutoscaleArgs {
    /// Minimum replicas
    #[arg(long)]
    pub min: Option<i32>,

    /// Maximum replicas
    #[arg(long)]
    pub max: Option<i32>,

    /// Target CPU utilization (percent)
    #[arg(long)]
    pub cpu: Option<i32>,

    /// Target memory utilization (percent)
    #[arg(long)]
    pub memory: Option<i32>,

    /// Target requests per second per replica
    #[arg(long)]
    pub rps: Option<i32>,
}

#[derive(Subcommand, Debug)]
pub enum BlockCommand {
    /// List configuration blocks
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Create or replace a block
    Update {
        /// Block context (root, http, server, lua-server, lua-worker)
        #[arg(short, long)]
        name: String,

        /// File holding the block content
        #[arg(short, long)]
        content: PathBuf,

        /// Server name, for server blocks
        #[arg(long)]
        server_name: Option<String>,

        /// Append to the default block instead of replacing it
        #[arg(long)]
        extend: bool,
    },

    /// Remove a block
    Delete {
        /// Block context
        #[arg(short, long)]
        name: String,

        /// Server name, to remove a single host's server block
        #[arg(long)]
        server_name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum RouteCommand {
    /// List routes
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Create or replace a route
    Update {
        /// Location path
        #[arg(short, long)]
        path: String,

        /// Upstream to proxy to
        #[arg(short, long, conflicts_with = "content")]
        destination: Option<String>,

        /// File holding custom NGINX directives for the location
        #[arg(short, long)]
        content: Option<PathBuf>,

        /// Redirect plain HTTP to HTTPS
        #[arg(long)]
        https_only: bool,

        /// Server name
        #[arg(long)]
        server_name: Option<String>,
    },

    /// Remove a route
    Delete {
        /// Location path
        #[arg(short, long)]
        path: String,

        /// Server name
        #[arg(long)]
        server_name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CertificateCommand {
    /// List certificates
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Add or replace a certificate
    Add {
        /// Certificate name ("default" when omitted)
        #[arg(short, long, default_value = "")]
        name: String,

        /// PEM certificate chain
        #[arg(long)]
        cert: PathBuf,

        /// PEM private key
        #[arg(long)]
        key: PathBuf,
    },

    /// Remove a certificate
    Delete {
        /// Certificate name ("default" when omitted)
        #[arg(short, long, default_value = "")]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum AclCommand {
    /// List allowed upstreams
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Allow an upstream
    Add {
        /// Host name or IP
        #[arg(long)]
        host: String,

        /// Port (any when omitted)
        #[arg(short, long)]
        port: Option<i32>,
    },

    /// Revoke an upstream
    Remove {
        /// Host name or IP
        #[arg(long)]
        host: String,

        /// Port
        #[arg(short, long)]
        port: Option<i32>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ExtraFileCommand {
    /// List file names
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Print one file
    Get {
        /// File name
        name: String,
    },

    /// Upload new files
    Add {
        /// Local files; stored under their file name
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Replace existing files
    Update {
        /// Local files; stored under their file name
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Remove files
    Delete {
        /// File names
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum MetadataCommand {
    /// Show labels and annotations
    Get {
        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Set labels and annotations, as key=value
    Set {
        /// Label (repeatable)
        #[arg(short, long = "label")]
        labels: Vec<String>,

        /// Annotation (repeatable)
        #[arg(short, long = "annotation")]
        annotations: Vec<String>,
    },

    /// Remove labels and annotations by key
    Unset {
        /// Label key (repeatable)
        #[arg(short, long = "label")]
        labels: Vec<String>,

        /// Annotation key (repeatable)
        #[arg(short, long = "annotation")]
        annotations: Vec<String>,
    },
}
