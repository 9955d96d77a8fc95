//! Shared value types for the rpaas control plane.
//!
//! Everything in here is plain data plus validation. The HTTP server, the
//! operator adapter and the client all speak these types.

pub mod acl;
pub mod autoscale;
pub mod block;
pub mod certificate;
pub mod error;
pub mod exec;
pub mod extra_files;
pub mod info;
pub mod instance;
pub mod purge;
pub mod route;

pub use acl::AllowedUpstream;
pub use autoscale::Autoscale;
pub use block::{BlockContext, BlockList, ConfigurationBlock, DeleteBlockArgs, UpdateBlockArgs};
pub use certificate::{CertificateInfo, KeyPair};
pub use error::{ErrorKind, Result, RpaasError};
pub use exec::{ExecOptions, LogOptions, TerminalSize};
pub use extra_files::ExtraFile;
pub use info::{InstanceInfo, PodStatus};
pub use instance::{
    Bind, BindAppArgs, CreateArgs, Flavor, Instance, Metadata, MetadataItem, Plan, ScaleArgs,
    ServiceInfoItem, UnbindAppArgs, UpdateArgs,
};
pub use purge::{PurgeArgs, PurgeBulkResult};
pub use route::{DeleteRouteArgs, Route, RouteList};
