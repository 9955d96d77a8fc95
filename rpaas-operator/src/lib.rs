//! rpaas operator adapter
//!
//! The [`Manager`] trait is the single seam between the HTTP control plane and
//! the reverse proxy operator. This crate provides:
//!
//! - [`kubernetes::KubernetesManager`], working on the operator's custom resources
//! - [`factory`], which picks the manager for the cluster a request targets
//! - [`purge`], the cache purge fan-out engine
//!
//! # Usage
//!
//! ```rust,no_run
//! use rpaas_operator::factory::{ClusterFactory, ManagerFactory};
//! use rpaas_operator::kubernetes::KubernetesSettings;
//! use rpaas_operator::purge::PurgeSettings;
//!
//! # async fn example() -> rpaas_models::Result<()> {
//! let factory = ClusterFactory::new(vec![], KubernetesSettings::default(), PurgeSettings::default());
//! let manager = factory.manager(None).await?;
//! let plans = manager.get_plans().await?;
//! # Ok(())
//! # }
//! ```

pub mod crd;
pub mod factory;
pub mod k8s_client;
pub mod kubernetes;
pub mod manager;
pub mod names;
pub mod purge;

#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use factory::{ClusterConfig, ClusterFactory, ManagerFactory, StaticFactory};
pub use manager::{ExecArgs, ExecOutcome, LogArgs, Manager, Replica};
