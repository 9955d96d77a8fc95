//! Client library for the rpaas control plane
//!
//! Talks to the API directly (base URL plus HTTP Basic) or through the Tsuru
//! service proxy (bearer token). Server errors come back as the same
//! [`rpaas_models::RpaasError`] kinds the server maps from.

pub mod client;
pub mod error;
pub mod streaming;
pub mod target;

pub use client::RpaasClient;
pub use error::{ClientError, Result};
pub use streaming::{Event, ExecSession, SessionEnd, SessionReader, SessionWriter};
pub use target::{Addressing, Credentials};
