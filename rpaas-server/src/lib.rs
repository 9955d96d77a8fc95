//! rpaas control plane
//!
//! HTTP façade over the rpaas operator: resource endpoints, streaming
//! exec/debug/log sessions, cache purge, plus the operator CLI.

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod server;
pub mod streaming;
