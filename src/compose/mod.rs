//! Compose project model and loader
//!
//! The deployer consumes a [`Project`]: services, networks, volumes, secrets
//! and configs, plus the `sensitive` and `local_configs` service extensions
//! that the materializer expands into generated secrets and configs.

pub mod config;
pub mod parser;
pub mod units;

pub use config::{Project, Resource, ServiceConfig};
pub use parser::ComposeParser;
