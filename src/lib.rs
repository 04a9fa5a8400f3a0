//! rune-stack - deploys Compose-style stacks onto a Swarm-compatible cluster
//!
//! A stack is a named set of services, networks, secrets and configs that
//! share the `com.docker.stack.namespace` label. Deploying one involves:
//!
//! - Loading and merging compose files
//! - Materializing content-addressed secrets and configs
//! - Converting the project into orchestrator specs
//! - Reconciling those specs with the cluster
//! - Waiting for services to converge

pub mod cluster;
pub mod compose;
pub mod convert;
pub mod deploy;
pub mod error;
pub mod secrets;
pub mod swarm;

pub use error::{Result, StackError};
