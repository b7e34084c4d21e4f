//! Durable deployment state

pub mod attempt;
pub mod store;

pub use attempt::{AttemptStatus, DeploymentAttempt};
pub use store::{DeploymentState, DispatchMode, RunFilter, RunMetadata, StateStore};
