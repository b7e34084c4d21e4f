//! Remote shell access to devices

pub mod executor;
pub mod log;
pub mod probe;
pub mod ssh;

pub use executor::{ExecutionResult, RemoteExecutor, RemoteTarget};
pub use log::AttemptLog;
pub use probe::ProbeOutcome;
pub use ssh::{SshExecutor, SshOptions};
