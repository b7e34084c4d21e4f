//! Install procedure resolution

pub mod adapter;
pub mod environment;

pub use adapter::{
    resolve, InstallProcedureDescriptor, InstallProcedureInvocation, InstallerAdapter,
    PayloadSource,
};
pub use environment::InstallEnvironment;
