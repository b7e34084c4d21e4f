//! Monitoring server API

pub mod client;
pub mod hosts;
