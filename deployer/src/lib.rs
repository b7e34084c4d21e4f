//! Fleet Deployer Library
//!
//! Rolls the Zabbix monitoring agent out to a fleet of edge devices over
//! SSH, with resumable per-device state.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod installer;
pub mod inventory;
pub mod logs;
pub mod remote;
pub mod state;
pub mod storage;
pub mod utils;
pub mod verify;
pub mod zabbix;
