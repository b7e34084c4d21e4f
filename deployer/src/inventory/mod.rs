//! Device inventory

pub mod device;
pub mod loader;

pub use device::{Credential, DeviceRecord, Platform};
pub use loader::{load_inventory, parse_inventory};
