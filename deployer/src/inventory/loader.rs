//! Inventory loader
//!
//! Parses the tabular device list exported from the fleet spreadsheet.
//! Header names are matched case-insensitively; unknown columns are ignored
//! and missing optional columns default to empty strings.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::net::Ipv4Addr;
use std::path::Path;

use ipnet::Ipv4Net;
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::inventory::device::{Credential, DeviceRecord, Platform};

/// Columns every inventory must carry
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "device_name",
    "platform",
    "tailscale_ip",
    "location",
    "ssh_user",
    "ssh_password",
];

/// Address range the mesh VPN hands out
const MESH_VPN_RANGE: &str = "100.64.0.0/10";

/// Load and validate an inventory file
pub fn load_inventory(path: &Path) -> Result<Vec<DeviceRecord>, DeployError> {
    let file = std::fs::File::open(path).map_err(|e| DeployError::InventoryError {
        row: 0,
        message: format!("cannot open {}: {}", path.display(), e),
    })?;
    let devices = parse_inventory(file)?;
    debug!("Loaded {} devices from {}", devices.len(), path.display());
    Ok(devices)
}

/// Parse inventory rows from any reader, preserving file order
pub fn parse_inventory<R: Read>(reader: R) -> Result<Vec<DeviceRecord>, DeployError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers().map_err(|e| DeployError::InventoryError {
        row: 1,
        message: format!("unreadable header row: {}", e),
    })?;
    let columns: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim_start_matches('\u{feff}').trim().to_lowercase(), i))
        .collect();

    let mut missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !columns.contains_key(*c))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(DeployError::InventoryError {
            row: 1,
            message: format!("missing required columns: {}", missing.join(", ")),
        });
    }

    let mesh_range: Ipv4Net = MESH_VPN_RANGE
        .parse()
        .map_err(|e| DeployError::Internal(format!("bad mesh range: {}", e)))?;

    let mut devices = Vec::new();
    let mut seen = HashSet::new();

    for (index, record) in csv_reader.records().enumerate() {
        // Header is row 1
        let row = index + 2;
        let record = record.map_err(|e| DeployError::InventoryError {
            row,
            message: e.to_string(),
        })?;

        let cell = |name: &str| -> String {
            columns
                .get(name)
                .and_then(|&i| record.get(i))
                .unwrap_or_default()
                .to_string()
        };
        let required = |name: &str| -> Result<String, DeployError> {
            let value = cell(name);
            if value.is_empty() {
                Err(DeployError::InventoryError {
                    row,
                    message: format!("{} is empty", name),
                })
            } else {
                Ok(value)
            }
        };

        // Rows without a name are padding or notes
        let device_name = cell("device_name");
        if device_name.is_empty() {
            debug!("Row {} has no device_name, skipping", row);
            continue;
        }
        let platform: Platform =
            required("platform")?
                .parse()
                .map_err(|e: DeployError| DeployError::InventoryError {
                    row,
                    message: format!("{}: {}", device_name, e),
                })?;
        let tailscale_ip = required("tailscale_ip")?;
        let remote_address: Ipv4Addr =
            tailscale_ip.parse().map_err(|_| DeployError::InventoryError {
                row,
                message: format!("{}: tailscale_ip '{}' is not an IPv4 address", device_name, tailscale_ip),
            })?;
        if !mesh_range.contains(&remote_address) {
            warn!(
                "Row {} ({}): {} is outside the mesh VPN range {}",
                row, device_name, remote_address, MESH_VPN_RANGE
            );
        }

        if !seen.insert(device_name.clone()) {
            return Err(DeployError::InventoryError {
                row,
                message: format!("duplicate device_name '{}'", device_name),
            });
        }

        devices.push(DeviceRecord {
            platform,
            remote_address,
            location: required("location")?,
            client: cell("client"),
            chain: cell("chain"),
            asset_tag: cell("asset_tag"),
            latitude: cell("latitude"),
            longitude: cell("longitude"),
            remote_user: required("ssh_user")?,
            credential: Credential::parse(&required("ssh_password")?),
            device_name,
        });
    }

    Ok(devices)
}
