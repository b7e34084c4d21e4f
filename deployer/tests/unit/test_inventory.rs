//! Inventory loader tests

use std::io::Write;

use fleet_deployer::errors::DeployError;
use fleet_deployer::inventory::device::{Credential, Platform};
use fleet_deployer::inventory::loader::{load_inventory, parse_inventory};

const HEADER: &str =
    "device_name,platform,tailscale_ip,location,client,chain,asset_tag,latitude,longitude,ssh_user,ssh_password\n";

#[test]
fn test_one_record_per_row_in_file_order() {
    let mut csv = HEADER.to_string();
    let names: Vec<String> = (0..25).map(|i| format!("dev-{:02}", 24 - i)).collect();
    for (i, name) in names.iter().enumerate() {
        let platform = ["raspberrypi", "radxa", "macos"][i % 3];
        csv.push_str(&format!("{},{},100.64.1.{},site,,,,,,user,pw\n", name, platform, i + 1));
    }

    let devices = parse_inventory(csv.as_bytes()).unwrap();

    let parsed: Vec<&str> = devices.iter().map(|d| d.device_name.as_str()).collect();
    assert_eq!(parsed, names.iter().map(String::as_str).collect::<Vec<_>>());
}

#[test]
fn test_duplicate_device_name_is_rejected() {
    let csv = format!(
        "{}rpi-001,raspberrypi,100.64.0.1,london,,,,,,pi,pw\n\
         rpi-002,raspberrypi,100.64.0.2,london,,,,,,pi,pw\n\
         rpi-001,radxa,100.64.0.3,paris,,,,,,rock,pw\n",
        HEADER
    );
    match parse_inventory(csv.as_bytes()).unwrap_err() {
        DeployError::InventoryError { row, message } => {
            assert_eq!(row, 4);
            assert!(message.contains("rpi-001"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_unknown_platform_is_rejected() {
    let csv = format!("{}jetson-01,jetson,100.64.0.1,london,,,,,,nv,pw\n", HEADER);
    match parse_inventory(csv.as_bytes()).unwrap_err() {
        DeployError::InventoryError { row, message } => {
            assert_eq!(row, 2);
            assert!(message.contains("jetson"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_empty_required_field_is_rejected() {
    let csv = format!("{}rpi-001,raspberrypi,100.64.0.1,,,,,,,pi,pw\n", HEADER);
    match parse_inventory(csv.as_bytes()).unwrap_err() {
        DeployError::InventoryError { message, .. } => assert!(message.contains("location")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_rows_without_name_are_skipped() {
    let csv = format!(
        "{},raspberrypi,100.64.0.9,london,,,,,,pi,pw\nrpi-001,raspberrypi,100.64.0.1,london,,,,,,pi,pw\n",
        HEADER
    );
    let devices = parse_inventory(csv.as_bytes()).unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_name, "rpi-001");
}

#[test]
fn test_address_outside_mesh_range_is_accepted() {
    let csv = format!("{}rpi-001,raspberrypi,192.168.1.20,london,,,,,,pi,pw\n", HEADER);
    let devices = parse_inventory(csv.as_bytes()).unwrap();
    assert_eq!(devices[0].remote_address.to_string(), "192.168.1.20");
}

#[test]
fn test_key_credentials() {
    let csv = format!(
        "{}mac-001,macos,100.64.0.5,paris,,,,,,admin,key:/home/ops/.ssh/fleet\n",
        HEADER
    );
    let devices = parse_inventory(csv.as_bytes()).unwrap();
    match &devices[0].credential {
        Credential::KeyFile(path) => assert_eq!(path.to_str(), Some("/home/ops/.ssh/fleet")),
        other => panic!("unexpected credential: {:?}", other),
    }
    assert!(!devices[0].credential.needs_sshpass());
}

#[test]
fn test_load_from_file_with_bom() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "\u{feff}{}radxa-001, Radxa ,100.64.0.7,berlin,acme,,,,,rock,pw\n",
        HEADER
    )
    .unwrap();

    let devices = load_inventory(file.path()).unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].platform, Platform::Radxa);
    assert_eq!(devices[0].client, "acme");
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_inventory(&dir.path().join("missing.csv")).is_err());
}
