use crate::collectors::command;
use crate::domain::device::base_device_name;
use crate::error::ProbeError;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const LSBLK: &str = "lsblk";

/// Identity reported by the device itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub serial: String,
    pub size_bytes: u64,
}

/// Serial and byte size of one device node via `lsblk --json --bytes`.
pub async fn identity(device: &Path, timeout: Duration) -> Result<DeviceIdentity, ProbeError> {
    let path = device.to_string_lossy();
    let output = command::run(
        LSBLK,
        &["--json", "--bytes", "--nodeps", "-o", "NAME,SERIAL,SIZE", path.as_ref()],
        timeout,
    )
    .await?;
    parse_identity(&output)
}

pub fn parse_identity(output: &str) -> Result<DeviceIdentity, ProbeError> {
    let v: Value = serde_json::from_str(output)?;
    let dev = v["blockdevices"]
        .as_array()
        .and_then(|a| a.first())
        .ok_or_else(|| ProbeError::malformed(LSBLK, "no blockdevices"))?;

    Ok(DeviceIdentity {
        serial: dev["serial"].as_str().map(|s| s.trim().to_string()).unwrap_or_default(),
        // Older util-linux prints sizes as strings even with --bytes
        size_bytes: dev["size"]
            .as_u64()
            .or_else(|| dev["size"].as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(0),
    })
}

/// Base device name -> pool name, for every device carrying a
/// `zfs_member` filesystem signature.
pub async fn zfs_member_pools(timeout: Duration) -> Result<HashMap<String, String>, ProbeError> {
    let output = command::run(LSBLK, &["--json", "--list", "-o", "NAME,FSTYPE,LABEL"], timeout).await?;
    parse_zfs_members(&output)
}

pub fn parse_zfs_members(output: &str) -> Result<HashMap<String, String>, ProbeError> {
    let v: Value = serde_json::from_str(output)?;
    let devices = v["blockdevices"]
        .as_array()
        .ok_or_else(|| ProbeError::malformed(LSBLK, "no blockdevices"))?;

    let mut members = HashMap::new();
    collect_members(devices, &mut members);
    Ok(members)
}

fn collect_members(devices: &[Value], members: &mut HashMap<String, String>) {
    for dev in devices {
        let name = dev["name"].as_str().unwrap_or("");
        let fstype = dev["fstype"].as_str().unwrap_or("");
        let label = dev["label"].as_str().unwrap_or("").trim();

        if fstype == "zfs_member" && !name.is_empty() && !label.is_empty() {
            members.insert(base_device_name(name).to_string(), label.to_string());
        }
        if let Some(children) = dev["children"].as_array() {
            collect_members(children, members);
        }
    }
}
