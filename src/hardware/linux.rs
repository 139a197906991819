use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::command::run_with_timeout;
use crate::errors::{WardenError, WardenResult};

const NET_CLASS_DIR: &str = "/sys/class/net";
const PRODUCT_UUID: &str = "/sys/class/dmi/id/product_uuid";

/// Processor identity from `/proc/cpuinfo`.
///
/// ARM boards expose a `Serial` line; on x86 the signature is assembled from
/// vendor, family, model and stepping of the first processor block.
pub fn cpu_id(timeout: Duration) -> WardenResult<String> {
    let cpuinfo = match fs::read_to_string("/proc/cpuinfo") {
        Ok(s) => s,
        Err(_) => run_with_timeout("cat", &["/proc/cpuinfo"], timeout)?,
    };

    let field = |name: &str| {
        cpuinfo
            .lines()
            .find(|line| line.split(':').next().map(str::trim) == Some(name))
            .and_then(|line| line.split(':').nth(1))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if let Some(serial) = field("Serial") {
        return Ok(serial);
    }

    let parts: Vec<String> = ["vendor_id", "cpu family", "model", "stepping"]
        .iter()
        .filter_map(|name| field(*name))
        .collect();

    if parts.is_empty() {
        return Err(WardenError::HostQueryFailure(
            "no processor identity in /proc/cpuinfo".to_string(),
        ));
    }
    Ok(parts.join("-"))
}

/// Address of the first physical interface, by name order.
///
/// Physical interfaces have a `device` link under sysfs; virtual ones
/// (bridges, veth, docker) do not and are only used as a fallback.
pub fn mac_address(_timeout: Duration) -> WardenResult<String> {
    let entries = fs::read_dir(NET_CLASS_DIR)
        .map_err(|e| WardenError::HostQueryFailure(format!("{NET_CLASS_DIR}: {e}")))?;

    let mut physical = Vec::new();
    let mut virtual_ifaces = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "lo" {
            continue;
        }
        if entry.path().join("device").exists() {
            physical.push(name);
        } else {
            virtual_ifaces.push(name);
        }
    }
    physical.sort();
    virtual_ifaces.sort();

    physical
        .iter()
        .chain(virtual_ifaces.iter())
        .filter_map(|name| {
            fs::read_to_string(Path::new(NET_CLASS_DIR).join(name).join("address")).ok()
        })
        .map(|addr| addr.trim().to_string())
        .find(|addr| !addr.is_empty() && addr != "00:00:00:00:00:00")
        .ok_or_else(|| WardenError::HostQueryFailure("no network hardware address".to_string()))
}

/// SMBIOS system UUID. The sysfs node is root-readable only on most
/// distributions, so `dmidecode` is tried second.
pub fn motherboard_uuid(timeout: Duration) -> WardenResult<String> {
    match fs::read_to_string(PRODUCT_UUID) {
        Ok(uuid) => Ok(uuid.trim().to_string()),
        Err(_) => run_with_timeout("dmidecode", &["-s", "system-uuid"], timeout)
            .map(|out| out.trim().to_string()),
    }
}

/// Serial of the first non-loop block device.
pub fn disk_serial(timeout: Duration) -> WardenResult<String> {
    let output = run_with_timeout("lsblk", &["-d", "-n", "-o", "SERIAL", "-e", "7"], timeout)?;
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| WardenError::HostQueryFailure("lsblk reported no disk serial".to_string()))
}
