use std::time::Duration;

use crate::command::run_with_timeout;
use crate::errors::{WardenError, WardenResult};

/// Value of the first `Key: value` line containing `key`.
fn colon_field(output: &str, key: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.contains(key))
        .and_then(|line| line.split(':').nth(1))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// CPU brand string via `sysctl machdep.cpu.brand_string`.
pub fn cpu_id(timeout: Duration) -> WardenResult<String> {
    let output = run_with_timeout("sysctl", &["-n", "machdep.cpu.brand_string"], timeout)?;
    Ok(output.trim().to_string())
}

/// Hardware address of the built-in interface `en0`.
pub fn mac_address(timeout: Duration) -> WardenResult<String> {
    let output = run_with_timeout("ifconfig", &["en0"], timeout)?;
    output
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("ether "))
        .map(|mac| mac.trim().to_string())
        .ok_or_else(|| WardenError::HostQueryFailure("en0 has no ether address".to_string()))
}

/// `IOPlatformUUID` from the platform expert device.
pub fn motherboard_uuid(timeout: Duration) -> WardenResult<String> {
    let output = run_with_timeout(
        "ioreg",
        &["-rd1", "-c", "IOPlatformExpertDevice"],
        timeout,
    )?;
    output
        .lines()
        .find(|line| line.contains("IOPlatformUUID"))
        .and_then(|line| line.split('"').nth(3))
        .map(str::to_string)
        .ok_or_else(|| WardenError::HostQueryFailure("IOPlatformUUID not reported".to_string()))
}

/// Serial of the first NVMe drive, falling back to SATA.
pub fn disk_serial(timeout: Duration) -> WardenResult<String> {
    for data_type in ["SPNVMeDataType", "SPSerialATADataType"] {
        if let Ok(output) = run_with_timeout("system_profiler", &[data_type], timeout) {
            if let Some(serial) = colon_field(&output, "Serial Number") {
                return Ok(serial);
            }
        }
    }
    Err(WardenError::HostQueryFailure(
        "system_profiler reported no disk serial".to_string(),
    ))
}
