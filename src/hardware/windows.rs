use std::time::Duration;

use crate::command::run_with_timeout;
use crate::errors::{WardenError, WardenResult};

/// First value row of a `wmic ... get <Property>` listing.
///
/// A header-only response yields an empty string, which the validity filter
/// then rejects.
fn wmic_value(args: &[&str], timeout: Duration) -> WardenResult<String> {
    let output = run_with_timeout("wmic", args, timeout)?;
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .nth(1)
        .unwrap_or("")
        .to_string())
}

pub fn cpu_id(timeout: Duration) -> WardenResult<String> {
    wmic_value(&["cpu", "get", "ProcessorId"], timeout)
}

/// First adapter reported by `getmac` that has a hardware address.
pub fn mac_address(timeout: Duration) -> WardenResult<String> {
    let output = run_with_timeout("getmac", &["/fo", "csv", "/nh"], timeout)?;
    output
        .lines()
        .filter_map(|line| line.split(',').next())
        .map(|field| field.trim().trim_matches('"').to_string())
        .find(|mac| !mac.is_empty() && mac != "N/A")
        .ok_or_else(|| WardenError::HostQueryFailure("getmac reported no adapters".to_string()))
}

pub fn motherboard_uuid(timeout: Duration) -> WardenResult<String> {
    wmic_value(&["csproduct", "get", "UUID"], timeout)
}

pub fn disk_serial(timeout: Duration) -> WardenResult<String> {
    wmic_value(
        &["diskdrive", "where", "Index=0", "get", "SerialNumber"],
        timeout,
    )
}
