//! Machine fingerprinting.
//!
//! Four host identifiers (processor id, primary MAC address, system UUID,
//! primary disk serial) are queried through a [`HostProbe`], filtered, and
//! folded into one SHA-256 digest:
//!
//! ```text
//! fingerprint = hex(SHA256("MAGICQC-HWFP-V1|cpu|mac|uuid|disk"))
//! ```
//!
//! A component whose query fails, times out, or returns a known-bad value is
//! replaced by a fixed `UNKNOWN_*` sentinel. Fingerprinting therefore never
//! fails; on a host where every query fails the result is the (stable, but
//! shared) all-sentinel fingerprint. That weakness is accepted.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{WardenError, WardenResult};

#[cfg(target_os = "linux")]
#[path = "hardware/linux.rs"]
mod platform;

#[cfg(target_os = "windows")]
#[path = "hardware/windows.rs"]
mod platform;

#[cfg(target_os = "macos")]
#[path = "hardware/macos.rs"]
mod platform;

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
mod platform {
    use super::*;

    fn unsupported() -> WardenResult<String> {
        Err(WardenError::HostQueryFailure(
            "hardware queries are not supported on this platform".to_string(),
        ))
    }

    pub fn cpu_id(_timeout: Duration) -> WardenResult<String> {
        unsupported()
    }
    pub fn mac_address(_timeout: Duration) -> WardenResult<String> {
        unsupported()
    }
    pub fn motherboard_uuid(_timeout: Duration) -> WardenResult<String> {
        unsupported()
    }
    pub fn disk_serial(_timeout: Duration) -> WardenResult<String> {
        unsupported()
    }
}

/// Fixed prefix mixed into every fingerprint.
pub const FINGERPRINT_NAMESPACE: &str = "MAGICQC-HWFP-V1";

const DELIMITER: &str = "|";

pub const UNKNOWN_CPU: &str = "UNKNOWN_CPU";
pub const UNKNOWN_MAC: &str = "UNKNOWN_MAC";
pub const UNKNOWN_UUID: &str = "UNKNOWN_UUID";
pub const UNKNOWN_DISK: &str = "UNKNOWN_DISK";

/// Default per-query deadline.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of raw hardware identifiers.
///
/// Implementations return whatever the host reports; filtering and sentinel
/// substitution happen in [`HardwareComponents::collect`] so every platform
/// shares the same validity rules.
pub trait HostProbe {
    fn cpu_id(&self) -> WardenResult<String>;
    fn mac_address(&self) -> WardenResult<String>;
    fn motherboard_uuid(&self) -> WardenResult<String>;
    fn disk_serial(&self) -> WardenResult<String>;
}

/// [`HostProbe`] backed by the running operating system.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    timeout: Duration,
}

impl SystemProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_TIMEOUT)
    }
}

impl HostProbe for SystemProbe {
    fn cpu_id(&self) -> WardenResult<String> {
        platform::cpu_id(self.timeout)
    }

    fn mac_address(&self) -> WardenResult<String> {
        platform::mac_address(self.timeout)
    }

    fn motherboard_uuid(&self) -> WardenResult<String> {
        platform::motherboard_uuid(self.timeout)
    }

    fn disk_serial(&self) -> WardenResult<String> {
        platform::disk_serial(self.timeout)
    }
}

/// The four filtered component strings a fingerprint is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareComponents {
    pub cpu_id: String,
    pub mac_address: String,
    pub motherboard_uuid: String,
    pub disk_serial: String,
}

impl HardwareComponents {
    /// Query every component independently, substituting sentinels.
    pub fn collect(probe: &dyn HostProbe) -> Self {
        Self {
            cpu_id: resolve("cpu_id", probe.cpu_id(), normalize_cpu_id, UNKNOWN_CPU),
            mac_address: resolve("mac_address", probe.mac_address(), normalize_mac, UNKNOWN_MAC),
            motherboard_uuid: resolve(
                "motherboard_uuid",
                probe.motherboard_uuid(),
                normalize_uuid,
                UNKNOWN_UUID,
            ),
            disk_serial: resolve(
                "disk_serial",
                probe.disk_serial(),
                normalize_disk_serial,
                UNKNOWN_DISK,
            ),
        }
    }

    /// Digest of the namespace tag and the four components. Pure.
    pub fn fingerprint(&self) -> HardwareFingerprint {
        let input = [
            FINGERPRINT_NAMESPACE,
            self.cpu_id.as_str(),
            self.mac_address.as_str(),
            self.motherboard_uuid.as_str(),
            self.disk_serial.as_str(),
        ]
        .join(DELIMITER);

        let hash = Sha256::digest(input.as_bytes());
        HardwareFingerprint(hex::encode(hash))
    }

    /// How many components fell back to a sentinel.
    pub fn sentinel_count(&self) -> usize {
        [
            self.cpu_id.as_str(),
            self.mac_address.as_str(),
            self.motherboard_uuid.as_str(),
            self.disk_serial.as_str(),
        ]
        .iter()
        .filter(|v| v.starts_with("UNKNOWN_"))
        .count()
    }
}

/// Collect components from `probe` and digest them.
pub fn fingerprint(probe: &dyn HostProbe) -> HardwareFingerprint {
    let components = HardwareComponents::collect(probe);
    let sentinels = components.sentinel_count();
    if sentinels > 0 {
        log::warn!(
            "Fingerprint uses {} sentinel component(s); uniqueness is reduced",
            sentinels
        );
    }
    components.fingerprint()
}

/// Fingerprint of the machine this process runs on.
pub fn current_fingerprint(timeout: Duration) -> HardwareFingerprint {
    fingerprint(&SystemProbe::new(timeout))
}

/// A 32-byte SHA-256 digest rendered as 64 lowercase hex characters.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareFingerprint(String);

impl HardwareFingerprint {
    pub const HEX_LEN: usize = 64;

    /// Parse a fingerprint from its hex rendering (any case).
    pub fn from_hex(value: &str) -> WardenResult<Self> {
        let value = value.trim();
        if value.len() != Self::HEX_LEN || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WardenError::ConfigError(format!(
                "fingerprint must be {} hex characters",
                Self::HEX_LEN
            )));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 16 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl TryFrom<String> for HardwareFingerprint {
    type Error = WardenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<HardwareFingerprint> for String {
    fn from(fp: HardwareFingerprint) -> Self {
        fp.0
    }
}

impl fmt::Display for HardwareFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for HardwareFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareFingerprint({}…)", self.short())
    }
}

// === Validity filters ===

fn resolve(
    component: &str,
    raw: WardenResult<String>,
    normalize: fn(&str) -> Option<String>,
    sentinel: &str,
) -> String {
    match raw {
        Ok(value) => match normalize(&value) {
            Some(v) => v,
            None => {
                log::debug!("{} rejected by validity filter: {:?}", component, value.trim());
                sentinel.to_string()
            }
        },
        Err(e) => {
            log::debug!("{} query failed: {}", component, e);
            sentinel.to_string()
        }
    }
}

/// Blank, or a single repeated character once separators are ignored
/// (`FFFFFFFF-FFFF-...`, `00:00:00:00:00:00`, `0000000000000000`).
fn is_degenerate(value: &str) -> bool {
    let mut chars = value
        .chars()
        .filter(|c| !matches!(c, '-' | ':' | ' ' | '.' | '_'))
        .map(|c| c.to_ascii_uppercase());

    match chars.next() {
        None => true,
        Some(first) => chars.all(|c| c == first),
    }
}

fn normalize_cpu_id(raw: &str) -> Option<String> {
    let value = raw.trim();
    if is_degenerate(value) {
        return None;
    }
    Some(value.to_string())
}

fn mac_regex() -> &'static Regex {
    static MAC: OnceLock<Regex> = OnceLock::new();
    MAC.get_or_init(|| {
        Regex::new(r"^[0-9A-Fa-f]{2}([:-][0-9A-Fa-f]{2}){5}$").expect("MAC pattern is valid")
    })
}

fn normalize_mac(raw: &str) -> Option<String> {
    let value = raw.trim();
    if !mac_regex().is_match(value) || is_degenerate(value) {
        return None;
    }
    Some(value.replace('-', ":").to_ascii_uppercase())
}

fn normalize_uuid(raw: &str) -> Option<String> {
    let parsed = Uuid::parse_str(raw.trim()).ok()?;
    let simple = parsed.simple().to_string();
    if is_degenerate(&simple) {
        return None;
    }
    Some(parsed.hyphenated().to_string().to_ascii_uppercase())
}

fn normalize_disk_serial(raw: &str) -> Option<String> {
    let value = raw.trim().trim_end_matches('.').trim();
    if is_degenerate(value) || value.eq_ignore_ascii_case("SerialNumber") {
        return None;
    }
    Some(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe {
        cpu: WardenResult<String>,
        mac: WardenResult<String>,
        uuid: WardenResult<String>,
        disk: WardenResult<String>,
    }

    fn clone_result(r: &WardenResult<String>) -> WardenResult<String> {
        match r {
            Ok(v) => Ok(v.clone()),
            Err(e) => Err(WardenError::HostQueryFailure(e.to_string())),
        }
    }

    impl HostProbe for FixedProbe {
        fn cpu_id(&self) -> WardenResult<String> {
            clone_result(&self.cpu)
        }
        fn mac_address(&self) -> WardenResult<String> {
            clone_result(&self.mac)
        }
        fn motherboard_uuid(&self) -> WardenResult<String> {
            clone_result(&self.uuid)
        }
        fn disk_serial(&self) -> WardenResult<String> {
            clone_result(&self.disk)
        }
    }

    fn healthy() -> FixedProbe {
        FixedProbe {
            cpu: Ok("BFEBFBFF000906EA".into()),
            mac: Ok("a4-bb-6d-12-34-56".into()),
            uuid: Ok("4c4c4544-0042-3510-8051-b4c04f564e32".into()),
            disk: Ok("  S4EWNX0R123456.  ".into()),
        }
    }

    fn failed() -> WardenResult<String> {
        Err(WardenError::HostQueryFailure("timed out".into()))
    }

    #[test]
    fn components_are_normalized() {
        let c = HardwareComponents::collect(&healthy());
        assert_eq!(c.cpu_id, "BFEBFBFF000906EA");
        assert_eq!(c.mac_address, "A4:BB:6D:12:34:56");
        assert_eq!(c.motherboard_uuid, "4C4C4544-0042-3510-8051-B4C04F564E32");
        assert_eq!(c.disk_serial, "S4EWNX0R123456");
        assert_eq!(c.sentinel_count(), 0);
    }

    #[test]
    fn failed_queries_become_sentinels() {
        let probe = FixedProbe {
            cpu: failed(),
            mac: failed(),
            uuid: failed(),
            disk: failed(),
        };
        let c = HardwareComponents::collect(&probe);
        assert_eq!(c.cpu_id, UNKNOWN_CPU);
        assert_eq!(c.mac_address, UNKNOWN_MAC);
        assert_eq!(c.motherboard_uuid, UNKNOWN_UUID);
        assert_eq!(c.disk_serial, UNKNOWN_DISK);
        assert_eq!(c.sentinel_count(), 4);

        // Still a well-formed, stable digest.
        let fp = c.fingerprint();
        assert_eq!(fp.as_str().len(), HardwareFingerprint::HEX_LEN);
        assert_eq!(fp, HardwareComponents::collect(&probe).fingerprint());
    }

    #[test]
    fn degenerate_values_are_rejected() {
        let probe = FixedProbe {
            cpu: Ok("0000000000000000".into()),
            mac: Ok("00:00:00:00:00:00".into()),
            uuid: Ok("FFFFFFFF-FFFF-FFFF-FFFF-FFFFFFFFFFFF".into()),
            disk: Ok("SerialNumber\r\n".into()),
        };
        let c = HardwareComponents::collect(&probe);
        assert_eq!(c.sentinel_count(), 4);
    }

    #[test]
    fn malformed_mac_and_uuid_are_rejected() {
        assert_eq!(normalize_mac("not-a-mac"), None);
        assert_eq!(normalize_mac("ff:ff:ff:ff:ff:ff"), None);
        assert_eq!(normalize_uuid("1234"), None);
        assert_eq!(normalize_uuid("00000000-0000-0000-0000-000000000000"), None);
        assert_eq!(normalize_disk_serial(""), None);
        assert_eq!(normalize_disk_serial("   "), None);
    }

    #[test]
    fn fingerprint_is_lowercase_hex() {
        let fp = fingerprint(&healthy());
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn each_component_changes_the_fingerprint() {
        let base = fingerprint(&healthy());

        let mut p = healthy();
        p.cpu = failed();
        assert_ne!(fingerprint(&p), base);

        let mut p = healthy();
        p.mac = Ok("A4:BB:6D:12:34:57".into());
        assert_ne!(fingerprint(&p), base);

        let mut p = healthy();
        p.uuid = failed();
        assert_ne!(fingerprint(&p), base);

        let mut p = healthy();
        p.disk = Ok("OTHERDISK".into());
        assert_ne!(fingerprint(&p), base);
    }

    #[test]
    fn fingerprint_parses_and_serializes() {
        let fp = fingerprint(&healthy());
        let upper = fp.as_str().to_ascii_uppercase();
        assert_eq!(HardwareFingerprint::from_hex(&upper).unwrap(), fp);
        assert!(HardwareFingerprint::from_hex("abc").is_err());

        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.as_str()));
        let back: HardwareFingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
        assert!(serde_json::from_str::<HardwareFingerprint>("\"zz\"").is_err());
    }
}
