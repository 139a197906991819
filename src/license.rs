//! Node-locked license record.
//!
//! On-disk layout:
//!
//! ```text
//! nonce (12) || gcm tag (16) || ciphertext (>= 1) || hmac-sha256 (32)
//! ```
//!
//! The ciphertext decrypts to a JSON [`LicensePayload`]. The trailing HMAC
//! covers every byte before it and is checked before anything is handed to
//! the AEAD, so a truncated or edited file never reaches decryption. The two
//! layers are independent: the HMAC seals the record, the GCM tag seals the
//! payload.
//!
//! The record is written once per device and never rewritten or deleted by
//! this crate. Any edit invalidates it permanently.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encryption::{self, MAC_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::errors::{CorruptionKind, ErrorCategory, WardenError, WardenResult};
use crate::hardware::HardwareFingerprint;
use crate::key_material::{derive_key, KeyRole};

/// Payload schema written by [`LicenseStore::create`].
pub const SCHEMA_VERSION: u32 = 1;

/// Smallest well-formed record: nonce, tag, one ciphertext byte, MAC.
pub const MIN_RECORD_LEN: usize = NONCE_SIZE + TAG_SIZE + 1 + MAC_SIZE;

/// Default file name inside the storage root.
pub const LICENSE_FILE_NAME: &str = "license.dat";

/// Plaintext protected by the license record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensePayload {
    pub fingerprint: HardwareFingerprint,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl LicensePayload {
    pub fn new(fingerprint: HardwareFingerprint) -> Self {
        Self {
            fingerprint,
            created_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

/// Why a license record was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseRejection {
    /// No record at the configured path.
    NotFound,
    /// Length or MAC check failed.
    IntegrityFailed(CorruptionKind),
    /// AEAD rejected the record, or the plaintext is not a supported payload.
    DecryptionFailed(CorruptionKind),
    /// Record is intact but bound to a different fingerprint.
    HardwareMismatch,
    /// The record exists but could not be read.
    Unreadable(String),
}

impl LicenseRejection {
    /// The operator-facing category. Unreadable records are reported as
    /// corrupt; the distinction only matters in logs.
    pub fn category(&self) -> ErrorCategory {
        match self {
            LicenseRejection::NotFound => ErrorCategory::RecordNotFound,
            LicenseRejection::IntegrityFailed(_)
            | LicenseRejection::DecryptionFailed(_)
            | LicenseRejection::Unreadable(_) => ErrorCategory::RecordCorrupt,
            LicenseRejection::HardwareMismatch => ErrorCategory::HardwareMismatch,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        self.category() == ErrorCategory::RecordCorrupt
    }
}

impl std::fmt::Display for LicenseRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LicenseRejection::NotFound => write!(f, "not found"),
            LicenseRejection::IntegrityFailed(kind) => write!(f, "integrity check failed ({kind})"),
            LicenseRejection::DecryptionFailed(kind) => write!(f, "decryption failed ({kind})"),
            LicenseRejection::HardwareMismatch => write!(f, "hardware mismatch"),
            LicenseRejection::Unreadable(e) => write!(f, "unreadable: {e}"),
        }
    }
}

/// Result of [`LicenseStore::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseStatus {
    Valid(LicensePayload),
    Invalid(LicenseRejection),
}

impl LicenseStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, LicenseStatus::Valid(_))
    }
}

/// License record at a caller-supplied path.
#[derive(Debug, Clone)]
pub struct LicenseStore {
    path: PathBuf,
}

impl LicenseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store using [`LICENSE_FILE_NAME`] under `storage_root`.
    pub fn in_root(storage_root: &Path) -> Self {
        Self::new(storage_root.join(LICENSE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write a fresh record bound to `fingerprint`.
    ///
    /// Precondition: `exists()` is false. Calling this over an existing
    /// record replaces it; that is the caller's decision, not checked here.
    pub fn create(&self, fingerprint: &HardwareFingerprint) -> WardenResult<LicensePayload> {
        let payload = LicensePayload::new(fingerprint.clone());
        let record = encode_record(&payload)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // A torn write must never leave a partial record at `path`.
        let staging = self.staging_path();
        if let Err(e) = fs::write(&staging, &record).and_then(|()| fs::rename(&staging, &self.path)) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }

        log::info!(
            "License created at {} for fingerprint {}",
            self.path.display(),
            fingerprint.short()
        );
        Ok(payload)
    }

    /// Check the record against `current`.
    ///
    /// Order is fixed: presence, length, MAC, AEAD, payload, fingerprint.
    pub fn validate(&self, current: &HardwareFingerprint) -> LicenseStatus {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return LicenseStatus::Invalid(LicenseRejection::NotFound)
            }
            Err(e) => return LicenseStatus::Invalid(LicenseRejection::Unreadable(e.to_string())),
        };

        let payload = match decode_record(&bytes) {
            Ok(p) => p,
            Err(rejection) => {
                log::warn!("License at {} rejected: {}", self.path.display(), rejection);
                return LicenseStatus::Invalid(rejection);
            }
        };

        if &payload.fingerprint != current {
            log::warn!(
                "License bound to {} but this machine is {}",
                payload.fingerprint.short(),
                current.short()
            );
            return LicenseStatus::Invalid(LicenseRejection::HardwareMismatch);
        }

        LicenseStatus::Valid(payload)
    }
}

/// Serialize, encrypt and seal a payload into record bytes.
pub fn encode_record(payload: &LicensePayload) -> WardenResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(payload)?;
    let sealed = encryption::seal(&plaintext, &derive_key(KeyRole::Encryption))?;

    let mut record =
        Vec::with_capacity(NONCE_SIZE + TAG_SIZE + sealed.ciphertext.len() + MAC_SIZE);
    record.extend_from_slice(&sealed.nonce);
    record.extend_from_slice(&sealed.tag);
    record.extend_from_slice(&sealed.ciphertext);

    let mac = encryption::sign(&record, &derive_key(KeyRole::Signing));
    record.extend_from_slice(&mac);
    Ok(record)
}

/// Verify and decrypt record bytes. Does not look at the fingerprint.
pub fn decode_record(bytes: &[u8]) -> Result<LicensePayload, LicenseRejection> {
    if bytes.len() < MIN_RECORD_LEN {
        return Err(LicenseRejection::IntegrityFailed(CorruptionKind::Truncated));
    }

    let (body, mac) = bytes.split_at(bytes.len() - MAC_SIZE);
    if !encryption::verify(body, mac, &derive_key(KeyRole::Signing)) {
        return Err(LicenseRejection::IntegrityFailed(CorruptionKind::MacMismatch));
    }

    let (nonce, rest) = body.split_at(NONCE_SIZE);
    let (tag, ciphertext) = rest.split_at(TAG_SIZE);
    let plaintext = encryption::open(nonce, tag, ciphertext, &derive_key(KeyRole::Encryption))
        .map_err(|_| LicenseRejection::DecryptionFailed(CorruptionKind::DecryptionFailed))?;

    let payload: LicensePayload = serde_json::from_slice(&plaintext)
        .map_err(|_| LicenseRejection::DecryptionFailed(CorruptionKind::MalformedPayload))?;

    if payload.schema_version != SCHEMA_VERSION {
        return Err(LicenseRejection::DecryptionFailed(
            CorruptionKind::MalformedPayload,
        ));
    }

    Ok(payload)
}

impl From<LicenseRejection> for WardenError {
    fn from(rejection: LicenseRejection) -> Self {
        match rejection {
            LicenseRejection::NotFound => WardenError::RecordNotFound(PathBuf::new()),
            LicenseRejection::IntegrityFailed(kind) | LicenseRejection::DecryptionFailed(kind) => {
                WardenError::RecordCorrupt(kind)
            }
            LicenseRejection::HardwareMismatch => WardenError::HardwareMismatch,
            LicenseRejection::Unreadable(e) => {
                WardenError::StorageError(std::io::Error::other(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(byte: char) -> HardwareFingerprint {
        HardwareFingerprint::from_hex(&byte.to_string().repeat(64)).unwrap()
    }

    #[test]
    fn record_has_expected_layout() {
        let payload = LicensePayload::new(fp('a'));
        let record = encode_record(&payload).unwrap();
        let json_len = serde_json::to_vec(&payload).unwrap().len();

        assert_eq!(record.len(), NONCE_SIZE + TAG_SIZE + json_len + MAC_SIZE);
        assert!(record.len() >= MIN_RECORD_LEN);
        assert_eq!(decode_record(&record).unwrap(), payload);
    }

    #[test]
    fn short_records_never_reach_the_mac() {
        let record = vec![0u8; MIN_RECORD_LEN - 1];
        assert_eq!(
            decode_record(&record),
            Err(LicenseRejection::IntegrityFailed(CorruptionKind::Truncated))
        );
    }

    #[test]
    fn resealed_garbage_fails_decryption_not_mac() {
        // A record with a valid MAC over a junk body must fail in the AEAD.
        let mut body = vec![0x5au8; NONCE_SIZE + TAG_SIZE + 8];
        let mac = encryption::sign(&body, &derive_key(KeyRole::Signing));
        body.extend_from_slice(&mac);

        assert_eq!(
            decode_record(&body),
            Err(LicenseRejection::DecryptionFailed(CorruptionKind::DecryptionFailed))
        );
    }

    #[test]
    fn unsupported_schema_is_malformed() {
        let mut payload = LicensePayload::new(fp('b'));
        payload.schema_version = 2;
        let record = encode_record(&payload).unwrap();

        assert_eq!(
            decode_record(&record),
            Err(LicenseRejection::DecryptionFailed(CorruptionKind::MalformedPayload))
        );
    }

    #[test]
    fn rejections_collapse_into_categories() {
        assert_eq!(LicenseRejection::NotFound.category(), ErrorCategory::RecordNotFound);
        assert!(LicenseRejection::IntegrityFailed(CorruptionKind::MacMismatch).is_corrupt());
        assert!(LicenseRejection::DecryptionFailed(CorruptionKind::DecryptionFailed).is_corrupt());
        assert_eq!(
            LicenseRejection::HardwareMismatch.category(),
            ErrorCategory::HardwareMismatch
        );
    }

    #[test]
    fn create_replaces_interrupted_staging_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LicenseStore::in_root(dir.path());
        let staging = dir.path().join("license.dat.tmp");
        fs::write(&staging, b"half a rec").unwrap();
        assert!(!store.exists());

        store.create(&fp('c')).unwrap();

        assert!(!staging.exists());
        assert!(store.validate(&fp('c')).is_valid());
    }
}
