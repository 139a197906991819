//! Error types for the attestation subsystem.
//!
//! Host query failures are always converted into gate outcomes by the
//! pipeline; nothing in this crate panics on a failed probe.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which structural check rejected a license record.
///
/// Collapsed into [`ErrorCategory::RecordCorrupt`] for the operator, kept
/// distinct here for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionKind {
    /// Shorter than the minimum record length.
    Truncated,
    /// Trailing keyed digest did not match.
    MacMismatch,
    /// Authenticated decryption rejected the nonce/tag/ciphertext.
    DecryptionFailed,
    /// Decrypted bytes are not a supported payload.
    MalformedPayload,
}

impl fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CorruptionKind::Truncated => "truncated",
            CorruptionKind::MacMismatch => "mac_mismatch",
            CorruptionKind::DecryptionFailed => "decryption_failed",
            CorruptionKind::MalformedPayload => "malformed_payload",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Error)]
pub enum WardenError {
    /// A hardware, process or module query could not complete.
    #[error("host query failed: {0}")]
    HostQueryFailure(String),

    #[error("license record not found at {0}")]
    RecordNotFound(PathBuf),

    #[error("license record is corrupt ({0})")]
    RecordCorrupt(CorruptionKind),

    #[error("license is bound to different hardware")]
    HardwareMismatch,

    #[error("artifact not found: {0}")]
    ArtifactMissing(PathBuf),

    #[error("artifact hash mismatch (stored {stored}, current {current})")]
    ArtifactTampered { stored: String, current: String },

    #[error("storage error: {0}")]
    StorageError(#[from] std::io::Error),

    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl WardenError {
    /// User-facing category, if this error belongs to the license family.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            WardenError::RecordNotFound(_) => Some(ErrorCategory::RecordNotFound),
            WardenError::RecordCorrupt(_) => Some(ErrorCategory::RecordCorrupt),
            WardenError::HardwareMismatch => Some(ErrorCategory::HardwareMismatch),
            _ => None,
        }
    }
}

/// The three license failure categories the operator is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RecordNotFound,
    RecordCorrupt,
    HardwareMismatch,
}

impl ErrorCategory {
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCategory::RecordNotFound => "License not found on this device",
            ErrorCategory::RecordCorrupt => "License file is damaged or has been modified",
            ErrorCategory::HardwareMismatch => "License is registered to different hardware",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.default_message())
    }
}

pub type WardenResult<T> = Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn license_errors_map_to_categories() {
        assert_eq!(
            WardenError::RecordCorrupt(CorruptionKind::MacMismatch).category(),
            Some(ErrorCategory::RecordCorrupt)
        );
        assert_eq!(
            WardenError::RecordCorrupt(CorruptionKind::DecryptionFailed).category(),
            Some(ErrorCategory::RecordCorrupt)
        );
        assert_eq!(
            WardenError::HardwareMismatch.category(),
            Some(ErrorCategory::HardwareMismatch)
        );
        assert!(WardenError::HostQueryFailure("x".into()).category().is_none());
    }

    #[test]
    fn corruption_kind_is_visible_in_display() {
        let err = WardenError::RecordCorrupt(CorruptionKind::Truncated);
        assert!(err.to_string().contains("truncated"));
    }
}
