//! Version-aware binary integrity verification.
//!
//! A monitored artifact's SHA-256 is persisted next to the application
//! version it was captured under. The stored hash is only trusted for that
//! version: when the live version differs (an upgrade, or a record written
//! before versions were tracked) the pair is re-baselined before any
//! comparison, so upgrades are never mistaken for tampering.
//!
//! Record files live in a caller-supplied directory:
//!
//! - `artifact.sha256`: lowercase hex digest
//! - `artifact.version`: plain version string

use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::errors::{WardenError, WardenResult};

pub const HASH_FILE_NAME: &str = "artifact.sha256";
pub const VERSION_FILE_NAME: &str = "artifact.version";

/// Hex characters shown per hash in a mismatch reason.
const PREVIEW_LEN: usize = 16;

/// Why a check came back safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Baseline {
    /// No hash was stored; the current one was recorded.
    FirstRun,
    /// Version changed; hash and version were rewritten.
    Upgraded { from: String, to: String },
    /// Stored hash matched.
    Verified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    Safe(Baseline),
    Unsafe(String),
}

impl IntegrityStatus {
    pub fn is_safe(&self) -> bool {
        matches!(self, IntegrityStatus::Safe(_))
    }
}

/// The persisted hash/version pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityRecord {
    pub stored_hash: Option<String>,
    pub stored_version: Option<String>,
}

impl IntegrityRecord {
    /// Read whatever is present in `dir`; absent files load as `None`.
    pub fn load(dir: &Path) -> WardenResult<Self> {
        Ok(Self {
            stored_hash: read_trimmed(&dir.join(HASH_FILE_NAME))?,
            stored_version: read_trimmed(&dir.join(VERSION_FILE_NAME))?,
        })
    }

    /// Persist `hash` and, when given, `version`.
    pub fn store(dir: &Path, hash: &str, version: Option<&str>) -> WardenResult<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(HASH_FILE_NAME), hash)?;
        if let Some(v) = version {
            fs::write(dir.join(VERSION_FILE_NAME), v)?;
        }
        Ok(())
    }
}

fn read_trimmed(path: &Path) -> WardenResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WardenError::StorageError(e)),
    }
}

/// SHA-256 of the file's full contents, lowercase hex.
pub fn hash_file(path: &Path) -> WardenResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// First [`PREVIEW_LEN`] characters. The stored side is read from disk and
/// may hold anything, so this never slices inside a character.
fn preview(hash: &str) -> &str {
    match hash.char_indices().nth(PREVIEW_LEN) {
        Some((end, _)) => &hash[..end],
        None => hash,
    }
}

/// Verify `artifact_path` against the record in `record_dir`.
///
/// Errors are I/O failures reading the artifact or the record; a missing
/// artifact is reported as `Unsafe`, not as an error.
pub fn check(
    artifact_path: &Path,
    record_dir: &Path,
    current_version: Option<&str>,
) -> WardenResult<IntegrityStatus> {
    if !artifact_path.is_file() {
        return Ok(IntegrityStatus::Unsafe(format!(
            "artifact not found: {}",
            artifact_path.display()
        )));
    }

    let current_hash = hash_file(artifact_path)?;
    let record = IntegrityRecord::load(record_dir)?;

    // Upgrade check comes before any comparison.
    if let Some(version) = current_version {
        let stored_version = record.stored_version.clone().unwrap_or_default();
        if stored_version != version {
            IntegrityRecord::store(record_dir, &current_hash, Some(version))?;

            if record.stored_hash.is_none() {
                log::info!("Integrity baseline recorded for version {}", version);
                return Ok(IntegrityStatus::Safe(Baseline::FirstRun));
            }
            log::info!(
                "Integrity re-baselined after upgrade {:?} -> {}",
                stored_version,
                version
            );
            return Ok(IntegrityStatus::Safe(Baseline::Upgraded {
                from: stored_version,
                to: version.to_string(),
            }));
        }
    }

    let stored_hash = match record.stored_hash {
        Some(h) => h,
        None => {
            IntegrityRecord::store(record_dir, &current_hash, current_version)?;
            log::info!("Integrity baseline recorded");
            return Ok(IntegrityStatus::Safe(Baseline::FirstRun));
        }
    };

    if stored_hash.eq_ignore_ascii_case(&current_hash) {
        Ok(IntegrityStatus::Safe(Baseline::Verified))
    } else {
        log::error!(
            "Integrity hash mismatch for {}",
            artifact_path.display()
        );
        Ok(IntegrityStatus::Unsafe(format!(
            "hash mismatch (expected {}..., got {}...)",
            preview(&stored_hash),
            preview(&current_hash)
        )))
    }
}

/// Verifier bound to one artifact and record directory.
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    artifact_path: PathBuf,
    record_dir: PathBuf,
}

impl IntegrityVerifier {
    pub fn new(artifact_path: impl Into<PathBuf>, record_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            record_dir: record_dir.into(),
        }
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn check(&self, current_version: Option<&str>) -> WardenResult<IntegrityStatus> {
        check(&self.artifact_path, &self.record_dir, current_version)
    }
}
