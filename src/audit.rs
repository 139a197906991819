//! Append-only attestation audit trail.
//!
//! One line per gate outcome:
//!
//! ```text
//! [2026-10-16T09:12:44Z] PASS: debugger: no debugger detected
//! ```
//!
//! Advisory only. Nothing in this crate reads the file back, and a failed
//! write is logged rather than allowed to change an attestation result.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::errors::WardenResult;

/// Default file name inside the storage root.
pub const AUDIT_FILE_NAME: &str = "attestation.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditVerdict {
    Pass,
    Blocked,
    Warning,
}

impl fmt::Display for AuditVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditVerdict::Pass => "PASS",
            AuditVerdict::Blocked => "BLOCKED",
            AuditVerdict::Warning => "WARNING",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line.
    pub fn append(&self, verdict: AuditVerdict, reason: &str) -> WardenResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", format_line(verdict, reason))?;
        Ok(())
    }

    /// [`append`](Self::append), logging instead of failing.
    pub fn record(&self, verdict: AuditVerdict, reason: &str) {
        if let Err(e) = self.append(verdict, reason) {
            log::warn!("Audit write to {} failed: {}", self.path.display(), e);
        }
    }
}

fn format_line(verdict: AuditVerdict, reason: &str) -> String {
    // Keep one outcome per line even if a reason carries host output.
    let reason = reason.replace(['\r', '\n'], " ");
    format!(
        "[{}] {}: {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        verdict,
        reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lines_are_appended_in_order() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("logs").join(AUDIT_FILE_NAME));

        log.append(AuditVerdict::Pass, "first").unwrap();
        log.append(AuditVerdict::Warning, "second").unwrap();
        log.append(AuditVerdict::Blocked, "third").unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("] PASS: first"));
        assert!(lines[1].ends_with("] WARNING: second"));
        assert!(lines[2].ends_with("] BLOCKED: third"));
        assert!(lines[0].starts_with('['));
    }

    #[test]
    fn multiline_reasons_stay_on_one_line() {
        let line = format_line(AuditVerdict::Blocked, "a\nb\r\nc");
        assert!(!line.contains('\n'));
        assert!(line.ends_with("BLOCKED: a b  c"));
    }

    #[test]
    fn timestamp_is_rfc3339_utc() {
        let line = format_line(AuditVerdict::Pass, "x");
        let stamp = &line[1..line.find(']').unwrap()];
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
        assert!(stamp.ends_with('Z'));
    }
}
