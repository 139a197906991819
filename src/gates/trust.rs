//! License, capability and artifact gates (5-8).

use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::ErrorCategory;
use crate::gates::environment::EnvironmentProbe;
use crate::gates::{AttestationOutcome, Gate, GateClass, GateContext, Presentation};
use crate::integrity::{Baseline, IntegrityStatus, IntegrityVerifier};
use crate::license::{LicenseStatus, LicenseStore};

/// Gate 5: node-locked license.
///
/// A missing record is created for the current fingerprint before
/// validation, so first launch on a device always registers it. Every
/// rejection reaches the operator as one of three category messages; the
/// detailed cause is only logged.
pub struct LicenseGate {
    store: LicenseStore,
}

impl LicenseGate {
    pub fn new(store: LicenseStore) -> Self {
        Self { store }
    }
}

impl Gate for LicenseGate {
    fn name(&self) -> &'static str {
        "license"
    }

    fn class(&self) -> GateClass {
        GateClass::Degrade
    }

    fn needs_fingerprint(&self) -> bool {
        true
    }

    fn run(&self, ctx: &GateContext<'_>) -> AttestationOutcome {
        let Some(fingerprint) = ctx.fingerprint else {
            return AttestationOutcome::fail("fingerprint unavailable");
        };

        if !self.store.exists() {
            if let Err(e) = self.store.create(fingerprint) {
                tracing::error!(path = %self.store.path().display(), error = %e, "license creation failed");
                return AttestationOutcome::fail(ErrorCategory::RecordNotFound.default_message())
                    .with_fingerprint(Some(fingerprint));
            }
            tracing::info!(fingerprint = fingerprint.short(), "license registered for this device");
        }

        match self.store.validate(fingerprint) {
            LicenseStatus::Valid(_) => AttestationOutcome::pass("license valid"),
            LicenseStatus::Invalid(rejection) => {
                tracing::warn!(%rejection, category = ?rejection.category(), "license rejected");
                AttestationOutcome::fail(rejection.category().default_message())
                    .with_fingerprint(Some(fingerprint))
            }
        }
    }
}

/// Gate 6: companion SDK presence. Never blocks; a miss disables one feature.
pub struct SdkGate {
    probe: Arc<dyn EnvironmentProbe>,
    paths: Vec<PathBuf>,
    feature: String,
}

impl SdkGate {
    pub fn new(probe: Arc<dyn EnvironmentProbe>, paths: Vec<PathBuf>, feature: impl Into<String>) -> Self {
        Self {
            probe,
            paths,
            feature: feature.into(),
        }
    }
}

impl Gate for SdkGate {
    fn name(&self) -> &'static str {
        "companion_sdk"
    }

    fn class(&self) -> GateClass {
        GateClass::Warn
    }

    fn feature_flag(&self) -> Option<&str> {
        Some(&self.feature)
    }

    fn run(&self, _ctx: &GateContext<'_>) -> AttestationOutcome {
        match self.paths.iter().find(|p| self.probe.path_exists(p)) {
            Some(path) => AttestationOutcome::pass(format!("companion SDK found at {}", path.display())),
            None => AttestationOutcome::fail(format!(
                "companion SDK not found; {} disabled",
                self.feature
            )),
        }
    }
}

/// Gate 7: the monitored artifact must exist before it can be verified.
pub struct ArtifactGate {
    probe: Arc<dyn EnvironmentProbe>,
    path: PathBuf,
}

impl ArtifactGate {
    pub fn new(probe: Arc<dyn EnvironmentProbe>, path: impl Into<PathBuf>) -> Self {
        Self {
            probe,
            path: path.into(),
        }
    }
}

impl Gate for ArtifactGate {
    fn name(&self) -> &'static str {
        "artifact"
    }

    fn class(&self) -> GateClass {
        GateClass::Block
    }

    fn run(&self, _ctx: &GateContext<'_>) -> AttestationOutcome {
        if self.probe.path_exists(&self.path) {
            AttestationOutcome::pass("required artifact present")
        } else {
            AttestationOutcome::fail(format!(
                "required artifact not found: {}",
                self.path.display()
            ))
        }
    }
}

/// Gate 8: artifact hash against the version-scoped baseline.
pub struct IntegrityGate {
    verifier: IntegrityVerifier,
    app_version: Option<String>,
}

impl IntegrityGate {
    pub fn new(verifier: IntegrityVerifier, app_version: Option<String>) -> Self {
        Self {
            verifier,
            app_version,
        }
    }
}

impl Gate for IntegrityGate {
    fn name(&self) -> &'static str {
        "integrity"
    }

    fn class(&self) -> GateClass {
        GateClass::Block
    }

    fn presentation(&self) -> Presentation {
        Presentation::Unauthorized
    }

    fn needs_fingerprint(&self) -> bool {
        true
    }

    fn run(&self, ctx: &GateContext<'_>) -> AttestationOutcome {
        match self.verifier.check(self.app_version.as_deref()) {
            Ok(IntegrityStatus::Safe(baseline)) => {
                let reason = match baseline {
                    Baseline::FirstRun => "integrity baseline recorded".to_string(),
                    Baseline::Upgraded { from, to } if from.is_empty() => {
                        format!("integrity re-baselined for version {to}")
                    }
                    Baseline::Upgraded { from, to } => {
                        format!("integrity re-baselined after upgrade {from} -> {to}")
                    }
                    Baseline::Verified => "integrity verified".to_string(),
                };
                AttestationOutcome::pass(reason)
            }
            Ok(IntegrityStatus::Unsafe(reason)) => {
                AttestationOutcome::fail(format!("integrity check failed: {reason}"))
                    .with_fingerprint(ctx.fingerprint)
            }
            Err(e) => AttestationOutcome::fail(format!("integrity check could not be completed: {e}"))
                .with_fingerprint(ctx.fingerprint),
        }
    }
}
