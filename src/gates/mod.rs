//! Startup attestation gates.
//!
//! Each gate is one independent check with a fixed classification:
//!
//! | # | Gate | Class | On failure |
//! |---|------|-------|------------|
//! | 1 | [`DebuggerGate`] | block | terminate |
//! | 2 | [`AnalysisToolGate`] | block | terminate |
//! | 3 | [`InjectedModuleGate`] | block | terminate |
//! | 4 | [`VirtualizationGate`] | degrade | unauthorized page |
//! | 5 | [`LicenseGate`] | degrade | unauthorized page |
//! | 6 | [`SdkGate`] | warn | feature disabled |
//! | 7 | [`ArtifactGate`] | block | terminate |
//! | 8 | [`IntegrityGate`] | block | unauthorized page |
//!
//! Order and classification are product behavior. The orchestrator in
//! [`crate::pipeline`] runs them in this order and stops at the first
//! block or degrade.

use std::fmt;

use serde::Serialize;

use crate::hardware::HardwareFingerprint;

pub mod environment;
pub mod trust;

pub use environment::{
    AnalysisToolGate, DebuggerGate, EnvironmentProbe, InjectedModuleGate, SystemEnvironment,
    VirtualizationGate,
};
pub use trust::{ArtifactGate, IntegrityGate, LicenseGate, SdkGate};

/// What a failing gate does to the launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateClass {
    /// Stop the launch.
    Block,
    /// Stop the launch, but show the unauthorized page instead of exiting.
    Degrade,
    /// Log, disable a feature, continue.
    Warn,
}

impl fmt::Display for GateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateClass::Block => "block",
            GateClass::Degrade => "degrade",
            GateClass::Warn => "warn",
        };
        write!(f, "{}", s)
    }
}

/// How the UI shell should present a blocked launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presentation {
    /// Terminate without showing the application.
    HardExit,
    /// Render the static unauthorized page with fingerprint and reason.
    Unauthorized,
}

/// Result of a single gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttestationOutcome {
    pub passed: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<HardwareFingerprint>,
}

impl AttestationOutcome {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
            fingerprint: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<&HardwareFingerprint>) -> Self {
        self.fingerprint = fingerprint.cloned();
        self
    }
}

/// Read-only state threaded through the pipeline.
///
/// The fingerprint is computed once, just before the first gate that asks
/// for it, so gates 1-3 run before any fingerprint or key code.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateContext<'a> {
    pub fingerprint: Option<&'a HardwareFingerprint>,
}

/// One attestation check.
pub trait Gate {
    fn name(&self) -> &'static str;

    fn class(&self) -> GateClass;

    fn presentation(&self) -> Presentation {
        match self.class() {
            GateClass::Block => Presentation::HardExit,
            GateClass::Degrade | GateClass::Warn => Presentation::Unauthorized,
        }
    }

    /// Whether the orchestrator must compute the fingerprint before this gate.
    fn needs_fingerprint(&self) -> bool {
        false
    }

    /// Feature disabled when a warn-class gate fails.
    fn feature_flag(&self) -> Option<&str> {
        None
    }

    fn run(&self, ctx: &GateContext<'_>) -> AttestationOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain(GateClass);

    impl Gate for Plain {
        fn name(&self) -> &'static str {
            "plain"
        }
        fn class(&self) -> GateClass {
            self.0
        }
        fn run(&self, _ctx: &GateContext<'_>) -> AttestationOutcome {
            AttestationOutcome::pass("ok")
        }
    }

    #[test]
    fn default_presentation_follows_class() {
        assert_eq!(Plain(GateClass::Block).presentation(), Presentation::HardExit);
        assert_eq!(Plain(GateClass::Degrade).presentation(), Presentation::Unauthorized);
    }

    #[test]
    fn outcome_serializes_without_empty_fingerprint() {
        let json = serde_json::to_value(AttestationOutcome::fail("nope")).unwrap();
        assert_eq!(json["passed"], false);
        assert_eq!(json["reason"], "nope");
        assert!(json.get("fingerprint").is_none());
    }
}
