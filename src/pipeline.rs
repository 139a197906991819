//! Startup attestation orchestrator.
//!
//! [`Pipeline::run`] evaluates the gates once, in order, and folds their
//! outcomes into a single [`Disposition`] for the UI shell:
//!
//! ```text
//! Start -> gate 1 .. gate 8 -> Proceed
//!                           -> Blocked { gate, reason, fingerprint, presentation }
//!                           -> ProceedWithWarning { disabled_features, warnings }
//! ```
//!
//! The run is synchronous and must finish before anything else in the
//! application starts. Nothing is cached between runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::audit::{AuditLog, AuditVerdict, AUDIT_FILE_NAME};
use crate::gates::environment::DEFAULT_TIMING_THRESHOLD;
use crate::gates::{
    AnalysisToolGate, ArtifactGate, AttestationOutcome, DebuggerGate, EnvironmentProbe, Gate,
    GateClass, GateContext, InjectedModuleGate, IntegrityGate, LicenseGate, Presentation, SdkGate,
    SystemEnvironment, VirtualizationGate,
};
use crate::hardware::{self, HardwareFingerprint, HostProbe, SystemProbe, DEFAULT_QUERY_TIMEOUT};
use crate::integrity::IntegrityVerifier;
use crate::license::{LicenseStore, LICENSE_FILE_NAME};

/// Default integrity record directory under the storage root.
pub const INTEGRITY_DIR_NAME: &str = "integrity";

/// MagicCamera SDK install locations.
pub const DEFAULT_SDK_PATHS: &[&str] = &[
    "C:\\Program Files\\MindVision\\SDK\\X64\\MVCAMSDK_X64.dll",
    "C:\\Program Files (x86)\\MindVision\\SDK\\X64\\MVCAMSDK_X64.dll",
    "C:\\Windows\\System32\\MVCAMSDK_X64.dll",
];

pub const DEFAULT_SDK_FEATURE: &str = "camera";

/// Everything the orchestrator needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct AttestationSettings {
    /// `false` skips every gate. Caller-controlled development bypass.
    pub production: bool,
    pub storage_root: PathBuf,
    pub artifact_path: PathBuf,
    pub app_version: Option<String>,
    pub license_path: PathBuf,
    pub integrity_dir: PathBuf,
    pub audit_path: PathBuf,
    pub sdk_paths: Vec<PathBuf>,
    pub sdk_feature: String,
    pub probe_timeout: Duration,
    pub timing_threshold: Duration,
}

impl AttestationSettings {
    /// Production settings with every file laid out under `storage_root`.
    pub fn new(storage_root: impl Into<PathBuf>, artifact_path: impl Into<PathBuf>) -> Self {
        let storage_root = storage_root.into();
        Self {
            production: true,
            license_path: storage_root.join(LICENSE_FILE_NAME),
            integrity_dir: storage_root.join(INTEGRITY_DIR_NAME),
            audit_path: storage_root.join(AUDIT_FILE_NAME),
            artifact_path: artifact_path.into(),
            app_version: None,
            sdk_paths: DEFAULT_SDK_PATHS.iter().map(PathBuf::from).collect(),
            sdk_feature: DEFAULT_SDK_FEATURE.to_string(),
            probe_timeout: DEFAULT_QUERY_TIMEOUT,
            timing_threshold: DEFAULT_TIMING_THRESHOLD,
            storage_root,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = Some(version.into());
        self
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }
}

/// Final result of one attestation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    Proceed,
    Blocked {
        gate: String,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        fingerprint: Option<HardwareFingerprint>,
        presentation: Presentation,
    },
    ProceedWithWarning {
        disabled_features: Vec<String>,
        warnings: Vec<String>,
    },
}

impl Disposition {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Disposition::Blocked { .. })
    }

    /// Process exit code for the CLI: 2 when blocked, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_blocked() {
            2
        } else {
            0
        }
    }
}

pub struct Pipeline {
    production: bool,
    gates: Vec<Box<dyn Gate>>,
    host: Box<dyn HostProbe>,
    audit: Option<AuditLog>,
}

impl Pipeline {
    /// Pipeline over an explicit gate list. Gates run in the given order.
    pub fn new(
        production: bool,
        gates: Vec<Box<dyn Gate>>,
        host: Box<dyn HostProbe>,
        audit: Option<AuditLog>,
    ) -> Self {
        Self {
            production,
            gates,
            host,
            audit,
        }
    }

    /// The eight standard gates over the given probes.
    pub fn standard(
        settings: &AttestationSettings,
        host: Box<dyn HostProbe>,
        env: Arc<dyn EnvironmentProbe>,
    ) -> Self {
        let gates: Vec<Box<dyn Gate>> = vec![
            Box::new(DebuggerGate::new(env.clone(), settings.timing_threshold)),
            Box::new(AnalysisToolGate::new(env.clone())),
            Box::new(InjectedModuleGate::new(env.clone())),
            Box::new(VirtualizationGate::new(env.clone())),
            Box::new(LicenseGate::new(LicenseStore::new(&settings.license_path))),
            Box::new(SdkGate::new(
                env.clone(),
                settings.sdk_paths.clone(),
                settings.sdk_feature.clone(),
            )),
            Box::new(ArtifactGate::new(env, &settings.artifact_path)),
            Box::new(IntegrityGate::new(
                IntegrityVerifier::new(&settings.artifact_path, &settings.integrity_dir),
                settings.app_version.clone(),
            )),
        ];

        Self::new(
            settings.production,
            gates,
            host,
            Some(AuditLog::new(&settings.audit_path)),
        )
    }

    /// The standard gates over the running operating system.
    pub fn system(settings: &AttestationSettings) -> Self {
        Self::standard(
            settings,
            Box::new(SystemProbe::new(settings.probe_timeout)),
            Arc::new(SystemEnvironment::new(settings.probe_timeout)),
        )
    }

    pub fn gate_names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|g| g.name()).collect()
    }

    /// Run every gate once and decide the launch.
    pub fn run(&self) -> Disposition {
        if !self.production {
            tracing::info!("development mode; attestation skipped");
            return Disposition::Proceed;
        }

        let run = tracing::info_span!("attestation", run_id = %Uuid::new_v4());
        let _run = run.enter();

        let mut fingerprint: Option<HardwareFingerprint> = None;
        let mut disabled_features = Vec::new();
        let mut warnings = Vec::new();

        for (index, gate) in self.gates.iter().enumerate() {
            let span = tracing::info_span!(
                "attestation_gate",
                gate = gate.name(),
                step = index + 1,
                class = %gate.class()
            );
            let _guard = span.enter();

            if gate.needs_fingerprint() && fingerprint.is_none() {
                let fp = hardware::fingerprint(self.host.as_ref());
                tracing::debug!(fingerprint = fp.short(), "fingerprint computed");
                fingerprint = Some(fp);
            }

            let ctx = GateContext {
                fingerprint: fingerprint.as_ref(),
            };
            let outcome = gate.run(&ctx);
            let line = format!("{}: {}", gate.name(), outcome.reason);

            if outcome.passed {
                tracing::info!(reason = %outcome.reason, "gate passed");
                self.audit(AuditVerdict::Pass, &line);
                continue;
            }

            match gate.class() {
                GateClass::Warn => {
                    tracing::warn!(reason = %outcome.reason, "gate warned; continuing");
                    self.audit(AuditVerdict::Warning, &line);
                    if let Some(feature) = gate.feature_flag() {
                        disabled_features.push(feature.to_string());
                    }
                    warnings.push(line);
                }
                GateClass::Degrade => {
                    tracing::warn!(reason = %outcome.reason, "gate failed; degrading to unauthorized view");
                    self.audit(AuditVerdict::Blocked, &line);
                    return blocked(gate.as_ref(), outcome, fingerprint.as_ref());
                }
                GateClass::Block => {
                    tracing::error!(reason = %outcome.reason, "gate failed; launch blocked");
                    self.audit(AuditVerdict::Blocked, &line);
                    return blocked(gate.as_ref(), outcome, fingerprint.as_ref());
                }
            }
        }

        if disabled_features.is_empty() && warnings.is_empty() {
            Disposition::Proceed
        } else {
            Disposition::ProceedWithWarning {
                disabled_features,
                warnings,
            }
        }
    }

    fn audit(&self, verdict: AuditVerdict, line: &str) {
        if let Some(log) = &self.audit {
            log.record(verdict, line);
        }
    }
}

fn blocked(
    gate: &dyn Gate,
    outcome: AttestationOutcome,
    computed: Option<&HardwareFingerprint>,
) -> Disposition {
    // Unauthorized pages show the fingerprint; hard exits carry none.
    let presentation = gate.presentation();
    let fingerprint = match presentation {
        Presentation::Unauthorized => outcome.fingerprint.or_else(|| computed.cloned()),
        Presentation::HardExit => None,
    };
    Disposition::Blocked {
        gate: gate.name().to_string(),
        reason: outcome.reason,
        fingerprint,
        presentation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WardenResult;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingHost(Rc<Cell<usize>>);

    impl HostProbe for CountingHost {
        fn cpu_id(&self) -> WardenResult<String> {
            self.0.set(self.0.get() + 1);
            Ok("BFEBFBFF000906EA".into())
        }
        fn mac_address(&self) -> WardenResult<String> {
            Ok("A4:BB:6D:12:34:56".into())
        }
        fn motherboard_uuid(&self) -> WardenResult<String> {
            Ok("4c4c4544-0042-3510-8051-b4c04f564e32".into())
        }
        fn disk_serial(&self) -> WardenResult<String> {
            Ok("S4EWNX0R123456".into())
        }
    }

    struct Scripted {
        name: &'static str,
        class: GateClass,
        passed: bool,
        needs_fp: bool,
        ran: Rc<Cell<bool>>,
    }

    impl Gate for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }
        fn class(&self) -> GateClass {
            self.class
        }
        fn needs_fingerprint(&self) -> bool {
            self.needs_fp
        }
        fn feature_flag(&self) -> Option<&str> {
            (self.class == GateClass::Warn).then_some("camera")
        }
        fn run(&self, _ctx: &GateContext<'_>) -> AttestationOutcome {
            self.ran.set(true);
            if self.passed {
                AttestationOutcome::pass("ok")
            } else {
                AttestationOutcome::fail(format!("{} failed", self.name))
            }
        }
    }

    fn scripted(
        name: &'static str,
        class: GateClass,
        passed: bool,
        needs_fp: bool,
    ) -> (Box<dyn Gate>, Rc<Cell<bool>>) {
        let ran = Rc::new(Cell::new(false));
        let gate = Scripted {
            name,
            class,
            passed,
            needs_fp,
            ran: ran.clone(),
        };
        (Box::new(gate), ran)
    }

    fn pipeline(gates: Vec<Box<dyn Gate>>, queries: Rc<Cell<usize>>) -> Pipeline {
        Pipeline::new(true, gates, Box::new(CountingHost(queries)), None)
    }

    #[test]
    fn block_stops_before_later_gates_and_fingerprinting() {
        let queries = Rc::new(Cell::new(0));
        let (first, _) = scripted("debugger", GateClass::Block, false, false);
        let (second, second_ran) = scripted("license", GateClass::Degrade, true, true);

        let result = pipeline(vec![first, second], queries.clone()).run();
        assert!(matches!(
            result,
            Disposition::Blocked { ref gate, presentation: Presentation::HardExit, fingerprint: None, .. }
                if gate == "debugger"
        ));
        assert!(!second_ran.get());
        assert_eq!(queries.get(), 0);
    }

    #[test]
    fn fingerprint_is_computed_once() {
        let queries = Rc::new(Cell::new(0));
        let (a, _) = scripted("virtualization", GateClass::Degrade, true, true);
        let (b, _) = scripted("license", GateClass::Degrade, true, true);
        let (c, _) = scripted("integrity", GateClass::Block, true, true);

        assert_eq!(pipeline(vec![a, b, c], queries.clone()).run(), Disposition::Proceed);
        assert_eq!(queries.get(), 1);
    }

    #[test]
    fn degrade_carries_fingerprint_to_unauthorized_view() {
        let (a, _) = scripted("license", GateClass::Degrade, false, true);
        match pipeline(vec![a], Rc::new(Cell::new(0))).run() {
            Disposition::Blocked {
                fingerprint,
                presentation,
                ..
            } => {
                assert_eq!(presentation, Presentation::Unauthorized);
                assert!(fingerprint.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn warn_collects_feature_and_continues() {
        let (sdk, _) = scripted("companion_sdk", GateClass::Warn, false, false);
        let (last, last_ran) = scripted("artifact", GateClass::Block, true, false);

        let result = pipeline(vec![sdk, last], Rc::new(Cell::new(0))).run();
        assert!(last_ran.get());
        assert_eq!(
            result,
            Disposition::ProceedWithWarning {
                disabled_features: vec!["camera".to_string()],
                warnings: vec!["companion_sdk: companion_sdk failed".to_string()],
            }
        );
        assert_eq!(result.exit_code(), 0);
    }

    #[test]
    fn development_mode_runs_nothing() {
        let (gate, ran) = scripted("debugger", GateClass::Block, false, false);
        let p = Pipeline::new(false, vec![gate], Box::new(CountingHost(Rc::new(Cell::new(0)))), None);
        assert_eq!(p.run(), Disposition::Proceed);
        assert!(!ran.get());
    }

    #[test]
    fn disposition_serializes_with_tag() {
        let json = serde_json::to_value(Disposition::Blocked {
            gate: "integrity".into(),
            reason: "integrity check failed".into(),
            fingerprint: None,
            presentation: Presentation::Unauthorized,
        })
        .unwrap();
        assert_eq!(json["disposition"], "blocked");
        assert_eq!(json["presentation"], "unauthorized");
        assert_eq!(serde_json::to_value(Disposition::Proceed).unwrap()["disposition"], "proceed");
    }

    #[test]
    fn settings_lay_out_files_under_storage_root() {
        let s = AttestationSettings::new("/data/qc", "/opt/qc/core.exe").with_version("1.2.0");
        assert_eq!(s.license_path, PathBuf::from("/data/qc/license.dat"));
        assert_eq!(s.integrity_dir, PathBuf::from("/data/qc/integrity"));
        assert_eq!(s.audit_path, PathBuf::from("/data/qc/attestation.log"));
        assert_eq!(s.app_version.as_deref(), Some("1.2.0"));
        assert!(s.production);
    }
}
