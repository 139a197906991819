//! Process and host environment gates (1-4).
//!
//! These checks read live process state through an [`EnvironmentProbe`] and
//! match it against fixed denylists. The lists are a snapshot of known tool,
//! module and hypervisor names; they are not complete and are not meant to
//! be. They raise the bar against casual instrumentation only.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::{WardenError, WardenResult};
use crate::gates::{AttestationOutcome, Gate, GateClass, GateContext};

/// Environment variables that inject code into a freshly launched process.
pub const INJECTION_ENV_HINTS: &[&str] = &["LD_PRELOAD", "LD_AUDIT", "DYLD_INSERT_LIBRARIES"];

/// Process names of debuggers, tracers and traffic/memory inspectors.
/// Matched exactly, case-insensitively, with any `.exe` suffix removed.
pub const ANALYSIS_TOOLS: &[&str] = &[
    "x64dbg",
    "x32dbg",
    "ollydbg",
    "ida",
    "ida64",
    "windbg",
    "immunitydebugger",
    "wireshark",
    "fiddler",
    "processhacker",
    "procmon",
    "procexp",
    "cheatengine-x86_64",
    "httpdebuggerui",
    "dnspy",
    "gdb",
    "lldb",
    "frida-server",
    "radare2",
    "scylla",
];

/// Substrings of hooking and sandbox libraries loaded into the process.
pub const INJECTED_MODULES: &[&str] = &[
    "frida",
    "easyhook",
    "detoured",
    "sbiedll",
    "snxhk",
    "cmdvrt",
    "api_log",
    "dir_watch",
    "vehdebug",
    "speedhack",
];

/// Substrings of hypervisor vendor and product strings.
pub const VIRTUALIZATION_SIGNATURES: &[&str] = &[
    "vmware",
    "virtualbox",
    "vbox",
    "qemu",
    "kvm",
    "xen",
    "virtual machine",
    "parallels",
    "bochs",
    "innotek",
];

/// Default wall-clock budget for the timing probe.
pub const DEFAULT_TIMING_THRESHOLD: Duration = Duration::from_millis(100);

const TIMING_ITERATIONS: u64 = 200_000;

/// Live process and host state consumed by the gates.
///
/// The default methods read the real environment so test doubles only
/// override what they need.
pub trait EnvironmentProbe {
    /// Whether the kernel reports a tracer on this process.
    fn tracer_attached(&self) -> WardenResult<bool>;

    /// Names of code-injection variables set in this process's environment.
    fn env_hints(&self) -> Vec<String> {
        INJECTION_ENV_HINTS
            .iter()
            .filter(|name| std::env::var_os(name).is_some_and(|v| !v.is_empty()))
            .map(|name| name.to_string())
            .collect()
    }

    /// Wall-clock time of a fixed deterministic computation. Single-stepping
    /// or breakpoints inflate it far past the threshold.
    fn timing_sample(&self) -> Duration {
        let start = Instant::now();
        let mut acc: u64 = 0x9e37_79b9_7f4a_7c15;
        for i in 0..TIMING_ITERATIONS {
            acc = std::hint::black_box(acc.rotate_left(5) ^ i).wrapping_mul(31);
        }
        std::hint::black_box(acc);
        start.elapsed()
    }

    /// Image names of running processes.
    fn process_names(&self) -> WardenResult<Vec<String>>;

    /// File names of modules mapped into this process.
    fn module_names(&self) -> WardenResult<Vec<String>>;

    /// System, board and firmware vendor/product strings.
    fn system_identity(&self) -> WardenResult<Vec<String>>;

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// [`EnvironmentProbe`] backed by the running operating system.
#[derive(Debug, Clone)]
pub struct SystemEnvironment {
    timeout: Duration,
}

impl SystemEnvironment {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemEnvironment {
    fn default() -> Self {
        Self::new(crate::hardware::DEFAULT_QUERY_TIMEOUT)
    }
}

impl EnvironmentProbe for SystemEnvironment {
    fn tracer_attached(&self) -> WardenResult<bool> {
        sys::tracer_attached()
    }

    fn process_names(&self) -> WardenResult<Vec<String>> {
        sys::process_names(self.timeout)
    }

    fn module_names(&self) -> WardenResult<Vec<String>> {
        sys::module_names(self.timeout)
    }

    fn system_identity(&self) -> WardenResult<Vec<String>> {
        sys::system_identity(self.timeout)
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use crate::errors::{WardenError, WardenResult};

    const DMI_FIELDS: &[&str] = &["sys_vendor", "product_name", "board_vendor", "bios_vendor"];

    pub fn tracer_attached() -> WardenResult<bool> {
        let status = fs::read_to_string("/proc/self/status")
            .map_err(|e| WardenError::HostQueryFailure(format!("/proc/self/status: {e}")))?;

        status
            .lines()
            .find_map(|line| line.strip_prefix("TracerPid:"))
            .map(|pid| pid.trim() != "0")
            .ok_or_else(|| WardenError::HostQueryFailure("no TracerPid line".to_string()))
    }

    pub fn process_names(_timeout: Duration) -> WardenResult<Vec<String>> {
        let entries = fs::read_dir("/proc")
            .map_err(|e| WardenError::HostQueryFailure(format!("/proc: {e}")))?;

        Ok(entries
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()))
            .filter_map(|e| image_of(&e.path()))
            .collect())
    }

    /// Full image name of one `/proc/<pid>` entry. `comm` is cut at 15 bytes,
    /// so it is only the last resort.
    fn image_of(proc_dir: &Path) -> Option<String> {
        let from_exe = fs::read_link(proc_dir.join("exe"))
            .ok()
            .and_then(|exe| exe.file_name().map(|n| n.to_string_lossy().into_owned()))
            .map(|name| name.trim_end_matches(" (deleted)").to_string());

        from_exe
            .or_else(|| {
                fs::read(proc_dir.join("cmdline"))
                    .ok()
                    .and_then(|raw| cmdline_image(&raw))
            })
            .or_else(|| fs::read_to_string(proc_dir.join("comm")).ok())
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    /// Base name of `argv[0]` from a NUL-separated `cmdline`.
    pub(super) fn cmdline_image(raw: &[u8]) -> Option<String> {
        let argv0 = raw.split(|&b| b == 0).next()?;
        let argv0 = String::from_utf8_lossy(argv0);
        let base = argv0.rsplit('/').next()?.trim();
        (!base.is_empty()).then(|| base.to_string())
    }

    pub fn module_names(_timeout: Duration) -> WardenResult<Vec<String>> {
        let maps = fs::read_to_string("/proc/self/maps")
            .map_err(|e| WardenError::HostQueryFailure(format!("/proc/self/maps: {e}")))?;

        let mut names: Vec<String> = maps
            .lines()
            .filter_map(|line| line.split_whitespace().nth(5))
            .filter(|path| path.starts_with('/'))
            .filter_map(|path| Path::new(path).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    pub fn system_identity(_timeout: Duration) -> WardenResult<Vec<String>> {
        let values: Vec<String> = DMI_FIELDS
            .iter()
            .filter_map(|field| fs::read_to_string(format!("/sys/class/dmi/id/{field}")).ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();

        if values.is_empty() {
            return Err(WardenError::HostQueryFailure(
                "no readable DMI identity fields".to_string(),
            ));
        }
        Ok(values)
    }
}

#[cfg(target_os = "windows")]
mod sys {
    use std::time::Duration;

    use crate::command::run_with_timeout;
    use crate::errors::{WardenError, WardenResult};

    fn csv_fields(line: &str) -> Vec<String> {
        line.trim()
            .trim_matches('"')
            .split("\",\"")
            .map(str::to_string)
            .collect()
    }

    pub fn tracer_attached() -> WardenResult<bool> {
        use windows_sys::Win32::System::Diagnostics::Debug::{
            CheckRemoteDebuggerPresent, IsDebuggerPresent,
        };
        use windows_sys::Win32::System::Threading::GetCurrentProcess;

        // SAFETY: reads debug state of this process only.
        if unsafe { IsDebuggerPresent() } != 0 {
            return Ok(true);
        }

        let mut remote = 0;
        // SAFETY: pseudo-handle for this process and a live out-pointer.
        let ok = unsafe { CheckRemoteDebuggerPresent(GetCurrentProcess(), &mut remote) };
        if ok == 0 {
            return Err(WardenError::HostQueryFailure(format!(
                "CheckRemoteDebuggerPresent: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(remote != 0)
    }

    pub fn process_names(timeout: Duration) -> WardenResult<Vec<String>> {
        let output = run_with_timeout("tasklist", &["/fo", "csv", "/nh"], timeout)?;
        Ok(output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| csv_fields(line).into_iter().next())
            .collect())
    }

    pub fn module_names(timeout: Duration) -> WardenResult<Vec<String>> {
        let filter = format!("PID eq {}", std::process::id());
        let output = run_with_timeout(
            "tasklist",
            &["/m", "/fi", filter.as_str(), "/fo", "csv", "/nh"],
            timeout,
        )?;

        let modules = output
            .lines()
            .filter_map(|line| csv_fields(line).into_iter().nth(2))
            .flat_map(|list| {
                list.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        if modules.is_empty() {
            return Err(WardenError::HostQueryFailure(
                "tasklist reported no modules".to_string(),
            ));
        }
        Ok(modules)
    }

    pub fn system_identity(timeout: Duration) -> WardenResult<Vec<String>> {
        let queries: [&[&str]; 2] = [
            &["computersystem", "get", "manufacturer,model"],
            &["bios", "get", "manufacturer,version,serialnumber"],
        ];

        let mut values = Vec::new();
        let mut last_error = None;
        for args in queries {
            match run_with_timeout("wmic", args, timeout) {
                Ok(out) => values.extend(
                    out.lines()
                        .skip(1)
                        .map(|l| l.trim().to_string())
                        .filter(|l| !l.is_empty()),
                ),
                Err(e) => last_error = Some(e),
            }
        }

        match (values.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(values),
        }
    }
}

#[cfg(target_os = "macos")]
mod sys {
    use std::path::Path;
    use std::time::Duration;

    use crate::command::run_with_timeout;
    use crate::errors::{WardenError, WardenResult};

    /// `P_TRACED` from `<sys/proc.h>`.
    const P_TRACED: i32 = 0x0000_0800;
    /// `sizeof(struct kinfo_proc)` on x86-64 and arm64.
    const KINFO_PROC_SIZE: usize = 648;
    /// Offset of `kp_proc.p_flag`.
    const P_FLAG_OFFSET: usize = 16;

    pub fn tracer_attached() -> WardenResult<bool> {
        let mut buf = [0u8; KINFO_PROC_SIZE];
        let mut size: libc::size_t = KINFO_PROC_SIZE;

        // SAFETY: `buf` outlives the call and `size` holds its length.
        let rc = unsafe {
            let mut mib: [libc::c_int; 4] = [
                libc::CTL_KERN,
                libc::KERN_PROC,
                libc::KERN_PROC_PID,
                libc::getpid(),
            ];
            libc::sysctl(
                mib.as_mut_ptr(),
                4,
                buf.as_mut_ptr().cast::<libc::c_void>(),
                &mut size,
                std::ptr::null_mut(),
                0,
            )
        };

        if rc != 0 {
            return Err(WardenError::HostQueryFailure(format!(
                "sysctl kern.proc.pid: {}",
                std::io::Error::last_os_error()
            )));
        }

        let flag = buf
            .get(P_FLAG_OFFSET..P_FLAG_OFFSET + 4)
            .filter(|_| size >= P_FLAG_OFFSET + 4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(i32::from_ne_bytes)
            .ok_or_else(|| WardenError::HostQueryFailure("short kinfo_proc".to_string()))?;
        Ok(flag & P_TRACED != 0)
    }

    pub fn process_names(timeout: Duration) -> WardenResult<Vec<String>> {
        let output = run_with_timeout("ps", &["-axco", "comm="], timeout)?;
        Ok(output
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    pub fn module_names(timeout: Duration) -> WardenResult<Vec<String>> {
        let pid = std::process::id().to_string();
        let output = run_with_timeout("lsof", &["-p", pid.as_str(), "-Fn"], timeout)?;
        let mut names: Vec<String> = output
            .lines()
            .filter_map(|l| l.strip_prefix('n'))
            .filter(|p| p.starts_with('/'))
            .filter_map(|p| Path::new(p).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    pub fn system_identity(timeout: Duration) -> WardenResult<Vec<String>> {
        let model = run_with_timeout("sysctl", &["-n", "hw.model"], timeout)?;
        let mut values = vec![model.trim().to_string()];
        if let Ok(features) = run_with_timeout("sysctl", &["-n", "machdep.cpu.features"], timeout) {
            if features.split_whitespace().any(|f| f == "VMM") {
                values.push("virtual machine".to_string());
            }
        }
        Ok(values)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
mod sys {
    use std::time::Duration;

    use crate::errors::{WardenError, WardenResult};

    fn unsupported<T>() -> WardenResult<T> {
        Err(WardenError::HostQueryFailure(
            "environment queries are not supported on this platform".to_string(),
        ))
    }

    pub fn tracer_attached() -> WardenResult<bool> {
        unsupported()
    }
    pub fn process_names(_timeout: Duration) -> WardenResult<Vec<String>> {
        unsupported()
    }
    pub fn module_names(_timeout: Duration) -> WardenResult<Vec<String>> {
        unsupported()
    }
    pub fn system_identity(_timeout: Duration) -> WardenResult<Vec<String>> {
        unsupported()
    }
}

fn query_failed(what: &str, e: &WardenError) -> AttestationOutcome {
    AttestationOutcome::fail(format!("{what} could not be completed: {e}"))
}

/// Image name without directory or `.exe` suffix, lowercased.
fn image_name(raw: &str) -> String {
    let base = raw.trim().rsplit(['/', '\\']).next().unwrap_or_default();
    let lower = base.to_ascii_lowercase();
    lower.strip_suffix(".exe").unwrap_or(&lower).to_string()
}

/// Gate 1: tracer, injection variables and timing.
pub struct DebuggerGate {
    probe: Arc<dyn EnvironmentProbe>,
    threshold: Duration,
}

impl DebuggerGate {
    pub fn new(probe: Arc<dyn EnvironmentProbe>, threshold: Duration) -> Self {
        Self { probe, threshold }
    }
}

impl Gate for DebuggerGate {
    fn name(&self) -> &'static str {
        "debugger"
    }

    fn class(&self) -> GateClass {
        GateClass::Block
    }

    fn run(&self, _ctx: &GateContext<'_>) -> AttestationOutcome {
        match self.probe.tracer_attached() {
            Ok(true) => return AttestationOutcome::fail("debugger attached to process"),
            Ok(false) => {}
            Err(e) => return query_failed("debugger check", &e),
        }

        let hints = self.probe.env_hints();
        if !hints.is_empty() {
            return AttestationOutcome::fail(format!(
                "code injection environment set: {}",
                hints.join(", ")
            ));
        }

        let elapsed = self.probe.timing_sample();
        if elapsed > self.threshold {
            return AttestationOutcome::fail(format!(
                "timing anomaly: {}ms exceeds {}ms",
                elapsed.as_millis(),
                self.threshold.as_millis()
            ));
        }

        AttestationOutcome::pass("no debugger detected")
    }
}

/// Gate 2: known analysis tools among running processes.
pub struct AnalysisToolGate {
    probe: Arc<dyn EnvironmentProbe>,
}

impl AnalysisToolGate {
    pub fn new(probe: Arc<dyn EnvironmentProbe>) -> Self {
        Self { probe }
    }
}

impl Gate for AnalysisToolGate {
    fn name(&self) -> &'static str {
        "analysis_tools"
    }

    fn class(&self) -> GateClass {
        GateClass::Block
    }

    fn run(&self, _ctx: &GateContext<'_>) -> AttestationOutcome {
        let processes = match self.probe.process_names() {
            Ok(p) => p,
            Err(e) => return query_failed("process scan", &e),
        };

        let found = processes
            .iter()
            .map(|p| image_name(p))
            .find(|name| ANALYSIS_TOOLS.contains(&name.as_str()));

        match found {
            Some(tool) => AttestationOutcome::fail(format!("analysis tool running: {tool}")),
            None => AttestationOutcome::pass("no analysis tools running"),
        }
    }
}

/// Gate 3: hooking or sandbox libraries mapped into this process.
pub struct InjectedModuleGate {
    probe: Arc<dyn EnvironmentProbe>,
}

impl InjectedModuleGate {
    pub fn new(probe: Arc<dyn EnvironmentProbe>) -> Self {
        Self { probe }
    }
}

impl Gate for InjectedModuleGate {
    fn name(&self) -> &'static str {
        "injected_modules"
    }

    fn class(&self) -> GateClass {
        GateClass::Block
    }

    fn run(&self, _ctx: &GateContext<'_>) -> AttestationOutcome {
        let modules = match self.probe.module_names() {
            Ok(m) => m,
            Err(e) => return query_failed("module scan", &e),
        };

        for module in &modules {
            let lower = module.to_ascii_lowercase();
            if let Some(sig) = INJECTED_MODULES.iter().find(|sig| lower.contains(*sig)) {
                return AttestationOutcome::fail(format!(
                    "injected module detected: {} ({})",
                    module.trim(),
                    sig
                ));
            }
        }
        AttestationOutcome::pass("no injected modules")
    }
}

/// Gate 4: hypervisor signatures in system identity strings.
///
/// Degrades instead of blocking; legitimate virtualized deployments exist.
pub struct VirtualizationGate {
    probe: Arc<dyn EnvironmentProbe>,
}

impl VirtualizationGate {
    pub fn new(probe: Arc<dyn EnvironmentProbe>) -> Self {
        Self { probe }
    }
}

impl Gate for VirtualizationGate {
    fn name(&self) -> &'static str {
        "virtualization"
    }

    fn class(&self) -> GateClass {
        GateClass::Degrade
    }

    fn needs_fingerprint(&self) -> bool {
        true
    }

    fn run(&self, ctx: &GateContext<'_>) -> AttestationOutcome {
        let identity = match self.probe.system_identity() {
            Ok(values) => values,
            Err(e) => {
                return query_failed("virtualization check", &e).with_fingerprint(ctx.fingerprint)
            }
        };

        for value in &identity {
            let lower = value.to_ascii_lowercase();
            if let Some(sig) = VIRTUALIZATION_SIGNATURES.iter().find(|s| lower.contains(*s)) {
                return AttestationOutcome::fail(format!(
                    "virtual machine detected: {} ({})",
                    value.trim(),
                    sig
                ))
                .with_fingerprint(ctx.fingerprint);
            }
        }
        AttestationOutcome::pass("no virtualization signatures")
    }
}
