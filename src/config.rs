//! Configuration for the attestation subsystem.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `warden.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `WARDEN_PRODUCTION` - Run the gate pipeline (`false` is the development bypass)
//! - `WARDEN_STORAGE_ROOT` - Writable directory for the license, integrity record and audit log
//! - `WARDEN_ARTIFACT_PATH` - Executable whose integrity is verified
//! - `WARDEN_APP_VERSION` - Application version the integrity baseline is scoped to
//! - `WARDEN_PROBE_TIMEOUT_SECS` - Per-query host probe timeout
//! - `WARDEN_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//! - `WARDEN_LOGGING_ENABLED` - Install the diagnostic log subscriber

use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use config::{Config, ConfigBuilder};
use serde::Deserialize;

use crate::audit::AUDIT_FILE_NAME;
use crate::errors::{WardenError, WardenResult};
use crate::license::LICENSE_FILE_NAME;
use crate::pipeline::{AttestationSettings, DEFAULT_SDK_FEATURE, DEFAULT_SDK_PATHS, INTEGRITY_DIR_NAME};

/// Global configuration singleton.
static CONFIG: OnceLock<WardenConfig> = OnceLock::new();

/// Directory created under the platform data directory.
pub const APP_DIR_NAME: &str = "qc-warden";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub attestation: AttestationConfig,
    pub probe: ProbeConfig,
    pub sdk: SdkConfig,
    pub logging: LoggingConfig,
}

/// Where attestation state lives and what it protects.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttestationConfig {
    /// Run the gate pipeline. `false` skips it entirely.
    pub production: bool,
    /// Writable storage root; defaults to the platform data directory.
    pub storage_root: Option<PathBuf>,
    /// Monitored executable; defaults to the running binary.
    pub artifact_path: Option<PathBuf>,
    /// Version the integrity baseline is scoped to.
    pub app_version: Option<String>,
    pub license_file: String,
    pub integrity_dir: String,
    pub audit_file: String,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            production: true,
            storage_root: None,
            artifact_path: None,
            app_version: None,
            license_file: LICENSE_FILE_NAME.to_string(),
            integrity_dir: INTEGRITY_DIR_NAME.to_string(),
            audit_file: AUDIT_FILE_NAME.to_string(),
        }
    }
}

/// Host probe limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Deadline for each host query, in seconds
    pub timeout_secs: u64,
    /// Debugger timing probe budget, in milliseconds
    pub timing_threshold_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            timing_threshold_ms: 100,
        }
    }
}

/// Companion SDK lookup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Absolute paths checked for existence, first hit wins
    pub paths: Vec<PathBuf>,
    /// Feature disabled when none of the paths exist
    pub feature: String,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            paths: DEFAULT_SDK_PATHS.iter().map(PathBuf::from).collect(),
            feature: DEFAULT_SDK_FEATURE.to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "warn".to_string(),
        }
    }
}

fn config_error(e: config::ConfigError) -> WardenError {
    WardenError::ConfigError(e.to_string())
}

impl WardenConfig {
    /// Load from `warden.toml` in the working directory (optional) and the
    /// environment.
    pub fn load() -> WardenResult<Self> {
        let builder = Self::defaults()?
            .add_source(config::File::with_name("warden").required(false));
        Self::finish(builder)
    }

    /// Load from an explicit file (required) and the environment. Does not
    /// touch the global singleton.
    pub fn load_from(path: &Path) -> WardenResult<Self> {
        let builder = Self::defaults()?.add_source(config::File::from(path).required(true));
        let config = Self::finish(builder)?;
        config.validate()?;
        Ok(config)
    }

    fn defaults() -> WardenResult<ConfigBuilder<config::builder::DefaultState>> {
        Config::builder()
            .set_default("attestation.production", true)
            .map_err(config_error)?
            .set_default("attestation.license_file", LICENSE_FILE_NAME)
            .map_err(config_error)?
            .set_default("attestation.integrity_dir", INTEGRITY_DIR_NAME)
            .map_err(config_error)?
            .set_default("attestation.audit_file", AUDIT_FILE_NAME)
            .map_err(config_error)?
            .set_default("probe.timeout_secs", 5)
            .map_err(config_error)?
            .set_default("probe.timing_threshold_ms", 100)
            .map_err(config_error)?
            .set_default("sdk.feature", DEFAULT_SDK_FEATURE)
            .map_err(config_error)?
            .set_default("logging.enabled", true)
            .map_err(config_error)?
            .set_default("logging.level", "warn")
            .map_err(config_error)
    }

    fn finish(builder: ConfigBuilder<config::builder::DefaultState>) -> WardenResult<Self> {
        let builder = builder
            .set_override_option(
                "attestation.production",
                env::var("WARDEN_PRODUCTION")
                    .ok()
                    .and_then(|v| v.parse::<bool>().ok()),
            )
            .map_err(config_error)?
            .set_override_option("attestation.storage_root", env::var("WARDEN_STORAGE_ROOT").ok())
            .map_err(config_error)?
            .set_override_option(
                "attestation.artifact_path",
                env::var("WARDEN_ARTIFACT_PATH").ok(),
            )
            .map_err(config_error)?
            .set_override_option("attestation.app_version", env::var("WARDEN_APP_VERSION").ok())
            .map_err(config_error)?
            .set_override_option(
                "probe.timeout_secs",
                env::var("WARDEN_PROBE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(config_error)?
            .set_override_option(
                "logging.enabled",
                env::var("WARDEN_LOGGING_ENABLED")
                    .ok()
                    .and_then(|v| v.parse::<bool>().ok()),
            )
            .map_err(config_error)?
            .set_override_option("logging.level", env::var("WARDEN_LOG_LEVEL").ok())
            .map_err(config_error)?;

        let settings = builder
            .build()
            .map_err(|e| WardenError::ConfigError(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| WardenError::ConfigError(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> WardenResult<()> {
        if self.probe.timeout_secs == 0 {
            return Err(WardenError::ConfigError(
                "probe.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.probe.timing_threshold_ms == 0 {
            return Err(WardenError::ConfigError(
                "probe.timing_threshold_ms must be greater than 0".to_string(),
            ));
        }

        for (key, value) in [
            ("attestation.license_file", &self.attestation.license_file),
            ("attestation.integrity_dir", &self.attestation.integrity_dir),
            ("attestation.audit_file", &self.attestation.audit_file),
            ("sdk.feature", &self.sdk.feature),
        ] {
            if value.trim().is_empty() {
                return Err(WardenError::ConfigError(format!("{key} cannot be empty")));
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(WardenError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        Ok(())
    }

    /// Configured storage root, or `<data dir>/qc-warden`.
    pub fn storage_root(&self) -> WardenResult<PathBuf> {
        if let Some(root) = &self.attestation.storage_root {
            return Ok(root.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or_else(|| {
                WardenError::ConfigError(
                    "no platform data directory; set attestation.storage_root".to_string(),
                )
            })
    }

    /// Configured artifact, or the running executable.
    pub fn artifact_path(&self) -> WardenResult<PathBuf> {
        match &self.attestation.artifact_path {
            Some(path) => Ok(path.clone()),
            None => Ok(env::current_exe()?),
        }
    }

    /// Resolve paths and durations into orchestrator settings.
    pub fn settings(&self) -> WardenResult<AttestationSettings> {
        let storage_root = self.storage_root()?;
        Ok(AttestationSettings {
            production: self.attestation.production,
            artifact_path: self.artifact_path()?,
            app_version: self.attestation.app_version.clone(),
            license_path: storage_root.join(&self.attestation.license_file),
            integrity_dir: storage_root.join(&self.attestation.integrity_dir),
            audit_path: storage_root.join(&self.attestation.audit_file),
            sdk_paths: self.sdk.paths.clone(),
            sdk_feature: self.sdk.feature.clone(),
            probe_timeout: Duration::from_secs(self.probe.timeout_secs),
            timing_threshold: Duration::from_millis(self.probe.timing_threshold_ms),
            storage_root,
        })
    }
}

/// Get the global configuration.
///
/// This loads the configuration on first access and caches it.
/// Returns an error if configuration loading or validation fails.
pub fn get_config() -> WardenResult<&'static WardenConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = WardenConfig::load()?;
    config.validate()?;

    // Another thread may have won the race; either value is valid.
    Ok(CONFIG.get_or_init(|| config))
}

/// Initialize configuration explicitly.
///
/// Call this early in your application to catch configuration errors.
pub fn init_config() -> WardenResult<&'static WardenConfig> {
    get_config()
}
