use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;
use warden::config::WardenConfig;

const ENV_VARS: &[&str] = &[
    "WARDEN_PRODUCTION",
    "WARDEN_STORAGE_ROOT",
    "WARDEN_ARTIFACT_PATH",
    "WARDEN_APP_VERSION",
    "WARDEN_PROBE_TIMEOUT_SECS",
    "WARDEN_LOG_LEVEL",
    "WARDEN_LOGGING_ENABLED",
];

fn clear_env() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("warden.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
#[serial]
fn file_values_override_defaults() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[attestation]
storage_root = "/var/lib/magicqc"
artifact_path = "/opt/magicqc/MagicQC_Core.exe"
app_version = "2.4.1"

[probe]
timeout_secs = 3

[sdk]
paths = ["/opt/mindvision/libMVSDK.so"]
feature = "camera"
"#,
    );

    let config = WardenConfig::load_from(&path).unwrap();
    assert!(config.attestation.production);
    assert_eq!(config.attestation.app_version.as_deref(), Some("2.4.1"));
    assert_eq!(config.probe.timeout_secs, 3);
    assert_eq!(config.probe.timing_threshold_ms, 100);
    assert_eq!(config.sdk.paths, vec![PathBuf::from("/opt/mindvision/libMVSDK.so")]);

    let settings = config.settings().unwrap();
    assert_eq!(settings.storage_root, PathBuf::from("/var/lib/magicqc"));
    assert_eq!(settings.license_path, PathBuf::from("/var/lib/magicqc/license.dat"));
    assert_eq!(settings.probe_timeout, Duration::from_secs(3));
}

#[test]
#[serial]
fn environment_overrides_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[attestation]
production = true
storage_root = "/var/lib/magicqc"
app_version = "1.0.0"
"#,
    );

    env::set_var("WARDEN_PRODUCTION", "false");
    env::set_var("WARDEN_STORAGE_ROOT", "/mnt/writable/magicqc");
    env::set_var("WARDEN_APP_VERSION", "1.0.1");
    env::set_var("WARDEN_PROBE_TIMEOUT_SECS", "9");
    env::set_var("WARDEN_LOG_LEVEL", "debug");

    let config = WardenConfig::load_from(&path);
    clear_env();
    let config = config.unwrap();

    assert!(!config.attestation.production);
    assert_eq!(
        config.attestation.storage_root,
        Some(PathBuf::from("/mnt/writable/magicqc"))
    );
    assert_eq!(config.attestation.app_version.as_deref(), Some("1.0.1"));
    assert_eq!(config.probe.timeout_secs, 9);
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn unparseable_env_values_are_ignored() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[probe]\ntimeout_secs = 4\n");

    env::set_var("WARDEN_PROBE_TIMEOUT_SECS", "soon");
    env::set_var("WARDEN_PRODUCTION", "maybe");
    let config = WardenConfig::load_from(&path);
    clear_env();
    let config = config.unwrap();

    assert_eq!(config.probe.timeout_secs, 4);
    assert!(config.attestation.production);
}

#[test]
#[serial]
fn invalid_values_are_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();

    let path = write_config(&dir, "[probe]\ntimeout_secs = 0\n");
    assert!(WardenConfig::load_from(&path).is_err());

    let path = write_config(&dir, "[logging]\nlevel = \"loud\"\n");
    assert!(WardenConfig::load_from(&path).is_err());

    let path = write_config(&dir, "[sdk]\nfeature = \"\"\n");
    assert!(WardenConfig::load_from(&path).is_err());
}

#[test]
#[serial]
fn missing_file_is_an_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    assert!(WardenConfig::load_from(&dir.path().join("absent.toml")).is_err());
}

#[test]
#[serial]
fn artifact_defaults_to_running_binary() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[attestation]\nstorage_root = \"/tmp/qc\"\n");

    let config = WardenConfig::load_from(&path).unwrap();
    assert_eq!(config.artifact_path().unwrap(), env::current_exe().unwrap());
}
