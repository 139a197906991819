//! `warden` operator CLI.
//!
//! ```text
//! warden [--config <path>] [--dev] [--app-version <v>] <command>
//!
//! commands:
//!   fingerprint      print this machine's fingerprint and its components
//!   check            run the attestation pipeline, print the disposition as JSON
//!   license-status   validate the existing license without creating one
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::Level;
use warden::config::{get_config, WardenConfig};
use warden::hardware::{HardwareComponents, SystemProbe};
use warden::license::{LicenseStatus, LicenseStore};
use warden::pipeline::Pipeline;
use warden::WardenResult;

const USAGE: &str = "usage: warden [--config <path>] [--dev] [--app-version <v>] <fingerprint|check|license-status>";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    dev: bool,
    app_version: Option<String>,
    command: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--app-version" => {
                args.app_version = Some(iter.next().ok_or("--app-version needs a value")?);
            }
            "--dev" => args.dev = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            cmd if args.command.is_none() && !cmd.starts_with('-') => {
                args.command = Some(cmd.to_string());
            }
            other => return Err(format!("unexpected argument '{other}'\n{USAGE}")),
        }
    }
    Ok(args)
}

fn init_logging(config: &WardenConfig) {
    if !config.logging.enabled {
        return;
    }
    let level = config.logging.level.parse::<Level>().unwrap_or(Level::WARN);
    // Logs go to stderr; stdout carries the machine-readable result.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(args: &Args) -> WardenResult<WardenConfig> {
    let mut config = match &args.config {
        Some(path) => WardenConfig::load_from(path)?,
        None => get_config()?.clone(),
    };
    if args.dev {
        config.attestation.production = false;
    }
    if let Some(version) = &args.app_version {
        config.attestation.app_version = Some(version.clone());
    }
    Ok(config)
}

fn run(args: Args) -> WardenResult<ExitCode> {
    let config = load_config(&args)?;
    init_logging(&config);
    let settings = config.settings()?;

    match args.command.as_deref() {
        Some("fingerprint") => {
            let components = HardwareComponents::collect(&SystemProbe::new(settings.probe_timeout));
            println!("{}", components.fingerprint());
            println!("  cpu_id:           {}", components.cpu_id);
            println!("  mac_address:      {}", components.mac_address);
            println!("  motherboard_uuid: {}", components.motherboard_uuid);
            println!("  disk_serial:      {}", components.disk_serial);
            Ok(ExitCode::SUCCESS)
        }
        Some("check") => {
            let disposition = Pipeline::system(&settings).run();
            println!("{}", serde_json::to_string_pretty(&disposition)?);
            Ok(ExitCode::from(disposition.exit_code() as u8))
        }
        Some("license-status") => {
            let fingerprint = warden::hardware::current_fingerprint(settings.probe_timeout);
            let store = LicenseStore::new(&settings.license_path);
            match store.validate(&fingerprint) {
                LicenseStatus::Valid(payload) => {
                    println!(
                        "valid: {} (created {}, schema {})",
                        store.path().display(),
                        payload.created_at.to_rfc3339(),
                        payload.schema_version
                    );
                    Ok(ExitCode::SUCCESS)
                }
                LicenseStatus::Invalid(rejection) => {
                    println!("invalid: {} ({})", rejection.category(), rejection);
                    println!("fingerprint: {}", fingerprint);
                    Ok(ExitCode::from(2))
                }
            }
        }
        _ => {
            eprintln!("{USAGE}");
            Ok(ExitCode::from(64))
        }
    }
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(64);
        }
    };

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("warden: {e}");
            ExitCode::FAILURE
        }
    }
}
