//! Warden - node-locked licensing and startup attestation for the MagicQC
//! operator panel.
//!
//! The crate decides, once per process start, whether the application may
//! run on this machine:
//!
//! - [`hardware`] derives a stable machine fingerprint from four host
//!   identifiers.
//! - [`license`] binds that fingerprint into an encrypted, MAC-sealed record.
//! - [`integrity`] pins the SHA-256 of the shipped executable per version.
//! - [`gates`] and [`pipeline`] run the ordered environment checks and fold
//!   them into a [`pipeline::Disposition`] for the UI shell.
//!
//! # Example
//!
//! ```rust,no_run
//! use warden::config::get_config;
//! use warden::pipeline::Pipeline;
//!
//! let settings = get_config()?.settings()?;
//! match Pipeline::system(&settings).run() {
//!     warden::pipeline::Disposition::Blocked { reason, .. } => eprintln!("blocked: {reason}"),
//!     _ => { /* start the application */ }
//! }
//! # Ok::<(), warden::errors::WardenError>(())
//! ```

pub mod audit;
pub mod command;
pub mod config;
pub mod encryption;
pub mod errors;
pub mod gates;
pub mod hardware;
pub mod integrity;
pub mod key_material;
pub mod license;
pub mod pipeline;

pub use errors::{WardenError, WardenResult};
pub use hardware::HardwareFingerprint;
pub use pipeline::{AttestationSettings, Disposition, Pipeline};
