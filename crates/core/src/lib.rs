//! droidenv Core - configuration and shared plumbing
//!
//! This crate provides what every droidenv pipeline step builds on:
//! the provisioning config, the resolved SDK/AVD path layout, idempotent
//! filesystem helpers and the external command runner.

pub mod config;
pub mod error;
pub mod fs;
pub mod paths;
pub mod process;

pub use config::ProvisionConfig;
pub use error::{DroidEnvError, Result};
pub use paths::SdkLayout;
pub use process::{CommandOutput, CommandRunner, Invocation, StdinFeed, TokioRunner};

/// droidenv version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "droidenv";
