//! droidenv - Android emulator environment provisioning
//!
//! Sets up and tears down everything needed to run an Android emulator for
//! the current user.
//!
//! ## Pipelines
//!
//! - **provision**: extract the command-line tools, install SDK packages,
//!   accept licenses, create the AVD, persist the environment and launch the
//!   emulator
//! - **teardown**: stop adb, delete the SDK root and the AVD, clear the
//!   persisted environment
//! - **reinstall**: teardown followed by provision
//! - **status**: report what is currently installed
//!
//! ## Architecture
//!
//! - `droidenv-core`: configuration, paths, errors and the command runner
//! - `droidenv-android-toolchain`: archive handling, sdkmanager and the
//!   environment stores
//! - `droidenv-emulator-bridge`: AVDs, the emulator and the adb daemon

#![warn(clippy::all)]

pub mod commands;
pub mod pipeline;
pub mod report;

// Re-export main components for library usage
pub use droidenv_core as core;
pub use droidenv_android_toolchain as toolchain;
pub use droidenv_emulator_bridge as emulator;

pub use pipeline::{Pipeline, PipelineFailure, PipelineResult};
pub use report::{Outcome, RunReport, Step, StepRecord};
