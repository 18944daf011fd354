//! Android Emulator Bridge
//!
//! Creates and removes Android Virtual Devices (AVDs), launches the
//! emulator and stops the adb daemon.

pub mod avd;
pub mod emulator;
pub mod adb;

pub use avd::{AvdManager, AvdSpec, AvdInfo, AvdRemoval};
pub use emulator::EmulatorLauncher;
pub use adb::AdbDaemon;
