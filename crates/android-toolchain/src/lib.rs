//! Android Toolchain Management
//!
//! Handles the SDK side of provisioning:
//! - Command-line tools archive (download, checksum, extraction, layout)
//! - SDK package installation and license acceptance
//! - Session and persisted environment variables

pub mod archive;
pub mod env;
pub mod sdk_manager;

pub use archive::{extract_zip, normalize_cmdline_tools_layout, prepare_archive, LayoutFix};
pub use env::{AndroidEnv, EnvScope, EnvStore, MemoryEnv, ProcessEnv, ProfileEnv, SetxEnv};
pub use sdk_manager::{PackageOutcome, SdkManager};
