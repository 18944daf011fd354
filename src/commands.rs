//! CLI commands for droidenv
//!
//! Wires the real host capabilities (process runner, process environment,
//! persisted user environment) into a [`Pipeline`], runs one pipeline and
//! prints its report, including the partial report of a failed run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use droidenv_android_toolchain::env::persistent_store;
use droidenv_android_toolchain::ProcessEnv;
use droidenv_core::paths::home_dir;
use droidenv_core::{ProvisionConfig, SdkLayout, TokioRunner, APP_NAME, VERSION};

use crate::pipeline::{Pipeline, PipelineResult};
use crate::report::RunReport;

/// Which pipeline to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Provision,
    Teardown,
    Reinstall,
    Status,
}

impl PipelineKind {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineKind::Provision => "provision",
            PipelineKind::Teardown => "teardown",
            PipelineKind::Reinstall => "reinstall",
            PipelineKind::Status => "status",
        }
    }

    /// Run this pipeline
    pub async fn run(&self, pipeline: &Pipeline<'_>) -> PipelineResult {
        match self {
            PipelineKind::Provision => pipeline.provision().await,
            PipelineKind::Teardown => pipeline.teardown().await,
            PipelineKind::Reinstall => pipeline.reinstall().await,
            PipelineKind::Status => pipeline.status().await,
        }
    }
}

/// One pipeline run against the current user's machine
pub struct PipelineCommand {
    pub kind: PipelineKind,
    pub config_path: Option<PathBuf>,
    /// Print the report as JSON instead of a log summary
    pub json: bool,
}

impl PipelineCommand {
    /// Load the configuration, resolve paths under the home directory, run
    /// the pipeline and print the report
    pub async fn execute(&self) -> Result<()> {
        info!("{} v{} starting {}...", APP_NAME, VERSION, self.kind.name());

        let config = load_config(self.config_path.as_deref()).await?;
        let home = home_dir()?;
        let layout = SdkLayout::resolve(&home, &config);
        info!("SDK root: {}", layout.sdk_root.display());

        let runner = TokioRunner;
        let session = ProcessEnv;
        let persisted = persistent_store(&runner, &layout);
        let pipeline = Pipeline::new(&config, &layout, &runner, &session, persisted.as_ref());

        match self.kind.run(&pipeline).await {
            Ok(report) => self.print(&report),
            Err(failure) => {
                self.print(&failure.report)?;
                Err(failure.into())
            }
        }
    }

    fn print(&self, report: &RunReport) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(report)?);
        } else {
            report.log_summary();
        }
        Ok(())
    }
}

async fn load_config(path: Option<&Path>) -> Result<ProvisionConfig> {
    let config = ProvisionConfig::load(path).await.with_context(|| match path {
        Some(path) => format!("loading configuration from {}", path.display()),
        None => "loading configuration".to_string(),
    })?;
    Ok(config)
}
