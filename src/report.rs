//! Run reports
//!
//! Every pipeline step leaves one [`StepRecord`]; the binary prints the
//! report as a summary or as JSON.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use droidenv_core::DroidEnvError;

/// A pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    TerminateDaemon,
    RemoveSdkRoot,
    RemoveAvdFolder,
    RemoveQuickbootFile,
    RemoveAvdIni,
    ClearPersistedEnv,
    RevertPath,
    EnsureSdkRoot,
    PrepareArchive,
    ExtractArchive,
    NormalizeLayout,
    LocateTools,
    SessionEnv,
    InstallPackage,
    AcceptLicenses,
    ResetAvd,
    CreateAvd,
    PersistEnv,
    LaunchEmulator,
    Inspect,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::TerminateDaemon => "terminate adb",
            Step::RemoveSdkRoot => "remove SDK root",
            Step::RemoveAvdFolder => "remove AVD folder",
            Step::RemoveQuickbootFile => "remove quick-boot file",
            Step::RemoveAvdIni => "remove AVD registration",
            Step::ClearPersistedEnv => "clear persisted variables",
            Step::RevertPath => "revert PATH",
            Step::EnsureSdkRoot => "ensure SDK root",
            Step::PrepareArchive => "prepare archive",
            Step::ExtractArchive => "extract archive",
            Step::NormalizeLayout => "normalize layout",
            Step::LocateTools => "locate sdkmanager",
            Step::SessionEnv => "session environment",
            Step::InstallPackage => "install package",
            Step::AcceptLicenses => "accept licenses",
            Step::ResetAvd => "reset AVD",
            Step::CreateAvd => "create AVD",
            Step::PersistEnv => "persist environment",
            Step::LaunchEmulator => "launch emulator",
            Step::Inspect => "inspect",
        };
        f.write_str(name)
    }
}

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    /// Nothing to do, e.g. the target was not found
    Skipped,
    /// Failed, but the run went on
    Warned,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: Step,
    pub outcome: Outcome,
    pub detail: String,
}

/// Records of one pipeline run, in execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub steps: Vec<StepRecord>,
}

impl RunReport {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            steps: Vec::new(),
        }
    }

    pub fn record(&mut self, step: Step, outcome: Outcome, detail: impl Into<String>) {
        self.steps.push(StepRecord {
            step,
            outcome,
            detail: detail.into(),
        });
    }

    pub fn ok(&mut self, step: Step, detail: impl Into<String>) {
        self.record(step, Outcome::Ok, detail);
    }

    pub fn skipped(&mut self, step: Step, detail: impl Into<String>) {
        self.record(step, Outcome::Skipped, detail);
    }

    pub fn warned(&mut self, step: Step, detail: impl Into<String>) {
        self.record(step, Outcome::Warned, detail);
    }

    pub fn failed(&mut self, step: Step, detail: impl Into<String>) {
        self.record(step, Outcome::Failed, detail);
    }

    /// Record `error` against the step that stopped the run and hand it back
    pub fn fail(&mut self, step: Step, error: DroidEnvError) -> DroidEnvError {
        self.failed(step, error.to_string());
        error
    }

    /// Records for `step`
    pub fn records(&self, step: Step) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(move |r| r.step == step)
    }

    /// First record for `step`
    pub fn find(&self, step: Step) -> Option<&StepRecord> {
        self.records(step).next()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.steps.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Whether every step completed cleanly
    pub fn is_clean(&self) -> bool {
        self.count(Outcome::Warned) == 0 && self.count(Outcome::Failed) == 0
    }

    /// Log one line per step and a closing summary
    pub fn log_summary(&self) {
        for record in &self.steps {
            match record.outcome {
                Outcome::Ok | Outcome::Skipped => {
                    info!("[{:?}] {}: {}", record.outcome, record.step, record.detail)
                }
                Outcome::Warned | Outcome::Failed => {
                    warn!("[{:?}] {}: {}", record.outcome, record.step, record.detail)
                }
            }
        }
        let summary = format!(
            "{} finished: {} ok, {} skipped, {} warned, {} failed",
            self.pipeline,
            self.count(Outcome::Ok),
            self.count(Outcome::Skipped),
            self.count(Outcome::Warned),
            self.count(Outcome::Failed)
        );
        if self.is_clean() {
            info!("{}", summary);
        } else {
            warn!("{}", summary);
        }
    }
}
