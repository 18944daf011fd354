//! End-to-end pipeline runs against a temporary home directory, a fake
//! command runner and in-memory environment stores.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use droidenv::report::{Outcome, Step};
use droidenv::Pipeline;
use droidenv_android_toolchain::env::path_separator;
use droidenv_android_toolchain::{EnvScope, EnvStore, MemoryEnv};
use droidenv_core::process::testing::RecordingRunner;
use droidenv_core::{CommandOutput, DroidEnvError, Invocation, ProvisionConfig, Result, SdkLayout};
use tempfile::TempDir;
use zip::write::FileOptions;

struct Fixture {
    _dir: TempDir,
    config: ProvisionConfig,
    layout: SdkLayout,
    session: MemoryEnv,
    persisted: MemoryEnv,
}

/// The official layout: tools directly under `cmdline-tools/`
const TOOLS_ENTRIES: [(&str, &[u8]); 6] = [
    ("cmdline-tools/bin/sdkmanager", b"#!/bin/sh\n"),
    ("cmdline-tools/bin/sdkmanager.bat", b"@echo off\r\n"),
    ("cmdline-tools/bin/avdmanager", b"#!/bin/sh\n"),
    ("cmdline-tools/bin/avdmanager.bat", b"@echo off\r\n"),
    ("cmdline-tools/lib/sdkmanager-classpath.jar", b"jar"),
    ("cmdline-tools/NOTICE.txt", b"notice"),
];

impl Fixture {
    fn new(packages: &[&str]) -> Self {
        Self::with_archive(packages, &TOOLS_ENTRIES)
    }

    fn with_archive(packages: &[&str], entries: &[(&str, &[u8])]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        fs::create_dir_all(&home).unwrap();

        let archive = dir.path().join("commandlinetools.zip");
        write_zip(&archive, entries);

        let config = ProvisionConfig {
            archive: Some(archive),
            packages: packages.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        };
        let layout = SdkLayout::resolve(&home, &config);

        Self {
            _dir: dir,
            config,
            layout,
            session: MemoryEnv::new(EnvScope::Session).with_var("PATH", "/usr/bin"),
            persisted: MemoryEnv::new(EnvScope::Persisted).with_var("PATH", "/usr/local/bin"),
        }
    }

    fn pipeline<'a>(&'a self, runner: &'a RecordingRunner) -> Pipeline<'a> {
        Pipeline::new(&self.config, &self.layout, runner, &self.session, &self.persisted)
    }

    /// Runner that behaves like the real tools on disk
    fn tools(&self) -> RecordingRunner {
        let layout = self.layout.clone();
        RecordingRunner::with_handler(move |inv| fake_tool(&layout, inv))
    }

    /// Runner that behaves like the real tools except where `handler`
    /// returns an output
    fn tools_with<F>(&self, handler: F) -> RecordingRunner
    where
        F: Fn(&Invocation) -> Option<CommandOutput> + Send + Sync + 'static,
    {
        let layout = self.layout.clone();
        RecordingRunner::with_handler(move |inv| handler(inv).unwrap_or_else(|| fake_tool(&layout, inv)))
    }

    fn home(&self) -> &Path {
        &self.layout.home
    }
}

/// Persisted store whose user environment cannot be written
#[derive(Debug, Default)]
struct ReadOnlyEnv;

#[async_trait]
impl EnvStore for ReadOnlyEnv {
    fn scope(&self) -> EnvScope {
        EnvScope::Persisted
    }

    fn describe(&self) -> String {
        "read-only profile".to_string()
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, key: &str, _value: &str) -> Result<()> {
        Err(DroidEnvError::Env(format!("cannot write {}", key)))
    }

    async fn clear(&self, key: &str) -> Result<()> {
        Err(DroidEnvError::Env(format!("cannot write {}", key)))
    }

    async fn add_path(&self, _entries: &[PathBuf]) -> Result<()> {
        Err(DroidEnvError::Env("cannot write PATH".to_string()))
    }

    async fn remove_path(&self, _entries: &[PathBuf]) -> Result<()> {
        Err(DroidEnvError::Env("cannot write PATH".to_string()))
    }
}

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().unix_permissions(0o755);
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

fn is_license_call(inv: &Invocation) -> bool {
    inv.program_stem() == "sdkmanager" && inv.args.first().map(String::as_str) == Some("--licenses")
}

fn fake_tool(layout: &SdkLayout, inv: &Invocation) -> CommandOutput {
    match inv.program_stem().as_str() {
        "sdkmanager" if inv.args.first().map(String::as_str) == Some("--install") => {
            match inv.args[1].as_str() {
                "broken;package" => {
                    return CommandOutput::failed(1, "Warning: Failed to find package 'broken;package'")
                }
                "platform-tools" => fs::create_dir_all(&layout.platform_tools).unwrap(),
                "emulator" => {
                    fs::create_dir_all(&layout.emulator_dir).unwrap();
                    fs::write(&layout.emulator, "").unwrap();
                }
                _ => {}
            }
            CommandOutput::ok()
        }
        "sdkmanager" => {
            fs::create_dir_all(&layout.licenses_dir).unwrap();
            fs::write(layout.licenses_dir.join("android-sdk-license"), "24333f8a").unwrap();
            CommandOutput::ok()
        }
        "avdmanager" => {
            let name = inv
                .args
                .iter()
                .skip_while(|a| a.as_str() != "-n")
                .nth(1)
                .cloned()
                .unwrap();
            let avd_dir = layout.avd_home.join(format!("{}.avd", name));
            fs::create_dir_all(&avd_dir).unwrap();
            fs::write(
                avd_dir.join("config.ini"),
                "abi.type=x86_64\nhw.device.name=pixel\nimage.sysdir.1=system-images/android-33/google_apis_playstore/x86_64/\n",
            )
            .unwrap();
            fs::write(avd_dir.join("quickbootChoice.ini"), "saveOnExit = true\n").unwrap();
            fs::write(layout.avd_home.join(format!("{}.ini", name)), "avd.ini.encoding=UTF-8\n").unwrap();
            CommandOutput::ok()
        }
        "pkill" | "taskkill" => CommandOutput::failed(1, ""),
        _ => CommandOutput::ok(),
    }
}

fn dir_names(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(path)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

fn path_entries(value: &str) -> Vec<PathBuf> {
    value.split(path_separator()).map(PathBuf::from).collect()
}

#[tokio::test]
async fn test_provision_from_empty_home() {
    let fx = Fixture::new(&["platform-tools"]);
    let runner = fx.tools();

    let report = fx.pipeline(&runner).provision().await.unwrap();

    assert!(fx.layout.tools_latest.is_dir());
    assert!(fx.layout.sdkmanager.is_file() || cfg!(windows));
    assert!(fx.layout.platform_tools.is_dir());
    assert!(fx.layout.avd_dir.is_dir());
    assert!(fx.layout.avd_dir.ends_with("iphone.avd"));

    assert_eq!(runner.calls_to("avdmanager").len(), 1);
    assert_eq!(report.find(Step::CreateAvd).unwrap().outcome, Outcome::Ok);
    assert_eq!(report.find(Step::AcceptLicenses).unwrap().outcome, Outcome::Ok);

    // No emulator package was installed, so there is nothing to launch.
    assert!(runner.calls_to("emulator").is_empty());
    assert_eq!(report.find(Step::LaunchEmulator).unwrap().outcome, Outcome::Warned);
}

#[tokio::test]
async fn test_provision_sets_both_environment_tiers() {
    let fx = Fixture::new(&["platform-tools"]);
    let runner = fx.tools();
    fx.pipeline(&runner).provision().await.unwrap();

    let sdk_root = fx.layout.sdk_root.display().to_string();
    let session = fx.session.snapshot();
    let persisted = fx.persisted.snapshot();

    assert_eq!(session.get("ANDROID_HOME"), Some(&sdk_root));
    assert_eq!(persisted.get("ANDROID_SDK_ROOT"), Some(&sdk_root));

    let session_path = path_entries(&session["PATH"]);
    assert_eq!(session_path[0], fx.layout.tools_bin);
    assert_eq!(session_path.last().unwrap(), &PathBuf::from("/usr/bin"));

    let persisted_path = path_entries(&persisted["PATH"]);
    assert_eq!(persisted_path[0], PathBuf::from("/usr/local/bin"));
    assert_eq!(persisted_path[1..], fx.layout.path_additions()[..]);

    // Tools see the session PATH.
    let install = &runner.calls_to("sdkmanager")[0];
    assert_eq!(install.env_value("PATH"), Some(session["PATH"].as_str()));
}

#[tokio::test]
async fn test_provision_normalizes_tool_layout() {
    let fx = Fixture::new(&["platform-tools"]);
    let runner = fx.tools();
    fx.pipeline(&runner).provision().await.unwrap();

    assert_eq!(dir_names(&fx.layout.cmdline_tools_root), vec!["latest"]);
    assert_eq!(dir_names(&fx.layout.tools_latest), vec!["NOTICE.txt", "bin", "lib"]);
    assert!(fx.layout.tools_bin.join("avdmanager").is_file());
}

#[tokio::test]
async fn test_archive_without_sdkmanager_stops_before_tools_run() {
    let fx = Fixture::with_archive(&["platform-tools"], &[("cmdline-tools/NOTICE.txt", b"notice".as_slice())]);
    let runner = fx.tools();

    let failure = fx.pipeline(&runner).provision().await.unwrap_err();

    assert!(matches!(failure.error, DroidEnvError::NotFound(ref what) if what.starts_with("sdkmanager")));
    assert!(runner.calls_to("sdkmanager").is_empty());
    assert!(runner.calls_to("avdmanager").is_empty());
    assert!(runner.calls().is_empty());

    let last = failure.report.steps.last().unwrap();
    assert_eq!(last.step, Step::LocateTools);
    assert_eq!(last.outcome, Outcome::Failed);
    assert!(failure.report.find(Step::CreateAvd).is_none());
    assert!(fx.session.snapshot().get("ANDROID_HOME").is_none());
}

#[tokio::test]
async fn test_provision_twice_converges() {
    let fx = Fixture::new(&["platform-tools"]);
    let runner = fx.tools();

    fx.pipeline(&runner).provision().await.unwrap();
    let second = fx.pipeline(&runner).provision().await.unwrap();

    assert_eq!(dir_names(&fx.layout.cmdline_tools_root), vec!["latest"]);
    assert_eq!(dir_names(&fx.layout.tools_latest), vec!["NOTICE.txt", "bin", "lib"]);
    assert!(fx.layout.avd_dir.is_dir());
    assert_eq!(second.find(Step::ResetAvd).unwrap().outcome, Outcome::Ok);
    assert_eq!(second.find(Step::EnsureSdkRoot).unwrap().outcome, Outcome::Ok);

    let persisted = fx.persisted.snapshot();
    let entries = path_entries(&persisted["PATH"]);
    for addition in fx.layout.path_additions() {
        assert_eq!(entries.iter().filter(|e| **e == addition).count(), 1);
    }
}

#[tokio::test]
async fn test_failed_package_does_not_stop_later_packages() {
    let fx = Fixture::new(&["platform-tools", "broken;package", "emulator"]);
    let runner = fx.tools();

    let report = fx.pipeline(&runner).provision().await.unwrap();

    let installs: Vec<_> = runner
        .calls_to("sdkmanager")
        .into_iter()
        .filter(|c| c.args[0] == "--install")
        .map(|c| c.args[1].clone())
        .collect();
    assert_eq!(installs, vec!["platform-tools", "broken;package", "emulator"]);

    let outcomes: Vec<_> = report.records(Step::InstallPackage).map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![Outcome::Ok, Outcome::Warned, Outcome::Ok]);

    assert!(fx.layout.emulator.is_file());
    let launches = runner.calls_to("emulator");
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].args, vec!["-avd", "iphone"]);
    assert_eq!(report.find(Step::LaunchEmulator).unwrap().outcome, Outcome::Ok);
}

#[tokio::test]
async fn test_avd_creation_failure_is_fatal() {
    let fx = Fixture::new(&["emulator"]);
    let layout = fx.layout.clone();
    let runner = RecordingRunner::with_handler(move |inv| {
        if inv.program_stem() == "avdmanager" {
            CommandOutput::failed(1, "Error: Package path is not valid. Valid system image paths are:")
        } else {
            fake_tool(&layout, inv)
        }
    });

    let failure = fx.pipeline(&runner).provision().await.unwrap_err();

    assert!(matches!(failure.error, DroidEnvError::AvdCreation { ref name, .. } if name == "iphone"));
    assert!(fx.layout.emulator.is_file());
    assert!(runner.calls_to("emulator").is_empty());
    assert!(fx.persisted.snapshot().get("ANDROID_HOME").is_none());

    // The steps up to the failure are still reported.
    let report = &failure.report;
    assert_eq!(report.find(Step::InstallPackage).unwrap().outcome, Outcome::Ok);
    let last = report.steps.last().unwrap();
    assert_eq!(last.step, Step::CreateAvd);
    assert_eq!(last.outcome, Outcome::Failed);
    assert!(last.detail.contains("iphone"));
    assert!(report.find(Step::PersistEnv).is_none());
    assert!(report.find(Step::LaunchEmulator).is_none());

    let json = serde_json::to_value(report).unwrap();
    assert_eq!(json["steps"].as_array().unwrap().last().unwrap()["outcome"], "failed");
}

#[tokio::test]
async fn test_license_failure_does_not_stop_avd_creation() {
    let fx = Fixture::new(&["platform-tools"]);
    let runner = fx.tools_with(|inv| {
        is_license_call(inv).then(|| CommandOutput::failed(1, "Error: java not found"))
    });

    let report = fx.pipeline(&runner).provision().await.unwrap();

    let licenses = report.find(Step::AcceptLicenses).unwrap();
    assert_eq!(licenses.outcome, Outcome::Warned);
    assert!(licenses.detail.contains("--licenses"));
    assert_eq!(runner.calls_to("avdmanager").len(), 1);
    assert_eq!(report.find(Step::CreateAvd).unwrap().outcome, Outcome::Ok);
    assert!(fx.layout.avd_dir.is_dir());
}

#[tokio::test]
async fn test_missing_license_file_is_a_warning() {
    let fx = Fixture::new(&["platform-tools"]);
    let runner = fx.tools_with(|inv| is_license_call(inv).then(CommandOutput::ok));

    let report = fx.pipeline(&runner).provision().await.unwrap();

    let licenses = report.find(Step::AcceptLicenses).unwrap();
    assert_eq!(licenses.outcome, Outcome::Warned);
    assert_eq!(licenses.detail, "sdkmanager finished without writing a license file");
    assert!(!fx.layout.licenses_dir.join("android-sdk-license").exists());
    assert_eq!(report.find(Step::CreateAvd).unwrap().outcome, Outcome::Ok);
}

#[tokio::test]
async fn test_unwritable_persisted_environment_still_launches_emulator() {
    let fx = Fixture::new(&["emulator"]);
    let runner = fx.tools();
    let persisted = ReadOnlyEnv;
    let pipeline = Pipeline::new(&fx.config, &fx.layout, &runner, &fx.session, &persisted);

    let report = pipeline.provision().await.unwrap();

    let persist = report.find(Step::PersistEnv).unwrap();
    assert_eq!(persist.outcome, Outcome::Warned);
    assert_eq!(persist.detail, "failed for ANDROID_HOME, ANDROID_SDK_ROOT, PATH");
    assert_eq!(runner.calls_to("emulator").len(), 1);
    assert_eq!(report.find(Step::LaunchEmulator).unwrap().outcome, Outcome::Ok);
}

#[tokio::test]
async fn test_emulator_non_zero_exit_is_a_warning() {
    let fx = Fixture::new(&["emulator"]);
    let runner = fx.tools_with(|inv| {
        (inv.program_stem() == "emulator").then(|| CommandOutput::failed(1, "PANIC: Missing emulator engine program"))
    });

    let report = fx.pipeline(&runner).provision().await.unwrap();

    assert_eq!(runner.calls_to("emulator").len(), 1);
    let launch = report.find(Step::LaunchEmulator).unwrap();
    assert_eq!(launch.outcome, Outcome::Warned);
    assert!(launch.detail.contains("PANIC"));
    assert_eq!(report.find(Step::CreateAvd).unwrap().outcome, Outcome::Ok);
    assert_eq!(report.count(Outcome::Failed), 0);
}

#[tokio::test]
async fn test_missing_archive_aborts_before_tools_run() {
    let mut fx = Fixture::new(&["platform-tools"]);
    fx.config.archive = Some(fx.home().join("missing.zip"));
    fx.layout = SdkLayout::resolve(&fx.layout.home.clone(), &fx.config);
    let runner = fx.tools();

    let failure = fx.pipeline(&runner).provision().await.unwrap_err();

    assert!(matches!(failure.error, DroidEnvError::ArchiveMissing(_)));
    assert!(runner.calls().is_empty());
    assert_eq!(failure.report.find(Step::PrepareArchive).unwrap().outcome, Outcome::Failed);
}

#[tokio::test]
async fn test_teardown_with_nothing_present() {
    let fx = Fixture::new(&["platform-tools"]);
    let runner = fx.tools();

    let report = fx.pipeline(&runner).teardown().await.unwrap();

    assert_eq!(report.find(Step::TerminateDaemon).unwrap().outcome, Outcome::Warned);
    for step in [Step::RemoveSdkRoot, Step::RemoveAvdFolder, Step::RemoveQuickbootFile, Step::RemoveAvdIni] {
        let record = report.find(step).unwrap();
        assert_eq!(record.outcome, Outcome::Skipped);
        assert!(record.detail.starts_with("not found"));
    }
    assert_eq!(report.find(Step::ClearPersistedEnv).unwrap().outcome, Outcome::Ok);
    assert_eq!(report.find(Step::RevertPath).unwrap().outcome, Outcome::Ok);
}

#[tokio::test]
async fn test_teardown_after_provision_restores_home() {
    let fx = Fixture::new(&["platform-tools"]);
    let runner = fx.tools();
    let before = dir_names(fx.home());

    fx.pipeline(&runner).provision().await.unwrap();
    assert!(fx.layout.quickboot_file.is_file());

    let report = fx.pipeline(&runner).teardown().await.unwrap();

    assert!(!fx.layout.sdk_root.exists());
    assert!(!fx.layout.avd_dir.exists());
    assert!(!fx.layout.quickboot_file.exists());
    assert!(!fx.layout.avd_ini.exists());
    assert_eq!(report.find(Step::RemoveSdkRoot).unwrap().outcome, Outcome::Ok);
    assert_eq!(report.find(Step::RemoveAvdFolder).unwrap().outcome, Outcome::Ok);

    // `.android/avd` itself is left behind, like avdmanager leaves it.
    let after: Vec<String> = dir_names(fx.home()).into_iter().filter(|n| n != ".android").collect();
    assert_eq!(after, before);

    let persisted = fx.persisted.snapshot();
    assert!(persisted.get("ANDROID_HOME").is_none());
    assert!(persisted.get("ANDROID_SDK_ROOT").is_none());
    assert_eq!(persisted["PATH"], "/usr/local/bin");

    assert_eq!(runner.calls_to(if cfg!(windows) { "taskkill" } else { "pkill" }).len(), 1);
}

#[tokio::test]
async fn test_reinstall_cleans_then_provisions() {
    let fx = Fixture::new(&["platform-tools"]);
    let runner = fx.tools();
    fx.pipeline(&runner).provision().await.unwrap();
    fs::write(fx.layout.sdk_root.join("stale.txt"), "left over").unwrap();

    let report = fx.pipeline(&runner).reinstall().await.unwrap();

    assert_eq!(report.pipeline, "reinstall");
    assert_eq!(report.find(Step::RemoveSdkRoot).unwrap().outcome, Outcome::Ok);
    assert_eq!(report.find(Step::CreateAvd).unwrap().outcome, Outcome::Ok);
    assert!(report.find(Step::RevertPath).is_none());
    // The AVD folder was removed up front, so there is nothing stale to reset.
    assert!(report.find(Step::ResetAvd).is_none());

    assert!(!fx.layout.sdk_root.join("stale.txt").exists());
    assert!(fx.layout.tools_latest.is_dir());
    assert!(fx.layout.avd_dir.is_dir());
    assert!(fx.persisted.snapshot().contains_key("ANDROID_HOME"));
}

#[tokio::test]
async fn test_status_reports_installation() {
    let fx = Fixture::new(&["platform-tools"]);
    let runner = fx.tools();

    let empty = fx.pipeline(&runner).status().await.unwrap();
    assert_eq!(empty.count(Outcome::Ok), 0);

    fx.pipeline(&runner).provision().await.unwrap();
    let calls_before = runner.calls().len();
    let report = fx.pipeline(&runner).status().await.unwrap();

    assert_eq!(runner.calls().len(), calls_before);
    let details: Vec<&str> = report.records(Step::Inspect).map(|r| r.detail.as_str()).collect();
    assert!(details.iter().any(|d| d.starts_with("SDK root: ")));
    assert!(details.contains(&"licenses: accepted"));
    assert!(details.iter().any(|d| d.starts_with("AVD 'iphone': ") && d.contains("abi x86_64")));
    assert!(details.iter().any(|d| d.starts_with("ANDROID_HOME=")));
}
