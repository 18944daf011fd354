//! Command-line tools archive
//!
//! Locates (or downloads) the bundled command-line tools archive, extracts it
//! into the SDK root and fixes up the `cmdline-tools/latest` layout.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use droidenv_core::fs::{create_if_missing, remove_if_exists};
use droidenv_core::paths::{archive_file_name, CANONICAL_TOOLS_DIR};
use droidenv_core::{DroidEnvError, ProvisionConfig, Result, SdkLayout};

const REPOSITORY_URL: &str = "https://dl.google.com/android/repository";

/// Official download URL of the command-line tools archive for this host
pub fn cmdline_tools_url(version: &str) -> String {
    format!("{}/{}", REPOSITORY_URL, archive_file_name(version))
}

/// Outcome of [`normalize_cmdline_tools_layout`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutFix {
    pub created_latest: bool,
    /// Entry names moved under `latest/`
    pub moved: Vec<PathBuf>,
}

impl LayoutFix {
    pub fn is_noop(&self) -> bool {
        !self.created_latest && self.moved.is_empty()
    }
}

/// Return the archive to extract, downloading it first when allowed.
/// Verifies the configured SHA-256, if any.
pub async fn prepare_archive(config: &ProvisionConfig, layout: &SdkLayout) -> Result<PathBuf> {
    let archive = layout.archive.clone();

    if archive.is_file() {
        debug!("Using bundled archive {:?}", archive);
    } else if config.download_missing_archive {
        let url = cmdline_tools_url(&config.cmdline_tools_version);
        info!("Archive not found at {:?}, downloading {}", archive, url);
        download_file(&url, &archive).await?;
    } else {
        return Err(DroidEnvError::ArchiveMissing(archive));
    }

    if let Some(expected) = &config.archive_sha256 {
        let actual = sha256_file(&archive).await?;
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(DroidEnvError::ChecksumMismatch {
                path: archive,
                expected: expected.trim().to_string(),
                actual,
            });
        }
        debug!("Checksum verified for {:?}", archive);
    }

    Ok(archive)
}

/// Download `url` to `target` with a progress bar. Returns the byte count.
pub async fn download_file(url: &str, target: &Path) -> Result<u64> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = reqwest::get(url)
        .await
        .map_err(|e| DroidEnvError::Download(e.to_string()))?;

    if !response.status().is_success() {
        return Err(DroidEnvError::Download(format!("HTTP {} for {}", response.status(), url)));
    }

    let total_size = response.content_length().unwrap_or(0);
    let pb = ProgressBar::new(total_size);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }

    // Write to a side file so an interrupted download never looks complete.
    let partial = target.with_extension("part");
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DroidEnvError::Download(e.to_string()))?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }

    file.flush().await?;
    drop(file);
    tokio::fs::rename(&partial, target).await?;

    pb.finish_with_message("Download complete");
    info!("Downloaded {} bytes to {:?}", downloaded, target);
    Ok(downloaded)
}

/// Hex-encoded SHA-256 of a file
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Extract a ZIP archive into `target_dir`. Returns the number of entries.
pub async fn extract_zip(archive: &Path, target_dir: &Path) -> Result<usize> {
    info!("Extracting {:?} to {:?}", archive, target_dir);

    let archive = archive.to_path_buf();
    let target_dir = target_dir.to_path_buf();

    // Run in blocking task since zip crate is synchronous
    tokio::task::spawn_blocking(move || -> Result<usize> {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| DroidEnvError::Extraction(format!("{}: {}", archive.display(), e)))?;

        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| DroidEnvError::Extraction(e.to_string()))?;

            let relative = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
                DroidEnvError::Extraction(format!("entry '{}' escapes the target directory", entry.name()))
            })?;
            let outpath = target_dir.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&outpath)?;
            } else {
                if let Some(parent) = outpath.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut outfile = std::fs::File::create(&outpath)?;
                std::io::copy(&mut entry, &mut outfile)?;
            }

            // sdkmanager/avdmanager are shell scripts and must stay executable
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
                }
            }
        }

        Ok(zip.len())
    })
    .await
    .map_err(|e| DroidEnvError::Extraction(e.to_string()))?
}

/// Ensure `<root>/latest` exists and move every sibling entry into it.
///
/// A sibling whose name already exists under `latest/` replaces it, so a
/// re-extraction over an already normalized tree converges to the same
/// layout.
pub async fn normalize_cmdline_tools_layout(cmdline_tools_root: &Path) -> Result<LayoutFix> {
    if !cmdline_tools_root.is_dir() {
        return Err(DroidEnvError::Extraction(format!(
            "archive did not produce {}",
            cmdline_tools_root.display()
        )));
    }

    let latest = cmdline_tools_root.join(CANONICAL_TOOLS_DIR);
    let created_latest = create_if_missing(&latest).await?;

    let mut siblings = Vec::new();
    let mut entries = tokio::fs::read_dir(cmdline_tools_root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name != CANONICAL_TOOLS_DIR {
            siblings.push(PathBuf::from(name));
        }
    }
    siblings.sort();

    for name in &siblings {
        let dest = latest.join(name);
        if remove_if_exists(&dest, true).await? {
            warn!("Replacing stale {:?}", dest);
        }
        tokio::fs::rename(cmdline_tools_root.join(name), &dest).await?;
    }

    let fix = LayoutFix { created_latest, moved: siblings };
    if !fix.is_noop() {
        info!(
            "Fixed cmdline-tools directory structure ({} entries moved to {})",
            fix.moved.len(),
            CANONICAL_TOOLS_DIR
        );
    }
    Ok(fix)
}
