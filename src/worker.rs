#![forbid(unsafe_code)]

//! Per-video work: date folder, external downloader run, metadata sidecar.
//!
//! Layout produced for every record:
//!
//! ```text
//! <output-root>/<display-name>/<YYYY-MM-DD>/
//!     <downloader output>         media + .info.json written by the downloader
//!     metadata.json               the catalog record, tab-indented
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result, bail};
use chrono::DateTime;
use tracing::{debug, error, info, warn};

use crate::metadata::{VideoRecord, write_metadata_file};

/// Never leave `.part` files, continue interrupted downloads on re-run, and
/// keep the downloader's own info JSON next to the media.
pub const DOWNLOADER_ARGS: [&str; 3] = ["--no-part", "-c", "--write-info-json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Downloaded,
    /// The downloader failed; metadata was still written.
    DownloadFailed,
    /// The record could not be placed on disk (bad timestamp).
    Skipped,
}

/// `2018-03-02T20:53:41Z` -> `2018-03-02`. The date is taken in the
/// timestamp's own offset.
pub fn date_folder(created_at: &str) -> Result<String> {
    let created = DateTime::parse_from_rfc3339(created_at.trim())
        .with_context(|| format!("invalid creation timestamp {created_at:?}"))?;
    Ok(created.format("%Y-%m-%d").to_string())
}

/// Creates `dir` and every missing parent. Existing directories are fine.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))
}

/// Runs `<name> --version` to tell whether the downloader can be started.
pub fn ensure_program_available(program: &Path) -> Result<()> {
    let status = Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!(
            "{} is installed but returned a failure status",
            program.display()
        ),
        Err(err) => bail!(
            "{} is not installed or not in PATH: {}",
            program.display(),
            err
        ),
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    text
}

pub struct DownloadWorker {
    downloader: PathBuf,
    user_folder: PathBuf,
}

impl DownloadWorker {
    pub fn new(downloader: impl Into<PathBuf>, user_folder: impl Into<PathBuf>) -> Self {
        Self {
            downloader: downloader.into(),
            user_folder: user_folder.into(),
        }
    }

    pub fn destination(&self, record: &VideoRecord) -> Result<PathBuf> {
        Ok(self.user_folder.join(date_folder(&record.created_at)?))
    }

    /// Handles one record end to end. Download failures are logged and
    /// reported through the outcome; only a folder that cannot be created is
    /// returned as an error, since nothing else for this run can succeed then.
    pub fn process(&self, record: &VideoRecord) -> Result<UnitOutcome> {
        let folder = match self.destination(record) {
            Ok(folder) => folder,
            Err(err) => {
                warn!(video_id = %record.id, "skipping video: {err:#}");
                return Ok(UnitOutcome::Skipped);
            }
        };
        ensure_dir(&folder)?;

        debug!(video_id = %record.id, folder = %folder.display(), "starting download");
        let outcome = self.download(record, &folder);

        // The sidecar is written even when the download failed so a later
        // run (or a human) can tell what was supposed to be here.
        if let Err(err) = write_metadata_file(&folder, record) {
            warn!(video_id = %record.id, "could not write metadata: {err:#}");
        }

        Ok(outcome)
    }

    fn download(&self, record: &VideoRecord, folder: &Path) -> UnitOutcome {
        let result = Command::new(&self.downloader)
            .args(DOWNLOADER_ARGS)
            .arg(&record.url)
            .current_dir(folder)
            .stdin(Stdio::null())
            .output();

        match result {
            Ok(output) if output.status.success() => {
                info!(video_id = %record.id, title = record.title(), "downloaded vod");
                UnitOutcome::Downloaded
            }
            Ok(output) => {
                error!(
                    video_id = %record.id,
                    status = %output.status,
                    "failed downloading vod"
                );
                error!("{}", combined_output(&output).trim_end());
                UnitOutcome::DownloadFailed
            }
            Err(err) => {
                error!(
                    video_id = %record.id,
                    %err,
                    "failed to start {}",
                    self.downloader.display()
                );
                UnitOutcome::DownloadFailed
            }
        }
    }
}
