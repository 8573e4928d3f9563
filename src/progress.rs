#![forbid(unsafe_code)]

//! Progress reporting for the download pool: a terminal bar plus an optional
//! JSON progress file that a supervising process can poll.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::fmt::MakeWriter;

const BAR_TEMPLATE: &str = "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressReport {
    progress: u8,
    message: String,
}

/// Writes `{"progress": .., "message": ..}` atomically via a temp file.
#[derive(Clone)]
struct ProgressWriter {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ProgressWriter {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn write(&self, progress: u8, message: &str) {
        self.write_with(|| (progress, message.to_string()));
    }

    /// Builds the report while holding the file lock so concurrent writers
    /// land in the order their snapshots were taken.
    fn write_with(&self, snapshot: impl FnOnce() -> (u8, String)) {
        let _guard = self.lock.lock();
        let (progress, message) = snapshot();
        let report = ProgressReport {
            progress: progress.min(100),
            message,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = fs::create_dir_all(parent)
        {
            warn!(%err, "could not create progress dir");
            return;
        }

        let tmp_path = self.path.with_extension("tmp");
        match serde_json::to_vec(&report) {
            Ok(payload) => {
                if let Err(err) = fs::write(&tmp_path, payload) {
                    warn!(%err, "could not write progress file");
                    return;
                }
                if let Err(err) = fs::rename(&tmp_path, &self.path) {
                    warn!(%err, "could not finalize progress file");
                }
            }
            Err(err) => {
                warn!(%err, "could not serialize progress report");
            }
        }
    }
}

/// The stderr area shared by progress bars and log lines. Log output goes
/// through [`Terminal::make_writer`], which clears the bars while a line is
/// printed and redraws them afterwards.
#[derive(Clone, Default)]
pub struct Terminal {
    bars: MultiProgress,
}

impl Terminal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws nothing. Bars still count.
    pub fn hidden() -> Self {
        Self {
            bars: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }
}

impl<'a> MakeWriter<'a> for Terminal {
    type Writer = TerminalWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TerminalWriter {
            bars: self.bars.clone(),
        }
    }
}

/// Writes to stderr with the bars suspended.
pub struct TerminalWriter {
    bars: MultiProgress,
}

impl Write for TerminalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bars.suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.bars.suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Counts completed units. Cloning shares the same counters, so every worker
/// can hold its own handle.
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
    file: Option<ProgressWriter>,
}

impl ProgressReporter {
    /// Renders the empty bar immediately so the operator sees `0/total`
    /// before the first download finishes.
    pub fn new(total: usize, progress_file: Option<PathBuf>, terminal: &Terminal) -> Self {
        let bar = terminal.bars.add(ProgressBar::new(total as u64));
        match ProgressStyle::with_template(BAR_TEMPLATE) {
            Ok(style) => bar.set_style(style.progress_chars("=>-")),
            Err(err) => warn!(%err, "invalid progress template, using default bar"),
        }
        let reporter = Self {
            bar,
            file: progress_file.map(ProgressWriter::new),
        };
        reporter.bar.tick();
        if let Some(file) = &reporter.file {
            file.write(0, &format!("Downloading 0/{}", reporter.total()));
        }
        reporter
    }

    /// Records one finished unit, successful or not.
    pub fn advance(&self) {
        self.bar.inc(1);
        if let Some(file) = &self.file {
            file.write_with(|| {
                let (completed, total) = (self.position(), self.total());
                (self.percent(), format!("Downloading {completed}/{total}"))
            });
        }
    }

    fn percent(&self) -> u8 {
        match self.total() {
            0 => 100,
            total => ((self.position() * 100) / total).min(100) as u8,
        }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn total(&self) -> u64 {
        self.bar.length().unwrap_or(0)
    }

    pub fn finish(&self) {
        self.bar.finish();
        if let Some(file) = &self.file {
            file.write(100, "Download complete");
        }
    }

    /// Stops the bar where it is. The progress file keeps the real count so
    /// a poller can tell an aborted run from a finished one.
    pub fn abandon(&self) {
        self.bar.abandon();
        if let Some(file) = &self.file {
            file.write_with(|| {
                let (completed, total) = (self.position(), self.total());
                (self.percent(), format!("Download aborted after {completed}/{total}"))
            });
        }
    }
}
