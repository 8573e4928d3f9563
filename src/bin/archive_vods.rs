#![forbid(unsafe_code)]

//! Command-line entry point: downloads every VOD of one Twitch user into
//! `<output>/<display name>/<YYYY-MM-DD>/`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use vod_archiver::archive::run;
use vod_archiver::config::{IdentitySelector, Settings, SettingsOverrides, resolve_settings};
use vod_archiver::helix::HelixClient;
use vod_archiver::progress::Terminal;

/// Download all archived broadcasts of a Twitch user with youtube-dl.
#[derive(Parser, Debug)]
#[command(name = "archive_vods", version, about, long_about = None)]
struct Cli {
    /// User name you want to download all VODs from
    #[arg(long)]
    user: Option<String>,

    /// User id you want to download all VODs from
    #[arg(long = "userid")]
    user_id: Option<String>,

    /// Twitch client id used for user and video lookups
    #[arg(long = "clientid")]
    client_id: Option<String>,

    /// OAuth app access token sent as a bearer token
    #[arg(long)]
    token: Option<String>,

    /// Max parallel downloads (default 4)
    #[arg(long)]
    workers: Option<usize>,

    /// Folder where everything gets saved to
    #[arg(long)]
    output: Option<PathBuf>,

    /// Downloader executable (youtube-dl or a compatible fork)
    #[arg(long)]
    downloader: Option<PathBuf>,

    /// Only list videos of this type: all, archive, highlight or upload
    #[arg(long = "video-type")]
    video_type: Option<String>,

    /// Write JSON progress reports to this file
    #[arg(long)]
    progress_file: Option<PathBuf>,

    /// Read settings from this env file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl Cli {
    /// Identity flags are checked first so a bad invocation never reaches
    /// the env file or the network.
    fn into_config(self) -> Result<(Settings, IdentitySelector)> {
        let selector = IdentitySelector::from_flags(self.user, self.user_id)?;
        let settings = resolve_settings(SettingsOverrides {
            client_id: self.client_id,
            access_token: self.token,
            output_root: self.output,
            workers: self.workers,
            downloader: self.downloader,
            video_type: self.video_type,
            progress_file: self.progress_file,
            env_path: self.env_file,
        })?;
        Ok((settings, selector))
    }
}

/// Log lines share stderr with the progress bar and are printed with the
/// bar cleared.
fn init_tracing(terminal: &Terminal) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(terminal.clone())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let terminal = Terminal::new();
    init_tracing(&terminal);

    let (settings, selector) = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(err) => {
            error!("{err:#}");
            return ExitCode::from(2);
        }
    };

    info!(
        workers = settings.workers.get(),
        output = %settings.output_root.display(),
        downloader = %settings.downloader.display(),
        "starting archive run"
    );
    let service = Arc::new(HelixClient::from_settings(&settings));

    match run(&settings, &selector, service, &terminal).await {
        Ok(report) => {
            let summary = report.summary;
            info!(
                user = %report.user.display_name,
                folder = %report.user_folder.display(),
                downloaded = summary.downloaded,
                failed = summary.failed,
                skipped = summary.skipped,
                "archive run complete"
            );
            if summary.failed > 0 {
                warn!(
                    "{} of {} downloads failed; re-run to continue them",
                    summary.failed, report.catalog_size
                );
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
