#![forbid(unsafe_code)]

//! One archive run: resolve the owner, list their videos, download them all.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task;
use tracing::{info, warn};

use crate::catalog::fetch_catalog;
use crate::config::{IdentitySelector, Settings};
use crate::dispatcher::{DispatchSummary, dispatch};
use crate::helix::{CatalogService, resolve_identity};
use crate::metadata::UserIdentity;
use crate::progress::{ProgressReporter, Terminal};
use crate::worker::{DownloadWorker, ensure_dir, ensure_program_available};

#[derive(Debug, Clone)]
pub struct RunReport {
    pub user: UserIdentity,
    pub user_folder: PathBuf,
    pub catalog_size: usize,
    pub summary: DispatchSummary,
}

/// Display names become a single path segment.
fn folder_name(display_name: &str) -> String {
    let cleaned: String = display_name
        .trim()
        .chars()
        .map(|c| {
            if matches!(c, '/' | '\\') || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Identity, user folder and catalog errors are fatal; once the pool runs,
/// only a folder that cannot be created stops it. A downloader that does not
/// answer `--version` is only reported: each of its units then fails on its
/// own and still gets a sidecar.
pub async fn run<S>(
    settings: &Settings,
    selector: &IdentitySelector,
    service: Arc<S>,
    terminal: &Terminal,
) -> Result<RunReport>
where
    S: CatalogService + 'static,
{
    if let Err(err) = ensure_program_available(&settings.downloader) {
        warn!("{err:#}; every download will fail until it is installed");
    }

    let lookup_service = Arc::clone(&service);
    let lookup_selector = selector.clone();
    let user = task::spawn_blocking(move || {
        resolve_identity(lookup_service.as_ref(), &lookup_selector)
    })
    .await
    .context("identity lookup task failed")??;
    info!(user_id = %user.id, display_name = %user.display_name, "resolved user");

    let user_folder = settings.output_root.join(folder_name(&user.display_name));
    ensure_dir(&user_folder)?;

    let catalog_service = Arc::clone(&service);
    let user_id = user.id.clone();
    let video_type = settings.video_type.clone();
    let page_delay = settings.page_delay;
    let catalog = task::spawn_blocking(move || {
        fetch_catalog(
            catalog_service.as_ref(),
            &user_id,
            video_type.as_deref(),
            page_delay,
        )
    })
    .await
    .context("catalog task failed")??;
    let catalog_size = catalog.len();
    info!("got {catalog_size} VODs");

    if catalog.is_empty() {
        return Ok(RunReport {
            user,
            user_folder,
            catalog_size,
            summary: DispatchSummary::default(),
        });
    }

    let progress = ProgressReporter::new(catalog_size, settings.progress_file.clone(), terminal);
    progress.set_message(user.display_name.clone());
    let worker = Arc::new(DownloadWorker::new(
        settings.downloader.clone(),
        user_folder.clone(),
    ));
    let result = dispatch(catalog, settings.workers, progress.clone(), move |unit| {
        worker.process(unit)
    })
    .await;
    let summary = match result {
        Ok(summary) => {
            progress.finish();
            summary
        }
        Err(err) => {
            progress.abandon();
            return Err(err);
        }
    };

    Ok(RunReport {
        user,
        user_folder,
        catalog_size,
        summary,
    })
}
