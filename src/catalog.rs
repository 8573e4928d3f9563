#![forbid(unsafe_code)]

//! Builds the full list of a user's videos by walking the paginated listing.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::helix::{CatalogService, VideoQuery};
use crate::metadata::VideoRecord;

pub const PAGE_SIZE: u32 = 100;

/// Fetches every page for `user_id`, keeping the first occurrence of each
/// video id. Stops when the cursor is empty or stops advancing; any request
/// error aborts the whole fetch.
pub fn fetch_catalog<S>(
    service: &S,
    user_id: &str,
    video_type: Option<&str>,
    page_delay: Duration,
) -> Result<Vec<VideoRecord>>
where
    S: CatalogService + ?Sized,
{
    info!(user_id, "getting VODs");
    let mut catalog: Vec<VideoRecord> = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = String::new();
    let mut page_number = 0usize;

    loop {
        page_number += 1;
        let query = VideoQuery {
            user_id: user_id.to_string(),
            first: PAGE_SIZE,
            after: cursor.clone(),
            video_type: video_type.map(str::to_string),
        };
        let page = service
            .videos_page(&query)
            .with_context(|| format!("fetching video page {page_number} for user {user_id}"))?;

        let received = page.videos.len();
        let before = catalog.len();
        for video in page.videos {
            if seen.insert(video.id.clone()) {
                catalog.push(video);
            }
        }
        debug!(
            page = page_number,
            received,
            added = catalog.len() - before,
            "fetched video page"
        );

        if page.cursor.is_empty() || page.cursor == cursor {
            break;
        }
        cursor = page.cursor;
        if !page_delay.is_zero() {
            thread::sleep(page_delay);
        }
    }

    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helix::VideoPage;
    use crate::metadata::UserIdentity;
    use anyhow::bail;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// Replays scripted pages in order and records every query it receives.
    struct ScriptedService {
        pages: Mutex<VecDeque<Result<VideoPage>>>,
        queries: Mutex<Vec<VideoQuery>>,
    }

    impl ScriptedService {
        fn new(pages: Vec<Result<VideoPage>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn cursors_sent(&self) -> Vec<String> {
            self.queries.lock().iter().map(|q| q.after.clone()).collect()
        }
    }

    impl CatalogService for ScriptedService {
        fn users_by_login(&self, _login: &str) -> Result<Vec<UserIdentity>> {
            bail!("not used")
        }

        fn users_by_id(&self, _id: &str) -> Result<Vec<UserIdentity>> {
            bail!("not used")
        }

        fn videos_page(&self, query: &VideoQuery) -> Result<VideoPage> {
            self.queries.lock().push(query.clone());
            self.pages
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no more scripted pages")))
        }
    }

    fn video(id: &str) -> VideoRecord {
        VideoRecord::new(
            id,
            "7",
            "2018-03-02T20:53:41Z",
            format!("https://www.twitch.tv/videos/{id}"),
        )
    }

    fn page(ids: &[&str], cursor: &str) -> Result<VideoPage> {
        Ok(VideoPage {
            videos: ids.iter().map(|id| video(id)).collect(),
            cursor: cursor.to_string(),
        })
    }

    fn ids(catalog: &[VideoRecord]) -> Vec<&str> {
        catalog.iter().map(|v| v.id.as_str()).collect()
    }

    #[test]
    fn follows_cursor_until_empty() {
        let service = ScriptedService::new(vec![
            page(&["1", "2"], "c1"),
            page(&["3"], "c2"),
            page(&["4"], ""),
        ]);
        let catalog = fetch_catalog(&service, "7", None, Duration::ZERO).unwrap();
        assert_eq!(ids(&catalog), vec!["1", "2", "3", "4"]);
        assert_eq!(service.cursors_sent(), vec!["", "c1", "c2"]);
        let queries = service.queries.lock();
        assert!(queries.iter().all(|q| q.first == PAGE_SIZE && q.user_id == "7"));
    }

    #[test]
    fn duplicate_ids_across_pages_are_kept_once() {
        let service = ScriptedService::new(vec![
            page(&["1", "2"], "c1"),
            page(&["2", "3", "1"], ""),
        ]);
        let catalog = fetch_catalog(&service, "7", None, Duration::ZERO).unwrap();
        assert_eq!(ids(&catalog), vec!["1", "2", "3"]);
    }

    #[test]
    fn repeated_cursor_stops_the_loop() {
        let service = ScriptedService::new(vec![
            page(&["1"], "same"),
            page(&["2"], "same"),
            page(&["never"], "other"),
        ]);
        let catalog = fetch_catalog(&service, "7", None, Duration::ZERO).unwrap();
        assert_eq!(ids(&catalog), vec!["1", "2"]);
        assert_eq!(service.queries.lock().len(), 2);
    }

    #[test]
    fn request_error_aborts_without_partial_catalog() {
        let service = ScriptedService::new(vec![
            page(&["1"], "c1"),
            Err(anyhow::anyhow!("503 service unavailable")),
        ]);
        let err = fetch_catalog(&service, "7", None, Duration::ZERO).unwrap_err();
        assert!(format!("{err:#}").contains("503 service unavailable"));
        assert!(err.to_string().contains("page 2"));
    }

    #[test]
    fn video_type_is_forwarded() {
        let service = ScriptedService::new(vec![page(&[], "")]);
        let catalog = fetch_catalog(&service, "7", Some("archive"), Duration::ZERO).unwrap();
        assert!(catalog.is_empty());
        assert_eq!(
            service.queries.lock()[0].video_type.as_deref(),
            Some("archive")
        );
    }

    #[test]
    fn pauses_between_pages_only() {
        let service = ScriptedService::new(vec![page(&["1"], "c1"), page(&["2"], "")]);
        let started = Instant::now();
        fetch_catalog(&service, "7", None, Duration::from_millis(50)).unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(1));
    }
}
