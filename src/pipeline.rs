#![forbid(unsafe_code)]

//! Per-channel orchestration and the batch driver. Channels are processed
//! strictly one at a time in input order; one channel's failure never stops
//! the run, except quota exhaustion, which aborts the whole batch.

use crate::export;
use crate::storage::Storage;
use crate::youtube::{ApiError, ApiTransport, YouTubeClient};
use anyhow::Result;
use log::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ChannelNotFound,
    NoVideos,
    NoShortVideos,
}

/// What happened to a single channel. Skips are recoverable absences of
/// data, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Exported(String),
    Skipped(SkipReason),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct ChannelPipeline<'a, T: ApiTransport> {
    client: &'a YouTubeClient<T>,
    storage: &'a dyn Storage,
}

impl<'a, T: ApiTransport> ChannelPipeline<'a, T> {
    pub fn new(client: &'a YouTubeClient<T>, storage: &'a dyn Storage) -> Self {
        Self { client, storage }
    }

    /// Resolve, paginate, fetch-and-filter, export. Each empty stage is a
    /// logged skip; errors propagate to the batch loop.
    pub fn process(&self, channel_url: &str) -> Result<ChannelOutcome> {
        let Some(channel) = self.client.resolve_channel(channel_url)? else {
            error!("could not resolve channel: {channel_url}");
            return Ok(ChannelOutcome::Skipped(SkipReason::ChannelNotFound));
        };
        info!("channel: {}", channel.title);

        let video_ids = self.client.list_video_ids(&channel.uploads_playlist_id)?;
        if video_ids.is_empty() {
            warn!("no videos found: {}", channel.title);
            return Ok(ChannelOutcome::Skipped(SkipReason::NoVideos));
        }

        let shorts = self.client.fetch_short_videos(&video_ids)?;
        if shorts.is_empty() {
            warn!("no short videos found: {}", channel.title);
            return Ok(ChannelOutcome::Skipped(SkipReason::NoShortVideos));
        }

        let csv_content = export::render_channel_csv(&channel, &shorts);
        let location = self.storage.save_csv(&channel.title, &csv_content)?;
        info!("export complete: {location}");
        Ok(ChannelOutcome::Exported(location))
    }

    /// Runs the whole batch: reads the URL list, processes each channel in
    /// order, counts outcomes. Per-channel errors are logged and counted;
    /// quota exhaustion bypasses that isolation and aborts the run.
    pub fn run(&self) -> Result<RunSummary> {
        let urls = self.storage.read_url_list()?;
        if urls.is_empty() {
            warn!("nothing to process");
            return Ok(RunSummary::default());
        }
        info!("processing {} channels", urls.len());

        let mut summary = RunSummary::default();
        for (index, url) in urls.iter().enumerate() {
            info!("[{}/{}] processing {url}", index + 1, urls.len());
            match self.process(url) {
                Ok(_) => summary.succeeded += 1,
                Err(err) => {
                    if matches!(
                        err.downcast_ref::<ApiError>(),
                        Some(ApiError::QuotaExceeded)
                    ) {
                        error!("API quota exhausted, aborting the run");
                        return Err(err);
                    }
                    error!("channel processing failed: {url}: {err:#}");
                    summary.failed += 1;
                }
            }
        }

        info!(
            "=== run complete: {} succeeded, {} failed ===",
            summary.succeeded, summary.failed
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::youtube::test_support::{ScriptedTransport, no_sleep_client};
    use anyhow::anyhow;
    use serde_json::{Value, json};
    use std::cell::RefCell;

    /// In-memory storage double that records saves and can be told to fail
    /// the first n of them.
    struct MemoryStorage {
        urls: Vec<String>,
        saved: RefCell<Vec<(String, String)>>,
        failing_saves: RefCell<usize>,
    }

    impl MemoryStorage {
        fn new(urls: &[&str]) -> Self {
            Self {
                urls: urls.iter().map(|url| url.to_string()).collect(),
                saved: RefCell::new(Vec::new()),
                failing_saves: RefCell::new(0),
            }
        }

        fn failing_first_saves(urls: &[&str], count: usize) -> Self {
            let storage = Self::new(urls);
            *storage.failing_saves.borrow_mut() = count;
            storage
        }
    }

    impl Storage for MemoryStorage {
        fn read_url_list(&self) -> Result<Vec<String>> {
            Ok(self.urls.clone())
        }

        fn save_csv(&self, channel_title: &str, csv_content: &str) -> Result<String> {
            let mut failing = self.failing_saves.borrow_mut();
            if *failing > 0 {
                *failing -= 1;
                return Err(anyhow!("disk full"));
            }
            self.saved
                .borrow_mut()
                .push((channel_title.to_string(), csv_content.to_string()));
            Ok(format!("mem://{channel_title}"))
        }
    }

    fn channel_response(id: &str, title: &str) -> Value {
        json!({
            "items": [{
                "id": id,
                "snippet": {
                    "title": title,
                    "description": "",
                    "publishedAt": "2020-01-01T00:00:00Z"
                },
                "contentDetails": { "relatedPlaylists": { "uploads": format!("UU-{id}") } }
            }]
        })
    }

    fn playlist_page(ids: &[&str]) -> Value {
        json!({
            "items": ids.iter()
                .map(|id| json!({ "contentDetails": { "videoId": id } }))
                .collect::<Vec<_>>()
        })
    }

    fn details_response(ids_and_durations: &[(&str, &str)]) -> Value {
        json!({
            "items": ids_and_durations.iter().map(|(id, duration)| json!({
                "id": id,
                "snippet": {
                    "title": format!("Video {id}"),
                    "publishedAt": "2023-06-01T00:00:00Z",
                    "thumbnails": { "high": { "url": "https://thumb" } }
                },
                "contentDetails": { "duration": duration },
                "statistics": { "viewCount": "5", "likeCount": "1", "commentCount": "0" }
            })).collect::<Vec<_>>()
        })
    }

    /// Scripted calls for processing one channel end to end.
    fn happy_channel_responses(id: &str, title: &str) -> Vec<Result<Value, ApiError>> {
        vec![
            Ok(channel_response(id, title)),
            Ok(playlist_page(&["v1", "v2"])),
            Ok(details_response(&[("v1", "PT30S"), ("v2", "PT5M")])),
        ]
    }

    #[test]
    fn processes_a_channel_end_to_end() {
        let transport = ScriptedTransport::new(happy_channel_responses("UC1", "Channel One"));
        let (client, _) = no_sleep_client(transport);
        let storage = MemoryStorage::new(&[]);
        let pipeline = ChannelPipeline::new(&client, &storage);

        let outcome = pipeline
            .process("https://www.youtube.com/channel/UC1")
            .unwrap();

        assert_eq!(
            outcome,
            ChannelOutcome::Exported("mem://Channel One".to_string())
        );
        let saved = storage.saved.borrow();
        assert_eq!(saved.len(), 1);
        // Only the 30-second video survives the short filter.
        assert_eq!(saved[0].1.lines().count(), 2);
        assert!(saved[0].1.contains("Video v1"));
        assert!(!saved[0].1.contains("Video v2"));
    }

    #[test]
    fn unresolved_channel_is_a_skip_not_an_error() {
        let transport = ScriptedTransport::new(vec![Ok(json!({ "items": [] }))]);
        let (client, _) = no_sleep_client(transport);
        let storage = MemoryStorage::new(&[]);
        let pipeline = ChannelPipeline::new(&client, &storage);

        let outcome = pipeline
            .process("https://www.youtube.com/channel/UCgone")
            .unwrap();
        assert_eq!(
            outcome,
            ChannelOutcome::Skipped(SkipReason::ChannelNotFound)
        );
        assert!(storage.saved.borrow().is_empty());
    }

    #[test]
    fn channel_without_videos_is_skipped() {
        let transport = ScriptedTransport::new(vec![
            Ok(channel_response("UC1", "Empty")),
            Ok(playlist_page(&[])),
        ]);
        let (client, _) = no_sleep_client(transport);
        let storage = MemoryStorage::new(&[]);
        let pipeline = ChannelPipeline::new(&client, &storage);

        let outcome = pipeline
            .process("https://www.youtube.com/channel/UC1")
            .unwrap();
        assert_eq!(outcome, ChannelOutcome::Skipped(SkipReason::NoVideos));
    }

    #[test]
    fn channel_with_only_long_videos_is_skipped() {
        let transport = ScriptedTransport::new(vec![
            Ok(channel_response("UC1", "Longform")),
            Ok(playlist_page(&["v1"])),
            Ok(details_response(&[("v1", "PT10M")])),
        ]);
        let (client, _) = no_sleep_client(transport);
        let storage = MemoryStorage::new(&[]);
        let pipeline = ChannelPipeline::new(&client, &storage);

        let outcome = pipeline
            .process("https://www.youtube.com/channel/UC1")
            .unwrap();
        assert_eq!(outcome, ChannelOutcome::Skipped(SkipReason::NoShortVideos));
        assert!(storage.saved.borrow().is_empty());
    }

    #[test]
    fn batch_run_processes_every_url_and_counts_outcomes() {
        let mut responses = happy_channel_responses("UC1", "One");
        responses.extend(happy_channel_responses("UC2", "Two"));
        let transport = ScriptedTransport::new(responses);
        let (client, _) = no_sleep_client(transport);
        let storage = MemoryStorage::new(&[
            "https://www.youtube.com/channel/UC1",
            "https://www.youtube.com/channel/UC2",
        ]);
        let pipeline = ChannelPipeline::new(&client, &storage);

        let summary = pipeline.run().unwrap();
        assert_eq!(
            summary,
            RunSummary {
                succeeded: 2,
                failed: 0
            }
        );
        assert_eq!(storage.saved.borrow().len(), 2);
    }

    #[test]
    fn raw_url_list_on_disk_drives_a_full_run() {
        use crate::storage::LocalStorage;
        use std::fs;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let input_path = dir.path().join("input/url_list.txt");
        let output_path = dir.path().join("output");
        let storage = LocalStorage::new(&input_path, &output_path).unwrap();
        fs::write(
            &input_path,
            "https://www.youtube.com/channel/UC1\n\
             not a channel url\n\
             https://www.youtube.com/channel/UC2\n",
        )
        .unwrap();

        let mut responses = happy_channel_responses("UC1", "One");
        responses.extend(happy_channel_responses("UC2", "Two"));
        let transport = ScriptedTransport::new(responses);
        let (client, _) = no_sleep_client(transport);
        let pipeline = ChannelPipeline::new(&client, &storage);

        let summary = pipeline.run().unwrap();
        assert_eq!(
            summary,
            RunSummary {
                succeeded: 2,
                failed: 0
            }
        );
        // The junk line was dropped before it could reach the API.
        assert_eq!(client.transport().call_count(), 6);

        let date_dir = fs::read_dir(&output_path)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .next()
            .unwrap();
        let mut csv_files: Vec<String> = fs::read_dir(&date_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        csv_files.sort();
        assert_eq!(csv_files.len(), 2);
        assert!(csv_files[0].starts_with("One_"));
        assert!(csv_files[1].starts_with("Two_"));
    }

    #[test]
    fn one_failing_channel_does_not_stop_the_run() {
        let mut responses = happy_channel_responses("UC1", "One");
        responses.extend(happy_channel_responses("UC2", "Two"));
        let transport = ScriptedTransport::new(responses);
        let (client, _) = no_sleep_client(transport);
        let storage = MemoryStorage::failing_first_saves(
            &[
                "https://www.youtube.com/channel/UC1",
                "https://www.youtube.com/channel/UC2",
            ],
            1,
        );
        let pipeline = ChannelPipeline::new(&client, &storage);

        let summary = pipeline.run().unwrap();
        assert_eq!(
            summary,
            RunSummary {
                succeeded: 1,
                failed: 1
            }
        );
        assert_eq!(storage.saved.borrow().len(), 1);
        assert_eq!(storage.saved.borrow()[0].0, "Two");
    }

    #[test]
    fn quota_exhaustion_aborts_the_whole_run() {
        let mut responses = happy_channel_responses("UC1", "One");
        responses.push(Err(ApiError::QuotaExceeded));
        let transport = ScriptedTransport::new(responses);
        let (client, _) = no_sleep_client(transport);
        let storage = MemoryStorage::new(&[
            "https://www.youtube.com/channel/UC1",
            "https://www.youtube.com/channel/UC2",
            "https://www.youtube.com/channel/UC3",
        ]);
        let pipeline = ChannelPipeline::new(&client, &storage);

        let err = pipeline.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::QuotaExceeded)
        ));
        // The first channel completed before the quota ran out; the third
        // was never attempted.
        assert_eq!(storage.saved.borrow().len(), 1);
        assert_eq!(client.transport().call_count(), 4);
    }

    #[test]
    fn empty_url_list_is_a_clean_no_op() {
        let transport = ScriptedTransport::new(vec![]);
        let (client, _) = no_sleep_client(transport);
        let storage = MemoryStorage::new(&[]);
        let pipeline = ChannelPipeline::new(&client, &storage);

        let summary = pipeline.run().unwrap();
        assert_eq!(summary, RunSummary::default());
        assert_eq!(client.transport().call_count(), 0);
    }
}
