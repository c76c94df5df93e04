#![forbid(unsafe_code)]

//! YouTube Data API v3 client: resolves channel URLs to channel metadata,
//! walks upload playlists to exhaustion and batch-fetches video details,
//! keeping only short-form videos.
//!
//! Every remote call goes through [`RetryPolicy`], which distinguishes a
//! quota-exceeded condition (fatal to the whole run) from transient HTTP
//! failures (bounded exponential backoff) and everything else.

use log::{debug, error, info, warn};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

pub const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
/// Hard API limit for both playlist pages and video-details batches.
pub const MAX_RESULTS_PER_CALL: usize = 50;
/// A video counts as short-form when it runs at most this many seconds.
pub const SHORT_MAX_SECONDS: u64 = 61;

const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

static CHANNEL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"youtube\.com/channel/([A-Za-z0-9_-]+)").unwrap());
static HANDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"youtube\.com/@([^/?]+)").unwrap());

/// Failure classes for remote calls. Retryability and fatality are decided
/// by variant, never by matching display strings.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP 403 with the structured reason `quotaExceeded`. Fatal to the
    /// entire run: further calls would fail the same way.
    #[error("API quota exceeded")]
    QuotaExceeded,
    #[error("HTTP error {status} (reason: {reason:?})")]
    Status { status: u16, reason: Option<String> },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            ApiError::Transport(_) | ApiError::Decode(_) => true,
            ApiError::QuotaExceeded => false,
        }
    }
}

/// One GET against an API endpoint, with the key already applied.
pub trait ApiTransport {
    fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, ApiError>;
}

/// Real transport over a shared [`ureq::Agent`].
pub struct HttpTransport {
    agent: ureq::Agent,
    api_key: String,
    base_url: String,
}

impl HttpTransport {
    pub fn new(api_key: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self {
            agent,
            api_key: api_key.to_string(),
            base_url: API_BASE.to_string(),
        }
    }
}

impl ApiTransport for HttpTransport {
    fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut request = self.agent.get(&url).query("key", &self.api_key);
        for (name, value) in params {
            request = request.query(name, value);
        }
        match request.call() {
            Ok(response) => response
                .into_json()
                .map_err(|err| ApiError::Decode(err.to_string())),
            Err(ureq::Error::Status(status, response)) => Err(classify_status(status, response)),
            Err(ureq::Error::Transport(transport)) => {
                Err(ApiError::Transport(transport.to_string()))
            }
        }
    }
}

/// Maps an HTTP error response onto [`ApiError`], pulling the machine-readable
/// `reason` out of the API's structured error body.
fn classify_status(status: u16, response: ureq::Response) -> ApiError {
    let reason = response
        .into_json::<Value>()
        .ok()
        .and_then(|body| body["error"]["errors"][0]["reason"].as_str().map(str::to_owned));
    if status == 403 && reason.as_deref() == Some("quotaExceeded") {
        ApiError::QuotaExceeded
    } else {
        ApiError::Status { status, reason }
    }
}

/// Blocking sleep, injectable so tests can record backoff instead of waiting.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Bounded-attempt retry discipline wrapping every remote call.
///
/// Retryable HTTP statuses back off exponentially (`base_delay * 2^(k-1)`
/// before attempt k+1); transport-level failures retry with a flat
/// `base_delay`; quota exhaustion and other HTTP errors fail immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn run<T>(
        &self,
        sleeper: &dyn Sleeper,
        context: &str,
        mut call: impl FnMut() -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut attempt = 0u32;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(ApiError::QuotaExceeded) => {
                    error!("API quota exceeded during {context}");
                    return Err(ApiError::QuotaExceeded);
                }
                Err(err @ ApiError::Status { .. }) if err.is_retryable() => {
                    attempt += 1;
                    if attempt < self.max_attempts {
                        let delay = self.base_delay * 2u32.pow(attempt - 1);
                        warn!(
                            "{err} during {context}, retrying in {}s...",
                            delay.as_secs()
                        );
                        sleeper.sleep(delay);
                        continue;
                    }
                    error!("{err} during {context}, attempts exhausted");
                    return Err(err);
                }
                Err(err @ ApiError::Status { .. }) => {
                    error!("{err} during {context}");
                    return Err(err);
                }
                Err(err) => {
                    attempt += 1;
                    if attempt < self.max_attempts {
                        warn!("{err} during {context}, retrying...");
                        sleeper.sleep(self.base_delay);
                        continue;
                    }
                    error!("{err} during {context}, attempts exhausted");
                    return Err(err);
                }
            }
        }
    }
}

/// Channel metadata resolved from an input URL. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub published_at: String,
    pub uploads_playlist_id: String,
}

/// One exportable video record, parsed out of a raw API item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub published_at: String,
    pub duration_seconds: u64,
    pub view_count: u64,
    pub like_count: u64,
    pub comment_count: u64,
    pub thumbnail_url: String,
    /// Comma-joined tag list, empty when the video has no tags.
    pub tags: String,
    pub url: String,
}

impl Video {
    pub fn is_short(&self) -> bool {
        self.duration_seconds <= SHORT_MAX_SECONDS
    }
}

pub struct YouTubeClient<T: ApiTransport> {
    transport: T,
    retry: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl YouTubeClient<HttpTransport> {
    pub fn new(api_key: &str) -> Self {
        Self::with_transport(HttpTransport::new(api_key))
    }
}

impl<T: ApiTransport> YouTubeClient<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
            sleeper: Box::new(ThreadSleeper),
        }
    }

    pub fn with_parts(transport: T, retry: RetryPolicy, sleeper: Box<dyn Sleeper>) -> Self {
        Self {
            transport,
            retry,
            sleeper,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn call(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        self.retry
            .run(self.sleeper.as_ref(), endpoint, || {
                self.transport.get(endpoint, params)
            })
    }

    /// Resolves an input URL (channel, handle or video form) to channel
    /// metadata including the uploads playlist id.
    ///
    /// Returns `Ok(None)` when the URL cannot be classified or the channel
    /// does not exist; only a quota error propagates as `Err`.
    pub fn resolve_channel(&self, channel_url: &str) -> Result<Option<ChannelInfo>, ApiError> {
        let channel_id = if channel_url.contains("watch?v=") || channel_url.contains("youtu.be/") {
            self.channel_id_from_video_url(channel_url)?
        } else {
            self.extract_channel_id(channel_url)?
        };

        let Some(channel_id) = channel_id else {
            error!("could not determine a channel id from {channel_url}");
            return Ok(None);
        };

        let params = [
            ("part", "snippet,contentDetails".to_string()),
            ("id", channel_id),
        ];
        let response = match self.call("channels", &params) {
            Ok(response) => response,
            Err(ApiError::QuotaExceeded) => return Err(ApiError::QuotaExceeded),
            Err(err) => {
                error!("failed to fetch channel details for {channel_url}: {err}");
                return Ok(None);
            }
        };

        let Some(item) = response["items"].as_array().and_then(|items| items.first()) else {
            warn!("channel not found: {channel_url}");
            return Ok(None);
        };
        let Some(uploads_playlist_id) =
            item["contentDetails"]["relatedPlaylists"]["uploads"].as_str()
        else {
            error!("channel {channel_url} has no uploads playlist");
            return Ok(None);
        };

        let snippet = &item["snippet"];
        Ok(Some(ChannelInfo {
            id: item["id"].as_str().unwrap_or_default().to_string(),
            title: snippet["title"].as_str().unwrap_or_default().to_string(),
            description: snippet["description"].as_str().unwrap_or_default().to_string(),
            published_at: snippet["publishedAt"].as_str().unwrap_or_default().to_string(),
            uploads_playlist_id: uploads_playlist_id.to_string(),
        }))
    }

    /// Walks the uploads playlist page by page until no continuation token
    /// remains. A page failure after retries ends pagination early and
    /// returns whatever accumulated so far; only quota exhaustion escapes.
    pub fn list_video_ids(&self, playlist_id: &str) -> Result<Vec<String>, ApiError> {
        let mut video_ids = Vec::new();
        let mut page_token: Option<String> = None;
        let mut page_count = 0u32;

        loop {
            let mut params = vec![
                ("part", "contentDetails".to_string()),
                ("playlistId", playlist_id.to_string()),
                ("maxResults", MAX_RESULTS_PER_CALL.to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let response = match self.call("playlistItems", &params) {
                Ok(response) => response,
                Err(ApiError::QuotaExceeded) => return Err(ApiError::QuotaExceeded),
                Err(err) => {
                    error!("failed to list videos for playlist {playlist_id}: {err}");
                    break;
                }
            };

            page_count += 1;
            let items = response["items"].as_array().cloned().unwrap_or_default();
            debug!("page {page_count}: {} videos", items.len());
            for item in &items {
                if let Some(video_id) = item["contentDetails"]["videoId"].as_str() {
                    video_ids.push(video_id.to_string());
                }
            }

            match response["nextPageToken"].as_str() {
                Some(token) => page_token = Some(token.to_string()),
                None => break,
            }
        }

        info!("collected {} video ids", video_ids.len());
        Ok(video_ids)
    }

    /// Fetches details for the given ids in windows of at most 50 and keeps
    /// only short-form videos. A failed window is skipped; already-collected
    /// windows are preserved.
    pub fn fetch_short_videos(&self, video_ids: &[String]) -> Result<Vec<Video>, ApiError> {
        let mut videos = Vec::new();

        for batch in video_ids.chunks(MAX_RESULTS_PER_CALL) {
            let params = [
                ("part", "snippet,contentDetails,statistics".to_string()),
                ("id", batch.join(",")),
            ];
            let response = match self.call("videos", &params) {
                Ok(response) => response,
                Err(ApiError::QuotaExceeded) => return Err(ApiError::QuotaExceeded),
                Err(err) => {
                    error!("failed to fetch details for a batch of {} videos: {err}", batch.len());
                    continue;
                }
            };

            for item in response["items"].as_array().into_iter().flatten() {
                if let Some(video) = parse_video(item) {
                    if video.is_short() {
                        videos.push(video);
                    }
                }
            }
        }

        info!("short videos: {}", videos.len());
        Ok(videos)
    }

    /// Looks up the owning channel of a video URL (`watch?v=` or `youtu.be/`
    /// form) via a single video lookup.
    fn channel_id_from_video_url(&self, url: &str) -> Result<Option<String>, ApiError> {
        let Some(video_id) = extract_video_id(url) else {
            return Ok(None);
        };

        let params = [("part", "snippet".to_string()), ("id", video_id)];
        let response = match self.call("videos", &params) {
            Ok(response) => response,
            Err(ApiError::QuotaExceeded) => return Err(ApiError::QuotaExceeded),
            Err(err) => {
                error!("failed to look up the channel of video URL {url}: {err}");
                return Ok(None);
            }
        };

        Ok(response["items"]
            .as_array()
            .and_then(|items| items.first())
            .and_then(|item| item["snippet"]["channelId"].as_str())
            .map(str::to_owned))
    }

    /// Extracts a channel id from a channel-path or handle URL. The direct
    /// `/channel/<id>` form needs no remote call; a `/@handle` form issues a
    /// channel search for the percent-decoded handle text.
    fn extract_channel_id(&self, url: &str) -> Result<Option<String>, ApiError> {
        let decoded = urlencoding::decode(url)
            .map(|cow| cow.into_owned())
            .unwrap_or_else(|_| url.to_string());

        if let Some(captures) = CHANNEL_ID_RE.captures(&decoded) {
            return Ok(Some(captures[1].to_string()));
        }

        let Some(captures) = HANDLE_RE.captures(&decoded) else {
            return Ok(None);
        };
        let handle = captures[1].to_string();

        let params = [
            ("part", "id,snippet".to_string()),
            ("q", handle.clone()),
            ("type", "channel".to_string()),
            ("maxResults", "1".to_string()),
        ];
        let response = match self.call("search", &params) {
            Ok(response) => response,
            Err(ApiError::QuotaExceeded) => return Err(ApiError::QuotaExceeded),
            Err(err) => {
                error!("channel search for handle @{handle} failed: {err}");
                return Ok(None);
            }
        };

        let Some(items) = response["items"].as_array().filter(|items| !items.is_empty()) else {
            warn!("channel search for handle @{handle} returned nothing");
            return Ok(None);
        };

        let needle = handle.to_lowercase();
        for item in items {
            if let Some(custom_url) = item["snippet"]["customUrl"].as_str() {
                if !custom_url.is_empty() && custom_url.to_lowercase().contains(&needle) {
                    return Ok(item["id"]["channelId"].as_str().map(str::to_owned));
                }
            }
        }
        // No custom-URL match: fall back to the first search result.
        Ok(items[0]["id"]["channelId"].as_str().map(str::to_owned))
    }
}

/// Pulls the video id out of a `watch?v=` or `youtu.be/` URL.
pub fn extract_video_id(url: &str) -> Option<String> {
    if url.contains("watch?v=") {
        let query = url.split_once('?')?.1;
        return query
            .split('&')
            .find_map(|pair| pair.strip_prefix("v="))
            .filter(|id| !id.is_empty())
            .map(str::to_owned);
    }
    if let Some((_, rest)) = url.split_once("youtu.be/") {
        let id = rest.split('?').next().unwrap_or_default();
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    None
}

/// Builds a [`Video`] from one raw API item. An item missing any of the
/// structural blocks (id, snippet, contentDetails, statistics) is dropped
/// with a warning.
pub fn parse_video(item: &Value) -> Option<Video> {
    let id = item["id"].as_str();
    let snippet = item.get("snippet").filter(|value| value.is_object());
    let content_details = item.get("contentDetails").filter(|value| value.is_object());
    let statistics = item.get("statistics").filter(|value| value.is_object());

    let (Some(id), Some(snippet), Some(content_details), Some(statistics)) =
        (id, snippet, content_details, statistics)
    else {
        warn!(
            "dropping malformed video item: {}",
            item["id"].as_str().unwrap_or("unknown")
        );
        return None;
    };

    let duration = content_details["duration"].as_str().unwrap_or("PT0S");
    Some(Video {
        id: id.to_string(),
        title: snippet["title"].as_str().unwrap_or_default().to_string(),
        published_at: snippet["publishedAt"].as_str().unwrap_or_default().to_string(),
        duration_seconds: duration_seconds(duration),
        view_count: count_field(&statistics["viewCount"]),
        like_count: count_field(&statistics["likeCount"]),
        comment_count: count_field(&statistics["commentCount"]),
        thumbnail_url: snippet["thumbnails"]["high"]["url"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        tags: join_tags(&snippet["tags"]),
        url: format!("https://www.youtube.com/watch?v={id}"),
    })
}

/// The API serializes statistics counters as strings; tolerate plain numbers
/// too and default anything else to zero.
fn count_field(value: &Value) -> u64 {
    value
        .as_str()
        .and_then(|raw| raw.parse().ok())
        .or_else(|| value.as_u64())
        .unwrap_or(0)
}

fn join_tags(value: &Value) -> String {
    value
        .as_array()
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default()
}

/// Whole seconds of an ISO-8601 duration as the API emits them (`PnDTnHnMnS`).
/// Unparseable input counts as zero seconds, which keeps such items inside
/// the short filter; that matches the documented export behavior.
pub fn duration_seconds(raw: &str) -> u64 {
    let Some(rest) = raw.strip_prefix('P') else {
        return 0;
    };

    let mut total = 0u64;
    let mut number = String::new();
    let mut in_time_part = false;
    for c in rest.chars() {
        match c {
            'T' => in_time_part = true,
            digit if digit.is_ascii_digit() => number.push(digit),
            unit => {
                let Ok(value) = number.parse::<u64>() else {
                    number.clear();
                    continue;
                };
                number.clear();
                let seconds = match (unit, in_time_part) {
                    ('W', false) => value.checked_mul(7 * 86_400),
                    ('D', false) => value.checked_mul(86_400),
                    ('H', true) => value.checked_mul(3_600),
                    ('M', true) => value.checked_mul(60),
                    ('S', true) => Some(value),
                    _ => Some(0),
                };
                // Durations this long are garbage; treat them like any
                // other unparseable input.
                let Some(seconds) = seconds else {
                    return 0;
                };
                total = total.saturating_add(seconds);
            }
        }
    }
    total
}
