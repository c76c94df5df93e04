#![forbid(unsafe_code)]

//! Storage backends for the URL list and the exported CSV files. The
//! backend is picked once at startup; the pipeline only sees the trait.

use crate::gcp;
use anyhow::{Context, Result, bail};
use chrono::Local;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

pub const INPUT_OBJECT: &str = "input/url_list.txt";

/// Written in front of every CSV payload so spreadsheet apps pick up UTF-8.
const CSV_BOM: &str = "\u{FEFF}";

const VALID_URL_MARKERS: [&str; 6] = [
    "youtube.com/channel/",
    "youtube.com/@",
    "youtube.com/c/",
    "youtube.com/user/",
    "youtube.com/watch?v=",
    "youtu.be/",
];

pub trait Storage {
    /// Order-preserving list of valid channel/video URLs from the input file.
    fn read_url_list(&self) -> Result<Vec<String>>;
    /// Persists one channel's CSV payload; returns the destination location
    /// (a filesystem path or a `gs://` URI).
    fn save_csv(&self, channel_title: &str, csv_content: &str) -> Result<String>;
}

pub fn is_supported_url(url: &str) -> bool {
    VALID_URL_MARKERS.iter().any(|marker| url.contains(marker))
}

/// Filters raw file content down to trimmed, non-comment, non-blank lines
/// that look like supported YouTube URLs. Invalid lines are dropped with a
/// warning, never fatal.
pub fn parse_url_list(content: &str) -> Vec<String> {
    let mut urls = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if is_supported_url(line) {
            urls.push(line.to_string());
        } else {
            warn!("skipping invalid URL: {line}");
        }
    }
    if urls.is_empty() {
        warn!("no valid URLs found in the input list");
    }
    urls
}

/// Replaces filesystem-unsafe characters with full-width lookalikes so the
/// channel title survives as a filename on every platform.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' => '／',
            '\\' => '￥',
            ':' => '：',
            '*' => '＊',
            '?' => '？',
            '"' => '＂',
            '<' => '＜',
            '>' => '＞',
            '|' => '｜',
            other => other,
        })
        .collect()
}

pub fn csv_file_name(channel_title: &str, date_str: &str) -> String {
    format!("{}_{}.csv", sanitize_filename(channel_title), date_str)
}

fn run_date() -> String {
    Local::now().format("%Y%m%d").to_string()
}

/// Local-filesystem backend: reads the URL list from a file, writes CSVs
/// under `{output}/{YYYYMMDD}/`.
pub struct LocalStorage {
    input_path: PathBuf,
    output_path: PathBuf,
}

impl LocalStorage {
    pub fn new(input_path: &Path, output_path: &Path) -> Result<Self> {
        fs::create_dir_all(output_path)
            .with_context(|| format!("creating {}", output_path.display()))?;
        if let Some(parent) = input_path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        Ok(Self {
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
        })
    }
}

impl Storage for LocalStorage {
    fn read_url_list(&self) -> Result<Vec<String>> {
        if !self.input_path.exists() {
            bail!("input file not found: {}", self.input_path.display());
        }
        let content = fs::read_to_string(&self.input_path)
            .with_context(|| format!("reading {}", self.input_path.display()))?;
        Ok(parse_url_list(&content))
    }

    fn save_csv(&self, channel_title: &str, csv_content: &str) -> Result<String> {
        let date_str = run_date();
        let output_dir = self.output_path.join(&date_str);
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("creating {}", output_dir.display()))?;

        let file_path = output_dir.join(csv_file_name(channel_title, &date_str));
        fs::write(&file_path, format!("{CSV_BOM}{csv_content}"))
            .with_context(|| format!("writing {}", file_path.display()))?;

        info!("saved CSV: {}", file_path.display());
        Ok(file_path.display().to_string())
    }
}

/// Cloud Storage backend: the URL list lives at `input/url_list.txt` in the
/// bucket, CSVs go to `output/{YYYYMMDD}/`.
pub struct GcsStorage {
    agent: ureq::Agent,
    token: String,
    bucket: String,
}

impl GcsStorage {
    pub fn new(agent: ureq::Agent, token: String, bucket: &str) -> Self {
        Self {
            agent,
            token,
            bucket: bucket.to_string(),
        }
    }
}

impl Storage for GcsStorage {
    fn read_url_list(&self) -> Result<Vec<String>> {
        let content = gcp::download_object(&self.agent, &self.token, &self.bucket, INPUT_OBJECT)?;
        Ok(parse_url_list(&content))
    }

    fn save_csv(&self, channel_title: &str, csv_content: &str) -> Result<String> {
        let date_str = run_date();
        let object = format!("output/{date_str}/{}", csv_file_name(channel_title, &date_str));
        gcp::upload_object(
            &self.agent,
            &self.token,
            &self.bucket,
            &object,
            "text/csv; charset=utf-8",
            format!("{CSV_BOM}{csv_content}").as_bytes(),
        )?;

        let location = format!("gs://{}/{object}", self.bucket);
        info!("saved CSV: {location}");
        Ok(location)
    }
}
