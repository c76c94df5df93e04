#![forbid(unsafe_code)]

//! Renders one channel's short videos into the fixed 11-column CSV payload.
//! The header strings are part of the output format consumed downstream and
//! stay as-is.

use crate::youtube::{ChannelInfo, Video};
use chrono::DateTime;
use log::info;

const HEADERS: [&str; 11] = [
    "動画タイトル",
    "動画URL",
    "アップロード日",
    "再生回数",
    "高評価数",
    "コメント数",
    "動画の長さ(秒)",
    "サムネイル画像URL",
    "動画タグ",
    "チャンネル名",
    "チャンネル開始日",
];

/// Renders the header plus one row per video, rows in input order,
/// `\n`-terminated lines.
pub fn render_channel_csv(channel: &ChannelInfo, videos: &[Video]) -> String {
    let mut output = String::new();
    push_row(&mut output, &HEADERS.map(String::from));

    let channel_published = format_date(&channel.published_at);
    for video in videos {
        push_row(
            &mut output,
            &[
                video.title.clone(),
                video.url.clone(),
                format_date(&video.published_at),
                video.view_count.to_string(),
                video.like_count.to_string(),
                video.comment_count.to_string(),
                video.duration_seconds.to_string(),
                video.thumbnail_url.clone(),
                video.tags.clone(),
                channel.title.clone(),
                channel_published.clone(),
            ],
        );
    }

    info!(
        "rendered CSV for {}: {} videos",
        channel.title,
        videos.len()
    );
    output
}

fn push_row(output: &mut String, fields: &[String]) {
    let mut first = true;
    for field in fields {
        if !first {
            output.push(',');
        }
        first = false;
        output.push_str(&escape_field(field));
    }
    output.push('\n');
}

/// Minimal quoting: a field is wrapped in double quotes only when it
/// contains a delimiter, a quote or a line break; embedded quotes double.
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Formats an RFC 3339 timestamp as `YYYY-MM-DD`. Empty input stays empty;
/// anything unparseable passes through unchanged.
pub fn format_date(date_str: &str) -> String {
    if date_str.is_empty() {
        return String::new();
    }
    match DateTime::parse_from_rfc3339(date_str) {
        Ok(timestamp) => timestamp.format("%Y-%m-%d").to_string(),
        Err(_) => date_str.to_string(),
    }
}
