//! YouTube helpers: video id extraction, thumbnail download and Data API search.

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use shared::protocol::ReferenceImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::media::{fetch_image_base64, MediaError, DEFAULT_IMAGE_MIME};

pub const THUMBNAIL_CDN: &str = "https://img.youtube.com/vi";
pub const DATA_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const SEARCH_PAGE_SIZE: u32 = 6;

const VIDEO_ID_LEN: usize = 11;

#[derive(Debug, Error)]
pub enum YoutubeError {
    #[error("Invalid YouTube URL")]
    InvalidUrl,
    #[error("Could not download YouTube thumbnail: {0}")]
    Thumbnail(#[source] MediaError),
    #[error("YouTube API key is not configured")]
    MissingApiKey,
    #[error("{0}")]
    Api(String),
    #[error("YouTube request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Extracts the 11-character video id from watch, short, embed, `v/` and
/// `u/<n>/` style links. The marker starting last in the url wins.
pub fn video_id(url: &str) -> Option<String> {
    let (start, marker_len) = url
        .char_indices()
        .rev()
        .find_map(|(pos, _)| marker_len_at(&url[pos..]).map(|len| (pos, len)))?;
    let id: String = url[start + marker_len..]
        .chars()
        .take_while(|c| !matches!(c, '#' | '&' | '?'))
        .collect();
    (id.chars().count() == VIDEO_ID_LEN).then_some(id)
}

fn marker_len_at(rest: &str) -> Option<usize> {
    for marker in ["youtu.be/", "v/"] {
        if rest.starts_with(marker) {
            return Some(marker.len());
        }
    }
    if let Some(after) = rest.strip_prefix("u/") {
        let mut chars = after.chars();
        if let (Some(c), Some('/')) = (chars.next(), chars.next()) {
            if c.is_alphanumeric() || c == '_' {
                return Some(2 + c.len_utf8() + 1);
            }
        }
    }
    ["embed/", "watch?v=", "&v="]
        .into_iter()
        .find(|marker| rest.starts_with(marker))
        .map(str::len)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailQuality {
    MaxRes,
    High,
    Medium,
}

impl ThumbnailQuality {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::MaxRes => "maxresdefault.jpg",
            Self::High => "hqdefault.jpg",
            Self::Medium => "mqdefault.jpg",
        }
    }
}

pub fn thumbnail_url(video_id: &str, quality: ThumbnailQuality) -> String {
    thumbnail_url_with_base(THUMBNAIL_CDN, video_id, quality)
}

fn thumbnail_url_with_base(base: &str, video_id: &str, quality: ThumbnailQuality) -> String {
    format!(
        "{}/{video_id}/{}",
        base.trim_end_matches('/'),
        quality.file_name()
    )
}

/// Downloads video thumbnails to use as the style reference.
#[derive(Clone)]
pub struct ThumbnailFetcher {
    http: Client,
    cdn_base: String,
}

impl ThumbnailFetcher {
    pub fn new(http: Client) -> Self {
        Self::with_cdn_base(http, THUMBNAIL_CDN)
    }

    pub fn with_cdn_base(http: Client, cdn_base: impl Into<String>) -> Self {
        Self {
            http,
            cdn_base: cdn_base.into(),
        }
    }

    /// Tries the max-resolution thumbnail first and falls back to the high
    /// quality one, which every video has.
    pub async fn fetch_style_reference(&self, url: &str) -> Result<ReferenceImage, YoutubeError> {
        let id = video_id(url).ok_or(YoutubeError::InvalidUrl)?;

        let max_res = thumbnail_url_with_base(&self.cdn_base, &id, ThumbnailQuality::MaxRes);
        match fetch_image_base64(&self.http, &max_res).await {
            Ok(data) => return Ok(ReferenceImage::new(data, DEFAULT_IMAGE_MIME)),
            Err(error) => {
                info!(video_id = %id, %error, "max resolution thumbnail unavailable, falling back")
            }
        }

        let high = thumbnail_url_with_base(&self.cdn_base, &id, ThumbnailQuality::High);
        let data = fetch_image_base64(&self.http, &high)
            .await
            .map_err(YoutubeError::Thumbnail)?;
        Ok(ReferenceImage::new(data, DEFAULT_IMAGE_MIME))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchOrder {
    #[default]
    Relevance,
    Date,
    ViewCount,
    Rating,
}

impl SearchOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relevance => "relevance",
            Self::Date => "date",
            Self::ViewCount => "viewCount",
            Self::Rating => "rating",
        }
    }
}

impl fmt::Display for SearchOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "relevance" => Ok(Self::Relevance),
            "date" => Ok(Self::Date),
            "viewcount" | "views" => Ok(Self::ViewCount),
            "rating" => Ok(Self::Rating),
            other => Err(format!("unknown search order '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSummary {
    pub id: String,
    pub title: String,
    pub thumbnail: String,
    pub views: String,
    pub published: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchPage {
    pub videos: Vec<VideoSummary>,
    pub next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    thumbnails: HashMap<String, ThumbnailRef>,
}

#[derive(Deserialize)]
struct ThumbnailRef {
    url: String,
}

#[derive(Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoStatsItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatsItem {
    id: String,
    statistics: Option<Statistics>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

#[derive(Clone)]
pub struct YoutubeSearchClient {
    http: Client,
    api_key: Option<String>,
    base_url: String,
}

impl YoutubeSearchClient {
    pub fn new(http: Client, api_key: Option<String>) -> Self {
        Self::with_base_url(http, api_key, DATA_API_BASE)
    }

    pub fn with_base_url(
        http: Client,
        api_key: Option<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: base_url.into(),
        }
    }

    pub async fn search_videos(
        &self,
        query: &str,
        page_token: Option<&str>,
        order: SearchOrder,
    ) -> Result<SearchPage, YoutubeError> {
        let api_key = self.api_key.as_deref().ok_or(YoutubeError::MissingApiKey)?;

        let mut search_url = self.endpoint("search")?;
        search_url
            .query_pairs_mut()
            .append_pair("part", "snippet")
            .append_pair("maxResults", &SEARCH_PAGE_SIZE.to_string())
            .append_pair("q", query)
            .append_pair("type", "video")
            .append_pair("order", order.as_str())
            .append_pair("key", api_key);
        if let Some(token) = page_token.filter(|token| !token.is_empty()) {
            search_url.query_pairs_mut().append_pair("pageToken", token);
        }

        let response = self.http.get(search_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(YoutubeError::Api(search_failure_message(status.as_u16(), &body)));
        }
        let listing: SearchListResponse = response.json().await?;

        let ids: Vec<String> = listing
            .items
            .iter()
            .filter_map(|item| item.id.video_id.clone())
            .collect();
        let views = if ids.is_empty() {
            HashMap::new()
        } else {
            self.view_counts(api_key, &ids).await.unwrap_or_else(|error| {
                warn!(%error, "failed to load video statistics");
                HashMap::new()
            })
        };

        let now = Utc::now();
        let videos = listing
            .items
            .into_iter()
            .filter_map(|item| {
                let id = item.id.video_id?;
                let thumbnail = ["high", "medium", "default"]
                    .iter()
                    .find_map(|size| item.snippet.thumbnails.get(*size))
                    .map(|thumb| thumb.url.clone())
                    .unwrap_or_else(|| thumbnail_url(&id, ThumbnailQuality::High));
                let views = views
                    .get(&id)
                    .map(|count| format!("{} views", compact_count(*count)))
                    .unwrap_or_else(|| "N/A".to_string());
                Some(VideoSummary {
                    title: item.snippet.title,
                    thumbnail,
                    views,
                    published: relative_time(item.snippet.published_at, now),
                    id,
                })
            })
            .collect();

        Ok(SearchPage {
            videos,
            next_page_token: listing.next_page_token,
        })
    }

    async fn view_counts(
        &self,
        api_key: &str,
        ids: &[String],
    ) -> Result<HashMap<String, u64>, YoutubeError> {
        let mut url = self.endpoint("videos")?;
        url.query_pairs_mut()
            .append_pair("part", "statistics")
            .append_pair("id", &ids.join(","))
            .append_pair("key", api_key);

        let listing: VideoListResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(listing
            .items
            .into_iter()
            .filter_map(|item| {
                let count = item.statistics?.view_count?.parse().ok()?;
                Some((item.id, count))
            })
            .collect())
    }

    fn endpoint(&self, path: &str) -> Result<Url, YoutubeError> {
        Url::parse(&format!("{}/{path}", self.base_url.trim_end_matches('/')))
            .map_err(|error| YoutubeError::Api(format!("invalid YouTube API base url: {error}")))
    }
}

fn search_failure_message(status: u16, body: &str) -> String {
    let message = serde_json::from_str::<ApiErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error.message);
    match (status, message) {
        (403, Some(message)) => format!("YouTube API 403: {message}"),
        (403, None) => "YouTube API 403: access denied".to_string(),
        (_, Some(message)) => message,
        (_, None) => "Failed to fetch from YouTube API".to_string(),
    }
}

/// Formats 1_234_567 as `1.2M` and 3_400 as `3.4K`.
pub fn compact_count(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        count.to_string()
    }
}

pub fn relative_time(published: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - published).num_seconds();
    if seconds < 60 {
        return "Just now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    let days = hours / 24;
    if days < 7 {
        return format!("{days}d ago");
    }
    if days < 30 {
        return format!("{}w ago", days / 7);
    }
    if days < 365 {
        return format!("{}mo ago", days / 30);
    }
    format!("{}y ago", days / 365)
}

#[cfg(test)]
#[path = "tests/youtube_tests.rs"]
mod tests;
