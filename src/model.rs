use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One scheduled topic from the content calendar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEntry {
    pub day: u32,
    pub topic: String,
    pub category: String,
    pub details: Option<String>,
}

/// Durable cursor record. `next_day` always names the first day not yet published.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressState {
    pub next_day: u32,
    pub last_topic: String,
    pub last_published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_post_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_image_attached: Option<bool>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            next_day: 1,
            last_topic: String::new(),
            last_published_at: None,
            last_post_url: None,
            last_image_attached: None,
        }
    }
}

impl ProgressState {
    /// State to persist once `day` has been confirmed published.
    pub fn after_publish(day: u32, topic: &str, calendar_len: usize, now: DateTime<Utc>) -> Self {
        Self {
            next_day: crate::calendar::next_day_after(day, calendar_len),
            last_topic: topic.to_string(),
            last_published_at: Some(now),
            last_post_url: None,
            last_image_attached: None,
        }
    }

    pub fn with_post(mut self, url: &str, image_attached: bool) -> Self {
        if !url.is_empty() {
            self.last_post_url = Some(url.to_string());
        }
        self.last_image_attached = Some(image_attached);
        self
    }
}

/// Markdown-like article body returned by the text generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
    pub title: String,
    pub body: String,
    /// Whether a continuation request was appended to complete a truncated article.
    pub continued: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl ImageFormat {
    /// Detect the format from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(ImageFormat::Png)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
            ImageFormat::Gif => "gif",
        }
    }
}

/// Illustration for a post, with attribution. Optional for every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    /// Direct URL of the downloaded image.
    pub source_url: String,
    /// Page crediting the photo on the provider's site.
    pub page_url: String,
    pub author: String,
    pub author_url: Option<String>,
    /// Query that produced this asset.
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishResult {
    pub post_id: String,
    pub url: String,
    pub status: u16,
}
