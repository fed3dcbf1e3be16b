//! Best-effort featured image lookup. Every failure path ends in "no image".
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::RemoteError;
use crate::model::{ImageAsset, ImageFormat};
use crate::retry::{self, Disposition, RetryOutcome, RetryPolicy};

/// A single search result from the photo provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoHit {
    pub image_url: String,
    pub page_url: String,
    pub author: String,
    pub author_url: Option<String>,
}

/// Photo-search collaborator.
#[async_trait]
pub trait PhotoSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<PhotoHit>, RemoteError>;
    async fn download(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Resize/compress step applied to a downloaded image before it is used.
pub trait ImageOptimizer: Send + Sync {
    fn optimize(&self, bytes: Vec<u8>) -> Result<(Vec<u8>, ImageFormat), ImageError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("no results")]
    NoResults,
    #[error("unrecognized image format")]
    UnknownFormat,
    #[error("image too large ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },
}

/// Accepts images already delivered in a web format within the size limit.
#[derive(Debug, Clone)]
pub struct FormatGuard {
    pub max_bytes: usize,
}

impl ImageOptimizer for FormatGuard {
    fn optimize(&self, bytes: Vec<u8>) -> Result<(Vec<u8>, ImageFormat), ImageError> {
        let format = ImageFormat::sniff(&bytes).ok_or(ImageError::UnknownFormat)?;
        if bytes.len() > self.max_bytes {
            return Err(ImageError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }
        Ok((bytes, format))
    }
}

/// An empty result set ends the query; retrying the same search cannot help.
pub fn classify(err: &ImageError) -> Disposition {
    match err {
        ImageError::Remote(RemoteError::Status { status, .. }) => match *status {
            408 | 429 | 500..=599 => Disposition::Transient,
            _ => Disposition::Permanent,
        },
        ImageError::Remote(RemoteError::Network(_))
        | ImageError::Remote(RemoteError::InvalidResponse(_)) => Disposition::Transient,
        ImageError::Remote(RemoteError::Auth(_))
        | ImageError::NoResults
        | ImageError::UnknownFormat
        | ImageError::TooLarge { .. } => Disposition::Permanent,
    }
}

/// Primary query first, then fallbacks, skipping blanks and case-insensitive repeats.
pub fn query_plan(primary: &str, fallbacks: &[String]) -> Vec<String> {
    let mut plan: Vec<String> = Vec::new();
    for q in std::iter::once(primary).chain(fallbacks.iter().map(String::as_str)) {
        let q = q.trim();
        if q.is_empty() || plan.iter().any(|p| p.eq_ignore_ascii_case(q)) {
            continue;
        }
        plan.push(q.to_string());
    }
    plan
}

pub struct ImageFetcher {
    search: Option<Arc<dyn PhotoSearch>>,
    optimizer: Arc<dyn ImageOptimizer>,
    policy: RetryPolicy,
}

impl ImageFetcher {
    pub fn new(
        search: Arc<dyn PhotoSearch>,
        optimizer: Arc<dyn ImageOptimizer>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            search: Some(search),
            optimizer,
            policy,
        }
    }

    /// Fetcher that always reports no image.
    pub fn disabled() -> Self {
        Self {
            search: None,
            optimizer: Arc::new(FormatGuard { max_bytes: 0 }),
            policy: RetryPolicy::fixed(1, 0),
        }
    }

    pub async fn fetch(&self, primary: &str, fallbacks: &[String]) -> Option<ImageAsset> {
        let Some(search) = self.search.as_ref() else {
            info!("image search disabled; publishing without image");
            return None;
        };

        for query in query_plan(primary, fallbacks) {
            match self.fetch_one(search.as_ref(), &query).await {
                Ok(asset) => {
                    info!(query = %query, author = %asset.author, bytes = asset.bytes.len(), "image resolved");
                    return Some(asset);
                }
                Err(err) => warn!(query = %query, %err, "image query failed; trying next"),
            }
        }
        info!("no image found for any query; publishing without image");
        None
    }

    async fn fetch_one(&self, search: &dyn PhotoSearch, query: &str) -> Result<ImageAsset, ImageError> {
        let outcome = retry::execute(&self.policy, "image", classify, |_attempt| async move {
            let hit = search
                .search(query)
                .await?
                .into_iter()
                .next()
                .ok_or(ImageError::NoResults)?;
            debug!(url = %hit.image_url, "downloading image");
            let bytes = search.download(&hit.image_url).await?;
            Ok((hit, bytes))
        })
        .await;

        let (hit, bytes) = match outcome {
            RetryOutcome::Success { value, .. } => value,
            RetryOutcome::Permanent { error, .. } | RetryOutcome::Exhausted { error, .. } => {
                return Err(error)
            }
        };
        let (bytes, format) = self.optimizer.optimize(bytes)?;
        Ok(ImageAsset {
            bytes,
            format,
            source_url: hit.image_url,
            page_url: hit.page_url,
            author: hit.author,
            author_url: hit.author_url,
            query: query.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct PexelsClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for PexelsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PexelsClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl PexelsClient {
    pub fn new(base_url: &str, api_key: String) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        let http = Client::builder().user_agent("autoblogger/0.1").build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl PhotoSearch for PexelsClient {
    async fn search(&self, query: &str) -> Result<Vec<PhotoHit>, RemoteError> {
        let url = self
            .base_url
            .join("search")
            .map_err(|e| RemoteError::InvalidResponse(format!("invalid search URL: {e}")))?;
        let res = self
            .http
            .get(url)
            .header("Authorization", &self.api_key)
            .query(&[("query", query), ("per_page", "1"), ("orientation", "landscape")])
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), &body));
        }
        let payload: SearchResponse = res
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok(payload
            .photos
            .into_iter()
            .map(|p| PhotoHit {
                image_url: p.src.large,
                page_url: p.url,
                author: p.photographer,
                author_url: p.photographer_url,
            })
            .collect())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let res = self.http.get(url).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), &body));
        }
        Ok(res.bytes().await?.to_vec())
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Deserialize)]
struct Photo {
    url: String,
    photographer: String,
    photographer_url: Option<String>,
    src: PhotoSrc,
}

#[derive(Deserialize)]
struct PhotoSrc {
    large: String,
}
