//! One forward pass from calendar cursor to committed progress.
use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn, Span};
use uuid::Uuid;

use crate::calendar::{Calendar, CalendarError};
use crate::config::Config;
use crate::error::{FailureClass, RunError, Stage};
use crate::generator::{ContentGenerator, GeminiClient};
use crate::images::{FormatGuard, ImageFetcher, PexelsClient};
use crate::markup::{self, FeaturedImage};
use crate::model::{CalendarEntry, ImageAsset, ProgressState, PublishResult};
use crate::progress::{self, ProgressStore};
use crate::publisher::{BloggerClient, BloggerCredentials, PostDraft, Publisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Start,
    TopicLoaded,
    ContentReady,
    ImageResolved,
    MarkupReady,
    Published,
    Committed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Start => "start",
            RunState::TopicLoaded => "topic-loaded",
            RunState::ContentReady => "content-ready",
            RunState::ImageResolved => "image-resolved",
            RunState::MarkupReady => "markup-ready",
            RunState::Published => "published",
            RunState::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Per-run knobs taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    pub fallback_queries: Vec<String>,
    pub image_dir: Option<PathBuf>,
    pub public_image_base_url: Option<String>,
    pub dry_run: bool,
}

impl RunSettings {
    pub fn from_config(cfg: &Config, dry_run: bool) -> Self {
        Self {
            fallback_queries: cfg.images.fallback_queries.clone(),
            image_dir: cfg.image_dir(),
            public_image_base_url: cfg.public_image_base_url(),
            dry_run,
        }
    }
}

/// Summary of a run that did not fail.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub day: u32,
    pub topic: String,
    pub state: RunState,
    pub post: Option<PublishResult>,
    pub image_attached: bool,
    /// Cursor after the run; unchanged on a dry run.
    pub next_day: u32,
    pub html: String,
}

pub struct Orchestrator {
    calendar: Calendar,
    progress: Arc<dyn ProgressStore>,
    generator: ContentGenerator,
    images: ImageFetcher,
    publisher: Publisher,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        calendar: Calendar,
        progress: Arc<dyn ProgressStore>,
        generator: ContentGenerator,
        images: ImageFetcher,
        publisher: Publisher,
        settings: RunSettings,
    ) -> Self {
        Self {
            calendar,
            progress,
            generator,
            images,
            publisher,
            settings,
        }
    }

    /// Wire the production collaborators. Nothing remote is contacted here.
    pub async fn from_config(cfg: &Config, dry_run: bool) -> Result<Self, RunError> {
        let calendar = Calendar::load(&cfg.calendar_path(), &cfg.categories)
            .map_err(|e| RunError::new(Stage::Calendar, FailureClass::Configuration, e.to_string()))?;
        info!(entries = calendar.len(), path = %cfg.calendar_path().display(), "calendar loaded");

        let progress = progress::open(cfg)
            .await
            .map_err(|e| RunError::new(Stage::Config, FailureClass::Storage, e.to_string()))?;

        let gemini = GeminiClient::new(
            &cfg.generation.endpoint,
            cfg.secrets.gemini_api_key.clone(),
            cfg.generation.model.clone(),
            cfg.generation.temperature,
        )
        .map_err(|e| config_error(Stage::Generation, e))?;
        let generator = ContentGenerator::new(Arc::new(gemini), (&cfg.generation).into());

        let images = match cfg.secrets.pexels_api_key.clone().filter(|_| cfg.images_active()) {
            Some(key) => {
                let pexels = PexelsClient::new(&cfg.images.endpoint, key)
                    .map_err(|e| config_error(Stage::Image, e))?;
                ImageFetcher::new(
                    Arc::new(pexels),
                    Arc::new(FormatGuard {
                        max_bytes: cfg.images.max_bytes,
                    }),
                    cfg.images.retry,
                )
            }
            None => {
                info!("image search not configured; posts will have no featured image");
                ImageFetcher::disabled()
            }
        };

        let blogger = BloggerClient::new(
            &cfg.blogger.api_base,
            &cfg.blogger.token_uri,
            cfg.blogger.blog_id.clone(),
            BloggerCredentials {
                client_id: cfg.secrets.blogger_client_id.clone(),
                client_secret: cfg.secrets.blogger_client_secret.clone(),
                refresh_token: cfg.secrets.blogger_refresh_token.clone(),
            },
        )
        .map_err(|e| config_error(Stage::Publish, e))?;
        let publisher = Publisher::new(Arc::new(blogger), cfg.blogger.retry);

        Ok(Self::new(
            calendar,
            progress,
            generator,
            images,
            publisher,
            RunSettings::from_config(cfg, dry_run),
        ))
    }

    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        Span::current().record("run_id", tracing::field::display(run_id));
        let mut state = RunState::Start;

        let progress = self.progress.load().await;
        info!(next_day = progress.next_day, store = %self.progress.location(), "progress loaded");

        let entry = self.load_topic(progress.next_day)?;
        advance(&mut state, RunState::TopicLoaded);
        info!(day = entry.day, topic = %entry.topic, category = %entry.category, "topic loaded");

        let content = self.generator.generate(entry).await?;
        advance(&mut state, RunState::ContentReady);

        let fallbacks: Vec<String> = std::iter::once(entry.category.clone())
            .chain(self.settings.fallback_queries.iter().cloned())
            .collect();
        let asset = self.images.fetch(&entry.topic, &fallbacks).await;
        let featured = match &asset {
            Some(asset) => Some(self.featured_image(entry.day, &content.title, asset).await),
            None => None,
        };
        advance(&mut state, RunState::ImageResolved);

        let html = markup::render_post(&content.body, featured.as_ref())
            .map_err(|e| RunError::new(Stage::Markup, FailureClass::Validation, e.to_string()))?;
        advance(&mut state, RunState::MarkupReady);

        if self.settings.dry_run {
            info!(
                day = entry.day,
                title = %content.title,
                label = %entry.category,
                html_chars = html.chars().count(),
                image = featured.is_some(),
                "dry run: post prepared, not publishing"
            );
            return Ok(RunReport {
                run_id,
                day: entry.day,
                topic: entry.topic.clone(),
                state,
                post: None,
                image_attached: featured.is_some(),
                next_day: progress.next_day,
                html,
            });
        }

        let draft = PostDraft::new(&content.title, &html, std::slice::from_ref(&entry.category));
        let post = self.publisher.publish(&draft).await?;
        advance(&mut state, RunState::Published);

        let next = ProgressState::after_publish(entry.day, &entry.topic, self.calendar.len(), Utc::now())
            .with_post(&post.url, featured.is_some());
        if let Err(err) = self.progress.commit(&next).await {
            warn!(post_id = %post.post_id, url = %post.url, "post is live but progress was not saved");
            return Err(RunError::new(Stage::Commit, FailureClass::Storage, err.to_string()));
        }
        advance(&mut state, RunState::Committed);
        info!(day = entry.day, next_day = next.next_day, url = %post.url, "run complete");

        Ok(RunReport {
            run_id,
            day: entry.day,
            topic: entry.topic.clone(),
            state,
            post: Some(post),
            image_attached: featured.is_some(),
            next_day: next.next_day,
            html,
        })
    }

    fn load_topic(&self, day: u32) -> Result<&CalendarEntry, RunError> {
        self.calendar.entry_for(day).map_err(|e| {
            let class = match e {
                CalendarError::BlankTopic(_) => FailureClass::Validation,
                _ => FailureClass::Configuration,
            };
            RunError::new(Stage::Calendar, class, e.to_string())
        })
    }

    /// Save the image locally when configured and pick the URL the post should reference.
    async fn featured_image(&self, day: u32, title: &str, asset: &ImageAsset) -> FeaturedImage {
        let mut url = asset.source_url.clone();
        if let Some(dir) = &self.settings.image_dir {
            let file_name = format!("day-{day}.{}", asset.format.extension());
            let path = dir.join(&file_name);
            match tokio::fs::write(&path, &asset.bytes).await {
                Ok(()) => {
                    debug!(path = %path.display(), "image saved");
                    if let Some(base) = &self.settings.public_image_base_url {
                        url = format!("{base}/{file_name}");
                    }
                }
                Err(err) => warn!(path = %path.display(), %err, "could not save image; using remote URL"),
            }
        }
        FeaturedImage {
            url,
            alt: title.to_string(),
            author: asset.author.clone(),
            credit_url: asset.page_url.clone(),
        }
    }
}

fn advance(state: &mut RunState, next: RunState) {
    debug_assert!(next > *state, "run state must move forward");
    debug!(from = %state, to = %next, "state transition");
    *state = next;
}

fn config_error(stage: Stage, err: anyhow::Error) -> RunError {
    RunError::new(stage, FailureClass::Configuration, format!("{err:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered_forward() {
        let order = [
            RunState::Start,
            RunState::TopicLoaded,
            RunState::ContentReady,
            RunState::ImageResolved,
            RunState::MarkupReady,
            RunState::Published,
            RunState::Committed,
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn advance_moves_state() {
        let mut state = RunState::Start;
        advance(&mut state, RunState::TopicLoaded);
        assert_eq!(state, RunState::TopicLoaded);
        assert_eq!(state.to_string(), "topic-loaded");
    }

    #[test]
    fn settings_follow_config() {
        let mut cfg: Config = serde_yaml::from_str(crate::config::example()).unwrap();
        cfg.app.image_dir = Some("/tmp/imgs".into());
        cfg.app.public_image_base_url = Some("https://cdn.example/img/".into());
        let settings = RunSettings::from_config(&cfg, true);
        assert!(settings.dry_run);
        assert_eq!(settings.image_dir, Some(PathBuf::from("/tmp/imgs")));
        assert_eq!(settings.public_image_base_url.as_deref(), Some("https://cdn.example/img"));
    }
}
