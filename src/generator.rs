//! Content generation: the Gemini collaborator and the retrying adapter around it.
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Generation;
use crate::error::{FailureClass, RemoteError, RunError, Stage};
use crate::model::{CalendarEntry, GeneratedContent};
use crate::retry::{self, Disposition, RetryOutcome, RetryPolicy};

const CONTINUATION_TAIL_CHARS: usize = 500;
const COMPLETE_MIN_CHARS: usize = 2000;
const COMPLETE_MIN_SECTIONS: usize = 3;

/// Text-generation collaborator: prompt in, raw text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String, RemoteError>;
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
    temperature: f32,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        temperature: f32,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        let http = Client::builder().user_agent("autoblogger/0.1").build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
            model,
            temperature,
        })
    }

    pub fn build_request(&self, prompt: &str, max_output_tokens: u32) -> anyhow::Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(&format!("models/{}:generateContent", self.model))?;
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens,
            },
        };
        Ok(self
            .http
            .post(endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .build()?)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String, RemoteError> {
        let request = self
            .build_request(prompt, max_output_tokens)
            .map_err(|e| RemoteError::InvalidResponse(format!("failed to build request: {e}")))?;
        debug!(url = %request.url(), "sending generation request");
        let res = self.http.execute(request).await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), &body));
        }

        let payload: GenerateContentResponse = res
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        payload.into_text()
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String, RemoteError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(RemoteError::InvalidResponse(format!("prompt blocked: {reason}")));
        }
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::InvalidResponse("no candidates returned".into()))?;
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
            return Err(RemoteError::InvalidResponse(format!(
                "empty candidate (finish reason: {reason})"
            )));
        }
        Ok(text)
    }
}

/// Failure of one generation attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("generated content too short ({chars} chars, need at least {min})")]
    TooShort { chars: usize, min: usize },
}

/// Generation failures: auth and client-class statuses are permanent, everything else
/// (network, throttling, server errors, rejected or short output) is worth another try.
pub fn classify(err: &GenerationError) -> Disposition {
    match err {
        GenerationError::TooShort { .. } => Disposition::Transient,
        GenerationError::Remote(RemoteError::Auth(_)) => Disposition::Permanent,
        GenerationError::Remote(RemoteError::Status { status, .. }) => match *status {
            408 | 429 => Disposition::Transient,
            400..=499 => Disposition::Permanent,
            _ => Disposition::Transient,
        },
        GenerationError::Remote(RemoteError::Network(_))
        | GenerationError::Remote(RemoteError::InvalidResponse(_)) => Disposition::Transient,
    }
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub max_output_tokens: u32,
    pub min_chars: usize,
    pub min_words: u32,
    pub max_words: u32,
    pub continue_truncated: bool,
    pub retry: RetryPolicy,
}

impl From<&Generation> for GenerationSettings {
    fn from(g: &Generation) -> Self {
        Self {
            max_output_tokens: g.max_output_tokens,
            min_chars: g.min_chars,
            min_words: g.min_words,
            max_words: g.max_words,
            continue_truncated: g.continue_truncated,
            retry: g.retry,
        }
    }
}

/// Adapter producing validated article content for a calendar entry.
pub struct ContentGenerator {
    generator: Arc<dyn TextGenerator>,
    settings: GenerationSettings,
}

impl ContentGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: GenerationSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    pub async fn generate(&self, entry: &CalendarEntry) -> Result<GeneratedContent, RunError> {
        info!(topic = %entry.topic, category = %entry.category, "generating article");
        let prompt = build_prompt(entry, &self.settings);
        let generator = &self.generator;
        let settings = &self.settings;
        let prompt_ref = &prompt;

        let outcome = retry::execute(&settings.retry, "generation", classify, |_attempt| async move {
            let raw = generator
                .complete(prompt_ref, settings.max_output_tokens)
                .await?;
            let body = strip_code_fences(&raw);
            let chars = body.chars().count();
            if chars < settings.min_chars {
                return Err(GenerationError::TooShort {
                    chars,
                    min: settings.min_chars,
                });
            }
            Ok(body)
        })
        .await;

        let mut body = match outcome {
            RetryOutcome::Success { value, .. } => value,
            RetryOutcome::Permanent { error, attempts } => {
                return Err(RunError::new(
                    Stage::Generation,
                    FailureClass::Permanent,
                    error.to_string(),
                )
                .with_attempts(attempts));
            }
            RetryOutcome::Exhausted { error, attempts } => {
                let class = match error {
                    GenerationError::TooShort { .. } => FailureClass::Validation,
                    GenerationError::Remote(_) => FailureClass::TransientExhausted,
                };
                return Err(
                    RunError::new(Stage::Generation, class, error.to_string())
                        .with_attempts(attempts),
                );
            }
        };

        let mut continued = false;
        if self.settings.continue_truncated && looks_truncated(&body) {
            warn!(chars = body.chars().count(), "article looks incomplete; requesting continuation");
            match self.continuation(&body).await {
                Ok(more) => {
                    body = format!("{body}\n\n{more}");
                    continued = true;
                    info!(chars = body.chars().count(), "article completed");
                }
                Err(err) => warn!(%err, "continuation failed; keeping the original article"),
            }
        }

        info!(
            chars = body.chars().count(),
            words = body.split_whitespace().count(),
            "article generated"
        );
        Ok(GeneratedContent {
            title: entry.topic.trim().to_string(),
            body,
            continued,
        })
    }

    async fn continuation(&self, body: &str) -> Result<String, RemoteError> {
        let prompt = continuation_prompt(body);
        let raw = self
            .generator
            .complete(&prompt, self.settings.max_output_tokens / 2)
            .await?;
        let more = strip_code_fences(&raw);
        if more.is_empty() {
            return Err(RemoteError::InvalidResponse("empty continuation".into()));
        }
        Ok(more)
    }
}

pub fn build_prompt(entry: &CalendarEntry, settings: &GenerationSettings) -> String {
    let details = entry
        .details
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or("Provide comprehensive coverage of the topic");
    let (min, max) = (settings.min_words, settings.max_words);
    format!(
        "You are an expert content writer for a blog in the \"{category}\" category.\n\n\
Write a comprehensive, narrative-driven blog post about: {topic}\n\n\
Additional Context: {details}\n\n\
Requirements:\n\
1. Write a detailed, informative article of {min}-{max} words.\n\
2. Use a conversational, storytelling approach with real-world scenarios and examples.\n\
3. Use clear headings and subheadings (## for main sections, ### for subsections).\n\
4. Start with a compelling hook, then explain why the topic matters to the reader.\n\
5. Include practical guidance, common mistakes to avoid, and a future outlook.\n\
6. Integrate relevant search keywords naturally into the headings and first paragraph.\n\
7. Discuss both benefits and risks honestly; avoid hype.\n\
8. Do not use emojis.\n\
9. Category: {category}\n\n\
Format the content in Markdown. Generate the COMPLETE article, ending with a conclusion \
that summarizes the key takeaways.",
        category = entry.category,
        topic = entry.topic,
    )
}

fn continuation_prompt(body: &str) -> String {
    let tail_start = body
        .char_indices()
        .rev()
        .nth(CONTINUATION_TAIL_CHARS - 1)
        .map_or(0, |(idx, _)| idx);
    format!(
        "Continue writing the blog post from where you left off. Here's what was written so far:\n\n\
{}\n\n---\n\n\
Continue naturally from the point where it was cut off and complete all remaining sections, \
including practical guidance, common mistakes, future outlook and a conclusion with key \
takeaways. Format in Markdown. Continue:",
        &body[tail_start..]
    )
}

/// Remove a Markdown code fence wrapped around the whole response.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let rest = rest
        .strip_prefix("markdown")
        .or_else(|| rest.strip_prefix("md"))
        .unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim().to_string()
}

/// Heuristic for an article cut off mid-way.
pub fn looks_truncated(body: &str) -> bool {
    let trimmed = body.trim_end();
    let ends_cleanly = trimmed.ends_with(['.', '!', '?', '"', '\'']);
    !ends_cleanly
        || trimmed.chars().count() < COMPLETE_MIN_CHARS
        || trimmed.matches("##").count() < COMPLETE_MIN_SECTIONS
}
