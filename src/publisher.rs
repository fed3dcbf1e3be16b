//! Publishing: the Blogger collaborator (OAuth refresh + post insert) and its retrying adapter.
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{FailureClass, RemoteError, RunError, Stage};
use crate::model::PublishResult;
use crate::retry::{self, Disposition, RetryOutcome, RetryPolicy};

/// Post ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub html: String,
    pub labels: Vec<String>,
}

impl PostDraft {
    /// Labels are trimmed and deduplicated, keeping first-seen order.
    pub fn new(title: impl Into<String>, html: impl Into<String>, labels: &[String]) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for label in labels.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            if !unique.iter().any(|u| u == label) {
                unique.push(label.to_string());
            }
        }
        Self {
            title: title.into(),
            html: html.into(),
            labels: unique,
        }
    }
}

/// Blog-publishing collaborator.
#[async_trait]
pub trait BlogPublisher: Send + Sync {
    async fn publish(&self, draft: &PostDraft) -> Result<PublishResult, RemoteError>;
}

#[derive(Clone)]
pub struct BloggerCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct BloggerClient {
    http: Client,
    api_base: Url,
    token_uri: Url,
    blog_id: String,
    credentials: BloggerCredentials,
}

impl fmt::Debug for BloggerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BloggerClient")
            .field("api_base", &self.api_base)
            .field("blog_id", &self.blog_id)
            .finish_non_exhaustive()
    }
}

impl BloggerClient {
    pub fn new(
        api_base: &str,
        token_uri: &str,
        blog_id: String,
        credentials: BloggerCredentials,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent("autoblogger/0.1")
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_base: Url::parse(api_base)?,
            token_uri: Url::parse(token_uri)?,
            blog_id,
            credentials,
        })
    }

    /// Exchange the refresh token for a short-lived access token.
    pub async fn access_token(&self) -> Result<String, RemoteError> {
        let res = self
            .http
            .post(self.token_uri.clone())
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let status = res.status();
        if status.is_client_error() {
            let body = res.text().await.unwrap_or_default();
            return Err(RemoteError::Auth(format!(
                "token refresh rejected with HTTP {}: {}",
                status.as_u16(),
                crate::error::truncate(&body, 300)
            )));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), &body));
        }
        let token: TokenResponse = res
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("token response: {e}")))?;
        Ok(token.access_token)
    }

    pub fn build_post_request(&self, access_token: &str, draft: &PostDraft) -> anyhow::Result<reqwest::Request> {
        let endpoint = self
            .api_base
            .join(&format!("blogs/{}/posts", self.blog_id))?;
        Ok(self
            .http
            .post(endpoint)
            .bearer_auth(access_token)
            .json(&build_post_body(draft))
            .build()?)
    }
}

pub fn build_post_body(draft: &PostDraft) -> Value {
    json!({
        "kind": "blogger#post",
        "title": draft.title,
        "content": draft.html,
        "labels": draft.labels,
    })
}

#[async_trait]
impl BlogPublisher for BloggerClient {
    async fn publish(&self, draft: &PostDraft) -> Result<PublishResult, RemoteError> {
        let token = self.access_token().await?;
        let request = self
            .build_post_request(&token, draft)
            .map_err(|e| RemoteError::InvalidResponse(format!("failed to build request: {e}")))?;
        debug!(url = %request.url(), title = %draft.title, "sending publish request");
        let res = self.http.execute(request).await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), &body));
        }
        let created: CreatedPost = res
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("post created but response unreadable: {e}")))?;
        Ok(PublishResult {
            post_id: created.id,
            url: created.url.unwrap_or_default(),
            status: status.as_u16(),
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct CreatedPost {
    id: String,
    url: Option<String>,
}

/// Client-class statuses are permanent; server-class statuses and network failures are
/// transient. Rejected credentials and unreadable success responses are never retried,
/// the latter because the post may already exist.
pub fn classify(err: &RemoteError) -> Disposition {
    match err {
        RemoteError::Status { status, .. } if (500..=599).contains(status) => Disposition::Transient,
        RemoteError::Status { .. } => Disposition::Permanent,
        RemoteError::Network(_) => Disposition::Transient,
        RemoteError::Auth(_) | RemoteError::InvalidResponse(_) => Disposition::Permanent,
    }
}

pub struct Publisher {
    client: Arc<dyn BlogPublisher>,
    policy: RetryPolicy,
}

impl Publisher {
    pub fn new(client: Arc<dyn BlogPublisher>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub async fn publish(&self, draft: &PostDraft) -> Result<PublishResult, RunError> {
        info!(title = %draft.title, labels = ?draft.labels, "publishing post");
        let client = &self.client;
        let outcome = retry::execute(&self.policy, "publish", classify, |_attempt| async move {
            let result = client.publish(draft).await?;
            if !(200..=299).contains(&result.status) {
                return Err(RemoteError::from_status(result.status, "publish returned a non-success status"));
            }
            Ok(result)
        })
        .await;

        match outcome {
            RetryOutcome::Success { value, .. } => {
                info!(post_id = %value.post_id, url = %value.url, "post published");
                Ok(value)
            }
            RetryOutcome::Permanent { error, attempts } => Err(RunError::new(
                Stage::Publish,
                FailureClass::Permanent,
                error.to_string(),
            )
            .with_attempts(attempts)),
            RetryOutcome::Exhausted { error, attempts } => Err(RunError::new(
                Stage::Publish,
                FailureClass::TransientExhausted,
                error.to_string(),
            )
            .with_attempts(attempts)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> BloggerClient {
        BloggerClient::new(
            "https://www.googleapis.com/blogger/v3/",
            "https://oauth2.googleapis.com/token",
            "42".into(),
            BloggerCredentials {
                client_id: "cid".into(),
                client_secret: "secret".into(),
                refresh_token: "refresh".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn labels_are_deduplicated() {
        let draft = PostDraft::new(
            "t",
            "<p>x</p>",
            &["News".into(), " News ".into(), "".into(), "Tools".into()],
        );
        assert_eq!(draft.labels, vec!["News", "Tools"]);
    }

    #[test]
    fn post_body_shape() {
        let draft = PostDraft::new("Title", "<p>x</p>", &["News".into()]);
        let body = build_post_body(&draft);
        assert_eq!(body["kind"], "blogger#post");
        assert_eq!(body["title"], "Title");
        assert_eq!(body["content"], "<p>x</p>");
        assert_eq!(body["labels"][0], "News");
    }

    #[test]
    fn post_request_targets_blog_and_sets_bearer() {
        let draft = PostDraft::new("Title", "<p>x</p>", &[]);
        let request = client().build_post_request("tok", &draft).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/blogger/v3/blogs/42/posts");
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer tok"
        );
    }

    #[test]
    fn classification() {
        let status = |s| RemoteError::Status {
            status: s,
            body: String::new(),
        };
        assert_eq!(classify(&status(400)), Disposition::Permanent);
        assert_eq!(classify(&status(404)), Disposition::Permanent);
        assert_eq!(classify(&status(429)), Disposition::Permanent);
        assert_eq!(classify(&status(500)), Disposition::Transient);
        assert_eq!(classify(&status(503)), Disposition::Transient);
        assert_eq!(classify(&RemoteError::Network("timeout".into())), Disposition::Transient);
        assert_eq!(classify(&RemoteError::Auth("bad".into())), Disposition::Permanent);
    }

    #[test]
    fn debug_hides_credentials() {
        let dump = format!("{:?}", client());
        assert!(!dump.contains("secret"));
        assert!(!dump.contains("refresh"));
    }
}
