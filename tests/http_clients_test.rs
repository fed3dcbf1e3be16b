use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use autoblogger::error::{FailureClass, RemoteError};
use autoblogger::generator::{GeminiClient, TextGenerator};
use autoblogger::images::{FormatGuard, ImageFetcher, PexelsClient, PhotoSearch};
use autoblogger::publisher::{BloggerClient, BloggerCredentials, PostDraft, Publisher};
use autoblogger::retry::RetryPolicy;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-bytes";

fn gemini(server: &MockServer) -> GeminiClient {
    GeminiClient::new(
        &format!("{}/v1beta/", server.uri()),
        "g-key".into(),
        "test-model".into(),
        0.7,
    )
    .unwrap()
}

#[tokio::test]
async fn gemini_returns_candidate_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/test-model:generateContent"))
        .and(header("x-goog-api-key", "g-key"))
        .and(body_partial_json(json!({"generationConfig": {"maxOutputTokens": 512}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "## Hello\n\n"}, {"text": "World."}]},
                "finishReason": "STOP"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = gemini(&server).complete("write", 512).await.unwrap();
    assert_eq!(text, "## Hello\n\nWorld.");
}

#[tokio::test]
async fn gemini_maps_status_and_blocked_prompts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [],
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .mount(&server)
        .await;

    let client = gemini(&server);
    let err = client.complete("write", 100).await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    let err = client.complete("write", 100).await.unwrap_err();
    assert!(matches!(err, RemoteError::InvalidResponse(msg) if msg.contains("SAFETY")));
}

fn pexels(server: &MockServer) -> PexelsClient {
    PexelsClient::new(&format!("{}/v1/", server.uri()), "px-key".into()).unwrap()
}

fn photo_page(server: &MockServer, author: &str) -> serde_json::Value {
    json!({
        "photos": [{
            "url": format!("https://www.pexels.com/photo/{author}"),
            "photographer": author,
            "photographer_url": format!("https://www.pexels.com/@{author}"),
            "src": {"large": format!("{}/img/{author}.png", server.uri()), "original": "ignored"}
        }]
    })
}

#[tokio::test]
async fn pexels_search_sends_key_and_parses_hits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("query", "crypto wallets"))
        .and(query_param("per_page", "1"))
        .and(header("Authorization", "px-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(photo_page(&server, "jane")))
        .mount(&server)
        .await;

    let hits = pexels(&server).search("crypto wallets").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].author, "jane");
    assert_eq!(hits[0].page_url, "https://www.pexels.com/photo/jane");
    assert!(hits[0].image_url.ends_with("/img/jane.png"));
}

#[tokio::test]
async fn image_fetcher_retries_then_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("query", "Obscure Topic"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("query", "blockchain"))
        .respond_with(ResponseTemplate::new(200).set_body_json(photo_page(&server, "ana")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/ana.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG))
        .mount(&server)
        .await;

    let fetcher = ImageFetcher::new(
        Arc::new(pexels(&server)),
        Arc::new(FormatGuard { max_bytes: 1024 }),
        RetryPolicy::fixed(2, 0),
    );
    let asset = fetcher
        .fetch("Obscure Topic", &["blockchain".into()])
        .await
        .unwrap();
    assert_eq!(asset.author, "ana");
    assert_eq!(asset.query, "blockchain");
    assert_eq!(asset.bytes, PNG);
}

#[tokio::test]
async fn image_fetcher_rejects_non_image_payloads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(photo_page(&server, "bob")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/bob.png"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not an image</html>"))
        .mount(&server)
        .await;

    let fetcher = ImageFetcher::new(
        Arc::new(pexels(&server)),
        Arc::new(FormatGuard { max_bytes: 1024 }),
        RetryPolicy::fixed(1, 0),
    );
    assert!(fetcher.fetch("anything", &[]).await.is_none());
}

fn blogger(server: &MockServer) -> BloggerClient {
    BloggerClient::new(
        &format!("{}/blogger/v3/", server.uri()),
        &format!("{}/token", server.uri()),
        "777".into(),
        BloggerCredentials {
            client_id: "cid".into(),
            client_secret: "csecret".into(),
            refresh_token: "rtok".into(),
        },
    )
    .unwrap()
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rtok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .mount(server)
        .await;
}

fn draft() -> PostDraft {
    PostDraft::new("Wallets 101", "<div><p>Body</p></div>", &["Tools & Tutorials".into()])
}

#[tokio::test]
async fn blogger_publishes_with_refreshed_token() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/blogger/v3/blogs/777/posts"))
        .and(header("Authorization", "Bearer at-1"))
        .and(body_partial_json(json!({
            "kind": "blogger#post",
            "title": "Wallets 101",
            "labels": ["Tools & Tutorials"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "blogger#post",
            "id": "9001",
            "url": "https://example.blogspot.com/2026/10/wallets-101.html"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let publisher = Publisher::new(Arc::new(blogger(&server)), RetryPolicy::fixed(3, 0));
    let result = publisher.publish(&draft()).await.unwrap();
    assert_eq!(result.post_id, "9001");
    assert_eq!(result.status, 200);
    assert!(result.url.ends_with("wallets-101.html"));
}

#[tokio::test]
async fn blogger_client_error_is_single_attempt() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/blogger/v3/blogs/777/posts"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Blog not found"))
        .expect(1)
        .mount(&server)
        .await;

    let publisher = Publisher::new(Arc::new(blogger(&server)), RetryPolicy::fixed(3, 0));
    let err = publisher.publish(&draft()).await.unwrap_err();
    assert_eq!(err.class, FailureClass::Permanent);
    assert_eq!(err.attempts, Some(1));
    assert!(err.message.contains("Blog not found"));
}

#[tokio::test]
async fn blogger_server_errors_use_full_budget() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/blogger/v3/blogs/777/posts"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let publisher = Publisher::new(Arc::new(blogger(&server)), RetryPolicy::fixed(3, 0));
    let err = publisher.publish(&draft()).await.unwrap_err();
    assert_eq!(err.class, FailureClass::TransientExhausted);
    assert_eq!(err.attempts, Some(3));
}

#[tokio::test]
async fn rejected_refresh_token_never_reaches_posts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/blogger/v3/blogs/777/posts"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let publisher = Publisher::new(Arc::new(blogger(&server)), RetryPolicy::fixed(3, 0));
    let err = publisher.publish(&draft()).await.unwrap_err();
    assert_eq!(err.class, FailureClass::Permanent);
    assert!(err.message.contains("invalid_grant"));
    assert!(!err.message.contains("rtok"));
}
