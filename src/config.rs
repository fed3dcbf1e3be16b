//! Configuration loader and validator for the blog publishing job.
//!
//! Non-secret settings come from a YAML file. Credentials may also live there (under
//! `secrets:`), but the environment always wins: `GEMINI_API_KEY`, `PEXELS_API_KEY`,
//! `BLOGGER_CLIENT_ID`, `BLOGGER_CLIENT_SECRET`, `BLOGGER_REFRESH_TOKEN`, `BLOG_ID`.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Missing required secrets: {}", .0.join(", "))]
    MissingSecrets(Vec<&'static str>),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    /// Label rotation for calendar entries without an explicit category.
    #[serde(default)]
    pub categories: Vec<String>,
    pub generation: Generation,
    #[serde(default)]
    pub images: Images,
    pub blogger: Blogger,
    #[serde(default)]
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub calendar_file: String,
    #[serde(default)]
    pub progress: Progress,
    /// When set, fetched images are saved here as `day-<N>.<ext>`.
    #[serde(default)]
    pub image_dir: Option<String>,
    /// Public URL prefix under which `image_dir` is served.
    #[serde(default)]
    pub public_image_base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressBackend {
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    #[serde(default)]
    pub backend: ProgressBackend,
    /// File path or SQLite URL; defaults under `app.data_dir`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Generation {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub min_chars: usize,
    pub min_words: u32,
    pub max_words: u32,
    #[serde(default)]
    pub continue_truncated: bool,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Images {
    pub enabled: bool,
    pub endpoint: String,
    #[serde(default)]
    pub fallback_queries: Vec<String>,
    pub max_bytes: usize,
    pub retry: RetryPolicy,
}

impl Default for Images {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.pexels.com/v1/".into(),
            fallback_queries: Vec::new(),
            max_bytes: 5 * 1024 * 1024,
            retry: RetryPolicy::fixed(2, 3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Blogger {
    pub api_base: String,
    pub token_uri: String,
    #[serde(default)]
    pub blog_id: String,
    pub retry: RetryPolicy,
}

#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Secrets {
    #[serde(default)]
    pub gemini_api_key: String,
    #[serde(default)]
    pub pexels_api_key: Option<String>,
    #[serde(default)]
    pub blogger_client_id: String,
    #[serde(default)]
    pub blogger_client_secret: String,
    #[serde(default)]
    pub blogger_refresh_token: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |s: &str| if s.is_empty() { "<unset>" } else { "<set>" };
        f.debug_struct("Secrets")
            .field("gemini_api_key", &set(&self.gemini_api_key))
            .field(
                "pexels_api_key",
                &set(self.pexels_api_key.as_deref().unwrap_or_default()),
            )
            .field("blogger_client_id", &set(&self.blogger_client_id))
            .field("blogger_client_secret", &set(&self.blogger_client_secret))
            .field("blogger_refresh_token", &set(&self.blogger_refresh_token))
            .finish()
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` and `app.image_dir`).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if !self.app.data_dir.trim().is_empty() {
            fs::create_dir_all(&self.app.data_dir)?;
        }
        if let Some(dir) = self.image_dir() {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn calendar_path(&self) -> PathBuf {
        Path::new(&self.app.calendar_file).to_path_buf()
    }

    pub fn image_dir(&self) -> Option<PathBuf> {
        self.app
            .image_dir
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
    }

    pub fn public_image_base_url(&self) -> Option<String> {
        self.app
            .public_image_base_url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .map(str::to_string)
    }

    /// File path or database URL for the progress store.
    pub fn progress_location(&self) -> String {
        if let Some(path) = self.app.progress.path.as_deref().filter(|p| !p.trim().is_empty()) {
            return path.to_string();
        }
        let data_dir = self.app.data_dir.trim_end_matches('/');
        match self.app.progress.backend {
            ProgressBackend::File => format!("{data_dir}/status.json"),
            ProgressBackend::Sqlite => format!("sqlite://{data_dir}/progress.db"),
        }
    }

    /// Image search runs only when enabled and a key is available.
    pub fn images_active(&self) -> bool {
        self.images.enabled
            && self
                .secrets
                .pexels_api_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty())
    }

    /// Overlay credentials from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("GEMINI_API_KEY") {
            self.secrets.gemini_api_key = v;
        }
        if let Some(v) = get("PEXELS_API_KEY") {
            self.secrets.pexels_api_key = Some(v);
        }
        if let Some(v) = get("BLOGGER_CLIENT_ID") {
            self.secrets.blogger_client_id = v;
        }
        if let Some(v) = get("BLOGGER_CLIENT_SECRET") {
            self.secrets.blogger_client_secret = v;
        }
        if let Some(v) = get("BLOGGER_REFRESH_TOKEN") {
            self.secrets.blogger_refresh_token = v;
        }
        if let Some(v) = get("BLOG_ID") {
            self.blogger.blog_id = v;
        }
    }
}

/// Load configuration from a YAML file, overlay the environment and validate.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.calendar_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.calendar_file must be non-empty"));
    }
    if cfg.categories.iter().any(|c| c.trim().is_empty()) {
        return Err(ConfigError::Invalid("categories must not contain blank labels"));
    }

    let g = &cfg.generation;
    if g.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid("generation.endpoint must be non-empty"));
    }
    if g.model.trim().is_empty() {
        return Err(ConfigError::Invalid("generation.model must be non-empty"));
    }
    if g.min_chars == 0 {
        return Err(ConfigError::Invalid("generation.min_chars must be > 0"));
    }
    if g.min_words == 0 || g.min_words > g.max_words {
        return Err(ConfigError::Invalid(
            "generation.min_words must be > 0 and <= generation.max_words",
        ));
    }
    if g.retry.attempts == 0 {
        return Err(ConfigError::Invalid("generation.retry.attempts must be > 0"));
    }

    if cfg.images.enabled {
        if cfg.images.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("images.endpoint must be non-empty"));
        }
        if cfg.images.retry.attempts == 0 {
            return Err(ConfigError::Invalid("images.retry.attempts must be > 0"));
        }
    }
    if cfg.public_image_base_url().is_some() && cfg.image_dir().is_none() {
        return Err(ConfigError::Invalid(
            "app.public_image_base_url requires app.image_dir",
        ));
    }

    if cfg.blogger.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("blogger.api_base must be non-empty"));
    }
    if cfg.blogger.token_uri.trim().is_empty() {
        return Err(ConfigError::Invalid("blogger.token_uri must be non-empty"));
    }
    if cfg.blogger.retry.attempts == 0 {
        return Err(ConfigError::Invalid("blogger.retry.attempts must be > 0"));
    }

    let mut missing = Vec::new();
    let s = &cfg.secrets;
    if s.gemini_api_key.trim().is_empty() {
        missing.push("GEMINI_API_KEY");
    }
    if s.blogger_client_id.trim().is_empty() {
        missing.push("BLOGGER_CLIENT_ID");
    }
    if s.blogger_client_secret.trim().is_empty() {
        missing.push("BLOGGER_CLIENT_SECRET");
    }
    if s.blogger_refresh_token.trim().is_empty() {
        missing.push("BLOGGER_REFRESH_TOKEN");
    }
    if cfg.blogger.blog_id.trim().is_empty() {
        missing.push("BLOG_ID");
    }
    if !missing.is_empty() {
        return Err(ConfigError::MissingSecrets(missing));
    }

    Ok(())
}

/// Returns the documented example YAML.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  calendar_file: "topics.txt"
  progress:
    backend: file          # file | sqlite
    # path: "./data/status.json"
  image_dir: "./images"
  public_image_base_url: ""

categories:
  - "Beginner Guide"
  - "Crypto Investment"
  - "News and Updates"
  - "Tools & Tutorials"
  - "Crypto Airdrops"
  - "Blockchain Technology"

generation:
  endpoint: "https://generativelanguage.googleapis.com/v1beta/"
  model: "gemini-2.5-flash"
  temperature: 0.75
  max_output_tokens: 8192
  min_chars: 100
  min_words: 900
  max_words: 1000
  continue_truncated: true
  retry:
    attempts: 3
    delay_secs: 5

images:
  enabled: true
  endpoint: "https://api.pexels.com/v1/"
  fallback_queries:
    - "cryptocurrency"
    - "blockchain"
  max_bytes: 5242880
  retry:
    attempts: 2
    delay_secs: 3

blogger:
  api_base: "https://www.googleapis.com/blogger/v3/"
  token_uri: "https://oauth2.googleapis.com/token"
  blog_id: ""
  retry:
    attempts: 3
    delay_secs: 10

# Prefer environment variables for these.
secrets:
  gemini_api_key: ""
  blogger_client_id: ""
  blogger_client_secret: ""
  blogger_refresh_token: ""
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn with_secrets(mut cfg: Config) -> Config {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GEMINI_API_KEY", "g-key"),
            ("BLOGGER_CLIENT_ID", "cid"),
            ("BLOGGER_CLIENT_SECRET", "csecret"),
            ("BLOGGER_REFRESH_TOKEN", "rtok-123"),
            ("BLOG_ID", "1234"),
        ]);
        cfg.apply_env_from(|k| env.get(k).map(|v| v.to_string()));
        cfg
    }

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = with_secrets(example_cfg());
        validate(&cfg).unwrap();
        assert_eq!(cfg.generation.retry, RetryPolicy::fixed(3, 5));
        assert_eq!(cfg.blogger.retry, RetryPolicy::fixed(3, 10));
        assert_eq!(cfg.categories.len(), 6);
    }

    #[test]
    fn missing_secrets_are_reported_together() {
        let err = validate(&example_cfg()).unwrap_err();
        match err {
            ConfigError::MissingSecrets(names) => {
                assert_eq!(
                    names,
                    vec![
                        "GEMINI_API_KEY",
                        "BLOGGER_CLIENT_ID",
                        "BLOGGER_CLIENT_SECRET",
                        "BLOGGER_REFRESH_TOKEN",
                        "BLOG_ID"
                    ]
                );
            }
            other => panic!("wrong error: {other}"),
        }
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = example_cfg();
        cfg.secrets.gemini_api_key = "from-file".into();
        cfg.apply_env_from(|k| (k == "GEMINI_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(cfg.secrets.gemini_api_key, "from-env");
        cfg.apply_env_from(|k| (k == "GEMINI_API_KEY").then(|| "  ".to_string()));
        assert_eq!(cfg.secrets.gemini_api_key, "from-env");
    }

    #[test]
    fn images_need_a_key_to_be_active() {
        let mut cfg = with_secrets(example_cfg());
        assert!(!cfg.images_active());
        cfg.apply_env_from(|k| (k == "PEXELS_API_KEY").then(|| "px".to_string()));
        assert!(cfg.images_active());
        cfg.images.enabled = false;
        assert!(!cfg.images_active());
    }

    #[test]
    fn invalid_word_range() {
        let mut cfg = with_secrets(example_cfg());
        cfg.generation.min_words = 1200;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("min_words")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn public_url_requires_image_dir() {
        let mut cfg = with_secrets(example_cfg());
        cfg.app.image_dir = None;
        cfg.app.public_image_base_url = Some("https://cdn.example/images/".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn progress_location_defaults_under_data_dir() {
        let mut cfg = example_cfg();
        assert_eq!(cfg.progress_location(), "./data/status.json");
        cfg.app.progress.backend = ProgressBackend::Sqlite;
        assert_eq!(cfg.progress_location(), "sqlite://./data/progress.db");
        cfg.app.progress.path = Some("/var/lib/blog/status.json".into());
        assert_eq!(cfg.progress_location(), "/var/lib/blog/status.json");
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = with_secrets(example_cfg());
        let dump = format!("{:?}", cfg.secrets);
        assert!(!dump.contains("rtok-123"));
        assert!(dump.contains("<set>"));
    }

    #[test]
    fn ensure_dirs_creates_data_and_image_dirs() {
        let td = tempdir().unwrap();
        let mut cfg = example_cfg();
        cfg.app.data_dir = td.path().join("data").to_string_lossy().to_string();
        cfg.app.image_dir = Some(td.path().join("images").to_string_lossy().to_string());
        cfg.ensure_dirs().unwrap();
        assert!(td.path().join("data").exists());
        assert!(td.path().join("images").exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        let mut cfg = with_secrets(example_cfg());
        cfg.images.enabled = false;
        fs::write(&p, serde_yaml::to_string(&cfg).unwrap()).unwrap();
        let loaded = load(Some(&p)).unwrap();
        assert_eq!(loaded.blogger.blog_id, "1234");
        assert!(!loaded.images.enabled);
    }
}
