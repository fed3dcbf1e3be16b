//! Error taxonomy shared by the collaborator clients, the adapters and the run orchestrator.
use std::fmt;
use thiserror::Error;

/// Failure reported by a remote collaborator, before any retry classification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("unusable response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Build a `Status` error, keeping only the head of large response bodies.
    pub fn from_status(status: u16, body: &str) -> Self {
        RemoteError::Status {
            status,
            body: truncate(body, 500),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => RemoteError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => RemoteError::Network(err.to_string()),
        }
    }
}

/// Component of the run a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Calendar,
    Generation,
    Image,
    Markup,
    Publish,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "configuration",
            Stage::Calendar => "calendar reader",
            Stage::Generation => "content generator",
            Stage::Image => "image fetch",
            Stage::Markup => "markup conversion",
            Stage::Publish => "publisher",
            Stage::Commit => "progress store",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Missing credentials, empty or malformed calendar.
    Configuration,
    /// Blank topic, content under the minimum length, malformed markup input.
    Validation,
    /// Client-class status or rejected credentials; never retried.
    Permanent,
    /// Transient failures that used up the component's attempt budget.
    TransientExhausted,
    /// Durable progress write failed.
    Storage,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureClass::Configuration => "configuration",
            FailureClass::Validation => "validation",
            FailureClass::Permanent => "permanent",
            FailureClass::TransientExhausted => "transient-exhausted",
            FailureClass::Storage => "storage",
        };
        f.write_str(name)
    }
}

/// Terminal failure of a run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{stage} failed ({class}): {message}")]
pub struct RunError {
    pub stage: Stage,
    pub class: FailureClass,
    pub message: String,
    pub attempts: Option<u32>,
}

impl RunError {
    pub fn new(stage: Stage, class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            stage,
            class,
            message: message.into(),
            attempts: None,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn hint(&self) -> &'static str {
        match (self.class, self.stage) {
            (FailureClass::Configuration, _) => {
                "fix the configuration or calendar file before the next run"
            }
            (FailureClass::Permanent, _) => {
                "check credentials, blog id and request configuration; retrying will not help"
            }
            (FailureClass::TransientExhausted, _) | (FailureClass::Validation, _) => {
                "progress was not advanced; the same day will be retried on the next scheduled run"
            }
            (FailureClass::Storage, Stage::Commit) => {
                "the post is already live but the cursor was not saved; the next run may publish a duplicate"
            }
            (FailureClass::Storage, _) => "check permissions on the data directory",
        }
    }

    /// One-line human readable report for the process exit path.
    pub fn diagnostic(&self) -> String {
        match self.attempts {
            Some(n) => format!("{self} after {n} attempt(s); {}", self.hint()),
            None => format!("{self}; {}", self.hint()),
        }
    }
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
