//! Error types for the worker.
//!
//! Two tiers: startup errors ([`ConfigError`], [`ArtifactError`],
//! [`StartupError`]) end the process before any request is served, while
//! per-request errors ([`RequestError`], [`GenerationError`]) become an
//! `{"error": ...}` line and the worker keeps serving.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Invalid or unreadable worker configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Failure while resolving, fetching or converting the model artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to fetch {model}: {reason}")]
    Fetch { model: String, reason: String },
    #[error("Invalid GGUF graph {path}: {reason}")]
    InvalidGraph { path: PathBuf, reason: String },
    #[error("Failed to write {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl ArtifactError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ArtifactError::Io { path, source }
    }
}

/// Fatal startup failure. The process exits non-zero without serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("Failed to load model from {path}: {reason}")]
    Load { path: PathBuf, reason: String },
}

/// A request line that never reaches the generation invoker.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Input line is not valid UTF-8")]
    InvalidUtf8,
    #[error("Malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("Request must be a JSON object")]
    NotAnObject,
    #[error("Missing required field 'prompt'")]
    MissingPrompt,
    #[error("Field 'prompt' must be a string")]
    PromptNotString,
}

/// Failure inside a single generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Tokenization failed: {0}")]
    Tokenize(String),
    #[error("Prompt produced no tokens")]
    EmptyPrompt,
    #[error("Generation failed: {0}")]
    Engine(String),
    #[error("Detokenization failed: {0}")]
    Detokenize(String),
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Generation panicked: {0}")]
    Panicked(String),
}
