//! Error types for agent-harvest operations.
//!
//! Defines the error types of every subsystem:
//! - Input enumeration (CSV sources, raw result directories)
//! - Output persistence (the JSON record sink)
//! - Batch configuration
//! - Search API and LLM API interactions

use thiserror::Error;

/// Errors raised while enumerating work items from an input collection.
///
/// Only the open/listing variants are fatal; record-level variants are
/// reported per record and enumeration continues.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Record at {origin} has no usable identifier")]
    MissingIdentifier { origin: String },

    #[error("File '{file}' has no '{column}' column")]
    MissingIdColumn { file: String, column: String },

    #[error("Duplicate identifier '{id}' at {origin}")]
    DuplicateIdentifier { id: String, origin: String },

    #[error("Required input for '{id}' not found: {path}")]
    MissingInput { id: String, path: String },

    #[error("Input location does not exist: {0}")]
    InputNotFound(String),

    #[error("Malformed record at {origin}: {message}")]
    Malformed { origin: String, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Where the rejected record came from, for reports.
    pub fn origin(&self) -> String {
        match self {
            SourceError::MissingIdentifier { origin }
            | SourceError::DuplicateIdentifier { origin, .. }
            | SourceError::Malformed { origin, .. } => origin.clone(),
            SourceError::MissingIdColumn { file, .. } => file.clone(),
            SourceError::MissingInput { id, .. } => id.clone(),
            SourceError::InputNotFound(path) => path.clone(),
            SourceError::Csv(_) | SourceError::Io(_) => "input".to_string(),
        }
    }
}

/// Errors raised by the result sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Identifier '{0}' cannot be used as a record name")]
    InvalidIdentifier(String),

    #[error("Output location is not a directory: {0}")]
    NotADirectory(String),

    #[error("Failed to persist record '{id}': {source}")]
    Persist {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a batch before any work is scheduled.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Input location does not exist: {0}")]
    MissingInput(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when calling the search API.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search request timed out: {0}")]
    Timeout(String),

    #[error("Search request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited by search API: {0}")]
    RateLimited(String),

    #[error("Search API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to parse search response: {0}")]
    ParseError(String),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request timed out: {0}")]
    Timeout(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Model refused to respond: {0}")]
    Refusal(String),

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}
