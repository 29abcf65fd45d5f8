//! agent-harvest: resumable search and contact extraction for real-estate
//! agent listings.
//!
//! The [`batch`] module is the engine every stage runs on: a work item source
//! filtered by a completion index, a bounded concurrent scheduler, retry with
//! backoff around a [`batch::TaskExecutor`], and an atomic one-file-per-item
//! result sink.

// Core modules
pub mod batch;
pub mod cli;
pub mod error;
pub mod llm;
pub mod realtor;
pub mod search;
pub mod utils;

// Re-export commonly used error types
pub use error::{ConfigError, LlmError, SearchError, SinkError, SourceError};
