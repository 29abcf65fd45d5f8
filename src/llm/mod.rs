//! Language-model integration.
//!
//! [`ChatClient`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint through the [`LlmProvider`] trait; [`ExtractionExecutor`] turns
//! condensed search results into an [`AgentContact`](crate::realtor::AgentContact).

pub mod client;
pub mod extract;

pub use client::{
    ChatClient, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
    DEFAULT_MODEL, OPENAI_BASE_URL,
};
pub use extract::{extraction_source, parse_contact, ExtractionExecutor, ExtractionRequest};
