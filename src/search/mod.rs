//! Web search stage.
//!
//! - [`serp`]: HTTP client for the SERP API
//! - [`clean`]: condensing raw documents into organic results + knowledge graph
//!
//! [`SearchExecutor`] runs one search per agent; the raw response document is
//! the record written for that agent.

pub mod clean;
pub mod serp;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::batch::{CsvSource, TaskExecutor, TaskFailure, WorkItem};
use crate::error::{SearchError, SourceError};
use crate::realtor::{search_query, AgentRecord};

pub use clean::{condense, CleanExecutor, JsonDirSource};
pub use serp::SerpClient;

/// Anything that can answer a web search query with a JSON document.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Value, SearchError>;
}

#[async_trait]
impl SearchProvider for SerpClient {
    async fn search(&self, query: &str) -> Result<Value, SearchError> {
        SerpClient::search(self, query).await
    }
}

/// Executor issuing one search per agent.
#[derive(Clone)]
pub struct SearchExecutor {
    provider: Arc<dyn SearchProvider>,
}

impl SearchExecutor {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl TaskExecutor for SearchExecutor {
    type Payload = String;
    type Output = Value;

    fn name(&self) -> &str {
        "search"
    }

    async fn execute(&self, item: &WorkItem<String>) -> Result<Value, TaskFailure> {
        tracing::debug!(item_id = %item.id, query = %item.payload, "Searching");
        Ok(self.provider.search(&item.payload).await?)
    }
}

/// Payload builder for the search stage.
pub type QueryFn = fn(&AgentRecord) -> Result<String, SourceError>;

/// Agent CSV source whose payload is the search query.
pub fn search_source(input: &Path) -> Result<CsvSource<AgentRecord, QueryFn>, SourceError> {
    let derive: QueryFn = |record| Ok(search_query(record));
    CsvSource::open(input, derive)
}
