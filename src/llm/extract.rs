//! Contact extraction stage: condensed search results + agent description in,
//! [`AgentContact`] out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::client::{GenerationRequest, LlmProvider, Message};
use crate::batch::sink::RECORD_EXTENSION;
use crate::batch::{
    normalize_identifier, CsvSource, Identified, TaskExecutor, TaskFailure, WorkItem,
    WorkItemSource,
};
use crate::error::{LlmError, SourceError};
use crate::realtor::contact::CONTACT_FIELDS;
use crate::realtor::{extraction_query, AgentContact, AgentRecord};
use crate::utils::extract_json_object;

const SYSTEM_PROMPT: &str = "You are an expert at finding information about real estate agents. \
Use only the Google search data you are given and extract a field only when the data states it \
explicitly. Answer with a single JSON object with these fields (use null or omit what is unknown):";

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Payload of one extraction item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    /// Free-text description of the agent.
    pub query: String,
    /// Condensed search results for the agent.
    pub results_path: PathBuf,
}

/// Agent CSV source for the extraction stage.
///
/// Agents without a search results file in `results_dir` are rejected with
/// `SourceError::MissingInput` and reported, not failed.
pub fn extraction_source(
    input: &Path,
    results_dir: &Path,
    state: Option<String>,
) -> Result<impl WorkItemSource<Payload = ExtractionRequest>, SourceError> {
    let results_dir = results_dir.to_path_buf();
    CsvSource::open(input, move |record: &AgentRecord| {
        let id = normalize_identifier(record.identifier()).ok_or_else(|| {
            SourceError::MissingIdentifier {
                origin: "agent record".to_string(),
            }
        })?;
        let results_path = results_dir.join(format!("{}.{}", id, RECORD_EXTENSION));
        if !results_path.is_file() {
            return Err(SourceError::MissingInput {
                id,
                path: results_path.display().to_string(),
            });
        }
        Ok(ExtractionRequest {
            query: extraction_query(record, state.as_deref()),
            results_path,
        })
    })
}

/// Executor asking the language model for an agent's contact details.
pub struct ExtractionExecutor {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
}

impl ExtractionExecutor {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(&self, query: &str, results: &str) -> GenerationRequest {
        let system = format!("{}\n{}", SYSTEM_PROMPT, CONTACT_FIELDS);
        let user = format!(
            "Searching Google for the real estate agent \"{}\" returned these results:\n{}\n\
             Extract the relevant information as valid JSON:",
            query, results
        );
        GenerationRequest::new(self.model.clone(), vec![Message::system(system), Message::user(user)])
            .with_temperature(0.0)
            .with_max_tokens(self.max_tokens)
            .with_json_mode()
    }
}

/// Parses the model's answer into a contact record.
pub fn parse_contact(content: &str) -> Result<AgentContact, LlmError> {
    let json = extract_json_object(content).map_err(|e| LlmError::ParseError(e.to_string()))?;
    serde_json::from_str(&json)
        .map_err(|e| LlmError::ParseError(format!("answer does not match the contact schema: {}", e)))
}

#[async_trait]
impl TaskExecutor for ExtractionExecutor {
    type Payload = ExtractionRequest;
    type Output = AgentContact;

    fn name(&self) -> &str {
        "extract"
    }

    async fn execute(&self, item: &WorkItem<ExtractionRequest>) -> Result<AgentContact, TaskFailure> {
        let results = tokio::fs::read_to_string(&item.payload.results_path)
            .await
            .map_err(|e| {
                TaskFailure::io(format!(
                    "failed to read {}: {}",
                    item.payload.results_path.display(),
                    e
                ))
            })?;

        let request = self.build_request(&item.payload.query, results.trim());
        let response = self.provider.generate(request).await?;

        if let Some(refusal) = response.refusal.filter(|r| !r.trim().is_empty()) {
            return Err(LlmError::Refusal(refusal).into());
        }
        let content = response
            .content
            .ok_or_else(|| LlmError::ParseError("response has no content".to_string()))?;

        let contact = parse_contact(&content)?;
        tracing::debug!(
            item_id = %item.id,
            tokens = response.usage.total_tokens,
            has_email = contact.email.is_some(),
            "Extracted contact"
        );
        Ok(contact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::FailureKind;
    use crate::llm::client::{GenerationResponse, Usage};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Scripted {
        content: Option<String>,
        refusal: Option<String>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl Scripted {
        fn answering(content: &str) -> Self {
            Self {
                content: Some(content.to_string()),
                refusal: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.seen.lock().unwrap().push(request);
            Ok(GenerationResponse {
                id: "r1".to_string(),
                model: "test".to_string(),
                content: self.content.clone(),
                refusal: self.refusal.clone(),
                finish_reason: Some("stop".to_string()),
                usage: Usage::default(),
            })
        }
    }

    fn item(dir: &Path) -> WorkItem<ExtractionRequest> {
        let results_path = dir.join("a1.json");
        fs::write(&results_path, r#"[{"type": "organic", "snippet": "jane@prairie.example"}]"#).unwrap();
        WorkItem::new(
            "a1",
            ExtractionRequest {
                query: "Jane Roe Fargo North Dakota real estate".to_string(),
                results_path,
            },
        )
    }

    #[tokio::test]
    async fn test_extracts_contact() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(Scripted::answering(
            r#"{"email": "jane@prairie.example", "city": "Fargo"}"#,
        ));
        let executor = ExtractionExecutor::new(provider.clone(), "gpt-4o");

        let contact = executor.execute(&item(dir.path())).await.unwrap();
        assert_eq!(contact.email.as_deref(), Some("jane@prairie.example"));
        assert_eq!(contact.city.as_deref(), Some("Fargo"));

        let seen = provider.seen.lock().unwrap();
        let request = &seen[0];
        assert!(request.json_mode);
        assert_eq!(request.temperature, Some(0.0));
        assert!(request.messages[1].content.contains("Jane Roe Fargo"));
        assert!(request.messages[1].content.contains("jane@prairie.example"));
    }

    #[tokio::test]
    async fn test_refusal_is_permanent() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(Scripted {
            content: None,
            refusal: Some("I can't help with that".to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let executor = ExtractionExecutor::new(provider, "gpt-4o");

        let failure = executor.execute(&item(dir.path())).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Permanent);
        assert!(failure.message.contains("refused"));
    }

    #[tokio::test]
    async fn test_unparseable_answer_is_permanent() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(Scripted::answering("Sorry, nothing found."));
        let executor = ExtractionExecutor::new(provider, "gpt-4o");

        let failure = executor.execute(&item(dir.path())).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Permanent);
    }

    #[test]
    fn test_parse_contact_wrong_types() {
        assert!(parse_contact(r#"{"age": "forty"}"#).is_err());
        assert!(parse_contact(r#"```json
{"age": 40}
```"#)
        .is_ok());
    }

    #[test]
    fn test_extraction_source_requires_search_results() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("agents");
        let results = dir.path().join("clean");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&results).unwrap();
        fs::write(
            input.join("58102.csv"),
            "id,Name,Company,City,County\na1,Jane Roe,,Fargo,Cass\na2,John Doe,,Fargo,Cass\n",
        )
        .unwrap();
        fs::write(results.join("a1.json"), "[]").unwrap();

        let source = extraction_source(&input, &results, Some("North Dakota".to_string())).unwrap();
        let entries: Vec<_> = source.enumerate().collect();
        assert_eq!(entries.len(), 2);

        let first = entries[0].as_ref().unwrap();
        assert_eq!(first.id, "a1");
        assert_eq!(first.payload.query, "Jane Roe Fargo Cass North Dakota real estate");
        assert!(matches!(
            entries[1],
            Err(SourceError::MissingInput { ref id, .. }) if id == "a2"
        ));
    }
}
