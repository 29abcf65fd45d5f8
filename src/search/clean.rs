//! Condensing raw SERP documents into the compact form fed to the model.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::batch::sink::{is_temporary_name, RECORD_EXTENSION};
use crate::batch::{TaskExecutor, TaskFailure, WorkItem, WorkItemSource};
use crate::error::SourceError;

/// Keeps the organic results (title, link, source, snippet, highlighted
/// words) and the knowledge graph of a raw search document.
pub fn condense(raw: &Value) -> Value {
    let mut results: Vec<Value> = raw
        .get("organicResults")
        .and_then(Value::as_array)
        .map(|organic| {
            organic
                .iter()
                .map(|result| {
                    json!({
                        "title": result.get("title"),
                        "link": result.get("link"),
                        "source": result.get("source"),
                        "snippet": result.get("snippet"),
                        "highlighted_words": result.get("snippetHighlitedWords"),
                        "type": "organic"
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if let Some(graph) = raw.get("knowledgeGraph").filter(|g| is_present(g)) {
        results.push(json!({
            "type": "knowledge_graph",
            "data": graph
        }));
    }

    Value::Array(results)
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Source enumerating the `<id>.json` documents of a directory.
///
/// The payload is the document path.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    /// # Errors
    ///
    /// Returns `SourceError::InputNotFound` if `dir` is not a directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(SourceError::InputNotFound(dir.display().to_string()));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl WorkItemSource for JsonDirSource {
    type Payload = PathBuf;

    fn enumerate(&self) -> Box<dyn Iterator<Item = Result<WorkItem<PathBuf>, SourceError>> + '_> {
        let mut paths: Vec<PathBuf> = WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| !is_temporary_name(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == RECORD_EXTENSION))
            .collect();
        paths.sort();

        Box::new(paths.into_iter().map(|path| {
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) if !stem.trim().is_empty() => Ok(WorkItem::new(stem, path.clone())),
                _ => Err(SourceError::MissingIdentifier {
                    origin: path.display().to_string(),
                }),
            }
        }))
    }
}

/// Local executor turning a raw search document into its condensed form.
#[derive(Debug, Clone, Default)]
pub struct CleanExecutor;

#[async_trait]
impl TaskExecutor for CleanExecutor {
    type Payload = PathBuf;
    type Output = Value;

    fn name(&self) -> &str {
        "clean"
    }

    async fn execute(&self, item: &WorkItem<PathBuf>) -> Result<Value, TaskFailure> {
        let content = tokio::fs::read_to_string(&item.payload).await.map_err(|e| {
            TaskFailure::io(format!("failed to read {}: {}", item.payload.display(), e))
        })?;
        let raw: Value = serde_json::from_str(&content)
            .map_err(|e| TaskFailure::permanent(format!("raw result is not valid JSON: {}", e)))?;
        let condensed = condense(&raw);
        tracing::debug!(
            item_id = %item.id,
            results = condensed.as_array().map_or(0, Vec::len),
            "Condensed search results"
        );
        Ok(condensed)
    }
}
