//! Work items and the sources that enumerate them.
//!
//! A source is re-enumerable: calling [`WorkItemSource::enumerate`] twice on
//! the same inputs yields the same items, which is what lets a later run
//! recompute pending work from scratch.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use walkdir::WalkDir;

use crate::error::SourceError;

/// Column holding the stable identifier in input tables.
pub const DEFAULT_ID_COLUMN: &str = "id";

/// One unit of pending work.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem<P> {
    /// Stable identifier, unique within a run. Names the output record.
    pub id: String,
    /// Task-specific data handed to the executor.
    pub payload: P,
}

impl<P> WorkItem<P> {
    pub fn new(id: impl Into<String>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Lazily enumerates work items.
///
/// Record-level problems (missing identifier, malformed row) are yielded as
/// `Err` items so the caller can report them and keep going. Problems that
/// make the whole input unusable are raised when the source is constructed.
pub trait WorkItemSource {
    type Payload: Send + Sync + 'static;

    fn enumerate(
        &self,
    ) -> Box<dyn Iterator<Item = Result<WorkItem<Self::Payload>, SourceError>> + '_>;
}

/// In-memory source, mostly useful for tests and small ad-hoc batches.
#[derive(Debug, Clone, Default)]
pub struct VecSource<P> {
    items: Vec<WorkItem<P>>,
}

impl<P> VecSource<P> {
    pub fn new(items: Vec<WorkItem<P>>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<P: Clone + Send + Sync + 'static> WorkItemSource for VecSource<P> {
    type Payload = P;

    fn enumerate(&self) -> Box<dyn Iterator<Item = Result<WorkItem<P>, SourceError>> + '_> {
        Box::new(self.items.iter().cloned().map(Ok))
    }
}

/// Input records that carry an identifier.
pub trait Identified {
    /// Raw identifier value, if the record has one.
    fn identifier(&self) -> Option<&str>;
}

/// Trims an identifier and rejects empty values.
pub fn normalize_identifier(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Lists the CSV files of an input location.
///
/// A file path is returned as-is; a directory yields its `*.csv` entries
/// (non-recursive) in sorted order so enumeration is deterministic.
pub fn list_csv_files(input: &Path) -> Result<Vec<PathBuf>, SourceError> {
    if !input.exists() {
        return Err(SourceError::InputNotFound(input.display().to_string()));
    }
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(input).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| SourceError::Io(e.into()))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Source reading typed records from one CSV file or a directory of them.
///
/// `derive` builds the task payload from a record. Header names are trimmed
/// before records are deserialized. Files without the identifier column are
/// rejected whole; other rows are rejected one by one.
pub struct CsvSource<R, F> {
    files: Vec<PathBuf>,
    derive: F,
    _record: PhantomData<fn() -> R>,
}

impl<R, F, P> CsvSource<R, F>
where
    R: DeserializeOwned + Identified,
    F: Fn(&R) -> Result<P, SourceError>,
{
    /// Opens an input location.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::InputNotFound` if `input` does not exist.
    pub fn open(input: impl AsRef<Path>, derive: F) -> Result<Self, SourceError> {
        let files = list_csv_files(input.as_ref())?;
        Ok(Self {
            files,
            derive,
            _record: PhantomData,
        })
    }

    /// Files that will be read, in enumeration order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn open_file(&self, path: &Path) -> Result<OpenFile<R>, SourceError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_path(path)?;
        let has_id = reader.headers()?.iter().any(|h| h == DEFAULT_ID_COLUMN);
        if !has_id {
            return Err(SourceError::MissingIdColumn {
                file: name,
                column: DEFAULT_ID_COLUMN.to_string(),
            });
        }

        tracing::debug!(file = %name, "Reading input file");
        Ok(OpenFile {
            name,
            records: reader.into_deserialize(),
            row: 0,
        })
    }

    fn build(&self, record: R, origin: String) -> Result<WorkItem<P>, SourceError> {
        let id = normalize_identifier(record.identifier())
            .ok_or(SourceError::MissingIdentifier { origin })?;
        let payload = (self.derive)(&record)?;
        Ok(WorkItem { id, payload })
    }
}

impl<R, F, P> WorkItemSource for CsvSource<R, F>
where
    R: DeserializeOwned + Identified,
    F: Fn(&R) -> Result<P, SourceError>,
    P: Send + Sync + 'static,
{
    type Payload = P;

    fn enumerate(&self) -> Box<dyn Iterator<Item = Result<WorkItem<P>, SourceError>> + '_> {
        Box::new(CsvRecords {
            source: self,
            next_file: 0,
            current: None,
        })
    }
}

struct OpenFile<R> {
    name: String,
    records: csv::DeserializeRecordsIntoIter<std::fs::File, R>,
    row: usize,
}

struct CsvRecords<'a, R, F> {
    source: &'a CsvSource<R, F>,
    next_file: usize,
    current: Option<OpenFile<R>>,
}

impl<R, F, P> Iterator for CsvRecords<'_, R, F>
where
    R: DeserializeOwned + Identified,
    F: Fn(&R) -> Result<P, SourceError>,
{
    type Item = Result<WorkItem<P>, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(open) = self.current.as_mut() {
                match open.records.next() {
                    Some(Ok(record)) => {
                        open.row += 1;
                        // +1 for the header line
                        let origin = format!("{}:{}", open.name, open.row + 1);
                        return Some(self.source.build(record, origin));
                    }
                    Some(Err(err)) => {
                        open.row += 1;
                        let origin = format!("{}:{}", open.name, open.row + 1);
                        if err.is_io_error() {
                            self.current = None;
                        }
                        return Some(Err(SourceError::Malformed {
                            origin,
                            message: err.to_string(),
                        }));
                    }
                    None => {
                        self.current = None;
                    }
                }
            }

            let path = self.source.files.get(self.next_file)?;
            self.next_file += 1;
            match self.source.open_file(path) {
                Ok(open) => self.current = Some(open),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
