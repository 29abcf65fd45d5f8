//! Result sink: atomic, write-once persistence of one record per identifier.
//!
//! Records are written to a hidden temporary file in the output directory,
//! flushed, then moved into place with a no-clobber rename. A reader listing
//! the directory sees either the complete `<id>.json` or nothing for `id`.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::SinkError;

/// File extension of committed records.
pub const RECORD_EXTENSION: &str = "json";

const TEMP_SUFFIX: &str = ".tmp";

/// Result of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The record was created by this commit.
    Written,
    /// A record for the identifier already existed and was left untouched.
    AlreadyPresent,
}

/// Durable, write-once store of results keyed by identifier.
pub trait ResultSink: Send + Sync {
    /// Human-readable location, for logs and reports.
    fn location(&self) -> String;

    /// Persists `bytes` as the record for `id`.
    ///
    /// Never overwrites an existing record.
    fn commit(&self, id: &str, bytes: &[u8]) -> Result<CommitOutcome, SinkError>;
}

/// Returns true for names produced by an unfinished write.
pub fn is_temporary_name(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.ends_with(TEMP_SUFFIX)
}

/// Checks that `id` is safe to use as a single file name.
pub fn validate_identifier(id: &str) -> Result<(), SinkError> {
    let invalid = id.is_empty()
        || id.starts_with('.')
        || id.contains(&['/', '\\', '\0'][..])
        || id.len() > 200;
    if invalid {
        return Err(SinkError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

/// Sink writing one JSON document per identifier into a directory.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    /// Opens (and creates if needed) the output directory.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::NotADirectory` if `dir` exists but is not a
    /// directory.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            tracing::info!(dir = %dir.display(), "Created output directory");
        } else if !dir.is_dir() {
            return Err(SinkError::NotADirectory(dir.display().to_string()));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path of the record for `id`.
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    /// Writes and flushes `bytes` to a temporary file without publishing it.
    ///
    /// Until [`StagedRecord::publish`] is called, the record is invisible to
    /// [`CompletionIndex`](super::CompletionIndex) scans.
    pub fn stage(&self, id: &str, bytes: &[u8]) -> Result<StagedRecord, SinkError> {
        validate_identifier(id)?;

        let prefix = format!(".{}.{}.", id, RECORD_EXTENSION);
        let mut temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(|source| SinkError::Persist {
                id: id.to_string(),
                source,
            })?;

        if let Err(source) = write_fully(&mut temp, bytes) {
            return Err(SinkError::Persist {
                id: id.to_string(),
                source,
            });
        }

        Ok(StagedRecord {
            id: id.to_string(),
            temp,
            target: self.record_path(id),
        })
    }
}

fn write_fully(temp: &mut NamedTempFile, bytes: &[u8]) -> std::io::Result<()> {
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.as_file().sync_all()
}

impl ResultSink for JsonDirSink {
    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    fn commit(&self, id: &str, bytes: &[u8]) -> Result<CommitOutcome, SinkError> {
        self.stage(id, bytes)?.publish()
    }
}

/// A fully written record waiting to be moved into place.
///
/// Dropping it without publishing removes the temporary file.
#[derive(Debug)]
pub struct StagedRecord {
    id: String,
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedRecord {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Atomically renames the record into place unless one already exists.
    pub fn publish(self) -> Result<CommitOutcome, SinkError> {
        match self.temp.persist_noclobber(&self.target) {
            Ok(_) => Ok(CommitOutcome::Written),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!(item_id = %self.id, "Record already present, leaving it untouched");
                Ok(CommitOutcome::AlreadyPresent)
            }
            Err(err) => Err(SinkError::Persist {
                id: self.id,
                source: err.error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::CompletionIndex;
    use tempfile::TempDir;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("a-1_b").is_ok());
        assert!(validate_identifier("3f2a9c1e-uuid").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("../etc").is_err());
        assert!(validate_identifier("a/b").is_err());
        assert!(validate_identifier(".hidden").is_err());
    }

    #[test]
    fn test_is_temporary_name() {
        assert!(is_temporary_name(".a.json.X1y2.tmp"));
        assert!(!is_temporary_name("a.json"));
        assert!(!is_temporary_name("a.tmp"));
    }

    #[test]
    fn test_commit_writes_record() {
        let dir = TempDir::new().unwrap();
        let sink = JsonDirSink::create(dir.path().join("out")).unwrap();

        let outcome = sink.commit("a", br#"{"v":1}"#).unwrap();
        assert_eq!(outcome, CommitOutcome::Written);

        let content = fs::read_to_string(sink.record_path("a")).unwrap();
        assert_eq!(content, r#"{"v":1}"#);

        // No temporary files left behind.
        let leftovers: Vec<_> = fs::read_dir(sink.dir())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| is_temporary_name(&e.file_name().to_string_lossy()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_commit_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let sink = JsonDirSink::create(dir.path()).unwrap();

        sink.commit("a", br#"{"v":1}"#).unwrap();
        let outcome = sink.commit("a", br#"{"v":2}"#).unwrap();
        assert_eq!(outcome, CommitOutcome::AlreadyPresent);

        let content = fs::read_to_string(sink.record_path("a")).unwrap();
        assert_eq!(content, r#"{"v":1}"#);
    }

    #[test]
    fn test_staged_record_is_invisible_until_published() {
        let dir = TempDir::new().unwrap();
        let sink = JsonDirSink::create(dir.path()).unwrap();

        let staged = sink.stage("a", br#"{"v":1}"#).unwrap();
        assert!(staged.temp_path().exists());
        assert!(!CompletionIndex::scan(dir.path()).unwrap().contains("a"));

        staged.publish().unwrap();
        assert!(CompletionIndex::scan(dir.path()).unwrap().contains("a"));
    }

    #[test]
    fn test_create_rejects_existing_file() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::write(&out, "x").unwrap();

        let err = JsonDirSink::create(&out).unwrap_err();
        assert!(matches!(err, SinkError::NotADirectory(_)));
        assert_eq!(fs::read_to_string(&out).unwrap(), "x");

        let nested = dir.path().join("a").join("b");
        assert!(JsonDirSink::create(&nested).is_ok());
        assert!(nested.is_dir());
    }

    #[test]
    fn test_dropped_stage_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let sink = JsonDirSink::create(dir.path()).unwrap();

        let staged = sink.stage("a", b"{}").unwrap();
        let temp_path = staged.temp_path().to_path_buf();
        drop(staged);

        assert!(!temp_path.exists());
        assert!(!sink.record_path("a").exists());
    }
}
