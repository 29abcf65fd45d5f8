//! Completion index: which identifiers already have an output record.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use super::sink::{is_temporary_name, RECORD_EXTENSION};

/// Point-in-time snapshot of completed identifiers in an output location.
///
/// Built once at the start of a run and passed explicitly to the runner.
/// Records created after the scan (for instance by a second process writing
/// the same directory) are not seen.
#[derive(Debug, Clone)]
pub struct CompletionIndex {
    ids: HashSet<String>,
    scanned_at: DateTime<Utc>,
}

impl CompletionIndex {
    /// Index with no completed identifiers.
    pub fn empty() -> Self {
        Self {
            ids: HashSet::new(),
            scanned_at: Utc::now(),
        }
    }

    /// Builds an index from known identifiers.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            scanned_at: Utc::now(),
        }
    }

    /// Scans `dir` for `<id>.json` records.
    ///
    /// A missing directory is an empty index; a path that is not a directory
    /// is an `InvalidInput` error. Temporary files left behind by interrupted
    /// writes are not counted.
    pub fn scan(dir: &Path) -> std::io::Result<Self> {
        Self::scan_with_extension(dir, RECORD_EXTENSION)
    }

    /// Scans `dir` for records with the given file extension.
    pub fn scan_with_extension(dir: &Path, extension: &str) -> std::io::Result<Self> {
        let scanned_at = Utc::now();
        if !dir.exists() {
            return Ok(Self {
                ids: HashSet::new(),
                scanned_at,
            });
        }
        if !dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("output location is not a directory: {}", dir.display()),
            ));
        }

        let mut ids = HashSet::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if is_temporary_name(&file_name) {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.insert(stem.to_string());
            }
        }

        tracing::debug!(dir = %dir.display(), completed = ids.len(), "Scanned output location");
        Ok(Self { ids, scanned_at })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// When the snapshot was taken.
    pub fn scanned_at(&self) -> DateTime<Utc> {
        self.scanned_at
    }
}

impl Default for CompletionIndex {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let index = CompletionIndex::scan(&dir.path().join("absent")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_scan_rejects_file_as_output() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::write(&out, "x").unwrap();

        let err = CompletionIndex::scan(&out).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_scan_counts_only_records() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("b.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join(".c.json.1a2b.tmp"), "{").unwrap();
        fs::create_dir(dir.path().join("d.json")).unwrap();

        let index = CompletionIndex::scan(dir.path()).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.contains("a"));
        assert!(index.contains("b"));
        assert!(!index.contains("c"));
        assert!(!index.contains("d"));
    }

    #[test]
    fn test_from_ids() {
        let index = CompletionIndex::from_ids(["x", "y"]);
        assert!(index.contains("x"));
        assert!(!index.contains("z"));
        assert_eq!(index.len(), 2);
    }
}
