//! Where raw manifest submissions come from

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::error::{Result, StoreError};

/// Raw bytes of one submitted manifest and where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Provenance shown in build reports, also the tie breaker for duplicate identifiers.
    pub source: String,
    pub bytes: Vec<u8>,
}

impl Submission {
    pub fn new(source: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source: source.into(),
            bytes: bytes.into(),
        }
    }
}

/// Supplies the batch of submissions for a build cycle.
#[async_trait]
pub trait SubmissionSource: Send + Sync {
    fn name(&self) -> &str;

    /// Every current submission. A failure here aborts the cycle.
    async fn fetch_submissions(&self) -> Result<Vec<Submission>>;
}

/// Reads every `*.json` file below a directory.
///
/// Provenance is the path relative to the root, with `/` separators.
pub struct DirectorySource {
    root: PathBuf,
    name: String,
}

impl DirectorySource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        let name = format!("dir:{}", root.display());
        Self { root, name }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                StoreError::io("walk modules directory", path, e.into())
            })?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().and_then(|e| e.to_str()) == Some("json")
            {
                paths.push(path.to_path_buf());
            }
        }
        Ok(paths)
    }

    fn provenance(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[async_trait]
impl SubmissionSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_submissions(&self) -> Result<Vec<Submission>> {
        if !tokio::fs::try_exists(&self.root)
            .await
            .map_err(|e| StoreError::io("check modules directory", &self.root, e))?
        {
            return Err(StoreError::ConfigError(format!(
                "modules directory {} does not exist",
                self.root.display()
            )));
        }

        let mut submissions = Vec::new();
        for path in self.manifest_paths()? {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| StoreError::io("read submission", &path, e))?;
            submissions.push(Submission::new(self.provenance(&path), bytes));
        }

        tracing::debug!(
            root = %self.root.display(),
            count = submissions.len(),
            "Collected submissions"
        );
        Ok(submissions)
    }
}

/// Submissions held in memory. Used by tests and embedders.
#[derive(Default)]
pub struct MemorySource {
    submissions: RwLock<Vec<Submission>>,
}

impl MemorySource {
    pub fn new(submissions: Vec<Submission>) -> Self {
        Self {
            submissions: RwLock::new(submissions),
        }
    }

    /// Swap in the batch the next cycle will see.
    pub fn replace(&self, submissions: Vec<Submission>) {
        *self.submissions.write().unwrap_or_else(|e| e.into_inner()) = submissions;
    }
}

#[async_trait]
impl SubmissionSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_submissions(&self) -> Result<Vec<Submission>> {
        Ok(self
            .submissions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_source_reads_json_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("a.json"), b"[]").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::write(dir.path().join("nested").join("c.json"), b"null").unwrap();

        let source = DirectorySource::new(dir.path());
        let submissions = source.fetch_submissions().await.unwrap();

        let sources: Vec<&str> = submissions.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(sources, vec!["a.json", "b.json", "nested/c.json"]);
        assert_eq!(submissions[0].bytes, b"[]");
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(dir.path().join("absent"));
        assert!(matches!(
            source.fetch_submissions().await,
            Err(StoreError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_source_replace() {
        let source = MemorySource::new(vec![Submission::new("one", "{}")]);
        source.replace(vec![]);
        assert!(source.fetch_submissions().await.unwrap().is_empty());
    }
}
