use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("HTTP error! status: {0}")]
    Status(u16),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("no data file named {0:?}")]
    NotFound(String),
    #[error("invalid data file key {0:?}")]
    InvalidKey(String),
}

/// Somewhere data files can be fetched from by key.
pub trait ProfileSource {
    fn load(&self, file_key: &str) -> Result<Vec<u8>, SourceError>;

    /// Keys offered by the file selector, sorted.
    fn keys(&self) -> Result<Vec<String>, SourceError>;
}

/// Data files on disk: key `k` is `<root>/k.json`.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, file_key: &str) -> Result<PathBuf, SourceError> {
        // Keys come from share strings; keep them inside the data directory.
        let escapes = file_key.is_empty()
            || file_key.contains(['/', '\\'])
            || file_key == ".."
            || file_key.starts_with('.');
        if escapes {
            return Err(SourceError::InvalidKey(file_key.to_string()));
        }
        Ok(self.root.join(format!("{file_key}.json")))
    }
}

impl ProfileSource for DirSource {
    fn load(&self, file_key: &str) -> Result<Vec<u8>, SourceError> {
        let path = self.path_for(file_key)?;
        std::fs::read(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SourceError::NotFound(file_key.to_string())
            } else {
                SourceError::Io {
                    path: path.display().to_string(),
                    source,
                }
            }
        })
    }

    fn keys(&self) -> Result<Vec<String>, SourceError> {
        let io_err = |source| SourceError::Io {
            path: self.root.display().to_string(),
            source,
        };
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().is_some_and(|e| e == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && !stem.starts_with('.')
            {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Data files held in memory, e.g. embedded fixtures.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, file_key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(file_key.into(), data.into());
        self
    }
}

impl ProfileSource for MemorySource {
    fn load(&self, file_key: &str) -> Result<Vec<u8>, SourceError> {
        self.files
            .get(file_key)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(file_key.to_string()))
    }

    fn keys(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.files.keys().cloned().collect())
    }
}
