use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Memory(Bytes),
}

/// Handle to retrieved bytes.
///
/// Both file-backed data (cache hits, local files) and buffered network
/// bodies can be opened any number of times.
#[derive(Debug, Clone)]
pub struct RetrievalData {
    source: Source,
    content_type: Option<String>,
    content_length: Option<u64>,
}

impl RetrievalData {
    pub fn from_file(path: impl Into<PathBuf>, content_length: Option<u64>) -> Self {
        Self {
            source: Source::File(path.into()),
            content_type: None,
            content_length,
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            content_length: Some(bytes.len() as u64),
            source: Source::Memory(bytes),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Path of the backing file, if the data lives on disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            Source::File(path) => Some(path),
            Source::Memory(_) => None,
        }
    }

    /// Open a fresh reader positioned at the start of the data.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.source {
            Source::File(path) => Ok(Box::new(File::open(path)?)),
            Source::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
        }
    }

    pub fn read_all(&self) -> io::Result<Bytes> {
        match &self.source {
            Source::File(path) => Ok(Bytes::from(std::fs::read(path)?)),
            Source::Memory(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Validators remembered from a previous fetch, used for conditional requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

impl CacheValidators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}
