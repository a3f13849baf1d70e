pub mod disk;

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::Result;
use crate::domain::{CacheValidators, RetrievalData, RetrievalKey, RetrievalProperties};

pub use disk::DiskCache;

/// Metadata record stored next to each cached data file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub url: String,
    #[serde(flatten)]
    pub validators: CacheValidators,
    pub fetched_at: DateTime<Utc>,
    pub length: u64,
    pub sha256: String,
}

/// A cache entry.
///
/// Entries returned by [`Cache::lookup`] and [`Cache::store`] hold the verified
/// bytes, so their data stays readable and unchanged after the files on disk
/// are replaced or removed. Listings from [`DiskCache::entries`] carry
/// metadata only.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    id: String,
    data_path: PathBuf,
    metadata: CacheMetadata,
    contents: Option<Bytes>,
}

impl CacheEntry {
    pub(crate) fn new(id: String, data_path: PathBuf, metadata: CacheMetadata) -> Self {
        Self {
            id,
            data_path,
            metadata,
            contents: None,
        }
    }

    pub(crate) fn with_contents(mut self, contents: Bytes) -> Self {
        self.contents = Some(contents);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.data_path
    }

    pub fn metadata(&self) -> &CacheMetadata {
        &self.metadata
    }

    pub fn validators(&self) -> &CacheValidators {
        &self.metadata.validators
    }

    /// The entry's bytes: the snapshot taken when it was verified, or the
    /// live data file for unverified listings.
    pub fn data(&self) -> RetrievalData {
        let data = match self.contents {
            Some(ref bytes) => RetrievalData::from_bytes(bytes.clone()),
            None => RetrievalData::from_file(&self.data_path, Some(self.metadata.length)),
        };
        data.with_content_type(self.metadata.validators.content_type.clone())
    }
}

pub trait Cache: Send + Sync {
    /// Find a verified entry. Corrupt entries are removed and reported as a miss.
    fn lookup(&self, key: &RetrievalKey) -> Result<Option<CacheEntry>>;

    /// Whether the entry may be used without contacting the source.
    fn is_usable(&self, entry: &CacheEntry, properties: &RetrievalProperties) -> bool;

    fn store(
        &self,
        key: &RetrievalKey,
        data: &RetrievalData,
        validators: &CacheValidators,
    ) -> Result<CacheEntry>;

    /// Mark an entry as freshly validated without rewriting its data.
    fn touch(&self, key: &RetrievalKey) -> Result<()>;

    fn remove(&self, key: &RetrievalKey) -> Result<()>;
}
