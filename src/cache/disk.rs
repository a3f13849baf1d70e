use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::app::{Result, RetrievalError};
use crate::cache::{Cache, CacheEntry, CacheMetadata};
use crate::domain::{CacheValidators, RetrievalData, RetrievalKey, RetrievalProperties};

pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

const DATA_EXT: &str = "data";
const META_EXT: &str = "meta";
// NamedTempFile's default name prefix
const TEMP_PREFIX: &str = ".tmp";

enum Validation {
    Missing,
    Valid(CacheEntry),
    Corrupt(String),
}

/// File-system cache: one `<id>.data` file and one `<id>.meta` JSON record per key.
///
/// Lookups of a key share a read lock; store, touch and remove take it
/// exclusively. Files are replaced by atomic rename so readers never observe a
/// partial write.
pub struct DiskCache {
    root: PathBuf,
    expiry: Duration,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_expiry(root, DEFAULT_EXPIRY)
    }

    pub fn with_expiry(root: impl Into<PathBuf>, expiry: Duration) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            expiry,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.{}", id, DATA_EXT))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.{}", id, META_EXT))
    }

    fn key_lock(&self, id: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id.to_string()).or_default().clone()
    }

    // The guarded value is `()`, so a poisoned lock carries no broken state.
    fn read_guard(lock: &RwLock<()>) -> RwLockReadGuard<'_, ()> {
        lock.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_guard(lock: &RwLock<()>) -> RwLockWriteGuard<'_, ()> {
        lock.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_metadata(&self, id: &str) -> std::result::Result<Option<CacheMetadata>, String> {
        let raw = match fs::read(self.meta_path(id)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("unreadable metadata: {}", e)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| format!("invalid metadata: {}", e))
    }

    fn validate(&self, id: &str) -> Validation {
        let metadata = match self.read_metadata(id) {
            Ok(Some(m)) => m,
            Ok(None) => {
                // An orphaned data file without metadata is never trusted
                if self.data_path(id).exists() {
                    return Validation::Corrupt("data file without metadata".into());
                }
                return Validation::Missing;
            }
            Err(reason) => return Validation::Corrupt(reason),
        };

        let data_path = self.data_path(id);
        let contents = match fs::read(&data_path) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => return Validation::Corrupt(format!("unreadable data: {}", e)),
        };

        if contents.len() as u64 != metadata.length {
            return Validation::Corrupt(format!(
                "length mismatch: expected {}, found {}",
                metadata.length,
                contents.len()
            ));
        }
        if hex::encode(Sha256::digest(&contents)) != metadata.sha256 {
            return Validation::Corrupt("digest mismatch".into());
        }

        Validation::Valid(
            CacheEntry::new(id.to_string(), data_path, metadata).with_contents(contents),
        )
    }

    fn remove_files(&self, id: &str) -> Result<()> {
        for path in [self.meta_path(id), self.data_path(id)] {
            remove_if_present(&path)?;
        }
        Ok(())
    }

    fn write_atomic(&self, target: &Path, contents: &[u8]) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(contents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(target).map_err(|e| RetrievalError::Io(e.error))?;
        Ok(())
    }

    fn write_metadata(&self, id: &str, metadata: &CacheMetadata) -> Result<()> {
        let json =
            serde_json::to_vec_pretty(metadata).map_err(|e| RetrievalError::Cache(e.to_string()))?;
        self.write_atomic(&self.meta_path(id), &json)
    }

    /// Every readable entry, without digest verification.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let path = match dir_entry {
                Ok(d) => d.path(),
                Err(_) => continue,
            };
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let lock = self.key_lock(id);
            let _guard = Self::read_guard(&lock);
            if let Ok(Some(metadata)) = self.read_metadata(id) {
                entries.push(CacheEntry::new(id.to_string(), self.data_path(id), metadata));
            }
        }
        entries.sort_by(|a, b| a.metadata().url.cmp(&b.metadata().url));
        Ok(entries)
    }

    /// Remove entries older than the expiry window. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.entries()? {
            if !self.is_fresh(entry.metadata(), self.expiry) {
                let lock = self.key_lock(entry.id());
                let _guard = Self::write_guard(&lock);
                self.remove_files(entry.id())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every entry and any temp files left by interrupted writes.
    /// Files the cache did not create are left alone. Returns how many
    /// entries were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.starts_with(TEMP_PREFIX) {
                remove_if_present(&path)?;
                continue;
            }

            let ext = path.extension().and_then(|e| e.to_str());
            if ext != Some(DATA_EXT) && ext != Some(META_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let lock = self.key_lock(id);
            let _guard = Self::write_guard(&lock);
            remove_if_present(&path)?;
            if ext == Some(META_EXT) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn is_fresh(&self, metadata: &CacheMetadata, max_age: Duration) -> bool {
        // A timestamp in the future counts as just fetched
        let age = Utc::now()
            .signed_duration_since(metadata.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age < max_age
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl Cache for DiskCache {
    fn lookup(&self, key: &RetrievalKey) -> Result<Option<CacheEntry>> {
        let id = key.cache_id();
        let lock = self.key_lock(&id);

        {
            let _guard = Self::read_guard(&lock);
            match self.validate(&id) {
                Validation::Missing => {
                    debug!("cache miss for {}", key);
                    return Ok(None);
                }
                Validation::Valid(entry) => {
                    debug!("cache hit for {}", key);
                    return Ok(Some(entry));
                }
                Validation::Corrupt(_) => {}
            }
        }

        // Re-check under the write lock: a writer may have replaced the entry meanwhile
        let _guard = Self::write_guard(&lock);
        match self.validate(&id) {
            Validation::Missing => Ok(None),
            Validation::Valid(entry) => Ok(Some(entry)),
            Validation::Corrupt(reason) => {
                warn!("discarding corrupt cache entry for {}: {}", key, reason);
                self.remove_files(&id)?;
                Ok(None)
            }
        }
    }

    fn is_usable(&self, entry: &CacheEntry, properties: &RetrievalProperties) -> bool {
        if properties.cache_only {
            return true;
        }
        let max_age = properties.max_age.unwrap_or(self.expiry);
        self.is_fresh(entry.metadata(), max_age)
    }

    fn store(
        &self,
        key: &RetrievalKey,
        data: &RetrievalData,
        validators: &CacheValidators,
    ) -> Result<CacheEntry> {
        let bytes = data.read_all()?;
        let id = key.cache_id();
        let metadata = CacheMetadata {
            url: key.url().to_string(),
            validators: CacheValidators {
                content_type: validators
                    .content_type
                    .clone()
                    .or_else(|| data.content_type().map(String::from)),
                ..validators.clone()
            },
            fetched_at: Utc::now(),
            length: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(&bytes)),
        };

        let lock = self.key_lock(&id);
        let _guard = Self::write_guard(&lock);

        fs::create_dir_all(&self.root)?;
        // Data first: metadata is the commit point for lookups
        self.write_atomic(&self.data_path(&id), &bytes)?;
        self.write_metadata(&id, &metadata)?;

        debug!("cached {} bytes for {}", metadata.length, key);
        Ok(CacheEntry::new(id.clone(), self.data_path(&id), metadata).with_contents(bytes))
    }

    fn touch(&self, key: &RetrievalKey) -> Result<()> {
        let id = key.cache_id();
        let lock = self.key_lock(&id);
        let _guard = Self::write_guard(&lock);

        match self.read_metadata(&id) {
            Ok(Some(mut metadata)) => {
                metadata.fetched_at = Utc::now();
                self.write_metadata(&id, &metadata)
            }
            Ok(None) => Ok(()),
            Err(reason) => Err(RetrievalError::Cache(reason)),
        }
    }

    fn remove(&self, key: &RetrievalKey) -> Result<()> {
        let id = key.cache_id();
        let lock = self.key_lock(&id);
        let _guard = Self::write_guard(&lock);
        self.remove_files(&id)
    }
}
