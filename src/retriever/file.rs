use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use crate::app::{Result, RetrievalError};
use crate::cache::CacheEntry;
use crate::domain::{
    CacheValidators, RetrievalData, RetrievalProperties, RetrievalResult, RetrievalStatus,
};
use crate::retriever::{RetrievalMonitor, Retriever};

/// Reads `file:` URLs from the local file system.
#[derive(Debug, Default, Clone)]
pub struct FileRetriever;

impl FileRetriever {
    pub fn new() -> Self {
        Self
    }
}

fn guess_content_type(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "xml" | "gml" | "sld" => "text/xml",
        "json" | "geojson" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "tif" | "tiff" => "image/tiff",
        "txt" => "text/plain",
        _ => return None,
    };
    Some(mime.to_string())
}

#[async_trait]
impl Retriever for FileRetriever {
    fn name(&self) -> &'static str {
        "file"
    }

    fn supports(&self, url: &Url) -> bool {
        url.scheme() == "file"
    }

    // Local files are already on disk; copying them into the cache gains nothing
    fn caches_results(&self) -> bool {
        false
    }

    async fn retrieve(
        &self,
        url: &Url,
        monitor: &dyn RetrievalMonitor,
        _properties: &RetrievalProperties,
        _cached: Option<&CacheEntry>,
    ) -> Result<RetrievalResult> {
        if !self.supports(url) {
            return Err(RetrievalError::Precondition(format!(
                "file retriever cannot handle {}",
                url
            )));
        }
        let path = url.to_file_path().map_err(|_| {
            RetrievalError::Precondition(format!("{} is not a local file path", url))
        })?;

        monitor.update_status(RetrievalStatus::Reading);
        if monitor.is_cancelled() {
            return Ok(RetrievalResult::cancelled());
        }

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => return Ok(RetrievalResult::failure(RetrievalError::Io(e))),
        };
        if metadata.is_dir() {
            return Ok(RetrievalResult::failure(RetrievalError::Io(
                std::io::Error::other(format!("{} is a directory", path.display())),
            )));
        }
        // Surface permission problems now rather than on first read
        if let Err(e) = tokio::fs::File::open(&path).await {
            return Ok(RetrievalResult::failure(RetrievalError::Io(e)));
        }

        let content_type = guess_content_type(&path);
        let validators = CacheValidators {
            etag: None,
            last_modified: metadata
                .modified()
                .ok()
                .map(|t| DateTime::<Utc>::from(t).to_rfc2822()),
            content_type: content_type.clone(),
        };
        let data = RetrievalData::from_file(path, Some(metadata.len()))
            .with_content_type(content_type);

        Ok(RetrievalResult::success(data, validators))
    }
}
