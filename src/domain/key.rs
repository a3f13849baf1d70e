use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};
use url::Url;

use super::RetrievalProperties;

/// De-duplication identity of a retrieval.
///
/// Two requests with equal keys name the same bytes and share one in-flight
/// [`Retrieval`](crate::retrieval::Retrieval).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetrievalKey {
    url: String,
    accept: Option<String>,
    headers: BTreeMap<String, String>,
}

impl RetrievalKey {
    pub fn new(url: &Url, properties: &RetrievalProperties) -> Self {
        let mut url = url.clone();
        // Fragments never reach the server
        url.set_fragment(None);

        Self {
            url: url.into(),
            accept: properties.accept.clone(),
            headers: properties.headers.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Generate a deterministic file-system-safe ID for the cache
    pub fn cache_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.url.as_bytes());
        hasher.update([0u8]);
        if let Some(ref accept) = self.accept {
            hasher.update(b"accept:");
            hasher.update(accept.as_bytes());
        }
        hasher.update([0u8]);
        for (name, value) in &self.headers {
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for RetrievalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
