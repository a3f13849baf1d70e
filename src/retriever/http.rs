use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE,
    IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::app::{Result, RetrievalError};
use crate::cache::CacheEntry;
use crate::domain::{
    CacheValidators, RetrievalData, RetrievalProperties, RetrievalResult, RetrievalStatus,
};
use crate::retriever::{RetrievalMonitor, Retriever};

// Upper bound for pre-allocating from Content-Length
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("layerfetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Retrieves `http:` and `https:` URLs with conditional-request support.
pub struct HttpRetriever {
    client: Client,
}

impl HttpRetriever {
    pub fn new() -> Result<Self> {
        Self::with_config(&HttpConfig::default())
    }

    pub fn with_config(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client })
    }

    fn request_headers(
        properties: &RetrievalProperties,
        validators: Option<&CacheValidators>,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in &properties.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        if let Some(ref accept) = properties.accept {
            if let Ok(value) = HeaderValue::from_str(accept) {
                headers.insert(ACCEPT, value);
            }
        }

        if let Some(validators) = validators {
            if let Some(ref etag) = validators.etag {
                if let Ok(value) = HeaderValue::from_str(etag) {
                    headers.insert(IF_NONE_MATCH, value);
                }
            }

            if let Some(ref last_modified) = validators.last_modified {
                if let Ok(value) = HeaderValue::from_str(last_modified) {
                    headers.insert(IF_MODIFIED_SINCE, value);
                }
            }
        }

        headers
    }

    fn transport_failure(error: reqwest::Error, timeout: Duration) -> RetrievalResult {
        if error.is_timeout() {
            RetrievalResult::failure(RetrievalError::Timeout(timeout))
        } else {
            RetrievalResult::failure(RetrievalError::Transport(error))
        }
    }
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

#[async_trait]
impl Retriever for HttpRetriever {
    fn name(&self) -> &'static str {
        "http"
    }

    fn supports(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    async fn retrieve(
        &self,
        url: &Url,
        monitor: &dyn RetrievalMonitor,
        properties: &RetrievalProperties,
        cached: Option<&CacheEntry>,
    ) -> Result<RetrievalResult> {
        if !self.supports(url) {
            return Err(RetrievalError::Precondition(format!(
                "http retriever cannot handle {}",
                url
            )));
        }

        monitor.update_status(RetrievalStatus::Started);
        if monitor.is_cancelled() {
            return Ok(RetrievalResult::cancelled());
        }

        let headers = Self::request_headers(properties, cached.map(|e| e.validators()));

        monitor.update_status(RetrievalStatus::Connecting);
        let sent = self
            .client
            .get(url.clone())
            .headers(headers)
            .timeout(properties.timeout)
            .send()
            .await;
        let mut response = match sent {
            Ok(r) => r,
            Err(e) => return Ok(Self::transport_failure(e, properties.timeout)),
        };

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!("{} not modified", url);
            return Ok(match cached {
                Some(entry) => RetrievalResult::cached(entry.data()).with_message("not modified"),
                // A 304 without anything cached means the server ignored our request
                None => RetrievalResult::failure(RetrievalError::Http {
                    status: status.as_u16(),
                    url: url.to_string(),
                }),
            });
        }

        if !status.is_success() {
            return Ok(RetrievalResult::failure(RetrievalError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }));
        }

        let validators = CacheValidators {
            etag: header_string(response.headers(), ETAG),
            last_modified: header_string(response.headers(), LAST_MODIFIED),
            content_type: header_string(response.headers(), CONTENT_TYPE),
        };

        monitor.update_status(RetrievalStatus::Reading);
        let capacity = response.content_length().unwrap_or(0).min(MAX_PREALLOC) as usize;
        let mut body = BytesMut::with_capacity(capacity);
        loop {
            if monitor.is_cancelled() {
                return Ok(RetrievalResult::cancelled());
            }
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => return Ok(Self::transport_failure(e, properties.timeout)),
            }
        }

        let data = RetrievalData::from_bytes(body.freeze())
            .with_content_type(validators.content_type.clone());
        Ok(RetrievalResult::success(data, validators))
    }
}
