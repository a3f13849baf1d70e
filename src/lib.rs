//! # layerfetch
//!
//! Asynchronous, cache-backed retrieval of remote resources such as map
//! layers, legends and capability documents.
//!
//! ## Architecture
//!
//! ```text
//! RetrievalService → Retrieval → worker pool → Retriever → DiskCache
//!                        ↓
//!                RetrievalListener (cached, complete)
//! ```
//!
//! Callers ask the service for a [`Retrieval`](retrieval::Retrieval) by URL.
//! Concurrent requests for the same resource share one retrieval and one
//! network fetch. Listeners hear about a cached copy first, when there is one,
//! and about the final outcome exactly once.
//!
//! ## Quick Start
//!
//! ```bash
//! # Fetch two layers, writing bodies to ./out
//! layerfetch fetch https://example.com/wms?request=GetCapabilities legend.png -o out
//!
//! # Force revalidation of cached copies
//! layerfetch fetch --refresh https://example.com/catalog.xml
//!
//! # Cache maintenance
//! layerfetch cache list
//! layerfetch cache purge
//! ```
//!
//! ## Modules
//!
//! - [`app`]: Application context and error types
//! - [`cache`]: On-disk cache with integrity checks
//! - [`cli`]: Command-line interface definitions
//! - [`config`]: TOML configuration
//! - [`domain`]: Keys, properties, statuses, data and results
//! - [`retrieval`]: The shared retrieval handle and its listeners
//! - [`retriever`]: Scheme-specific fetchers (file, http)
//! - [`service`]: Deduplication, worker pool and cache coordination

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together config, cache
/// and retrieval service.
pub mod app;

/// Content cache keyed by retrieval key.
///
/// - [`Cache`](cache::Cache): Trait the service consults and updates
/// - [`DiskCache`](cache::DiskCache): Data/metadata file pairs, verified on read
pub mod cache;

/// Command-line interface using clap.
///
/// - `fetch <url>...` - Retrieve URLs concurrently
/// - `cache list|purge|clear` - Cache maintenance
pub mod cli;

/// Configuration loaded from `~/.config/layerfetch/config.toml`.
pub mod config;

/// Core value types shared by every layer.
pub mod domain;

/// Retrieval handles, status tracking and listener delivery.
pub mod retrieval;

/// Scheme-specific retrievers.
///
/// - [`Retriever`](retriever::Retriever): Async trait implemented per scheme
/// - [`FileRetriever`](retriever::FileRetriever): Local files
/// - [`HttpRetriever`](retriever::HttpRetriever): reqwest-based, with conditional requests
pub mod retriever;

/// Deduplicating retrieval service with a bounded worker pool.
pub mod service;

pub use app::{AppContext, Result, RetrievalError};
pub use domain::{RetrievalKey, RetrievalProperties, RetrievalResult, RetrievalStatus};
pub use retrieval::{Retrieval, RetrievalListener};
pub use service::RetrievalService;
