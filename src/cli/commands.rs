use std::path::{Path, PathBuf};

use futures::future::join_all;
use url::Url;

use crate::app::{AppContext, Result, RetrievalError};
use crate::cache::DiskCache;
use crate::domain::{RetrievalProperties, RetrievalResult};
use crate::retrieval::listener;

pub struct FetchOptions {
    pub no_cache: bool,
    pub refresh: bool,
    pub offline: bool,
    pub output: Option<PathBuf>,
}

impl FetchOptions {
    fn properties(&self, ctx: &AppContext) -> RetrievalProperties {
        let props = if self.no_cache {
            RetrievalProperties::uncached()
        } else if self.refresh {
            RetrievalProperties::refresh()
        } else if self.offline {
            RetrievalProperties::offline()
        } else {
            RetrievalProperties::default()
        };
        props.with_timeout(ctx.config.http.timeout())
    }
}

/// Retrieve every URL through the service and report each outcome.
///
/// Returns the number of failed retrievals.
pub async fn fetch(ctx: &AppContext, urls: &[String], options: &FetchOptions) -> Result<usize> {
    if let Some(ref dir) = options.output {
        std::fs::create_dir_all(dir)?;
    }

    let props = options.properties(ctx);
    let mut retrievals = Vec::with_capacity(urls.len());
    let mut errors = 0;
    let mut retrieved = 0;

    for raw in urls {
        let url = match parse_target(raw) {
            Ok(url) => url,
            Err(e) => {
                eprintln!("  {}: {}", raw, e);
                errors += 1;
                continue;
            }
        };

        let retrieval = ctx.service.retrieve_url(&url, props.clone());
        retrieval.add_listener(listener::on_cached(|r| {
            println!("  cached   {}", r.url());
        }));
        retrieval.start();
        retrievals.push(retrieval);
    }

    println!("Retrieving {} URLs...", retrievals.len());
    let results = join_all(retrievals.iter().map(|r| r.wait())).await;

    for (retrieval, result) in retrievals.iter().zip(results) {
        if !result.is_successful() {
            errors += 1;
            eprintln!("  failed   {}: {}", retrieval.url(), result.message());
            continue;
        }

        retrieved += 1;
        let origin = if result.is_from_cache() { "cache" } else { "source" };
        match options.output {
            Some(ref dir) => {
                let path = dir.join(output_name(retrieval.url()));
                let written = save(&result, &path)?;
                println!(
                    "  complete {} ({} bytes from {}) -> {}",
                    retrieval.url(),
                    written,
                    origin,
                    path.display()
                );
            }
            None => {
                let size = result
                    .data()
                    .and_then(|d| d.content_length())
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!("  complete {} ({} bytes from {})", retrieval.url(), size, origin);
            }
        }
    }

    println!("Fetch complete: {} retrieved, {} errors", retrieved, errors);
    Ok(errors)
}

/// Accept plain filesystem paths as well as URLs.
fn parse_target(raw: &str) -> Result<Url> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = std::env::current_dir()?.join(raw);
            Url::from_file_path(&path)
                .map_err(|_| RetrievalError::Precondition(format!("not a usable path: {}", raw)))
        }
        Err(e) => Err(e.into()),
    }
}

/// File name for a URL's body: its last path segment, or the host.
fn output_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .or_else(|| url.host_str())
        .unwrap_or("index")
        .to_string()
}

fn save(result: &RetrievalResult, path: &Path) -> Result<u64> {
    let data = result
        .data()
        .ok_or_else(|| RetrievalError::Other("successful retrieval without data".into()))?;
    let mut reader = data.open()?;
    let mut file = std::fs::File::create(path)?;
    Ok(std::io::copy(&mut reader, &mut file)?)
}

fn require_cache(ctx: &AppContext) -> Result<&DiskCache> {
    ctx.cache
        .as_deref()
        .ok_or_else(|| RetrievalError::Config("cache is disabled".into()))
}

pub fn list_cache(ctx: &AppContext) -> Result<()> {
    let cache = require_cache(ctx)?;
    let entries = cache.entries()?;

    if entries.is_empty() {
        println!("Cache is empty");
        return Ok(());
    }

    for entry in entries {
        let meta = entry.metadata();
        println!(
            "{} {:>10} {}",
            meta.fetched_at.format("%Y-%m-%d %H:%M"),
            meta.length,
            meta.url
        );
    }

    Ok(())
}

pub fn purge_cache(ctx: &AppContext) -> Result<()> {
    let removed = require_cache(ctx)?.purge_expired()?;
    println!("Purged {} expired entries", removed);
    Ok(())
}

pub fn clear_cache(ctx: &AppContext) -> Result<()> {
    let removed = require_cache(ctx)?.clear()?;
    println!("Removed {} entries", removed);
    Ok(())
}
