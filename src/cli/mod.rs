pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "layerfetch")]
#[command(about = "Fetch and cache remote map layers and documents", long_about = None)]
pub struct Cli {
    /// Number of retrievals allowed to run at once (overrides config)
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Retrieve one or more URLs concurrently
    Fetch {
        /// URLs to retrieve (http, https or file)
        #[arg(required = true)]
        urls: Vec<String>,

        /// Bypass the cache for both reading and writing
        #[arg(long)]
        no_cache: bool,

        /// Revalidate cached copies with the source even if fresh
        #[arg(long, conflicts_with = "no_cache")]
        refresh: bool,

        /// Serve only from the cache, never contact the source
        #[arg(long, conflicts_with_all = ["no_cache", "refresh"])]
        offline: bool,

        /// Write each retrieved body into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Inspect or maintain the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// List cached entries
    List,
    /// Delete entries past the configured expiry
    Purge,
    /// Delete every cached entry
    Clear,
}
