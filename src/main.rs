use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use layerfetch::app::AppContext;
use layerfetch::cli::commands::{self, FetchOptions};
use layerfetch::cli::{CacheAction, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let ctx = match cli.workers {
        Some(workers) => AppContext::with_workers(workers)?,
        None => AppContext::new()?,
    };

    match cli.command {
        Commands::Fetch {
            urls,
            no_cache,
            refresh,
            offline,
            output,
        } => {
            let options = FetchOptions {
                no_cache,
                refresh,
                offline,
                output,
            };
            let errors = commands::fetch(&ctx, &urls, &options).await?;
            if errors > 0 {
                anyhow::bail!("{} of {} retrievals failed", errors, urls.len());
            }
        }
        Commands::Cache { action } => match action {
            CacheAction::List => commands::list_cache(&ctx)?,
            CacheAction::Purge => commands::purge_cache(&ctx)?,
            CacheAction::Clear => commands::clear_cache(&ctx)?,
        },
    }

    Ok(())
}
