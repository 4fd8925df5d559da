use std::path::PathBuf;

use anyhow::Context;

mod api;
mod config;
mod db;
mod error;
mod export;
mod models;
mod sync;

use api::WikidotClient;
use config::Config;
use db::Repository;
use sync::{RetryPolicy, Synchronizer};

const USAGE: &str = "usage: wikidot-mirror [--config <path>] [--site <slug>]... [--export [dir]]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    sites: Vec<String>,
    /// `Some(None)` exports to the configured directory.
    export: Option<Option<PathBuf>>,
}

fn parse_args<I>(args: I) -> anyhow::Result<Args>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut args = args.into_iter().peekable();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--site" => {
                let site = args.next().context("--site needs a site slug")?;
                parsed.sites.push(site);
            }
            "--export" => {
                let dir = args.next_if(|next| !next.starts_with("--")).map(PathBuf::from);
                parsed.export = Some(dir);
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument '{}'\n{}", other, USAGE),
        }
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args = parse_args(std::env::args().skip(1))?;

    // Load configuration; --site replaces the configured list
    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if !args.sites.is_empty() {
        config.sites = args.sites.clone();
    }

    // Open database
    let repo = Repository::new(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path))?;

    // Export mode
    if let Some(dir) = args.export {
        let dir = dir.unwrap_or_else(|| PathBuf::from(&config.export_dir));
        let report = export::export_active_pages(&repo, &dir)
            .await
            .context("export failed")?;
        println!("Exported {} pages to {:?} ({} failed)", report.exported, dir, report.failed);
        return Ok(());
    }

    // Sync all configured sites
    config.validate().context("invalid configuration")?;
    let client = WikidotClient::new(&config).context("failed to build API client")?;
    let retry = RetryPolicy::from(&config.retry);

    let run = Synchronizer::new(&client, &repo, &retry)
        .with_chunk_size(config.chunk_size())
        .sync_all(&config.sites)
        .await;

    println!(
        "Synced {} sites in {:.1}s: {} checked, {} updated, {} skipped, {} failed",
        run.sites.len(),
        run.elapsed.as_secs_f64(),
        run.total(|r| r.checked),
        run.total(|r| r.updated),
        run.total(|r| r.skipped),
        run.total(|r| r.failed),
    );
    Ok(())
}
