mod enrich;
mod models;
mod scraper;
mod storage;
mod utils;

use clap::Parser;
use colored::Colorize;
use eyre::Result;
use log::{debug, info, warn};

use crate::enrich::progress::ProgressReport;
use crate::enrich::{EnrichMode, EnrichOptions, Enricher};
use crate::models::stats::RunStats;
use crate::scraper::canonical::Canonicalizer;
use crate::scraper::chromium::ChromiumEngine;
use crate::scraper::extractor::Extractor;
use crate::scraper::fetcher::{BrowserEngine, Fetcher};
use crate::scraper::http::HttpEngine;
use crate::storage::dump::DumpWriter;
use crate::storage::records::RecordStore;
use crate::utils::cli::{Args, Command, EnrichArgs};
use crate::utils::config::{Config, ConfigInner, Engine, config};
use crate::utils::log::Logger;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    Logger::init(args.verbosity);

    info!(
        "starting job-enrich {}",
        format!("v{}", env!("CARGO_PKG_VERSION")).magenta()
    );

    match args
        .command
        .unwrap_or_else(|| Command::Enrich(EnrichArgs::default()))
    {
        Command::Progress(paths) => {
            ProgressReport::from_paths(&paths.input, &paths.output)?.print();
        }
        Command::Enrich(enrich_args) => {
            let config: Config = config(args.config)?;
            let config = with_overrides(&config, &enrich_args);

            let stats = enrich(&config, &enrich_args).await?;
            if stats.failed > 0 {
                info!(
                    "{} records failed, rerun to retry them",
                    stats.failed.to_string().red()
                );
            }
        }
    }

    Ok(())
}

/// Command line flags win over the configuration file.
fn with_overrides(config: &Config, args: &EnrichArgs) -> ConfigInner {
    let mut cfg = (**config).clone();
    if args.visible {
        cfg.fetcher.headless = false;
    }
    if args.no_stealth {
        cfg.fetcher.stealth = false;
    }
    if let Some(engine) = args.engine {
        cfg.fetcher.engine = engine;
    }
    if let Some(dir) = &args.dump_dir {
        cfg.enrich.dump_dir = Some(dir.clone());
    }
    cfg
}

async fn enrich(config: &ConfigInner, args: &EnrichArgs) -> Result<RunStats> {
    // Bad patterns and selectors fail before a browser is started
    let canonicalizer = Canonicalizer::new(&config.canonical)?;
    let extractor = Extractor::new(&config.extractor)?;

    let mut store = RecordStore::open(&args.paths.input, &args.paths.output)?;
    if store.is_empty() {
        warn!("no records in {}, nothing to do", args.paths.input.display());
        return Ok(RunStats::new());
    }
    info!(
        "loaded {} records from {}",
        store.len(),
        args.paths.input.display()
    );

    match config.fetcher.engine {
        Engine::Chromium => {
            let engine = ChromiumEngine::launch(&config.fetcher).await?;
            run_with(engine, config, args, canonicalizer, extractor, &mut store).await
        }
        Engine::Http => {
            let engine = HttpEngine::new(&config.fetcher)?;
            run_with(engine, config, args, canonicalizer, extractor, &mut store).await
        }
    }
}

async fn run_with<E: BrowserEngine>(
    engine: E,
    config: &ConfigInner,
    args: &EnrichArgs,
    canonicalizer: Canonicalizer,
    extractor: Extractor,
    store: &mut RecordStore,
) -> Result<RunStats> {
    let (min_delay, max_delay) = config.enrich.delay_bounds();
    let options = EnrichOptions {
        mode: if args.all {
            EnrichMode::All
        } else {
            EnrichMode::MissingOnly
        },
        limit: args.limit,
        min_delay,
        max_delay,
        progress_every: config.enrich.progress_every,
    };
    debug!("enrichment options: {:?}", options);

    let enricher = Enricher::new(
        Fetcher::new(engine, config.fetcher.clone()),
        canonicalizer,
        extractor,
        DumpWriter::new(config.enrich.dump_dir.clone()),
        options,
    );

    let result = enricher.run(store, &args.paths.output).await;
    // The browser goes down even when the run is aborted
    enricher.into_fetcher().shutdown().await;

    result
}
