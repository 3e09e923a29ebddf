use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use jarokelo_scraper::changes::detect_changed_urls;
use jarokelo_scraper::cli::{Cli, Commands, HttpArgs, StoreArgs};
use jarokelo_scraper::crawler::{CrawlConfig, CrawlController, CrawlError};
use jarokelo_scraper::export;
use jarokelo_scraper::fetch::FetchPolicy;
use jarokelo_scraper::logging;
use jarokelo_scraper::network::{FetchError, HttpClient};
use jarokelo_scraper::refresh::refresh_urls;
use jarokelo_scraper::source::{IssueSource, JarokeloSource};
use jarokelo_scraper::store::{IssueStore, StoreError, StoreOptions};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum MainError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Crawl(#[from] CrawlError),

    #[error("HTTP client error: {0}")]
    Http(#[from] FetchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl MainError {
    fn exit_code(&self) -> u8 {
        match self {
            MainError::Crawl(e) if e.is_network() => 4,
            MainError::Http(e) if !e.is_fatal() => 4,
            _ => 3,
        }
    }
}

fn open_store(args: &StoreArgs) -> Result<IssueStore, StoreError> {
    let options = StoreOptions {
        buffer_size: args.buffer_size,
        policy: args.status_policy(),
        ..StoreOptions::default()
    };
    IssueStore::open(&args.data_dir, options)
}

fn build_source(http: &HttpArgs, store: &StoreArgs) -> Result<Arc<dyn IssueSource>, FetchError> {
    let client = HttpClient::new(http.user_agent.clone(), http.timeout)?;
    Ok(Arc::new(JarokeloSource::new(client, store.status_policy())))
}

fn build_fetcher(http: &HttpArgs) -> FetchPolicy {
    if http.sequential {
        FetchPolicy::sequential()
    } else {
        FetchPolicy::concurrent(http.max_concurrent.max(1))
    }
}

async fn run_crawl(store_args: StoreArgs, http: HttpArgs, config: CrawlConfig) -> Result<(), MainError> {
    let mut store = open_store(&store_args)?;
    let source = build_source(&http, &store_args)?;
    info!(
        data_dir = %store_args.data_dir.display(),
        max_concurrent = http.max_concurrent,
        "Crawling from listing page {}",
        config.start_page
    );

    let outcome = {
        let mut controller = CrawlController::new(&mut store, source, build_fetcher(&http), config);
        tokio::select! {
            result = controller.run() => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        }
    };

    match outcome {
        Some(result) => {
            let summary = result?;
            println!(
                "Read {} pages: {} new, {} status patches, {} refetched, {} unchanged, {} failed",
                summary.pages, summary.inserted, summary.patched, summary.refetched, summary.skipped, summary.failed
            );
        }
        None => {
            warn!("Interrupted, flushing staged records");
            let written = store.flush()?;
            println!("Interrupted; flushed {} staged records", written);
        }
    }
    Ok(())
}

async fn run_refresh(store_args: StoreArgs, http: HttpArgs, urls_file: &std::path::Path) -> Result<(), MainError> {
    let urls = export::read_url_list(urls_file)?;
    let mut store = open_store(&store_args)?;
    let source = build_source(&http, &store_args)?;
    let fetcher = build_fetcher(&http);

    let summary = refresh_urls(&mut store, source, &fetcher, &urls).await?;
    println!(
        "Refreshed {} issues: {} updated, {} unchanged, {} new, {} failed",
        summary.requested, summary.updated, summary.unchanged, summary.inserted, summary.failed
    );
    Ok(())
}

fn run_old_pending(
    store_args: StoreArgs,
    output: &std::path::Path,
    cutoff_months: u32,
    today: Option<chrono::NaiveDate>,
) -> Result<(), MainError> {
    let store = open_store(&store_args)?;
    let today = today.unwrap_or_else(|| chrono::Local::now().date_naive());
    let urls = export::old_pending_urls(&store, store.policy(), today, cutoff_months)?;
    export::write_url_list(output, &urls)?;
    println!("Wrote {} old pending issues to {}", urls.len(), output.display());
    Ok(())
}

async fn run_changed(
    store_args: StoreArgs,
    http: HttpArgs,
    output: &std::path::Path,
    cutoff_months: u32,
    today: Option<chrono::NaiveDate>,
    max_pages: Option<u32>,
) -> Result<(), MainError> {
    let mut store = open_store(&store_args)?;
    let source = build_source(&http, &store_args)?;
    let today = today.unwrap_or_else(|| chrono::Local::now().date_naive());
    let scan = detect_changed_urls(&mut store, source.as_ref(), today, cutoff_months, max_pages).await?;
    export::write_url_list(output, &scan.urls)?;
    println!(
        "Scanned {} pages; wrote {} changed issues to {}",
        scan.pages,
        scan.urls.len(),
        output.display()
    );
    Ok(())
}

fn run_info(store_args: StoreArgs) -> Result<(), MainError> {
    let store = open_store(&store_args)?;
    let info = export::store_info(&store)?;
    println!("Data directory: {}", store_args.data_dir.display());
    println!("Partitions:     {}", info.partitions);
    println!("Records:        {}", info.records);
    match (info.oldest, info.newest_partition) {
        (Some(oldest), Some(newest)) => println!("Range:          {} .. {}", oldest, newest),
        _ => println!("Range:          (empty)"),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), MainError> {
    match cli.command {
        Commands::Crawl {
            store,
            http,
            start_page,
            until_date,
            stop_on_known,
            resume,
            max_pages,
            page_delay_ms,
        } => {
            let config = CrawlConfig {
                start_page,
                until_date,
                stop_on_known,
                resume,
                page_delay: Duration::from_millis(page_delay_ms),
                max_pages,
            };
            run_crawl(store, http, config).await
        }
        Commands::Refresh { store, http, urls_file } => run_refresh(store, http, &urls_file).await,
        Commands::OldPending {
            store,
            output,
            cutoff_months,
            today,
        } => run_old_pending(store, &output, cutoff_months, today),
        Commands::Changed {
            store,
            http,
            output,
            cutoff_months,
            today,
            max_pages,
        } => run_changed(store, http, &output, cutoff_months, today, max_pages).await,
        Commands::Info { store } => run_info(store),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(e) = logging::init_logging(&cli.log_dir, &cli.log_level) {
        let err = MainError::Logging(e.to_string());
        eprintln!("{}", err);
        return ExitCode::from(err.exit_code());
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
