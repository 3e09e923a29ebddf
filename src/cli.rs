use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::models::StatusPolicy;

/// Command line for the incremental jarokelo.hu scraper.
/// Exit codes: 0=success, 2=invalid arguments, 3=store, I/O or data error, 4=network error
#[derive(Parser, Debug)]
#[command(name = "jarokelo-scraper")]
#[command(about = "Incremental scraper for jarokelo.hu issue reports")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, default_value = "info", help = "Default log level when RUST_LOG is unset")]
    pub log_level: String,

    #[arg(long, global = true, default_value = "logs", help = "Directory for rolling log files")]
    pub log_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(
        short,
        long,
        env = "JAROKELO_DATA_DIR",
        default_value = "./data/raw",
        help = "Directory holding the monthly JSONL partitions"
    )]
    pub data_dir: PathBuf,

    #[arg(
        long = "resolved-label",
        help = "Status label meaning resolved (repeatable, default MEGOLDOTT)"
    )]
    pub resolved_labels: Vec<String>,

    #[arg(long, default_value_t = Config::DEFAULT_BUFFER_SIZE, help = "Records staged before a flush")]
    pub buffer_size: usize,
}

impl StoreArgs {
    pub fn status_policy(&self) -> StatusPolicy {
        if self.resolved_labels.is_empty() {
            StatusPolicy::default()
        } else {
            StatusPolicy::new(&self.resolved_labels)
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct HttpArgs {
    #[arg(short, long, default_value = Config::USER_AGENT, help = "User agent string for requests")]
    pub user_agent: String,

    #[arg(
        short,
        long,
        default_value_t = Config::REQUEST_TIMEOUT_SECS,
        help = "Request timeout in seconds"
    )]
    pub timeout: u64,

    #[arg(
        short = 'w',
        long,
        default_value_t = Config::DEFAULT_MAX_CONCURRENT,
        help = "Concurrent detail-page fetches"
    )]
    pub max_concurrent: usize,

    #[arg(long, help = "Fetch detail pages one at a time")]
    pub sequential: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Walk the listing pages and bring the store up to date.
    Crawl {
        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        http: HttpArgs,

        #[arg(long, default_value_t = 1, help = "Listing page to start from")]
        start_page: u32,

        #[arg(long, value_parser = parse_date, help = "Oldest report date to store (YYYY-MM-DD, inclusive)")]
        until_date: Option<NaiveDate>,

        #[arg(long, help = "Stop after the first listing page that holds a known issue")]
        stop_on_known: bool,

        #[arg(long, help = "Skip ahead based on what is already stored")]
        resume: bool,

        #[arg(long, help = "Maximum number of listing pages to read")]
        max_pages: Option<u32>,

        #[arg(
            long,
            default_value_t = Config::DEFAULT_PAGE_DELAY_MS,
            help = "Delay between listing pages in milliseconds"
        )]
        page_delay_ms: u64,
    },

    /// Refetch the issues listed in a file and update them in place.
    Refresh {
        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        http: HttpArgs,

        #[arg(short = 'f', long, help = "Newline-separated list of issue URLs")]
        urls_file: PathBuf,
    },

    /// Write the URLs of old issues that are still open.
    OldPending {
        #[command(flatten)]
        store: StoreArgs,

        #[arg(short, long, help = "Output file, one URL per line")]
        output: PathBuf,

        #[arg(long, default_value_t = Config::DEFAULT_CUTOFF_MONTHS, help = "Age in months (30 days each)")]
        cutoff_months: u32,

        #[arg(long, value_parser = parse_date, help = "Reference date instead of today (YYYY-MM-DD)")]
        today: Option<NaiveDate>,
    },

    /// Scan recent listing pages for status changes without fetching details.
    Changed {
        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        http: HttpArgs,

        #[arg(
            short,
            long,
            default_value = Config::DEFAULT_CHANGED_URLS_FILE,
            help = "Output file, one URL per line"
        )]
        output: PathBuf,

        #[arg(long, default_value_t = Config::DEFAULT_CUTOFF_MONTHS, help = "Only reports this many months old (30 days each)")]
        cutoff_months: u32,

        #[arg(long, value_parser = parse_date, help = "Reference date instead of today (YYYY-MM-DD)")]
        today: Option<NaiveDate>,

        #[arg(long, help = "Maximum number of listing pages to scan")]
        max_pages: Option<u32>,
    },

    /// Print partition and record counts.
    Info {
        #[command(flatten)]
        store: StoreArgs,
    },
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

impl Cli {
    /// On error, clap prints help and exits with code 2.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
