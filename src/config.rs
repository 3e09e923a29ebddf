// Global configuration constants - single source of truth

pub struct Config;

impl Config {
    // Site
    pub const BASE_URL: &'static str = "https://jarokelo.hu/bejelentesek";
    pub const SITE_ORIGIN: &'static str = "https://jarokelo.hu";
    pub const USER_AGENT: &'static str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
    pub const LISTING_PAGE_SIZE: usize = 15;

    // Status labels
    pub const RESOLVED_LABELS: &'static [&'static str] = &["MEGOLDOTT"];
    pub const CLOSED_LABELS: &'static [&'static str] = &["MEGOLDOTT", "TÖRÖLT", "MEGOLDATLAN"];

    // Write buffer
    pub const DEFAULT_BUFFER_SIZE: usize = 50;
    pub const RESOURCE_CHECK_INTERVAL: usize = 10;
    pub const MAX_PROCESS_MEMORY_BYTES: u64 = 1024 * 1024 * 1024; // 1 GiB
    pub const MIN_FREE_DISK_BYTES: u64 = 512 * 1024 * 1024; // 512 MiB

    // Fetching
    pub const DEFAULT_MAX_CONCURRENT: usize = 10;
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const MAX_RETRIES: u32 = 2;
    pub const RETRY_BACKOFF_MS: u64 = 500;
    pub const RETRY_BACKOFF_MAX_MS: u64 = 8_000;
    pub const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024; // 10MB
    pub const POOL_IDLE_PER_HOST: usize = 16;
    pub const POOL_IDLE_TIMEOUT_SECS: u64 = 30;

    // Crawl loop
    pub const MAX_CONSECUTIVE_LISTING_FAILURES: u32 = 3;
    pub const DEFAULT_PAGE_DELAY_MS: u64 = 0;

    // Maintenance
    pub const DEFAULT_CUTOFF_MONTHS: u32 = 3;
    pub const DAYS_PER_CUTOFF_MONTH: i64 = 30;
    pub const CHANGE_SCAN_MAX_PAGES: u32 = 2000;
    pub const DEFAULT_CHANGED_URLS_FILE: &'static str = "recent_changed_urls.txt";

    // On-disk artifacts
    pub const PARTITION_EXTENSION: &'static str = "jsonl";
    pub const TEMP_EXTENSION: &'static str = "tmp";
    pub const INDEX_KEYS_FILE: &'static str = ".url_index.keys.bin";
    pub const INDEX_MTIMES_FILE: &'static str = ".url_index.mtimes.bin";
}
