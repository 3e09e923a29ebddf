pub mod backoff;
pub mod changes;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod export;
pub mod fetch;
pub mod logging;
pub mod models;
pub mod network;
pub mod parser;
pub mod partition;
pub mod refresh;
pub mod resources;
pub mod source;
pub mod store;
pub mod url_index;
pub mod validate;
pub mod write_buffer;

// Re-export main types for library usage
pub use crawler::{CrawlConfig, CrawlController, CrawlError, CrawlSummary, StopReason};
pub use fetch::{BatchError, ConcurrentFetch, FetchOutcome, FetchPolicy, FetchState, FetchStrategy, SequentialFetch};
pub use models::{IssueRecord, ListingItem, ListingPage, StatusPolicy};
pub use network::{FetchError, FetchResult, HttpClient};
pub use partition::PartitionId;
pub use source::{IssueSource, JarokeloSource};
pub use store::{IssueStore, StoreError, StoreOptions};
