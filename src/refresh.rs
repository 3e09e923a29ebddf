use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::crawler::CrawlError;
use crate::fetch::{FetchOutcome, FetchPolicy};
use crate::source::IssueSource;
use crate::store::{IssueStore, UpsertOutcome};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub requested: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Refetch a list of issue URLs and write each result through
/// `upsert_ordered`. Duplicates and blank entries are dropped first.
pub async fn refresh_urls(
    store: &mut IssueStore,
    source: Arc<dyn IssueSource>,
    fetcher: &FetchPolicy,
    urls: &[String],
) -> Result<RefreshSummary, CrawlError> {
    let mut seen = HashSet::new();
    let unique: Vec<String> = urls
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty() && seen.insert(u.to_string()))
        .map(str::to_string)
        .collect();

    let mut summary = RefreshSummary {
        requested: unique.len(),
        ..RefreshSummary::default()
    };
    if unique.is_empty() {
        return Ok(summary);
    }
    info!("Refreshing {} issues", unique.len());

    for outcome in fetcher.fetch_batch(source, &unique).await? {
        match outcome {
            FetchOutcome::Skipped { url, reason } => {
                warn!("Could not refresh {}: {}", url, reason);
                summary.failed += 1;
            }
            FetchOutcome::Fetched(record) => match store.upsert_ordered(record)? {
                UpsertOutcome::Inserted => summary.inserted += 1,
                UpsertOutcome::Updated => summary.updated += 1,
                UpsertOutcome::Unchanged => summary.unchanged += 1,
            },
        }
    }

    info!(
        inserted = summary.inserted,
        updated = summary.updated,
        unchanged = summary.unchanged,
        failed = summary.failed,
        "Refresh finished"
    );
    Ok(summary)
}
