//! Listing-driven crawl loop.
//!
//! Each listing page is read newest first. Unknown keys are fetched in one
//! batch per page and staged; known keys are compared against the stored
//! status and either skipped, patched in place, or refetched when the change
//! crosses the resolved boundary.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::fetch::{BatchError, FetchOutcome, FetchPolicy};
use crate::models::{IssueRecord, StatusPolicy};
use crate::network::FetchError;
use crate::source::IssueSource;
use crate::store::{IssueStore, PatchOutcome, StoreError};

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Listing unavailable: {failures} consecutive pages failed to load (last page {page})")]
    ListingUnavailable { page: u32, failures: u32 },
}

impl CrawlError {
    /// True when the failure came from the network rather than local data.
    pub fn is_network(&self) -> bool {
        match self {
            CrawlError::ListingUnavailable { .. } => true,
            CrawlError::Fetch(e) | CrawlError::Batch(BatchError::Fatal(e)) => !e.is_fatal(),
            CrawlError::Batch(BatchError::Systemic(_)) => true,
            CrawlError::Store(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub start_page: u32,
    /// Inclusive lower bound on report dates to store.
    pub until_date: Option<NaiveDate>,
    pub stop_on_known: bool,
    pub resume: bool,
    pub page_delay: Duration,
    pub max_pages: Option<u32>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            start_page: 1,
            until_date: None,
            stop_on_known: false,
            resume: false,
            page_delay: Duration::from_millis(Config::DEFAULT_PAGE_DELAY_MS),
            max_pages: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemAction {
    Insert,
    Skip,
    PatchStatus,
    FullRefetch,
}

/// Decide what to do with one listing card given what the store holds.
pub fn classify(listed_status: &str, stored: Option<&IssueRecord>, policy: &StatusPolicy) -> ItemAction {
    match stored {
        None => ItemAction::Insert,
        Some(record) if StatusPolicy::same_label(&record.status, listed_status) => ItemAction::Skip,
        Some(record) if policy.crosses_resolved_boundary(&record.status, listed_status) => {
            ItemAction::FullRefetch
        }
        Some(_) => ItemAction::PatchStatus,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    NoNextPage,
    ReachedKnown,
    PassedUntilDate,
    MaxPages,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub pages: u32,
    pub seen: usize,
    pub inserted: usize,
    pub patched: usize,
    pub refetched: usize,
    pub skipped: usize,
    pub failed: usize,
    pub stop_reason: Option<StopReason>,
}

impl CrawlSummary {
    fn new() -> Self {
        Self {
            pages: 0,
            seen: 0,
            inserted: 0,
            patched: 0,
            refetched: 0,
            skipped: 0,
            failed: 0,
            stop_reason: None,
        }
    }
}

pub struct CrawlController<'a> {
    store: &'a mut IssueStore,
    source: Arc<dyn IssueSource>,
    fetcher: FetchPolicy,
    policy: StatusPolicy,
    config: CrawlConfig,
}

impl<'a> CrawlController<'a> {
    pub fn new(
        store: &'a mut IssueStore,
        source: Arc<dyn IssueSource>,
        fetcher: FetchPolicy,
        config: CrawlConfig,
    ) -> Self {
        let policy = store.policy().clone();
        Self {
            store,
            source,
            fetcher,
            policy,
            config,
        }
    }

    pub fn fetcher(&self) -> &FetchPolicy {
        &self.fetcher
    }

    /// Run until a stop condition, then flush whatever is still staged.
    pub async fn run(&mut self) -> Result<CrawlSummary, CrawlError> {
        let result = self.crawl().await;
        match result {
            Ok(summary) => {
                self.store.flush()?;
                info!(
                    pages = summary.pages,
                    seen = summary.seen,
                    inserted = summary.inserted,
                    patched = summary.patched,
                    refetched = summary.refetched,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "Crawl finished ({:?})",
                    summary.stop_reason
                );
                Ok(summary)
            }
            Err(e) => {
                error!("Crawl aborted: {}", e);
                if let Err(flush_error) = self.store.flush() {
                    error!("Final flush after abort failed: {}", flush_error);
                }
                Err(e)
            }
        }
    }

    fn first_page(&self) -> Result<u32, CrawlError> {
        let start = self.config.start_page.max(1);
        if !self.config.resume {
            return Ok(start);
        }
        let Some(point) = self.store.resume_point()? else {
            return Ok(start);
        };
        let estimated = (point.total_records / Config::LISTING_PAGE_SIZE) as u32 + 1;
        info!(
            oldest = %point.oldest_date,
            records = point.total_records,
            "Resuming around listing page {}",
            estimated
        );
        Ok(start.max(estimated))
    }

    async fn crawl(&mut self) -> Result<CrawlSummary, CrawlError> {
        let mut summary = CrawlSummary::new();
        let mut known = self.store.all_known_keys()?;
        let stop_on_known = self.config.stop_on_known && !self.config.resume;
        let mut page = self.first_page()?;
        let mut consecutive_failures = 0;
        info!(known = known.len(), start_page = page, "Starting crawl");

        loop {
            if let Some(max) = self.config.max_pages
                && summary.pages >= max
            {
                summary.stop_reason = Some(StopReason::MaxPages);
                break;
            }

            let page_url = self.source.listing_url(page);
            let listing = match self.source.fetch_listing(&page_url).await {
                Ok(listing) => {
                    consecutive_failures = 0;
                    listing
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        "Listing page {} failed ({}/{}): {}",
                        page,
                        consecutive_failures,
                        Config::MAX_CONSECUTIVE_LISTING_FAILURES,
                        e
                    );
                    if consecutive_failures >= Config::MAX_CONSECUTIVE_LISTING_FAILURES {
                        return Err(CrawlError::ListingUnavailable {
                            page,
                            failures: consecutive_failures,
                        });
                    }
                    page += 1;
                    continue;
                }
            };
            summary.pages += 1;

            let mut new_urls = Vec::new();
            let mut hit_known = false;
            let mut passed_until_known = false;
            for item in &listing.items {
                summary.seen += 1;
                let is_known = known.contains(&item.url);
                hit_known |= is_known;

                let Some(status) = item.status.as_deref() else {
                    warn!("No status badge for {}, skipping", item.url);
                    summary.skipped += 1;
                    continue;
                };

                let stored = if is_known {
                    self.store.find_by_key(&item.url)?.map(|found| found.record)
                } else {
                    None
                };
                if let Some(until) = self.config.until_date
                    && let Some(record) = &stored
                    && record.date < until
                {
                    passed_until_known = true;
                }

                match classify(status, stored.as_ref(), &self.policy) {
                    ItemAction::Insert => {
                        if !new_urls.contains(&item.url) {
                            new_urls.push(item.url.clone());
                        }
                    }
                    ItemAction::Skip => summary.skipped += 1,
                    ItemAction::PatchStatus => {
                        if self.store.patch_status(&item.url, status)? == PatchOutcome::Patched {
                            debug!("Patched status of {} to {}", item.url, status);
                            summary.patched += 1;
                        }
                    }
                    ItemAction::FullRefetch => {
                        if self.refetch(&item.url).await? {
                            summary.refetched += 1;
                        } else {
                            summary.failed += 1;
                        }
                    }
                }
            }

            let passed_until =
                self.insert_new(&new_urls, &mut known, &mut summary).await? || passed_until_known;

            info!(
                page,
                items = listing.items.len(),
                new = new_urls.len(),
                inserted = summary.inserted,
                patched = summary.patched,
                refetched = summary.refetched,
                "Processed listing page"
            );

            if passed_until {
                summary.stop_reason = Some(StopReason::PassedUntilDate);
                break;
            }
            if stop_on_known && hit_known {
                summary.stop_reason = Some(StopReason::ReachedKnown);
                break;
            }
            if listing.next_page.is_none() {
                summary.stop_reason = Some(StopReason::NoNextPage);
                break;
            }

            page += 1;
            if !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        Ok(summary)
    }

    /// Refetch a known record whose status crossed the resolved boundary.
    /// Returns `false` when the fetch failed without being fatal.
    async fn refetch(&mut self, url: &str) -> Result<bool, CrawlError> {
        match self.fetcher.fetch_one(self.source.as_ref(), url).await {
            Ok(record) => {
                debug!("Refetched {} (status {})", url, record.status);
                self.store.replace(url, record)?;
                Ok(true)
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                warn!("Refetch of {} failed: {}", url, e);
                Ok(false)
            }
        }
    }

    /// Fetch and stage unseen keys. Returns whether a record older than the
    /// until-date turned up.
    async fn insert_new(
        &mut self,
        urls: &[String],
        known: &mut HashSet<String>,
        summary: &mut CrawlSummary,
    ) -> Result<bool, CrawlError> {
        let outcomes = self.fetcher.fetch_batch(self.source.clone(), urls).await?;
        let mut passed_until = false;

        for outcome in outcomes {
            match outcome {
                FetchOutcome::Skipped { .. } => summary.failed += 1,
                FetchOutcome::Fetched(record) => {
                    if let Some(until) = self.config.until_date
                        && record.date < until
                    {
                        debug!("{} dated {} is before {}, not stored", record.url, record.date, until);
                        passed_until = true;
                        continue;
                    }
                    let url = record.url.clone();
                    if self.store.stage(record, known)? {
                        known.insert(url);
                        summary.inserted += 1;
                    }
                }
            }
        }
        Ok(passed_until)
    }
}
