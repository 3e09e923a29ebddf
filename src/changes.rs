//! Listing-only scan for recent issues whose status moved.
//!
//! No detail page is fetched. Each card's status is compared with the stored
//! record, and the resulting URLs are meant to be fed to `refresh`.

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::crawler::{classify, CrawlError, ItemAction};
use crate::export::cutoff_date;
use crate::models::{IssueRecord, StatusPolicy};
use crate::source::IssueSource;
use crate::store::IssueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    EmptyPage,
    /// The page listed no stored report dated on or after the cutoff.
    NoRecentKnown,
    NoNextPage,
    MaxPages,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeScan {
    pub pages: u32,
    /// Sorted, without duplicates.
    pub urls: Vec<String>,
    pub stop_reason: ScanStop,
}

/// True when the listed status differs from the stored one, or the card
/// says resolved while the record has no resolution date yet.
pub fn status_changed(listed_status: &str, stored: &IssueRecord, policy: &StatusPolicy) -> bool {
    classify(listed_status, Some(stored), policy) != ItemAction::Skip
        || (policy.is_resolved(listed_status) && stored.resolution_date.is_none())
}

/// Walk listing pages from the first one and collect known URLs reported
/// within `cutoff_months` of `today` whose status changed.
pub async fn detect_changed_urls(
    store: &mut IssueStore,
    source: &dyn IssueSource,
    today: NaiveDate,
    cutoff_months: u32,
    max_pages: Option<u32>,
) -> Result<ChangeScan, CrawlError> {
    let cutoff = cutoff_date(today, cutoff_months);
    let known = store.all_known_keys()?;
    let policy = store.policy().clone();
    let max_pages = max_pages.unwrap_or(Config::CHANGE_SCAN_MAX_PAGES);
    info!(known = known.len(), cutoff = %cutoff, "Scanning listing pages for status changes");

    let mut urls = Vec::new();
    let mut pages = 0;
    let mut page = 1;
    let mut consecutive_failures = 0;

    let stop_reason = loop {
        if pages >= max_pages {
            break ScanStop::MaxPages;
        }

        let page_url = source.listing_url(page);
        let listing = match source.fetch_listing(&page_url).await {
            Ok(listing) => {
                consecutive_failures = 0;
                listing
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                consecutive_failures += 1;
                warn!("Listing page {} failed during change scan: {}", page, e);
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
        pages += 1;

        if listing.items.is_empty() {
            break ScanStop::EmptyPage;
        }

        let mut known_on_page = false;
        let mut recent_on_page = false;
        for item in &listing.items {
            if !known.contains(&item.url) {
                continue;
            }
            known_on_page = true;
            let Some(found) = store.find_by_key(&item.url)? else {
                continue;
            };
            if found.record.date < cutoff {
                continue;
            }
            recent_on_page = true;
            if let Some(status) = item.status.as_deref()
                && status_changed(status, &found.record, &policy)
            {
                debug!("Status of {} changed: {} -> {}", item.url, found.record.status, status);
                urls.push(item.url.clone());
            }
        }

        // A page of only unseen reports says nothing about the cutoff.
        if known_on_page && !recent_on_page {
            break ScanStop::NoRecentKnown;
        }
        if listing.next_page.is_none() {
            break ScanStop::NoNextPage;
        }
        page += 1;
    };

    urls.sort();
    urls.dedup();
    info!(pages, "Detected {} recently changed statuses ({:?})", urls.len(), stop_reason);
    Ok(ChangeScan {
        pages,
        urls,
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListingItem, ListingPage};
    use crate::network::FetchError;
    use crate::resources::tests::StaticProbe;
    use crate::store::StoreOptions;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Listing-only site. Any detail fetch is recorded so tests can assert
    /// there were none.
    struct ListingOnly {
        pages: Vec<Vec<(&'static str, &'static str)>>,
        failing_pages: HashSet<u32>,
        detail_calls: Mutex<usize>,
    }

    impl ListingOnly {
        fn new(pages: Vec<Vec<(&'static str, &'static str)>>) -> Self {
            Self {
                pages,
                failing_pages: HashSet::new(),
                detail_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl IssueSource for ListingOnly {
        fn listing_url(&self, page: u32) -> String {
            format!("mock://listing/{page}")
        }

        async fn fetch_listing(&self, page_url: &str) -> Result<ListingPage, FetchError> {
            let page: u32 = page_url.rsplit('/').next().and_then(|p| p.parse().ok()).unwrap_or(1);
            if self.failing_pages.contains(&page) {
                return Err(FetchError::Timeout);
            }
            let items = self
                .pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|(url, status)| ListingItem {
                    url: url.to_string(),
                    status: (!status.is_empty()).then(|| status.to_string()),
                })
                .collect();
            let next_page = ((page as usize) < self.pages.len()).then(|| self.listing_url(page + 1));
            Ok(ListingPage { items, next_page })
        }

        async fn fetch_issue(&self, _url: &str) -> Result<IssueRecord, FetchError> {
            *self.detail_calls.lock() += 1;
            Err(FetchError::HttpStatus(404))
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn open_store(dir: &TempDir) -> IssueStore {
        let probe = StaticProbe {
            memory: None,
            free_disk: None,
        };
        IssueStore::open_with_probe(dir.path(), StoreOptions::default(), Box::new(probe)).unwrap()
    }

    fn seeded_store(dir: &TempDir) -> IssueStore {
        let mut store = open_store(dir);
        for (url, d, status) in [
            ("https://x/a", "2025-09-20", "FOLYAMATBAN"),
            ("https://x/b", "2025-09-15", "FOLYAMATBAN"),
            ("https://x/c", "2025-09-10", "ELFOGADVA"),
            ("https://x/d", "2025-08-01", "FOLYAMATBAN"),
            ("https://x/old", "2025-05-01", "FOLYAMATBAN"),
        ] {
            store.upsert_ordered(IssueRecord::new(url, date(d), status)).unwrap();
        }
        store
    }

    #[test]
    fn test_status_changed() {
        let policy = StatusPolicy::default();
        let stored = IssueRecord::new("https://x/1", date("2025-09-01"), "FOLYAMATBAN");
        assert!(!status_changed("folyamatban", &stored, &policy));
        assert!(status_changed("ELFOGADVA", &stored, &policy));
        assert!(status_changed("MEGOLDOTT", &stored, &policy));

        // Resolved label already stored but the resolution date never landed.
        let half = IssueRecord::new("https://x/1", date("2025-09-01"), "MEGOLDOTT");
        assert!(status_changed("MEGOLDOTT", &half, &policy));
        let done = half.with_resolution_date(date("2025-09-05"));
        assert!(!status_changed("MEGOLDOTT", &done, &policy));
    }

    #[tokio::test]
    async fn test_scan_reports_recent_changes_only() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded_store(&dir);
        let site = ListingOnly::new(vec![
            vec![("https://x/new", "FOLYAMATBAN"), ("https://x/a", "MEGOLDOTT"), ("https://x/b", "FOLYAMATBAN")],
            vec![("https://x/c", "FOLYAMATBAN"), ("https://x/d", "ELFOGADVA"), ("https://x/b", "")],
            vec![("https://x/old", "MEGOLDOTT")],
            vec![("https://x/never", "FOLYAMATBAN")],
        ]);

        let scan = detect_changed_urls(&mut store, &site, date("2025-10-01"), 3, None).await.unwrap();
        assert_eq!(scan.urls, vec!["https://x/a".to_string(), "https://x/c".to_string(), "https://x/d".to_string()]);
        assert_eq!(scan.pages, 3);
        assert_eq!(scan.stop_reason, ScanStop::NoRecentKnown);
        assert_eq!(*site.detail_calls.lock(), 0);

        // Nothing was written back.
        let a = store.find_by_key("https://x/a").unwrap().unwrap().record;
        assert_eq!(a.status, "FOLYAMATBAN");
    }

    #[tokio::test]
    async fn test_scan_continues_past_pages_of_new_reports() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded_store(&dir);
        let site = ListingOnly::new(vec![
            vec![("https://x/new-1", "FOLYAMATBAN"), ("https://x/new-2", "FOLYAMATBAN")],
            vec![("https://x/b", "ELFOGADVA")],
            vec![],
        ]);

        let scan = detect_changed_urls(&mut store, &site, date("2025-10-01"), 3, None).await.unwrap();
        assert_eq!(scan.urls, vec!["https://x/b".to_string()]);
        assert_eq!(scan.pages, 3);
        assert_eq!(scan.stop_reason, ScanStop::EmptyPage);
    }

    #[tokio::test]
    async fn test_scan_page_limits() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded_store(&dir);
        let site = ListingOnly::new(vec![
            vec![("https://x/a", "ELFOGADVA")],
            vec![("https://x/b", "ELFOGADVA")],
        ]);

        let scan = detect_changed_urls(&mut store, &site, date("2025-10-01"), 3, Some(1)).await.unwrap();
        assert_eq!(scan.urls, vec!["https://x/a".to_string()]);
        assert_eq!(scan.stop_reason, ScanStop::MaxPages);

        let scan = detect_changed_urls(&mut store, &site, date("2025-10-01"), 3, None).await.unwrap();
        assert_eq!(scan.urls.len(), 2);
        assert_eq!(scan.stop_reason, ScanStop::NoNextPage);
    }

    #[tokio::test]
    async fn test_scan_listing_failures() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded_store(&dir);

        let mut flaky = ListingOnly::new(vec![vec![], vec![("https://x/a", "ELFOGADVA")]]);
        flaky.failing_pages.insert(1);
        let scan = detect_changed_urls(&mut store, &flaky, date("2025-10-01"), 3, None).await.unwrap();
        assert_eq!(scan.urls, vec!["https://x/a".to_string()]);

        let mut down = ListingOnly::new(vec![vec![], vec![], vec![], vec![]]);
        down.failing_pages.extend([1, 2, 3]);
        let err = detect_changed_urls(&mut store, &down, date("2025-10-01"), 3, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::ListingUnavailable { failures: 3, .. }));
    }
}
