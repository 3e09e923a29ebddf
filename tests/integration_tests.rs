use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use jarokelo_scraper::partition::{self, PartitionId};
use jarokelo_scraper::resources::{ResourceLimits, ResourceProbe};
use jarokelo_scraper::*;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// In-memory site whose listing and details can change between runs.
struct FakeSite {
    listing: Mutex<Vec<Vec<(String, String)>>>,
    details: Mutex<HashMap<String, IssueRecord>>,
}

impl FakeSite {
    fn new() -> Self {
        Self {
            listing: Mutex::new(Vec::new()),
            details: Mutex::new(HashMap::new()),
        }
    }

    /// Publish records newest first, `per_page` cards per listing page.
    fn publish(&self, mut records: Vec<IssueRecord>, per_page: usize) {
        records.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.url.cmp(&a.url)));
        let pages = records
            .chunks(per_page)
            .map(|chunk| chunk.iter().map(|r| (r.url.clone(), r.status.clone())).collect())
            .collect();
        *self.listing.lock() = pages;
        let mut details = self.details.lock();
        details.clear();
        for record in records {
            details.insert(record.url.clone(), record);
        }
    }
}

#[async_trait]
impl IssueSource for FakeSite {
    fn listing_url(&self, page: u32) -> String {
        format!("fake://listing/{page}")
    }

    async fn fetch_listing(&self, page_url: &str) -> Result<ListingPage, FetchError> {
        let page: usize = page_url
            .rsplit('/')
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| FetchError::InvalidUrl(page_url.to_string()))?;
        let listing = self.listing.lock();
        let items = listing
            .get(page - 1)
            .map(|cards| {
                cards
                    .iter()
                    .map(|(url, status)| ListingItem {
                        url: url.clone(),
                        status: Some(status.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let next_page = (page < listing.len()).then(|| format!("fake://listing/{}", page + 1));
        Ok(ListingPage { items, next_page })
    }

    async fn fetch_issue(&self, url: &str) -> Result<IssueRecord, FetchError> {
        self.details
            .lock()
            .get(url)
            .cloned()
            .ok_or(FetchError::HttpStatus(404))
    }
}

struct Unlimited;

impl ResourceProbe for Unlimited {
    fn process_memory_bytes(&mut self) -> Option<u64> {
        None
    }

    fn free_disk_bytes(&mut self, _path: &Path) -> Option<u64> {
        None
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn open(dir: &TempDir, buffer_size: usize) -> IssueStore {
    let options = StoreOptions {
        buffer_size,
        limits: ResourceLimits::default(),
        policy: StatusPolicy::default(),
    };
    IssueStore::open_with_probe(dir.path(), options, Box::new(Unlimited)).unwrap()
}

fn issues(count: u32) -> Vec<IssueRecord> {
    (0..count)
        .map(|i| {
            let day = date(2025, 9, 30) - chrono::Duration::days(i64::from(i) * 3);
            IssueRecord::new(format!("https://jarokelo.hu/bejelentesek/budapest/{i}"), day, "FOLYAMATBAN")
        })
        .collect()
}

/// Checks the on-disk invariants over every partition.
fn assert_store_consistent(store: &IssueStore) -> usize {
    let policy = store.policy().clone();
    let mut keys = HashSet::new();
    for id in store.partitions().unwrap() {
        let records = store.load_partition(id).unwrap();
        assert!(partition::is_newest_first(&records), "{id} is not newest first");
        for record in records {
            assert_eq!(PartitionId::for_date(record.date), id);
            assert_eq!(record.date.year(), id.year());
            assert_eq!(record.resolution_date.is_some(), policy.is_resolved(&record.status));
            assert!(keys.insert(record.url.clone()), "duplicate key {}", record.url);
        }
    }
    keys.len()
}

async fn crawl(store: &mut IssueStore, site: Arc<FakeSite>, config: CrawlConfig) -> CrawlSummary {
    let mut controller = CrawlController::new(store, site, FetchPolicy::concurrent(4), config);
    controller.run().await.unwrap()
}

#[tokio::test]
async fn test_full_then_incremental_crawl() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir, 7);
    let site = Arc::new(FakeSite::new());

    let mut records = issues(40);
    site.publish(records.clone(), 15);
    let first = crawl(&mut store, site.clone(), CrawlConfig::default()).await;
    assert_eq!(first.inserted, 40);
    assert_eq!(first.pages, 3);
    assert_eq!(store.buffered_len(), 0);
    assert_eq!(assert_store_consistent(&store), 40);

    // Two new reports, one resolved and one with a plain status change.
    records[5].status = "MEGOLDOTT".to_string();
    records[5].resolution_date = Some(date(2025, 10, 2));
    records[6].status = "ELFOGADVA".to_string();
    records.push(IssueRecord::new("https://jarokelo.hu/bejelentesek/budapest/new-1", date(2025, 10, 3), "FOLYAMATBAN"));
    records.push(IssueRecord::new("https://jarokelo.hu/bejelentesek/budapest/new-2", date(2025, 10, 4), "FOLYAMATBAN"));
    site.publish(records.clone(), 15);

    let second = crawl(&mut store, site.clone(), CrawlConfig::default()).await;
    assert_eq!(second.inserted, 2);
    assert_eq!(second.refetched, 1);
    assert_eq!(second.patched, 1);
    assert_eq!(assert_store_consistent(&store), 42);

    let resolved = store.find_by_key(&records[5].url).unwrap().unwrap().record;
    assert_eq!(resolved.resolution_date, Some(date(2025, 10, 2)));
    let october = store.load_partition(PartitionId::new(2025, 10).unwrap()).unwrap();
    assert_eq!(october.len(), 2);
    assert_eq!(october[0].date, date(2025, 10, 4));

    // Nothing changed: a third run only skips.
    let third = crawl(&mut store, site, CrawlConfig::default()).await;
    assert_eq!(third.inserted + third.patched + third.refetched, 0);
    assert_eq!(third.skipped, 42);
}

#[tokio::test]
async fn test_index_sees_external_partition_edits() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir, 50);
    for record in issues(5) {
        store.upsert_ordered(record).unwrap();
    }
    assert_eq!(store.all_known_keys().unwrap().len(), 5);

    // Another process appends a record to the September file.
    let id = PartitionId::new(2025, 9).unwrap();
    let path = store.partition_path(id);
    let mut records = store.load_partition(id).unwrap();
    records.push(IssueRecord::new("https://jarokelo.hu/bejelentesek/budapest/external", date(2025, 9, 1), "FOLYAMATBAN"));
    std::thread::sleep(std::time::Duration::from_millis(20));
    partition::write_partition_atomic(&path, &records).unwrap();

    let keys = store.all_known_keys().unwrap();
    assert_eq!(keys.len(), 6);
    assert!(keys.contains("https://jarokelo.hu/bejelentesek/budapest/external"));
}

#[tokio::test]
async fn test_reopen_cleans_interrupted_write() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = open(&dir, 50);
        for record in issues(3) {
            store.upsert_ordered(record).unwrap();
        }
    }
    let id = PartitionId::new(2025, 9).unwrap();
    let final_path = dir.path().join(id.file_name());
    let tmp = partition::temp_path(&final_path);
    std::fs::write(&tmp, "{\"url\": \"half written").unwrap();

    let store = open(&dir, 50);
    assert!(!tmp.exists());
    assert_eq!(assert_store_consistent(&store), 3);
}

#[tokio::test]
async fn test_staged_records_survive_until_flush() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir, 50);
    let mut seen = store.all_known_keys().unwrap();

    for record in issues(51) {
        let url = record.url.clone();
        assert!(store.stage(record, &seen).unwrap());
        seen.insert(url);
    }
    assert_eq!(store.buffered_len(), 1);
    assert_eq!(assert_store_consistent(&store), 50);

    // A buffered record is visible before it reaches disk.
    let last = "https://jarokelo.hu/bejelentesek/budapest/50";
    assert!(store.find_by_key(last).unwrap().is_some());

    assert_eq!(store.flush().unwrap(), 1);
    assert_eq!(assert_store_consistent(&store), 51);
}
