use chrono::{Duration, NaiveDate};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::models::StatusPolicy;
use crate::partition::PartitionId;
use crate::store::{IssueStore, StoreError};

/// Partition and record counts for the `info` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub partitions: usize,
    pub records: usize,
    pub buffered: usize,
    pub oldest: Option<NaiveDate>,
    pub newest_partition: Option<PartitionId>,
}

pub fn store_info(store: &IssueStore) -> Result<StoreInfo, StoreError> {
    let partitions = store.partitions()?;
    let resume = store.resume_point()?;
    Ok(StoreInfo {
        partitions: partitions.len(),
        records: resume.map_or(0, |r| r.total_records),
        buffered: store.buffered_len(),
        oldest: resume.map(|r| r.oldest_date),
        newest_partition: partitions.first().copied(),
    })
}

/// Date before which an open issue counts as old.
pub fn cutoff_date(today: NaiveDate, cutoff_months: u32) -> NaiveDate {
    today - Duration::days(i64::from(cutoff_months) * Config::DAYS_PER_CUTOFF_MONTH)
}

/// Keys of issues reported before the cutoff whose status is not closed,
/// sorted.
pub fn old_pending_urls(
    store: &IssueStore,
    policy: &StatusPolicy,
    today: NaiveDate,
    cutoff_months: u32,
) -> Result<Vec<String>, StoreError> {
    let cutoff = cutoff_date(today, cutoff_months);
    let mut urls = Vec::new();
    for id in store.partitions()? {
        // A month starting on or after the cutoff holds no old records.
        let Some(first_day) = NaiveDate::from_ymd_opt(id.year(), id.month(), 1) else {
            continue;
        };
        if first_day >= cutoff {
            continue;
        }
        for record in store.load_partition(id)? {
            if record.date < cutoff && !policy.is_closed(&record.status) {
                urls.push(record.url);
            }
        }
    }
    urls.sort();
    urls.dedup();
    info!(cutoff = %cutoff, "Found {} old pending issues", urls.len());
    Ok(urls)
}

/// Read a newline-separated URL file. Blank lines and `#` comments are
/// ignored.
pub fn read_url_list(path: &Path) -> std::io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

pub fn write_url_list(path: &Path, urls: &[String]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for url in urls {
        writeln!(writer, "{}", url)?;
    }
    writer.flush()
}
