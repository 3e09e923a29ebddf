//! Monthly JSON-Lines partitions.
//!
//! Each calendar month of report dates owns one `YYYY-MM.jsonl` file. Rows are
//! kept newest-first; every rewrite goes through a temporary file in the same
//! directory followed by a rename, so a crash mid-write leaves the previous
//! contents intact.

use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::models::IssueRecord;
use crate::store::StoreError;

/// Calendar month that names a partition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId {
    year: i32,
    month: u32,
}

impl PartitionId {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self, Config::PARTITION_EXTENSION)
    }

    /// Inverse of [`PartitionId::file_name`]; anything else in the data dir is ignored.
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(&format!(".{}", Config::PARTITION_EXTENSION))?;
        let (year, month) = stem.split_once('-')?;
        if year.len() != 4 || month.len() != 2 {
            return None;
        }
        Self::new(year.parse().ok()?, month.parse().ok()?)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Read every row of a partition. A missing file is an empty partition.
///
/// Blank lines are skipped. Any other line that does not decode, or whose date
/// belongs to another month, fails the whole read.
pub fn read_partition(path: &Path, id: PartitionId) -> Result<Vec<IssueRecord>, StoreError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: IssueRecord =
            serde_json::from_str(&line).map_err(|e| StoreError::MalformedPartition {
                path: path.to_path_buf(),
                line: index + 1,
                reason: e.to_string(),
            })?;
        if !id.contains(record.date) {
            return Err(StoreError::MalformedPartition {
                path: path.to_path_buf(),
                line: index + 1,
                reason: format!("record dated {} does not belong to partition {}", record.date, id),
            });
        }
        records.push(record);
    }
    Ok(records)
}

/// Temporary sibling used while rewriting `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}", name, Config::TEMP_EXTENSION))
}

/// Replace the partition contents atomically. An empty slice removes the file.
pub fn write_partition_atomic(path: &Path, records: &[IssueRecord]) -> std::io::Result<()> {
    if records.is_empty() {
        return match fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        };
    }

    let tmp = temp_path(path);
    let result = write_lines(&tmp, records).and_then(|_| fs::rename(&tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_lines(path: &Path, records: &[IssueRecord]) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

/// Insert `record` before the first row that is not newer than it.
///
/// Rows already in newest-first order stay that way; among equal dates the new
/// row goes first. Returns the position it landed at.
pub fn splice_newest_first(records: &mut Vec<IssueRecord>, record: IssueRecord) -> usize {
    let position = records
        .iter()
        .position(|existing| record.date >= existing.date)
        .unwrap_or(records.len());
    records.insert(position, record);
    position
}

/// Whether report dates never increase from first row to last.
pub fn is_newest_first(records: &[IssueRecord]) -> bool {
    records.windows(2).all(|w| w[0].date >= w[1].date)
}
