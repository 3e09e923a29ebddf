//! Persistent store: monthly partitions, the write buffer and the key cache
//! behind one owner.
//!
//! The store assumes a single process and a single caller at a time. Every
//! mutation that reaches disk goes through an atomic partition rewrite and
//! invalidates the key cache.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{IssueRecord, StatusPolicy};
use crate::partition::{self, PartitionId};
use crate::resources::{ResourceLimits, ResourceMonitor, ResourceProbe, SystemProbe};
use crate::url_index::{IndexError, UrlIndex};
use crate::validate::{validate_record, ValidationError};
use crate::write_buffer::WriteBuffer;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed partition {path} at line {line}: {reason}")]
    MalformedPartition {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("No record with key {key}")]
    NotFound { key: String },

    #[error("Record key {found} does not match {expected}")]
    KeyMismatch { expected: String, found: String },

    #[error("Status change {old:?} -> {new:?} for {key} crosses the resolved boundary and needs a full refetch")]
    ResolutionBoundary {
        key: String,
        old: String,
        new: String,
    },

    #[error("Flush of partition {partition} failed: {source}")]
    Flush {
        partition: PartitionId,
        #[source]
        source: std::io::Error,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("URL index error: {0}")]
    Index(#[from] IndexError),
}

impl StoreError {
    /// Errors that mean the data on disk can no longer be trusted.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedPartition { .. } | Self::Validation(_) | Self::Flush { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub buffer_size: usize,
    pub limits: ResourceLimits,
    pub policy: StatusPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            buffer_size: Config::DEFAULT_BUFFER_SIZE,
            limits: ResourceLimits::default(),
            policy: StatusPolicy::default(),
        }
    }
}

/// Where `find_by_key` located a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLocation {
    Buffered { partition: PartitionId },
    OnDisk { partition: PartitionId, position: usize },
}

impl RecordLocation {
    pub fn partition(&self) -> PartitionId {
        match self {
            Self::Buffered { partition } | Self::OnDisk { partition, .. } => *partition,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoundRecord {
    pub record: IssueRecord,
    pub location: RecordLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub oldest_date: NaiveDate,
    pub total_records: usize,
}

pub struct IssueStore {
    data_dir: PathBuf,
    buffer: WriteBuffer,
    index: UrlIndex,
    monitor: ResourceMonitor,
    policy: StatusPolicy,
}

impl IssueStore {
    pub fn open(data_dir: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StoreError> {
        Self::open_with_probe(data_dir, options, Box::new(SystemProbe::new()))
    }

    pub fn open_with_probe(
        data_dir: impl AsRef<Path>,
        options: StoreOptions,
        probe: Box<dyn ResourceProbe>,
    ) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        remove_stale_temp_files(&data_dir)?;

        Ok(Self {
            index: UrlIndex::new(&data_dir),
            buffer: WriteBuffer::new(options.buffer_size),
            monitor: ResourceMonitor::new(probe, options.limits),
            policy: options.policy,
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn policy(&self) -> &StatusPolicy {
        &self.policy
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn partition_path(&self, id: PartitionId) -> PathBuf {
        self.data_dir.join(id.file_name())
    }

    /// Partition ids present on disk, newest first.
    pub fn partitions(&self) -> Result<Vec<PartitionId>, StoreError> {
        list_partitions(&self.data_dir)
    }

    pub fn load_partition(&self, id: PartitionId) -> Result<Vec<IssueRecord>, StoreError> {
        partition::read_partition(&self.partition_path(id), id)
    }

    /// Buffer first, then disk partitions newest first.
    pub fn find_by_key(&self, key: &str) -> Result<Option<FoundRecord>, StoreError> {
        if let Some((partition, record)) = self.buffer.get(key) {
            return Ok(Some(FoundRecord {
                record: record.clone(),
                location: RecordLocation::Buffered { partition },
            }));
        }

        for id in self.partitions()? {
            let records = self.load_partition(id)?;
            if let Some(position) = records.iter().position(|r| r.url == key) {
                return Ok(Some(FoundRecord {
                    record: records[position].clone(),
                    location: RecordLocation::OnDisk {
                        partition: id,
                        position,
                    },
                }));
            }
        }
        Ok(None)
    }

    /// Insert a new record in date order, or overwrite an existing one when its
    /// status or resolution date differs.
    pub fn upsert_ordered(&mut self, record: IssueRecord) -> Result<UpsertOutcome, StoreError> {
        validate_record(&record, &self.policy)?;

        match self.find_by_key(&record.url)? {
            None => {
                let id = PartitionId::for_date(record.date);
                let mut records = self.load_partition(id)?;
                partition::splice_newest_first(&mut records, record);
                self.write_partition(id, &records)?;
                self.invalidate_index()?;
                Ok(UpsertOutcome::Inserted)
            }
            Some(found) => {
                if found.record.status == record.status
                    && found.record.resolution_date == record.resolution_date
                {
                    return Ok(UpsertOutcome::Unchanged);
                }
                self.overwrite(found.location, record)?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    /// Unconditionally overwrite the full content of an existing record.
    pub fn replace(&mut self, key: &str, record: IssueRecord) -> Result<(), StoreError> {
        if record.url != key {
            return Err(StoreError::KeyMismatch {
                expected: key.to_string(),
                found: record.url,
            });
        }
        validate_record(&record, &self.policy)?;

        let found = self.find_by_key(key)?.ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        self.overwrite(found.location, record)
    }

    /// Change only the status label of an existing record.
    pub fn patch_status(&mut self, key: &str, new_status: &str) -> Result<PatchOutcome, StoreError> {
        let found = self.find_by_key(key)?.ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;

        if StatusPolicy::same_label(&found.record.status, new_status) {
            return Ok(PatchOutcome::Unchanged);
        }
        if self
            .policy
            .crosses_resolved_boundary(&found.record.status, new_status)
        {
            return Err(StoreError::ResolutionBoundary {
                key: key.to_string(),
                old: found.record.status,
                new: new_status.to_string(),
            });
        }

        match found.location {
            RecordLocation::Buffered { .. } => {
                if let Some(staged) = self.buffer.get_mut(key) {
                    staged.status = new_status.to_string();
                }
            }
            RecordLocation::OnDisk {
                partition,
                position,
            } => {
                let mut records = self.load_partition(partition)?;
                records[position].status = new_status.to_string();
                self.write_partition(partition, &records)?;
                self.invalidate_index()?;
            }
        }
        Ok(PatchOutcome::Patched)
    }

    fn overwrite(&mut self, location: RecordLocation, record: IssueRecord) -> Result<(), StoreError> {
        let target = PartitionId::for_date(record.date);
        match location {
            RecordLocation::Buffered { .. } => {
                self.buffer.replace(record);
            }
            RecordLocation::OnDisk {
                partition,
                position,
            } => {
                let mut records = self.load_partition(partition)?;
                records.remove(position);
                if partition == target {
                    partition::splice_newest_first(&mut records, record);
                    self.write_partition(partition, &records)?;
                } else {
                    debug!(from = %partition, to = %target, "Relocating {}", record.url);
                    let mut moved_into = self.load_partition(target)?;
                    partition::splice_newest_first(&mut moved_into, record);
                    self.write_partition(target, &moved_into)?;
                    self.write_partition(partition, &records)?;
                }
                self.invalidate_index()?;
            }
        }
        Ok(())
    }

    /// Stage a fetched record for a later batched merge.
    ///
    /// Returns `false` when the key is in `seen` or already staged. Flushes
    /// when the buffer reaches capacity or the resource monitor reports
    /// pressure.
    pub fn stage(&mut self, record: IssueRecord, seen: &HashSet<String>) -> Result<bool, StoreError> {
        if seen.contains(&record.url) || self.buffer.contains(&record.url) {
            return Ok(false);
        }
        validate_record(&record, &self.policy)?;
        self.buffer.stage(record, seen);

        if self.buffer.is_full() {
            debug!(staged = self.buffer.len(), "Write buffer full, flushing");
            self.flush()?;
        } else if let Some(pressure) = self.monitor.tick(&self.data_dir) {
            warn!("Resource pressure ({}), flushing early", pressure);
            self.flush()?;
        }
        Ok(true)
    }

    /// Merge every staged partition into its file. No-op on an empty buffer.
    pub fn flush(&mut self) -> Result<usize, StoreError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        for id in self.buffer.partitions() {
            let mut staged = self.buffer.peek_partition(id).to_vec();
            staged.sort_by(|a, b| b.date.cmp(&a.date));

            let mut records = self.load_partition(id)?;
            let mut present: HashSet<String> = records.iter().map(|r| r.url.clone()).collect();
            let mut merged = 0;
            for record in staged {
                if !present.insert(record.url.clone()) {
                    warn!("Skipping staged duplicate of stored key {}", record.url);
                    continue;
                }
                partition::splice_newest_first(&mut records, record);
                merged += 1;
            }

            partition::write_partition_atomic(&self.partition_path(id), &records).map_err(
                |source| StoreError::Flush {
                    partition: id,
                    source,
                },
            )?;
            self.buffer.take_partition(id);
            debug!(partition = %id, merged, "Flushed partition");
            written += merged;
        }

        self.invalidate_index()?;
        info!("Flushed {} records to disk", written);
        Ok(written)
    }

    /// Keys on disk plus keys waiting in the buffer.
    pub fn all_known_keys(&mut self) -> Result<HashSet<String>, StoreError> {
        let data_dir = self.data_dir.clone();
        let mut keys = self.index.all_known_keys(|| scan_keys(&data_dir))?;
        keys.extend(self.buffer.keys().cloned());
        Ok(keys)
    }

    /// Oldest stored report date and total record count, `None` for an empty store.
    pub fn resume_point(&self) -> Result<Option<ResumePoint>, StoreError> {
        let mut total = 0;
        let mut oldest: Option<NaiveDate> = None;
        for id in self.partitions()? {
            let records = self.load_partition(id)?;
            total += records.len();
            if let Some(min) = records.iter().map(|r| r.date).min() {
                oldest = Some(oldest.map_or(min, |o| o.min(min)));
            }
        }
        Ok(oldest.map(|oldest_date| ResumePoint {
            oldest_date,
            total_records: total,
        }))
    }

    fn write_partition(&self, id: PartitionId, records: &[IssueRecord]) -> Result<(), StoreError> {
        partition::write_partition_atomic(&self.partition_path(id), records)?;
        Ok(())
    }

    fn invalidate_index(&mut self) -> Result<(), StoreError> {
        self.index.invalidate()?;
        Ok(())
    }
}

fn list_partitions(dir: &Path) -> Result<Vec<PartitionId>, StoreError> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(id) = PartitionId::parse_file_name(&entry.file_name().to_string_lossy()) {
            ids.push(id);
        }
    }
    ids.sort_by(|a, b| b.cmp(a));
    Ok(ids)
}

fn scan_keys(dir: &Path) -> Result<HashSet<String>, StoreError> {
    let mut keys = HashSet::new();
    for id in list_partitions(dir)? {
        for record in partition::read_partition(&dir.join(id.file_name()), id)? {
            keys.insert(record.url);
        }
    }
    Ok(keys)
}

fn remove_stale_temp_files(dir: &Path) -> Result<(), StoreError> {
    let suffix = format!(".{}", Config::TEMP_EXTENSION);
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(&suffix) {
            warn!("Removing leftover temporary file {}", name);
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
