use std::collections::{BTreeMap, HashSet};

use crate::models::IssueRecord;
use crate::partition::PartitionId;

/// In-memory staging area, one list per target partition.
///
/// Owns staged records until the store merges a partition and calls
/// [`WriteBuffer::take_partition`]. Keys are unique across the whole buffer.
#[derive(Debug)]
pub struct WriteBuffer {
    staged: BTreeMap<PartitionId, Vec<IssueRecord>>,
    keys: HashSet<String>,
    capacity: usize,
}

impl WriteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            staged: BTreeMap::new(),
            keys: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.keys.iter()
    }

    /// Stage `record` unless its key is in `seen` or already staged.
    pub fn stage(&mut self, record: IssueRecord, seen: &HashSet<String>) -> bool {
        if seen.contains(&record.url) || self.keys.contains(&record.url) {
            return false;
        }
        self.push(record);
        true
    }

    pub(crate) fn push(&mut self, record: IssueRecord) {
        self.keys.insert(record.url.clone());
        self.staged
            .entry(PartitionId::for_date(record.date))
            .or_default()
            .push(record);
    }

    pub fn get(&self, key: &str) -> Option<(PartitionId, &IssueRecord)> {
        if !self.keys.contains(key) {
            return None;
        }
        self.staged.iter().find_map(|(id, records)| {
            records.iter().find(|r| r.url == key).map(|r| (*id, r))
        })
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut IssueRecord> {
        if !self.keys.contains(key) {
            return None;
        }
        self.staged
            .values_mut()
            .find_map(|records| records.iter_mut().find(|r| r.url == key))
    }

    pub fn remove(&mut self, key: &str) -> Option<IssueRecord> {
        if !self.keys.remove(key) {
            return None;
        }
        let mut removed = None;
        let mut emptied = None;
        for (id, records) in self.staged.iter_mut() {
            if let Some(pos) = records.iter().position(|r| r.url == key) {
                removed = Some(records.remove(pos));
                if records.is_empty() {
                    emptied = Some(*id);
                }
                break;
            }
        }
        if let Some(id) = emptied {
            self.staged.remove(&id);
        }
        removed
    }

    /// Put `record` in place of the staged row with the same key, moving it to
    /// another partition list when its month changed.
    pub fn replace(&mut self, record: IssueRecord) -> bool {
        if self.remove(&record.url).is_none() {
            return false;
        }
        self.push(record);
        true
    }

    /// Partitions with staged rows, oldest first.
    pub fn partitions(&self) -> Vec<PartitionId> {
        self.staged.keys().copied().collect()
    }

    pub fn peek_partition(&self, id: PartitionId) -> &[IssueRecord] {
        self.staged.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drop a partition's staged rows after they were merged to disk.
    pub fn take_partition(&mut self, id: PartitionId) -> Vec<IssueRecord> {
        let records = self.staged.remove(&id).unwrap_or_default();
        for record in &records {
            self.keys.remove(&record.url);
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(url: &str, date: &str) -> IssueRecord {
        IssueRecord::new(url, NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(), "FOLYAMATBAN")
    }

    #[test]
    fn test_stage_groups_by_partition() {
        let mut buffer = WriteBuffer::new(10);
        let seen = HashSet::new();
        assert!(buffer.stage(record("https://x/1", "2025-09-01"), &seen));
        assert!(buffer.stage(record("https://x/2", "2025-08-20"), &seen));
        assert!(buffer.stage(record("https://x/3", "2025-09-03"), &seen));

        assert_eq!(buffer.len(), 3);
        assert_eq!(
            buffer.partitions(),
            vec![PartitionId::new(2025, 8).unwrap(), PartitionId::new(2025, 9).unwrap()]
        );
        assert_eq!(buffer.peek_partition(PartitionId::new(2025, 9).unwrap()).len(), 2);
    }

    #[test]
    fn test_stage_skips_seen_and_duplicates() {
        let mut buffer = WriteBuffer::new(10);
        let seen: HashSet<String> = ["https://x/known".to_string()].into_iter().collect();
        assert!(!buffer.stage(record("https://x/known", "2025-09-01"), &seen));
        assert!(buffer.stage(record("https://x/1", "2025-09-01"), &seen));
        assert!(!buffer.stage(record("https://x/1", "2025-09-02"), &seen));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_is_full_at_capacity() {
        let mut buffer = WriteBuffer::new(2);
        let seen = HashSet::new();
        buffer.stage(record("https://x/1", "2025-09-01"), &seen);
        assert!(!buffer.is_full());
        buffer.stage(record("https://x/2", "2025-09-01"), &seen);
        assert!(buffer.is_full());
    }

    #[test]
    fn test_replace_moves_between_partitions() {
        let mut buffer = WriteBuffer::new(10);
        buffer.stage(record("https://x/1", "2025-09-01"), &HashSet::new());

        assert!(buffer.replace(record("https://x/1", "2025-08-31")));
        let (id, _) = buffer.get("https://x/1").unwrap();
        assert_eq!(id, PartitionId::new(2025, 8).unwrap());
        assert_eq!(buffer.partitions().len(), 1);
        assert!(!buffer.replace(record("https://x/missing", "2025-08-31")));
    }

    #[test]
    fn test_take_partition_releases_keys() {
        let mut buffer = WriteBuffer::new(10);
        let seen = HashSet::new();
        buffer.stage(record("https://x/1", "2025-09-01"), &seen);
        buffer.stage(record("https://x/2", "2025-08-01"), &seen);

        let taken = buffer.take_partition(PartitionId::new(2025, 9).unwrap());
        assert_eq!(taken.len(), 1);
        assert!(!buffer.contains("https://x/1"));
        assert!(buffer.contains("https://x/2"));
        assert!(buffer.take_partition(PartitionId::new(2025, 9).unwrap()).is_empty());
    }

    #[test]
    fn test_get_mut_edits_in_place() {
        let mut buffer = WriteBuffer::new(10);
        buffer.stage(record("https://x/1", "2025-09-01"), &HashSet::new());
        buffer.get_mut("https://x/1").unwrap().status = "ELFOGADVA".to_string();
        assert_eq!(buffer.get("https://x/1").unwrap().1.status, "ELFOGADVA");
    }
}
