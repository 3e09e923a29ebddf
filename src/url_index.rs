//! Disposable cache of every key stored on disk.
//!
//! Two rkyv artifacts live next to the partitions: the key set and a snapshot
//! of partition file modification times. The cached set is trusted only while
//! the snapshot matches the directory; anything else triggers a full rescan.

use rkyv::{AlignedVec, Archive, Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::partition::PartitionId;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Index artifact is stale")]
    Stale,
}

#[derive(Debug, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
struct KeySet {
    keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
struct MtimeEntry {
    file: String,
    modified_nanos: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[archive(check_bytes)]
struct MtimeSnapshot {
    entries: Vec<MtimeEntry>,
}

impl MtimeSnapshot {
    /// Current modification times of every partition file in `dir`, sorted by name.
    fn capture(dir: &Path) -> Result<Self, std::io::Error> {
        let mut by_name = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if PartitionId::parse_file_name(&name).is_none() {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            let nanos = modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default();
            by_name.insert(name, nanos);
        }
        Ok(Self {
            entries: by_name
                .into_iter()
                .map(|(file, modified_nanos)| MtimeEntry { file, modified_nanos })
                .collect(),
        })
    }
}

pub struct UrlIndex {
    dir: PathBuf,
    cached: Option<(MtimeSnapshot, HashSet<String>)>,
}

impl UrlIndex {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cached: None,
        }
    }

    fn keys_path(&self) -> PathBuf {
        self.dir.join(Config::INDEX_KEYS_FILE)
    }

    fn mtimes_path(&self) -> PathBuf {
        self.dir.join(Config::INDEX_MTIMES_FILE)
    }

    /// Keys of every stored record, rebuilt through `rebuild` when stale.
    pub fn all_known_keys<F>(&mut self, rebuild: F) -> Result<HashSet<String>, StoreError>
    where
        F: FnOnce() -> Result<HashSet<String>, StoreError>,
    {
        let current = MtimeSnapshot::capture(&self.dir)?;

        if let Some((snapshot, keys)) = &self.cached {
            if *snapshot == current {
                return Ok(keys.clone());
            }
        }

        match self.load_artifacts(&current) {
            Ok(keys) => {
                debug!(keys = keys.len(), "URL index loaded from disk");
                self.cached = Some((current, keys.clone()));
                return Ok(keys);
            }
            Err(IndexError::Stale) => debug!("URL index stale, rebuilding"),
            Err(e) => debug!("URL index unreadable ({}), rebuilding", e),
        }

        let keys = rebuild()?;
        // A failed persist only costs a rescan next time.
        if let Err(e) = self.persist(&current, &keys) {
            warn!("Failed to persist URL index: {}", e);
        }
        debug!(keys = keys.len(), "URL index rebuilt");
        self.cached = Some((current, keys.clone()));
        Ok(keys)
    }

    fn load_artifacts(&self, current: &MtimeSnapshot) -> Result<HashSet<String>, IndexError> {
        let bytes = read_aligned(&self.mtimes_path())?;
        let archived = rkyv::check_archived_root::<MtimeSnapshot>(&bytes)
            .map_err(|e| IndexError::Serialization(format!("{:?}", e)))?;
        let snapshot: MtimeSnapshot = archived
            .deserialize(&mut rkyv::Infallible)
            .map_err(|e| IndexError::Serialization(format!("{:?}", e)))?;
        if snapshot != *current {
            return Err(IndexError::Stale);
        }

        let bytes = read_aligned(&self.keys_path())?;
        let archived = rkyv::check_archived_root::<KeySet>(&bytes)
            .map_err(|e| IndexError::Serialization(format!("{:?}", e)))?;
        Ok(archived.keys.iter().map(|k| k.as_str().to_string()).collect())
    }

    fn persist(&self, snapshot: &MtimeSnapshot, keys: &HashSet<String>) -> Result<(), IndexError> {
        let mut sorted: Vec<String> = keys.iter().cloned().collect();
        sorted.sort();
        let key_bytes = rkyv::to_bytes::<_, 4096>(&KeySet { keys: sorted })
            .map_err(|e| IndexError::Serialization(format!("{:?}", e)))?;
        let mtime_bytes = rkyv::to_bytes::<_, 1024>(snapshot)
            .map_err(|e| IndexError::Serialization(format!("{:?}", e)))?;

        // Keys first: a snapshot without matching keys must never be on disk.
        fs::write(self.keys_path(), &key_bytes)?;
        fs::write(self.mtimes_path(), &mtime_bytes)?;
        Ok(())
    }

    /// Drop the in-memory copy and delete both artifacts.
    pub fn invalidate(&mut self) -> Result<(), IndexError> {
        self.cached = None;
        for path in [self.mtimes_path(), self.keys_path()] {
            match fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }
}

fn read_aligned(path: &Path) -> Result<AlignedVec, IndexError> {
    let bytes = fs::read(path)?;
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(&bytes);
    Ok(aligned)
}
