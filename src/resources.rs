use std::fmt;
use std::path::Path;
use sysinfo::{Disks, Pid, System};
use tracing::debug;

use crate::config::Config;

/// Source of process memory and free disk readings.
pub trait ResourceProbe: Send {
    fn process_memory_bytes(&mut self) -> Option<u64>;
    fn free_disk_bytes(&mut self, path: &Path) -> Option<u64>;
}

/// Probe backed by `sysinfo`.
pub struct SystemProbe {
    system: System,
    pid: Option<Pid>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SystemProbe {
    fn process_memory_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        if !self.system.refresh_process(pid) {
            return None;
        }
        self.system.process(pid).map(|p| p.memory())
    }

    fn free_disk_bytes(&mut self, path: &Path) -> Option<u64> {
        let path = path.canonicalize().ok()?;
        let disks = Disks::new_with_refreshed_list();
        // Deepest mount point containing the path wins.
        disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_process_memory_bytes: u64,
    pub min_free_disk_bytes: u64,
    /// Stages between two probe readings.
    pub check_interval: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_process_memory_bytes: Config::MAX_PROCESS_MEMORY_BYTES,
            min_free_disk_bytes: Config::MIN_FREE_DISK_BYTES,
            check_interval: Config::RESOURCE_CHECK_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePressure {
    Memory { used: u64, limit: u64 },
    Disk { free: u64, floor: u64 },
}

impl fmt::Display for ResourcePressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory { used, limit } => {
                write!(f, "process memory {} MiB above {} MiB", used >> 20, limit >> 20)
            }
            Self::Disk { free, floor } => {
                write!(f, "free disk {} MiB below {} MiB", free >> 20, floor >> 20)
            }
        }
    }
}

/// Counts staged records and consults the probe every `check_interval` stages.
pub struct ResourceMonitor {
    probe: Box<dyn ResourceProbe>,
    limits: ResourceLimits,
    stages: usize,
}

impl ResourceMonitor {
    pub fn new(probe: Box<dyn ResourceProbe>, limits: ResourceLimits) -> Self {
        Self {
            probe,
            limits,
            stages: 0,
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Register one staged record; returns pressure only on a check stage.
    pub fn tick(&mut self, data_dir: &Path) -> Option<ResourcePressure> {
        self.stages += 1;
        if self.limits.check_interval == 0 || self.stages % self.limits.check_interval != 0 {
            return None;
        }
        self.check(data_dir)
    }

    pub fn check(&mut self, data_dir: &Path) -> Option<ResourcePressure> {
        if let Some(used) = self.probe.process_memory_bytes() {
            debug!(used_bytes = used, "Process memory reading");
            if used > self.limits.max_process_memory_bytes {
                return Some(ResourcePressure::Memory {
                    used,
                    limit: self.limits.max_process_memory_bytes,
                });
            }
        }
        if let Some(free) = self.probe.free_disk_bytes(data_dir) {
            if free < self.limits.min_free_disk_bytes {
                return Some(ResourcePressure::Disk {
                    free,
                    floor: self.limits.min_free_disk_bytes,
                });
            }
        }
        None
    }
}
