//! cgroup v1 limit resolution
//!
//! Reads ceilings from the legacy per-controller hierarchy:
//! - cpu/cpu.cfs_quota_us and cpu/cpu.cfs_period_us (microseconds)
//! - memory/memory.limit_in_bytes

use async_trait::async_trait;
use std::path::PathBuf;

use super::{host_logical_cores, parse_value, read_limit_file, ResourceLimits};
use crate::error::LimitError;

const CPU_QUOTA_FILE: &str = "cpu/cpu.cfs_quota_us";
const CPU_PERIOD_FILE: &str = "cpu/cpu.cfs_period_us";
const MEMORY_LIMIT_FILE: &str = "memory/memory.limit_in_bytes";

/// Limit reader for the legacy cgroup v1 hierarchy
#[derive(Debug, Clone)]
pub struct CgroupV1Limits {
    /// Root path for cgroup v1 controllers (typically /sys/fs/cgroup)
    cgroup_root: PathBuf,
}

impl CgroupV1Limits {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.cgroup_root.join(file)
    }
}

#[async_trait]
impl ResourceLimits for CgroupV1Limits {
    async fn cpu_core_limit(&self) -> Result<f64, LimitError> {
        // Quota and period are separate files; a concurrent quota change
        // between the two reads yields one odd sample, the next tick rereads.
        let quota_path = self.path(CPU_QUOTA_FILE);
        let quota: i64 = parse_value(&quota_path, &read_limit_file(&quota_path).await?)?;

        // -1 means no quota
        if quota < 0 {
            return Ok(host_logical_cores());
        }

        let period_path = self.path(CPU_PERIOD_FILE);
        let content = read_limit_file(&period_path).await?;
        let period: u64 = parse_value(&period_path, &content)?;
        if period == 0 {
            return Err(LimitError::Malformed {
                path: period_path,
                content,
            });
        }

        Ok(quota as f64 / period as f64)
    }

    async fn memory_limit_bytes(&self) -> Result<u64, LimitError> {
        let path = self.path(MEMORY_LIMIT_FILE);
        let content = read_limit_file(&path).await?;
        parse_value(&path, &content)
    }
}
