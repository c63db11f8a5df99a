//! cgroup v2 limit resolution
//!
//! Reads ceilings from the unified hierarchy:
//! - cpu.max holding "<quota> <period>" or "max <period>"
//! - memory.max holding a byte count or "max"

use async_trait::async_trait;
use std::path::PathBuf;

use super::{host_logical_cores, parse_value, read_limit_file, ResourceLimits};
use crate::error::LimitError;

const CPU_MAX_FILE: &str = "cpu.max";
const MEMORY_MAX_FILE: &str = "memory.max";

/// Token used by the kernel for "no limit"
const UNLIMITED: &str = "max";

/// Parsed contents of cpu.max
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CpuQuota {
    /// No quota configured
    Unlimited,
    /// Quota as a fraction of cores
    Cores(f64),
}

/// Limit reader for the cgroup v2 unified hierarchy
#[derive(Debug, Clone)]
pub struct CgroupV2Limits {
    cgroup_root: PathBuf,
}

impl CgroupV2Limits {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    /// Parse cpu.max contents
    ///
    /// Returns `None` unless there are exactly two tokens with a positive period.
    pub fn parse_cpu_max(content: &str) -> Option<CpuQuota> {
        let fields: Vec<&str> = content.split_whitespace().collect();
        let [quota, period] = fields.as_slice() else {
            return None;
        };

        let period: u64 = period.parse().ok()?;
        if period == 0 {
            return None;
        }
        if *quota == UNLIMITED {
            return Some(CpuQuota::Unlimited);
        }

        let quota: u64 = quota.parse().ok()?;
        Some(CpuQuota::Cores(quota as f64 / period as f64))
    }

    fn path(&self, file: &str) -> PathBuf {
        self.cgroup_root.join(file)
    }
}

#[async_trait]
impl ResourceLimits for CgroupV2Limits {
    async fn cpu_core_limit(&self) -> Result<f64, LimitError> {
        let path = self.path(CPU_MAX_FILE);
        let content = read_limit_file(&path).await?;

        match Self::parse_cpu_max(&content) {
            Some(CpuQuota::Unlimited) => Ok(host_logical_cores()),
            Some(CpuQuota::Cores(cores)) => Ok(cores),
            None => Err(LimitError::Malformed { path, content }),
        }
    }

    async fn memory_limit_bytes(&self) -> Result<u64, LimitError> {
        let path = self.path(MEMORY_MAX_FILE);
        let content = read_limit_file(&path).await?;

        if content.trim() == UNLIMITED {
            return Err(LimitError::Unlimited { path });
        }
        parse_value(&path, &content)
    }
}
