//! Container resource ceilings
//!
//! Resolves CPU and memory ceilings from the cgroup filesystem. The cgroup
//! mode is detected once; the matching strategy is picked once from it and
//! never re-dispatched.

mod cgroup_v1;
mod cgroup_v2;
mod mode;


pub use cgroup_v1::CgroupV1Limits;
pub use cgroup_v2::{CgroupV2Limits, CpuQuota};
pub use mode::{cgroup_mode, detect_mode, CgroupMode, FsProbe, ModeCache, StatfsProbe};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;

use crate::config::defaults;
use crate::error::LimitError;

/// Source of container CPU and memory ceilings
#[async_trait]
pub trait ResourceLimits: Send + Sync {
    /// CPU ceiling in cores
    async fn cpu_core_limit(&self) -> Result<f64, LimitError>;

    /// Memory ceiling in bytes
    async fn memory_limit_bytes(&self) -> Result<u64, LimitError>;
}

/// Limit strategy chosen from the cgroup mode
#[derive(Debug, Clone)]
pub enum CgroupLimits {
    /// Every query fails without touching the filesystem
    Unavailable,
    Legacy(CgroupV1Limits),
    Unified(CgroupV2Limits),
}

impl CgroupLimits {
    /// Pick the strategy for a known mode
    ///
    /// Hybrid hosts keep their limits on the v1 controllers.
    pub fn for_mode(mode: CgroupMode, cgroup_root: impl Into<PathBuf>) -> Self {
        match mode {
            CgroupMode::Unavailable => CgroupLimits::Unavailable,
            CgroupMode::Legacy | CgroupMode::Hybrid => {
                CgroupLimits::Legacy(CgroupV1Limits::new(cgroup_root))
            }
            CgroupMode::Unified => CgroupLimits::Unified(CgroupV2Limits::new(cgroup_root)),
        }
    }

    /// Detect the mode of `cgroup_root` and pick the matching strategy
    ///
    /// The default mountpoint shares the process-wide memoised mode.
    pub fn detect(cgroup_root: &Path) -> Self {
        let mode = if cgroup_root == Path::new(defaults::CGROUP_ROOT) {
            cgroup_mode()
        } else {
            detect_mode(&StatfsProbe, cgroup_root)
        };

        match mode {
            CgroupMode::Unified => {
                tracing::info!("Detected cgroup v2, reading unified hierarchy limits")
            }
            CgroupMode::Legacy | CgroupMode::Hybrid => {
                tracing::info!(?mode, "Detected cgroup v1 controllers, reading legacy limits")
            }
            CgroupMode::Unavailable => {
                tracing::warn!("No cgroup mountpoint found, falling back to host capacity")
            }
        }

        Self::for_mode(mode, cgroup_root)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CgroupLimits::Unavailable => "unavailable",
            CgroupLimits::Legacy(_) => "v1",
            CgroupLimits::Unified(_) => "v2",
        }
    }
}

#[async_trait]
impl ResourceLimits for CgroupLimits {
    async fn cpu_core_limit(&self) -> Result<f64, LimitError> {
        match self {
            CgroupLimits::Unavailable => Err(LimitError::Unavailable),
            CgroupLimits::Legacy(v1) => v1.cpu_core_limit().await,
            CgroupLimits::Unified(v2) => v2.cpu_core_limit().await,
        }
    }

    async fn memory_limit_bytes(&self) -> Result<u64, LimitError> {
        match self {
            CgroupLimits::Unavailable => Err(LimitError::Unavailable),
            CgroupLimits::Legacy(v1) => v1.memory_limit_bytes().await,
            CgroupLimits::Unified(v2) => v2.memory_limit_bytes().await,
        }
    }
}

/// Logical cores schedulable by this process
pub fn host_logical_cores() -> f64 {
    std::thread::available_parallelism()
        .map(|n| n.get() as f64)
        .unwrap_or(1.0)
}

async fn read_limit_file(path: &Path) -> Result<String, LimitError> {
    fs::read_to_string(path)
        .await
        .map_err(|source| LimitError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn parse_value<T: FromStr>(path: &Path, content: &str) -> Result<T, LimitError> {
    content.trim().parse().map_err(|_| LimitError::Malformed {
        path: path.to_path_buf(),
        content: content.to_string(),
    })
}
