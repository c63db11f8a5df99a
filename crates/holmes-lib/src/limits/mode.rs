//! cgroup mode detection
//!
//! The mode is probed from the filesystem type of the cgroup mountpoint and
//! memoised for the life of the process.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use crate::config::defaults;

/// `CGROUP2_SUPER_MAGIC` from linux/magic.h
const CGROUP2_SUPER_MAGIC: i64 = 0x6367_7270;

/// Process-wide mode of the default cgroup mountpoint
static CGROUP_MODE: OnceLock<CgroupMode> = OnceLock::new();

/// How the host exposes cgroups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupMode {
    /// No cgroup mountpoint
    Unavailable,
    /// cgroups v1 only
    Legacy,
    /// v1 controllers with v2 mounted under `unified`
    Hybrid,
    /// cgroups v2 only
    Unified,
}

/// Filesystem type probe, split out so detection can be exercised without a real mountpoint
pub trait FsProbe: Send + Sync {
    /// `Some(true)` if `path` is a cgroup2 filesystem, `None` if it cannot be inspected
    fn is_cgroup2(&self, path: &Path) -> Option<bool>;
}

/// Probe backed by `statfs(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct StatfsProbe;

impl FsProbe for StatfsProbe {
    fn is_cgroup2(&self, path: &Path) -> Option<bool> {
        match nix::sys::statfs::statfs(path) {
            Ok(st) => Some(st.filesystem_type().0 as i64 == CGROUP2_SUPER_MAGIC),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "statfs failed");
                None
            }
        }
    }
}

/// Classify the cgroup layout under `root`
pub fn detect_mode(probe: &dyn FsProbe, root: &Path) -> CgroupMode {
    match probe.is_cgroup2(root) {
        None => CgroupMode::Unavailable,
        Some(true) => CgroupMode::Unified,
        Some(false) => {
            if probe.is_cgroup2(&root.join("unified")) == Some(true) {
                CgroupMode::Hybrid
            } else {
                CgroupMode::Legacy
            }
        }
    }
}

/// Mode of `/sys/fs/cgroup`, probed on first call only
///
/// Concurrent first callers block until the probe completes.
pub fn cgroup_mode() -> CgroupMode {
    *CGROUP_MODE.get_or_init(|| {
        let mode = detect_mode(&StatfsProbe, Path::new(defaults::CGROUP_ROOT));
        debug!(?mode, "Resolved cgroup mode");
        mode
    })
}

/// Memoised mode for an arbitrary root and probe
pub struct ModeCache {
    root: PathBuf,
    probe: Box<dyn FsProbe>,
    mode: OnceLock<CgroupMode>,
}

impl ModeCache {
    pub fn new(root: impl Into<PathBuf>, probe: impl FsProbe + 'static) -> Self {
        Self {
            root: root.into(),
            probe: Box::new(probe),
            mode: OnceLock::new(),
        }
    }

    pub fn resolve(&self) -> CgroupMode {
        *self
            .mode
            .get_or_init(|| detect_mode(self.probe.as_ref(), &self.root))
    }
}
