//! Resource sampling
//!
//! Reads the current usage of each resource kind and converts it to a
//! percentage of the resolved ceiling (memory, CPU, heap) or a raw count
//! (threads, tasks). Limit errors never escape this module: the sampler
//! falls back to host capacity so the engine keeps working outside
//! containers.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::fs;
use tokio::time::Instant;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::SampleError;
use crate::heap;
use crate::limits::{host_logical_cores, ResourceLimits};
use crate::models::{ResourceKind, ResourceLimitSnapshot};

/// Raw process and host readings
#[async_trait]
pub trait UsageProbe: Send + Sync {
    /// Resident memory of the process in bytes
    async fn memory_bytes(&self) -> Result<u64, SampleError>;

    /// Total user + system CPU time consumed by the process
    async fn cpu_time(&self) -> Result<Duration, SampleError>;

    /// OS threads in the process
    async fn thread_count(&self) -> Result<u64, SampleError>;

    /// Alive tasks on the ambient tokio runtime
    fn task_count(&self) -> Result<u64, SampleError>;

    /// Live heap bytes tracked by the counting allocator
    fn heap_bytes(&self) -> Result<u64, SampleError>;

    /// Physical memory of the host in bytes
    fn host_memory_bytes(&self) -> u64;

    /// Logical cores schedulable by the process
    fn host_cores(&self) -> f64;
}

/// Probe reading the current process through sysinfo, getrusage and /proc
pub struct ProcessProbe {
    system: Mutex<System>,
    pid: Pid,
    proc_path: PathBuf,
    host_memory_bytes: u64,
}

impl ProcessProbe {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create probe with custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let host_memory_bytes = system.total_memory();

        Self {
            system: Mutex::new(system),
            pid: Pid::from_u32(std::process::id()),
            proc_path: proc_path.into(),
            host_memory_bytes,
        }
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageProbe for ProcessProbe {
    async fn memory_bytes(&self) -> Result<u64, SampleError> {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        if !system.refresh_process(self.pid) {
            return Err(SampleError::Probe {
                what: "process memory",
                message: format!("process {} not found", self.pid),
            });
        }
        system
            .process(self.pid)
            .map(|p| p.memory())
            .ok_or_else(|| SampleError::Probe {
                what: "process memory",
                message: format!("process {} not found", self.pid),
            })
    }

    async fn cpu_time(&self) -> Result<Duration, SampleError> {
        use nix::sys::resource::{getrusage, UsageWho};

        let usage = getrusage(UsageWho::RUSAGE_SELF).map_err(|e| SampleError::Probe {
            what: "process cpu time",
            message: e.to_string(),
        })?;

        let (user, system) = (usage.user_time(), usage.system_time());
        let micros = (user.tv_sec() as i64 + system.tv_sec() as i64) * 1_000_000
            + user.tv_usec() as i64
            + system.tv_usec() as i64;
        Ok(Duration::from_micros(micros.max(0) as u64))
    }

    async fn thread_count(&self) -> Result<u64, SampleError> {
        let task_dir = self.proc_path.join("self/task");
        let proc_err = |source: std::io::Error| SampleError::Proc {
            path: task_dir.clone(),
            source,
        };

        let mut entries = fs::read_dir(&task_dir).await.map_err(proc_err)?;
        let mut count = 0u64;
        while entries.next_entry().await.map_err(proc_err)?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    fn task_count(&self) -> Result<u64, SampleError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| SampleError::NoRuntime)?;
        Ok(handle.metrics().num_alive_tasks() as u64)
    }

    fn heap_bytes(&self) -> Result<u64, SampleError> {
        heap::heap_stats()
            .map(|stats| stats.live_bytes)
            .ok_or(SampleError::HeapAccountingDisabled)
    }

    fn host_memory_bytes(&self) -> u64 {
        self.host_memory_bytes
    }

    fn host_cores(&self) -> f64 {
        host_logical_cores()
    }
}

/// Express `used` as a percentage of `limit`, clamped to [0, 100]
pub fn usage_percent(used: f64, limit: f64) -> f64 {
    if !(limit > 0.0) || !limit.is_finite() {
        return 0.0;
    }
    let percent = used / limit * 100.0;
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct CpuReading {
    cpu: Duration,
    at: Instant,
}

/// Converts raw readings into per-kind values the trigger rules compare
pub struct Sampler {
    probe: Arc<dyn UsageProbe>,
    limits: Arc<dyn ResourceLimits>,
    last_cpu: Option<CpuReading>,
}

impl Sampler {
    pub fn new(probe: Arc<dyn UsageProbe>, limits: Arc<dyn ResourceLimits>) -> Self {
        Self {
            probe,
            limits,
            last_cpu: None,
        }
    }

    /// Sample one kind
    ///
    /// Percentage kinds report a value in [0, 100]; count kinds report the
    /// true count even when it exceeds the configured cap.
    pub async fn sample(
        &mut self,
        kind: ResourceKind,
        config: &EngineConfig,
    ) -> Result<f64, SampleError> {
        match kind {
            ResourceKind::Memory => {
                let used = self.probe.memory_bytes().await?;
                let limit = self.memory_limit(config).await?;
                Ok(usage_percent(used as f64, limit as f64))
            }
            ResourceKind::Cpu => self.cpu_percent(config).await,
            ResourceKind::Thread => Ok(self.probe.thread_count().await? as f64),
            ResourceKind::LightweightTask => Ok(self.probe.task_count()? as f64),
            ResourceKind::GcHeap => {
                let live = self.probe.heap_bytes()?;
                let limit = self.memory_limit(config).await?;
                Ok(usage_percent(live as f64, limit as f64))
            }
        }
    }

    /// Ceilings as they resolve right now, with host fallbacks applied
    pub async fn limits_snapshot(
        &self,
        config: &EngineConfig,
    ) -> Result<ResourceLimitSnapshot, SampleError> {
        Ok(ResourceLimitSnapshot {
            cpu_core_limit: self.cpu_core_limit(config).await,
            memory_limit_bytes: self.memory_limit(config).await?,
        })
    }

    /// Forget the stored CPU reading so the next sample measures a fresh window
    pub fn reset_cpu(&mut self) {
        self.last_cpu = None;
    }

    async fn cpu_percent(&mut self, config: &EngineConfig) -> Result<f64, SampleError> {
        let window = config.cpu_sampling_window;
        // A reading older than the window plus half a window of slack would
        // dilute a spike over the gap
        let fresh = self
            .last_cpu
            .take()
            .filter(|previous| previous.at.elapsed() <= window + window / 2);

        let (start, end) = match fresh {
            Some(previous) => (previous, self.read_cpu().await?),
            None => {
                let start = self.read_cpu().await?;
                tokio::time::sleep(window).await;
                (start, self.read_cpu().await?)
            }
        };
        self.last_cpu = Some(end);

        let wall = end.at.duration_since(start.at).as_secs_f64();
        if wall <= 0.0 {
            return Err(SampleError::Probe {
                what: "process cpu time",
                message: "empty sampling window".to_string(),
            });
        }

        let used = end.cpu.saturating_sub(start.cpu).as_secs_f64();
        let cores = self.cpu_core_limit(config).await;
        Ok(usage_percent(used, wall * cores))
    }

    async fn read_cpu(&self) -> Result<CpuReading, SampleError> {
        let cpu = self.probe.cpu_time().await?;
        Ok(CpuReading {
            cpu,
            at: Instant::now(),
        })
    }

    async fn memory_limit(&self, config: &EngineConfig) -> Result<u64, SampleError> {
        if let Some(limit) = config.memory_limit_bytes.filter(|l| *l > 0) {
            return Ok(limit);
        }

        let host = self.probe.host_memory_bytes();
        let limit = match self.limits.memory_limit_bytes().await {
            // v1 reports a near-i64::MAX limit when none is set
            Ok(limit) if limit > 0 && host > 0 => limit.min(host),
            Ok(limit) if limit > 0 => limit,
            Ok(_) => host,
            Err(e) => {
                debug!(error = %e, "Memory limit unavailable, using host memory");
                host
            }
        };

        if limit == 0 {
            return Err(SampleError::Probe {
                what: "memory limit",
                message: "neither cgroup nor host memory size is known".to_string(),
            });
        }
        Ok(limit)
    }

    async fn cpu_core_limit(&self, config: &EngineConfig) -> f64 {
        let valid = |cores: f64| cores.is_finite() && cores > 0.0;

        if let Some(cores) = config.cpu_core_limit.filter(|c| valid(*c)) {
            return cores;
        }

        match self.limits.cpu_core_limit().await {
            Ok(cores) if valid(cores) => cores,
            Ok(cores) => {
                debug!(cores, "Ignoring invalid CPU limit, using host cores");
                self.probe.host_cores()
            }
            Err(e) => {
                debug!(error = %e, "CPU limit unavailable, using host cores");
                self.probe.host_cores()
            }
        }
    }
}
