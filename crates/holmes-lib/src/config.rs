//! Engine configuration
//!
//! Every threshold has a process-wide default in [`defaults`]. An
//! [`EngineConfig`] is immutable once built; live reconfiguration publishes
//! a whole new snapshot through [`ConfigHandle`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::ConfigError;
use crate::models::{DumpFormat, ResourceKind};

/// Default values for every configurable knob
pub mod defaults {
    use std::time::Duration;

    pub const THREAD_TRIGGER_MIN: f64 = 10.0; // threads
    pub const THREAD_TRIGGER_ABS: f64 = 70.0; // threads
    pub const THREAD_TRIGGER_DIFF: f64 = 25.0; // %
    pub const THREAD_COOLDOWN: Duration = Duration::from_secs(60 * 60);

    pub const CPU_TRIGGER_MIN: f64 = 10.0; // %
    pub const CPU_TRIGGER_ABS: f64 = 70.0; // %
    pub const CPU_TRIGGER_DIFF: f64 = 25.0; // %
    pub const CPU_SAMPLING_WINDOW: Duration = Duration::from_secs(5);

    pub const TASK_TRIGGER_MIN: f64 = 3_000.0; // tasks
    pub const TASK_TRIGGER_ABS: f64 = 200_000.0; // tasks
    pub const TASK_TRIGGER_DIFF: f64 = 20.0; // %
    pub const TASK_COOLDOWN: Duration = Duration::from_secs(10 * 60);

    pub const MEM_TRIGGER_MIN: f64 = 10.0; // %
    pub const MEM_TRIGGER_ABS: f64 = 80.0; // %
    pub const MEM_TRIGGER_DIFF: f64 = 25.0; // %

    pub const GC_HEAP_TRIGGER_MIN: f64 = 10.0; // %
    pub const GC_HEAP_TRIGGER_ABS: f64 = 40.0; // %
    pub const GC_HEAP_TRIGGER_DIFF: f64 = 20.0; // %

    pub const COOLDOWN: Duration = Duration::from_secs(60);
    pub const INTERVAL: Duration = Duration::from_secs(5);
    pub const WARMUP_CYCLES: u64 = 10;
    pub const DUMP_PATH: &str = "/tmp";
    pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

    /// A `max` of zero disables the count cap
    pub const NO_MAX: f64 = 0.0;
}

/// Thresholds for one resource kind
///
/// `min`, `abs` and `max` are percentages for memory, CPU and heap, and raw
/// counts for threads and tasks. `diff` is always a growth percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub enabled: bool,
    pub min: f64,
    pub diff: f64,
    pub abs: f64,
    pub cooldown: Duration,
    pub max: f64,
}

impl TriggerConfig {
    pub fn new(min: f64, diff: f64, abs: f64, cooldown: Duration) -> Self {
        Self {
            enabled: false,
            min,
            diff,
            abs,
            cooldown,
            max: defaults::NO_MAX,
        }
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = max;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Default thresholds for a kind, disabled until explicitly enabled
    pub fn default_for(kind: ResourceKind) -> Self {
        use defaults::*;
        match kind {
            ResourceKind::Memory => {
                Self::new(MEM_TRIGGER_MIN, MEM_TRIGGER_DIFF, MEM_TRIGGER_ABS, COOLDOWN)
            }
            ResourceKind::Cpu => {
                Self::new(CPU_TRIGGER_MIN, CPU_TRIGGER_DIFF, CPU_TRIGGER_ABS, COOLDOWN)
            }
            ResourceKind::Thread => Self::new(
                THREAD_TRIGGER_MIN,
                THREAD_TRIGGER_DIFF,
                THREAD_TRIGGER_ABS,
                THREAD_COOLDOWN,
            ),
            ResourceKind::LightweightTask => Self::new(
                TASK_TRIGGER_MIN,
                TASK_TRIGGER_DIFF,
                TASK_TRIGGER_ABS,
                TASK_COOLDOWN,
            ),
            ResourceKind::GcHeap => Self::new(
                GC_HEAP_TRIGGER_MIN,
                GC_HEAP_TRIGGER_DIFF,
                GC_HEAP_TRIGGER_ABS,
                COOLDOWN,
            ),
        }
    }

    /// A kind with every threshold at zero never fires
    pub fn is_disabled(&self) -> bool {
        self.min == 0.0 && self.abs == 0.0 && self.diff == 0.0
    }

    pub fn has_max(&self) -> bool {
        self.max > 0.0
    }

    pub fn validate(&self, kind: ResourceKind) -> Result<(), ConfigError> {
        let valid = self.min >= 0.0
            && self.min <= self.abs
            && self.diff >= 0.0
            && self.max >= 0.0
            && self.abs.is_finite();
        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidThresholds {
                kind,
                min: self.min,
                abs: self.abs,
                diff: self.diff,
            })
        }
    }
}

/// Full engine configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Time between two sampling ticks
    pub interval: Duration,
    /// Ticks to observe before any dump may fire
    pub warmup_cycles: u64,
    /// Window over which the first CPU sample is measured
    pub cpu_sampling_window: Duration,
    pub dump_format: DumpFormat,
    /// Directory dumps are written to
    pub dump_path: PathBuf,
    /// Root of the cgroup filesystem
    pub cgroup_root: PathBuf,
    /// Overrides the resolved memory ceiling when set
    pub memory_limit_bytes: Option<u64>,
    /// Overrides the resolved CPU core ceiling when set
    pub cpu_core_limit: Option<f64>,
    /// How long shutdown waits for in-flight dumps
    pub shutdown_grace: Duration,
    triggers: [TriggerConfig; 5],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: defaults::INTERVAL,
            warmup_cycles: defaults::WARMUP_CYCLES,
            cpu_sampling_window: defaults::CPU_SAMPLING_WINDOW,
            dump_format: DumpFormat::default(),
            dump_path: PathBuf::from(defaults::DUMP_PATH),
            cgroup_root: PathBuf::from(defaults::CGROUP_ROOT),
            memory_limit_bytes: None,
            cpu_core_limit: None,
            shutdown_grace: defaults::SHUTDOWN_GRACE,
            triggers: ResourceKind::ALL.map(TriggerConfig::default_for),
        }
    }
}

impl EngineConfig {
    pub fn trigger(&self, kind: ResourceKind) -> &TriggerConfig {
        &self.triggers[kind.index()]
    }

    pub fn set_trigger(&mut self, kind: ResourceKind, trigger: TriggerConfig) {
        self.triggers[kind.index()] = trigger;
    }

    pub fn enable(&mut self, kind: ResourceKind) {
        self.triggers[kind.index()].enabled = true;
    }

    pub fn disable(&mut self, kind: ResourceKind) {
        self.triggers[kind.index()].enabled = false;
    }

    /// Kinds that are sampled on every tick
    pub fn enabled_kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        ResourceKind::ALL
            .into_iter()
            .filter(|kind| self.trigger(*kind).enabled)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidInterval { name: "interval" });
        }
        if self.cpu_sampling_window.is_zero() {
            return Err(ConfigError::InvalidInterval {
                name: "cpu_sampling_window",
            });
        }
        for kind in ResourceKind::ALL {
            self.trigger(kind).validate(kind)?;
        }
        Ok(())
    }
}

/// Shared, atomically swappable view of the engine configuration
///
/// Readers always observe a complete snapshot; writers replace it whole.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<EngineConfig>>>,
    rx: watch::Receiver<Arc<EngineConfig>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Self {
        let (tx, rx) = watch::channel(Arc::new(config));
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<EngineConfig> {
        self.rx.borrow().clone()
    }

    /// Validate and publish a new snapshot
    pub fn update(&self, config: EngineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.tx.send_replace(Arc::new(config));
        Ok(())
    }

    /// Apply a change to a copy of the current snapshot and publish it
    pub fn modify(&self, f: impl FnOnce(&mut EngineConfig)) -> Result<(), ConfigError> {
        let mut next = (*self.current()).clone();
        f(&mut next);
        self.update(next)
    }
}
