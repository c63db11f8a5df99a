//! Agent configuration
//!
//! Read from an optional `holmes.toml` (or the file named by
//! `HOLMES_CONFIG`), then overridden by `HOLMES_*` environment variables.
//! Nested keys use `__`, e.g. `HOLMES_TRIGGERS__CPU__ENABLED=true`.
//! Durations are given in seconds.

use anyhow::{Context, Result};
use holmes_lib::{DumpFormat, EngineConfig, ResourceKind, TriggerConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "holmes.toml";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name attached to every log line
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for status/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Sampling interval in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: f64,

    #[serde(default = "default_warmup_cycles")]
    pub warmup_cycles: u64,

    /// Window for the first CPU sample in seconds
    #[serde(default = "default_cpu_sampling_window")]
    pub cpu_sampling_window_secs: f64,

    #[serde(default)]
    pub dump_format: DumpFormat,

    #[serde(default = "default_dump_path")]
    pub dump_path: PathBuf,

    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    /// Overrides the cgroup memory ceiling
    #[serde(default)]
    pub memory_limit_bytes: Option<u64>,

    /// Overrides the cgroup CPU ceiling
    #[serde(default)]
    pub cpu_core_limit: Option<f64>,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: f64,

    #[serde(default)]
    pub triggers: TriggerSettings,
}

/// Per-kind overrides; unset fields keep the built-in defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KindSettings {
    pub enabled: Option<bool>,
    pub min: Option<f64>,
    pub diff: Option<f64>,
    pub abs: Option<f64>,
    pub cooldown_secs: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerSettings {
    #[serde(default)]
    pub memory: KindSettings,
    #[serde(default)]
    pub cpu: KindSettings,
    #[serde(default)]
    pub thread: KindSettings,
    #[serde(default)]
    pub lightweight_task: KindSettings,
    #[serde(default)]
    pub gc_heap: KindSettings,
}

impl TriggerSettings {
    fn get(&self, kind: ResourceKind) -> &KindSettings {
        match kind {
            ResourceKind::Memory => &self.memory,
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Thread => &self.thread,
            ResourceKind::LightweightTask => &self.lightweight_task,
            ResourceKind::GcHeap => &self.gc_heap,
        }
    }
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "holmes".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval() -> f64 {
    holmes_lib::config::defaults::INTERVAL.as_secs_f64()
}

fn default_warmup_cycles() -> u64 {
    holmes_lib::config::defaults::WARMUP_CYCLES
}

fn default_cpu_sampling_window() -> f64 {
    holmes_lib::config::defaults::CPU_SAMPLING_WINDOW.as_secs_f64()
}

fn default_dump_path() -> PathBuf {
    PathBuf::from(holmes_lib::config::defaults::DUMP_PATH)
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from(holmes_lib::config::defaults::CGROUP_ROOT)
}

fn default_shutdown_grace() -> f64 {
    holmes_lib::config::defaults::SHUTDOWN_GRACE.as_secs_f64()
}

fn secs(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid duration for {name}: {value}"))
}

impl AgentConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let file = std::env::var("HOLMES_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let config = config::Config::builder()
            .add_source(config::File::from(PathBuf::from(&file)).required(false))
            .add_source(
                config::Environment::with_prefix("HOLMES")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config
            .try_deserialize()
            .with_context(|| format!("invalid configuration (file {file})"))
    }

    /// Engine configuration with per-kind overrides applied, validated
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut engine = EngineConfig::default();
        engine.interval = secs("interval_secs", self.interval_secs)?;
        engine.warmup_cycles = self.warmup_cycles;
        engine.cpu_sampling_window =
            secs("cpu_sampling_window_secs", self.cpu_sampling_window_secs)?;
        engine.dump_format = self.dump_format;
        engine.dump_path = self.dump_path.clone();
        engine.cgroup_root = self.cgroup_root.clone();
        engine.memory_limit_bytes = self.memory_limit_bytes;
        engine.cpu_core_limit = self.cpu_core_limit;
        engine.shutdown_grace = secs("shutdown_grace_secs", self.shutdown_grace_secs)?;

        for kind in ResourceKind::ALL {
            let settings = self.triggers.get(kind);
            let mut trigger = TriggerConfig::default_for(kind);
            if let Some(enabled) = settings.enabled {
                trigger.enabled = enabled;
            }
            if let Some(min) = settings.min {
                trigger.min = min;
            }
            if let Some(diff) = settings.diff {
                trigger.diff = diff;
            }
            if let Some(abs) = settings.abs {
                trigger.abs = abs;
            }
            if let Some(max) = settings.max {
                trigger.max = max;
            }
            if let Some(cooldown) = settings.cooldown_secs {
                trigger.cooldown = secs("cooldown_secs", cooldown)?;
            }
            engine.set_trigger(kind, trigger);
        }

        engine.validate()?;
        Ok(engine)
    }
}
