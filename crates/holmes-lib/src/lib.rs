//! Self-monitoring diagnostics for long-running services
//!
//! This crate provides the core functionality for:
//! - Resolving container CPU and memory ceilings from cgroup v1/v2
//! - Sampling process memory, CPU, threads, runtime tasks and heap usage
//! - Deciding when usage is anomalous (floor, growth and ceiling rules
//!   behind a warm-up and a per-kind cooldown)
//! - Capturing diagnostic dumps off the sampling path
//! - Metrics and structured logging for all of the above

pub mod config;
pub mod dump;
pub mod engine;
pub mod error;
pub mod heap;
pub mod limits;
pub mod models;
pub mod observability;
pub mod sampler;
pub mod status;
pub mod trigger;
pub mod trim;

pub use config::{ConfigHandle, EngineConfig, TriggerConfig};
pub use dump::{DumpOrchestrator, ProcSnapshotCapture, ProfileCapture};
pub use engine::{Engine, EngineBuilder, EngineHandle};
pub use error::{CaptureError, ConfigError, LimitError, SampleError};
pub use heap::CountingAllocator;
pub use limits::{cgroup_mode, CgroupLimits, CgroupMode, ResourceLimits};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use sampler::{ProcessProbe, Sampler, UsageProbe};
pub use status::{EngineStatus, KindStatus};
pub use trigger::{evaluate, CheckState, Evaluation, Outcome, Phase, TriggerReason};
