//! Core data models for the trigger engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// A resource watched by the engine
///
/// `Memory` and `GcHeap` capture the same profile but trigger independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Memory,
    Cpu,
    Thread,
    LightweightTask,
    GcHeap,
}

impl ResourceKind {
    /// All kinds in evaluation order
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Memory,
        ResourceKind::Cpu,
        ResourceKind::Thread,
        ResourceKind::LightweightTask,
        ResourceKind::GcHeap,
    ];

    /// Profile name handed to the capture mechanism, aligned with pprof names
    pub fn profile_name(self) -> &'static str {
        match self {
            ResourceKind::Memory => "heap",
            ResourceKind::Cpu => "cpu",
            ResourceKind::Thread => "threadcreate",
            ResourceKind::LightweightTask => "goroutine",
            ResourceKind::GcHeap => "heap",
        }
    }

    /// Name used in log lines and dump file names
    pub fn check_name(self) -> &'static str {
        match self {
            ResourceKind::Memory => "mem",
            ResourceKind::Cpu => "cpu",
            ResourceKind::Thread => "thread",
            ResourceKind::LightweightTask => "goroutine",
            ResourceKind::GcHeap => "GCHeap",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ResourceKind::Memory => 0,
            ResourceKind::Cpu => 1,
            ResourceKind::Thread => 2,
            ResourceKind::LightweightTask => 3,
            ResourceKind::GcHeap => 4,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.check_name())
    }
}

/// Output format of a captured dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    #[default]
    Binary,
    Text,
}

impl DumpFormat {
    /// File extension for dumps in this format
    pub fn extension(self) -> &'static str {
        match self {
            DumpFormat::Binary => "bin",
            DumpFormat::Text => "log",
        }
    }
}

/// Container ceilings resolved for one sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimitSnapshot {
    pub cpu_core_limit: f64,
    pub memory_limit_bytes: u64,
}
