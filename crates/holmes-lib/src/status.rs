//! Point-in-time view of the engine for status reporting

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::models::{ResourceKind, ResourceLimitSnapshot};
use crate::trigger::{Phase, StateTable};

/// State of one resource kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindStatus {
    pub kind: ResourceKind,
    pub check: String,
    pub enabled: bool,
    pub phase: Phase,
    /// Last successfully sampled value
    pub previous: f64,
    pub cycles: u64,
    /// Seconds since the last admitted dump
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_dump_secs_ago: Option<f64>,
}

/// Snapshot published by the sampling loop after every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    /// Which cgroup strategy resolves limits (unavailable, v1, v2)
    pub cgroup: String,
    pub ticks: u64,
    pub dumps_in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceLimitSnapshot>,
    pub kinds: Vec<KindStatus>,
    pub timestamp: i64,
}

impl EngineStatus {
    /// Status before the first tick
    pub fn starting(cgroup: &str) -> Self {
        Self {
            running: true,
            cgroup: cgroup.to_string(),
            ticks: 0,
            dumps_in_flight: 0,
            limits: None,
            kinds: Vec::new(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn kind(&self, kind: ResourceKind) -> Option<&KindStatus> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    /// Fill the per-kind section from the loop's state table
    pub fn update_kinds(&mut self, config: &EngineConfig, states: &StateTable, now: Instant) {
        self.kinds = ResourceKind::ALL
            .into_iter()
            .map(|kind| {
                let cfg = config.trigger(kind);
                let state = states.get(kind);
                KindStatus {
                    kind,
                    check: kind.check_name().to_string(),
                    enabled: cfg.enabled,
                    phase: state.phase(now, cfg.cooldown, config.warmup_cycles),
                    previous: state.previous,
                    cycles: state.cycles,
                    last_dump_secs_ago: state
                        .last_dump
                        .map(|at| now.saturating_duration_since(at).as_secs_f64()),
                }
            })
            .collect();
        self.timestamp = chrono::Utc::now().timestamp();
    }
}
