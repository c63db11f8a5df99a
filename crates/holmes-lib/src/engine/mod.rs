//! Sampling engine
//!
//! Wires the sampler, the per-kind trigger state and the dump orchestrator
//! into a single tick loop running on its own tokio task.
//!
//! ```ignore
//! let handle = EngineBuilder::new()
//!     .config(config)
//!     .build()?
//!     .start();
//! // ...
//! handle.shutdown().await?;
//! ```

mod r#loop;

#[cfg(test)]
mod tests;

pub use r#loop::TickLoop;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{ConfigHandle, EngineConfig};
use crate::dump::{DumpOrchestrator, ProcSnapshotCapture, ProfileCapture};
use crate::limits::{CgroupLimits, ResourceLimits};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::sampler::{ProcessProbe, Sampler, UsageProbe};
use crate::status::EngineStatus;

/// Engine ready to be started
pub struct Engine {
    tick_loop: TickLoop,
    config: ConfigHandle,
    status_rx: watch::Receiver<EngineStatus>,
    logger: StructuredLogger,
    cgroup: String,
}

impl Engine {
    /// Spawn the tick loop and return a handle controlling it
    pub fn start(self) -> EngineHandle {
        let config = self.config.current();
        let enabled: Vec<_> = config.enabled_kinds().collect();
        self.logger
            .log_startup(env!("CARGO_PKG_VERSION"), &self.cgroup, &enabled);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(self.tick_loop.run(shutdown_rx));

        EngineHandle {
            config: self.config,
            status: self.status_rx,
            shutdown_tx,
            logger: self.logger,
            task,
        }
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }
}

/// Control surface of a running engine
pub struct EngineHandle {
    config: ConfigHandle,
    status: watch::Receiver<EngineStatus>,
    shutdown_tx: broadcast::Sender<()>,
    logger: StructuredLogger,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Live configuration; updates apply from the next tick
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Latest published status
    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    /// Stop ticking, wait for in-flight dumps up to the grace period
    pub async fn shutdown(self, reason: &str) -> Result<()> {
        self.logger.log_shutdown(reason);
        // The loop may already have exited
        let _ = self.shutdown_tx.send(());
        self.task.await?;
        info!("Holmes engine stopped");
        Ok(())
    }
}

/// Builder for the engine
///
/// Anything left unset falls back to the process probe, cgroup limits
/// detected under the configured root and the /proc snapshot capture.
pub struct EngineBuilder {
    probe: Option<Arc<dyn UsageProbe>>,
    limits: Option<Arc<dyn ResourceLimits>>,
    capture: Option<Arc<dyn ProfileCapture>>,
    config: EngineConfig,
    instance: String,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            probe: None,
            limits: None,
            capture: None,
            config: EngineConfig::default(),
            instance: "holmes".to_string(),
        }
    }

    pub fn probe(mut self, probe: Arc<dyn UsageProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn limits(mut self, limits: Arc<dyn ResourceLimits>) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn capture(mut self, capture: Arc<dyn ProfileCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Name attached to every log line
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Validate the configuration and assemble the engine
    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        let (limits, cgroup): (Arc<dyn ResourceLimits>, String) = match self.limits {
            Some(limits) => (limits, "custom".to_string()),
            None => {
                let detected = CgroupLimits::detect(&self.config.cgroup_root);
                let name = detected.name().to_string();
                (Arc::new(detected), name)
            }
        };
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(ProcessProbe::new()));
        let capture = self
            .capture
            .unwrap_or_else(|| Arc::new(ProcSnapshotCapture::new()));

        let logger = StructuredLogger::new(self.instance);
        let metrics = EngineMetrics::new();
        let config = ConfigHandle::new(self.config);
        let (status_tx, status_rx) = watch::channel(EngineStatus::starting(&cgroup));

        let tick_loop = TickLoop::new(
            Sampler::new(probe, limits),
            DumpOrchestrator::new(capture, logger.clone(), metrics.clone()),
            config.clone(),
            status_tx,
            logger.clone(),
            metrics,
        );

        Ok(Engine {
            tick_loop,
            config,
            status_rx,
            logger,
            cgroup,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
