//! Tick loop
//!
//! Every tick takes one configuration snapshot, then samples and evaluates
//! each enabled kind in turn. Fired kinds are handed to the orchestrator
//! and the loop moves on without waiting for the capture.

use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::{ConfigHandle, EngineConfig};
use crate::dump::{DumpOrchestrator, DumpRecord, DumpRequest};
use crate::models::{ResourceKind, ResourceLimitSnapshot};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::sampler::Sampler;
use crate::status::EngineStatus;
use crate::trigger::{evaluate, CheckState, Evaluation, Outcome, StateTable};

/// Owns all per-kind state; runs on a single task
pub struct TickLoop {
    sampler: Sampler,
    orchestrator: DumpOrchestrator,
    config: ConfigHandle,
    states: StateTable,
    status_tx: watch::Sender<EngineStatus>,
    logger: StructuredLogger,
    metrics: EngineMetrics,
    ticks: u64,
}

fn new_ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl TickLoop {
    pub fn new(
        sampler: Sampler,
        orchestrator: DumpOrchestrator,
        config: ConfigHandle,
        status_tx: watch::Sender<EngineStatus>,
        logger: StructuredLogger,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            sampler,
            orchestrator,
            config,
            states: StateTable::new(),
            status_tx,
            logger,
            metrics,
            ticks: 0,
        }
    }

    /// Run until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut period = self.config.current().interval;
        info!(interval_secs = period.as_secs_f64(), "Starting sampling loop");

        let mut ticker = new_ticker(Instant::now(), period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // A CPU sample may sleep for a whole window
                    tokio::select! {
                        _ = self.tick() => {}
                        _ = shutdown.recv() => {
                            info!("Shutting down sampling loop mid-tick");
                            break;
                        }
                    }

                    // Interval changes take effect from the next tick
                    let next = self.config.current().interval;
                    if next != period {
                        debug!(interval_secs = next.as_secs_f64(), "Sampling interval changed");
                        period = next;
                        ticker = new_ticker(Instant::now() + period, period);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down sampling loop");
                    break;
                }
            }
        }

        self.drain().await;
        self.status_tx.send_modify(|status| {
            status.running = false;
            status.dumps_in_flight = 0;
        });
    }

    /// Sample and evaluate every enabled kind once
    pub async fn tick(&mut self) -> Vec<Evaluation> {
        let started = std::time::Instant::now();
        let config = self.config.current();
        self.orchestrator.reap();

        if !config.trigger(ResourceKind::Cpu).enabled {
            self.sampler.reset_cpu();
        }

        let mut evaluations = Vec::new();
        for kind in config.enabled_kinds() {
            let current = match self.sampler.sample(kind, &config).await {
                Ok(value) => value,
                Err(e) => {
                    self.states.get_mut(kind).skip_tick();
                    self.metrics.inc_sample_errors(kind, e.kind());
                    self.logger.log_sample_failure(kind, &e);
                    continue;
                }
            };
            self.metrics.set_usage(kind, current);

            let trigger = config.trigger(kind);
            let eval = evaluate(
                kind,
                current,
                trigger,
                self.states.get_mut(kind),
                config.warmup_cycles,
                Instant::now(),
            );
            self.metrics.record_outcome(kind, eval.outcome);
            self.logger.log_decision(&eval, trigger);

            if let Outcome::Fired(reason) = eval.outcome {
                self.orchestrator.dispatch(DumpRequest {
                    kind,
                    reason,
                    format: config.dump_format,
                    dump_path: config.dump_path.clone(),
                    trigger: trigger.clone(),
                    previous: eval.previous,
                    current: eval.current,
                });
            }
            evaluations.push(eval);
        }

        self.ticks += 1;
        let limits = self.sampler.limits_snapshot(&config).await.ok();
        self.publish_status(&config, limits);
        self.metrics
            .observe_tick_latency(started.elapsed().as_secs_f64());

        evaluations
    }

    fn publish_status(&self, config: &EngineConfig, limits: Option<ResourceLimitSnapshot>) {
        let in_flight = self.orchestrator.in_flight();
        let ticks = self.ticks;
        let now = Instant::now();

        self.status_tx.send_modify(|status| {
            status.ticks = ticks;
            status.dumps_in_flight = in_flight;
            status.limits = limits;
            status.update_kinds(config, &self.states, now);
        });
    }

    /// Wait for in-flight dumps up to the configured grace period
    pub async fn drain(&mut self) -> Vec<DumpRecord> {
        let grace = self.config.current().shutdown_grace;
        self.orchestrator.shutdown(grace).await
    }

    pub fn state(&self, kind: ResourceKind) -> &CheckState {
        self.states.get(kind)
    }
}
