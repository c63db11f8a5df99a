//! End-to-end tests for the sampling engine
//!
//! These drive the tick loop directly against a scripted probe and a
//! recording capture, so no real process figures or timers are involved.

#[cfg(test)]
mod engine_tests {
    use crate::config::{EngineConfig, TriggerConfig};
    use crate::dump::tests::RecordingCapture;
    use crate::engine::{Engine, EngineBuilder};
    use crate::error::ConfigError;
    use crate::models::{DumpFormat, ResourceKind};
    use crate::sampler::tests::{MockLimits, MockProbe};
    use crate::trigger::{Outcome, Phase, TriggerReason};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const WARMUP: u64 = 2;

    struct Fixture {
        probe: Arc<MockProbe>,
        capture: Arc<RecordingCapture>,
        engine: Engine,
        _dumps: TempDir,
    }

    fn thread_config(dumps: &TempDir) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.warmup_cycles = WARMUP;
        config.dump_path = dumps.path().to_path_buf();
        config.dump_format = DumpFormat::Text;
        config.set_trigger(
            ResourceKind::Thread,
            TriggerConfig::new(10.0, 25.0, 70.0, Duration::from_secs(3600)).enabled(true),
        );
        config
    }

    fn fixture(configure: impl FnOnce(&mut EngineConfig)) -> Fixture {
        let dumps = TempDir::new().unwrap();
        let mut config = thread_config(&dumps);
        configure(&mut config);

        let probe = Arc::new(MockProbe::new());
        let capture = Arc::new(RecordingCapture::new("thread 1\n  a\n\nthread 2\n  b"));
        let engine = EngineBuilder::new()
            .probe(probe.clone())
            .limits(Arc::new(MockLimits {
                cpu: Some(2.0),
                memory: Some(800),
            }))
            .capture(capture.clone())
            .config(config)
            .instance("test")
            .build()
            .unwrap();

        Fixture {
            probe,
            capture,
            engine,
            _dumps: dumps,
        }
    }

    #[tokio::test]
    async fn test_growth_fires_after_warmup() {
        let mut f = fixture(|_| {});
        f.probe.threads.store(20, Ordering::SeqCst);

        let first = f.engine.tick_loop.tick().await;
        assert_eq!(first[0].outcome, Outcome::WarmingUp);

        let second = f.engine.tick_loop.tick().await;
        assert_eq!(second[0].outcome, Outcome::Quiet);

        f.probe.threads.store(50, Ordering::SeqCst);
        let third = f.engine.tick_loop.tick().await;
        assert_eq!(third[0].outcome, Outcome::Fired(TriggerReason::RelativeGrowth));
        assert_eq!(third[0].previous, 20.0);

        let records = f.engine.tick_loop.drain().await;
        assert_eq!(records.len(), 1);
        assert!(records[0]
            .path
            .to_string_lossy()
            .ends_with(".threadcreate.log"));

        let calls = f.capture.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &[(ResourceKind::Thread, "threadcreate", DumpFormat::Text)]
        );
    }

    #[tokio::test]
    async fn test_cooldown_holds_across_ticks() {
        let mut f = fixture(|c| c.warmup_cycles = 1);
        f.probe.threads.store(90, Ordering::SeqCst);

        let fired = f.engine.tick_loop.tick().await;
        assert!(fired[0].outcome.fired());

        let held = f.engine.tick_loop.tick().await;
        assert_eq!(
            held[0].outcome,
            Outcome::CoolingDown(TriggerReason::AbsoluteCeiling)
        );

        f.engine.tick_loop.drain().await;
        assert_eq!(f.capture.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sample_failure_keeps_baseline() {
        let mut f = fixture(|_| {});
        f.probe.threads.store(20, Ordering::SeqCst);
        f.engine.tick_loop.tick().await;

        f.probe.fail_threads.store(true, Ordering::SeqCst);
        let evaluations = f.engine.tick_loop.tick().await;
        assert!(evaluations.is_empty());

        let state = f.engine.tick_loop.state(ResourceKind::Thread);
        assert_eq!(state.previous, 20.0);
        assert_eq!(state.cycles, 2);

        // The failed tick still counted toward warm-up
        f.probe.fail_threads.store(false, Ordering::SeqCst);
        f.probe.threads.store(90, Ordering::SeqCst);
        let evaluations = f.engine.tick_loop.tick().await;
        assert!(evaluations[0].outcome.fired());
    }

    #[tokio::test]
    async fn test_capture_failure_does_not_stop_loop() {
        let dumps = TempDir::new().unwrap();
        let probe = Arc::new(MockProbe::new());
        let mut config = thread_config(&dumps);
        config.warmup_cycles = 1;
        let mut engine = EngineBuilder::new()
            .probe(probe.clone())
            .limits(Arc::new(MockLimits {
                cpu: None,
                memory: None,
            }))
            .capture(Arc::new(RecordingCapture::failing()))
            .config(config)
            .build()
            .unwrap();

        probe.threads.store(90, Ordering::SeqCst);
        assert!(engine.tick_loop.tick().await[0].outcome.fired());
        assert!(engine.tick_loop.drain().await.is_empty());

        // Cooldown started at fire time even though the capture failed
        let next = engine.tick_loop.tick().await;
        assert_eq!(
            next[0].outcome,
            Outcome::CoolingDown(TriggerReason::AbsoluteCeiling)
        );
    }

    #[tokio::test]
    async fn test_live_reconfiguration() {
        let mut f = fixture(|_| {});
        f.probe.threads.store(20, Ordering::SeqCst);
        f.probe.memory.store(400, Ordering::SeqCst);

        assert_eq!(f.engine.tick_loop.tick().await.len(), 1);

        f.engine
            .config()
            .modify(|c| {
                c.disable(ResourceKind::Thread);
                c.enable(ResourceKind::Memory);
            })
            .unwrap();

        let evaluations = f.engine.tick_loop.tick().await;
        assert_eq!(evaluations.len(), 1);
        assert_eq!(evaluations[0].kind, ResourceKind::Memory);
        // 400 of an 800 byte limit
        assert_eq!(evaluations[0].current, 50.0);
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected() {
        let f = fixture(|_| {});
        let err = f
            .engine
            .config()
            .modify(|c| c.interval = Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidInterval { name: "interval" });
        assert_eq!(f.engine.config().current().interval, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_count_over_max_skips_dump() {
        let mut f = fixture(|c| {
            c.warmup_cycles = 1;
            c.set_trigger(
                ResourceKind::LightweightTask,
                TriggerConfig::default_for(ResourceKind::LightweightTask)
                    .with_max(1_000.0)
                    .enabled(true),
            );
            c.disable(ResourceKind::Thread);
        });
        f.probe.tasks.store(5_000, Ordering::SeqCst);

        let evaluations = f.engine.tick_loop.tick().await;
        assert_eq!(evaluations[0].outcome, Outcome::OverMax);
        assert_eq!(evaluations[0].current, 5_000.0);
        assert_eq!(f.engine.tick_loop.drain().await.len(), 0);
    }

    #[tokio::test]
    async fn test_status_published_each_tick() {
        let mut f = fixture(|_| {});
        f.probe.threads.store(20, Ordering::SeqCst);
        let status_rx = f.engine.status_rx.clone();

        f.engine.tick_loop.tick().await;
        f.engine.tick_loop.tick().await;

        let status = status_rx.borrow().clone();
        assert_eq!(status.ticks, 2);
        assert_eq!(status.cgroup, "custom");
        let limits = status.limits.unwrap();
        assert_eq!(limits.cpu_core_limit, 2.0);
        assert_eq!(limits.memory_limit_bytes, 800);

        let thread = status.kind(ResourceKind::Thread).unwrap();
        assert_eq!(thread.phase, Phase::Armed);
        assert_eq!(thread.previous, 20.0);
    }

    #[test]
    fn test_builder_rejects_invalid_thresholds() {
        let mut config = EngineConfig::default();
        config.set_trigger(
            ResourceKind::Memory,
            TriggerConfig::new(90.0, 25.0, 80.0, Duration::from_secs(60)),
        );

        let err = EngineBuilder::new()
            .probe(Arc::new(MockProbe::new()))
            .limits(Arc::new(MockLimits {
                cpu: None,
                memory: None,
            }))
            .config(config)
            .build();
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_engine_start_and_shutdown() {
        let f = fixture(|c| c.interval = Duration::from_millis(10));
        f.probe.threads.store(20, Ordering::SeqCst);

        let handle = f.engine.start();
        let mut status = handle.status_receiver();
        status
            .wait_for(|s| s.ticks >= 2)
            .await
            .expect("status channel closed");

        handle.shutdown("test").await.unwrap();
        assert!(!status.borrow().running);
    }

    #[tokio::test]
    async fn test_disabling_cpu_forgets_last_reading() {
        let mut f = fixture(|c| {
            c.disable(ResourceKind::Thread);
            c.enable(ResourceKind::Cpu);
            c.cpu_sampling_window = Duration::from_millis(10);
        });
        {
            let mut cpu = f.probe.cpu.lock().unwrap();
            cpu.push_back(Duration::ZERO);
            cpu.push_back(Duration::ZERO);
        }
        assert_eq!(f.engine.tick_loop.tick().await[0].current, 0.0);

        f.engine
            .config()
            .modify(|c| c.disable(ResourceKind::Cpu))
            .unwrap();
        assert!(f.engine.tick_loop.tick().await.is_empty());

        f.engine
            .config()
            .modify(|c| c.enable(ResourceKind::Cpu))
            .unwrap();
        {
            let mut cpu = f.probe.cpu.lock().unwrap();
            cpu.push_back(Duration::from_secs(5));
            cpu.push_back(Duration::from_secs(5));
        }

        // A new window starts at 5s, nothing accrues inside it
        let evaluations = f.engine.tick_loop.tick().await;
        assert_eq!(evaluations[0].kind, ResourceKind::Cpu);
        assert_eq!(evaluations[0].current, 0.0);
        assert!(f.probe.cpu.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_cpu_window() {
        let f = fixture(|c| {
            c.interval = Duration::from_millis(10);
            c.enable(ResourceKind::Cpu);
            c.cpu_sampling_window = Duration::from_secs(60);
        });
        f.probe.cpu.lock().unwrap().push_back(Duration::ZERO);

        let handle = f.engine.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut status = handle.status_receiver();
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown("test"))
            .await
            .expect("shutdown waited for the cpu window")
            .unwrap();
        assert!(!status.borrow_and_update().running);
    }
}
