//! Dump hand-off
//!
//! Fired decisions are turned into [`DumpRequest`]s and run on spawned
//! tasks so a slow capture never delays the next sampling tick.

mod snapshot;

pub use snapshot::{parse_task_stat, ProcSnapshotCapture, ProcessSnapshot, ThreadEntry};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::TriggerConfig;
use crate::error::CaptureError;
use crate::models::{DumpFormat, ResourceKind};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::trigger::TriggerReason;
use crate::trim;

/// Mechanism that produces the profile bytes for a fired kind
#[async_trait]
pub trait ProfileCapture: Send + Sync {
    async fn capture(
        &self,
        kind: ResourceKind,
        profile: &'static str,
        format: DumpFormat,
    ) -> Result<Vec<u8>, CaptureError>;
}

/// Everything needed to capture and describe one dump
#[derive(Debug, Clone)]
pub struct DumpRequest {
    pub kind: ResourceKind,
    pub reason: TriggerReason,
    pub format: DumpFormat,
    pub dump_path: PathBuf,
    pub trigger: TriggerConfig,
    pub previous: f64,
    pub current: f64,
}

/// Result of a completed dump
#[derive(Debug, Clone)]
pub struct DumpRecord {
    pub kind: ResourceKind,
    pub path: PathBuf,
    pub bytes: usize,
}

/// File name for a dump: `<check>.<timestamp>.<pid>.<profile>.<ext>`
pub fn dump_file_name(kind: ResourceKind, format: DumpFormat) -> String {
    format!(
        "{}.{}.{}.{}.{}",
        kind.check_name(),
        chrono::Local::now().format("%Y%m%d%H%M%S%.3f"),
        std::process::id(),
        kind.profile_name(),
        format.extension()
    )
}

async fn write_dump(
    dir: &Path,
    kind: ResourceKind,
    format: DumpFormat,
    data: &[u8],
) -> Result<PathBuf, CaptureError> {
    let write_err = |path: &Path, source| CaptureError::Write {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir)
        .await
        .map_err(|e| write_err(dir, e))?;

    let path = dir.join(dump_file_name(kind, format));
    fs::write(&path, data).await.map_err(|e| write_err(&path, e))?;
    Ok(path)
}

/// Capture one dump end to end: capture, persist, and log text results
pub async fn run_dump(
    capture: &dyn ProfileCapture,
    request: &DumpRequest,
    logger: &StructuredLogger,
) -> Result<DumpRecord, CaptureError> {
    let kind = request.kind;
    let data = capture
        .capture(kind, kind.profile_name(), request.format)
        .await?;

    let path = write_dump(&request.dump_path, kind, request.format, &data).await?;

    if request.format == DumpFormat::Text {
        let text = String::from_utf8_lossy(&data);
        logger.log_text_dump(kind, &trim::trim(&text));
    }

    Ok(DumpRecord {
        kind,
        path,
        bytes: data.len(),
    })
}

/// Runs captures off the sampling loop and keeps track of them
pub struct DumpOrchestrator {
    capture: Arc<dyn ProfileCapture>,
    logger: StructuredLogger,
    metrics: EngineMetrics,
    in_flight: JoinSet<Result<DumpRecord, CaptureError>>,
}

impl DumpOrchestrator {
    pub fn new(
        capture: Arc<dyn ProfileCapture>,
        logger: StructuredLogger,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            capture,
            logger,
            metrics,
            in_flight: JoinSet::new(),
        }
    }

    /// Start a capture without waiting for it
    pub fn dispatch(&mut self, request: DumpRequest) {
        let capture = self.capture.clone();
        let logger = self.logger.clone();

        debug!(kind = %request.kind, reason = %request.reason, "Dispatching dump");
        self.in_flight
            .spawn(async move { run_dump(capture.as_ref(), &request, &logger).await });
        self.metrics.set_dumps_in_flight(self.in_flight.len() as i64);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Collect finished captures without blocking
    pub fn reap(&mut self) -> Vec<DumpRecord> {
        let mut done = Vec::new();
        while let Some(joined) = self.in_flight.try_join_next() {
            if let Some(record) = self.record(joined) {
                done.push(record);
            }
        }
        self.metrics.set_dumps_in_flight(self.in_flight.len() as i64);
        done
    }

    /// Wait up to `grace` for in-flight captures, abandon the rest
    pub async fn shutdown(&mut self, grace: Duration) -> Vec<DumpRecord> {
        let mut done = Vec::new();
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.in_flight.join_next().await {
                if let Some(record) = self.record(joined) {
                    done.push(record);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                abandoned = self.in_flight.len(),
                "Abandoning in-flight dumps at shutdown"
            );
            self.in_flight.abort_all();
        }
        self.metrics.set_dumps_in_flight(0);
        done
    }

    fn record(
        &self,
        joined: Result<Result<DumpRecord, CaptureError>, tokio::task::JoinError>,
    ) -> Option<DumpRecord> {
        match joined {
            Ok(Ok(record)) => {
                self.logger.log_dump_written(&record);
                Some(record)
            }
            Ok(Err(e)) => {
                self.metrics.inc_capture_errors(e.kind());
                self.logger.log_capture_failure(&e);
                None
            }
            Err(e) => {
                warn!(error = %e, "Dump task did not complete");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::defaults;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Capture that records requests and returns fixed bytes
    pub(crate) struct RecordingCapture {
        pub calls: Mutex<Vec<(ResourceKind, &'static str, DumpFormat)>>,
        pub payload: Vec<u8>,
        pub fail: bool,
    }

    impl RecordingCapture {
        pub(crate) fn new(payload: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                payload: payload.as_bytes().to_vec(),
                fail: false,
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new("")
            }
        }
    }

    #[async_trait]
    impl ProfileCapture for RecordingCapture {
        async fn capture(
            &self,
            kind: ResourceKind,
            profile: &'static str,
            format: DumpFormat,
        ) -> Result<Vec<u8>, CaptureError> {
            self.calls.lock().unwrap().push((kind, profile, format));
            if self.fail {
                return Err(CaptureError::Capture {
                    kind,
                    profile,
                    message: "scripted failure".to_string(),
                });
            }
            Ok(self.payload.clone())
        }
    }

    fn request(kind: ResourceKind, format: DumpFormat, dir: &Path) -> DumpRequest {
        DumpRequest {
            kind,
            reason: TriggerReason::AbsoluteCeiling,
            format,
            dump_path: dir.to_path_buf(),
            trigger: TriggerConfig::default_for(kind),
            previous: 10.0,
            current: 90.0,
        }
    }

    #[test]
    fn test_dump_file_name() {
        let name = dump_file_name(ResourceKind::GcHeap, DumpFormat::Binary);
        assert!(name.starts_with("GCHeap."));
        assert!(name.ends_with(&format!(".{}.heap.bin", std::process::id())));

        let name = dump_file_name(ResourceKind::Thread, DumpFormat::Text);
        assert!(name.ends_with(".threadcreate.log"));
    }

    #[tokio::test]
    async fn test_run_dump_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let capture = RecordingCapture::new("profile bytes");
        let logger = StructuredLogger::new("test");

        let record = run_dump(
            &capture,
            &request(ResourceKind::Memory, DumpFormat::Binary, temp_dir.path()),
            &logger,
        )
        .await
        .unwrap();

        assert_eq!(record.bytes, 13);
        assert_eq!(fs::read(&record.path).await.unwrap(), b"profile bytes");
        let calls = capture.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &[(ResourceKind::Memory, "heap", DumpFormat::Binary)]
        );
    }

    #[tokio::test]
    async fn test_run_dump_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b");
        let capture = RecordingCapture::new("x");

        let record = run_dump(
            &capture,
            &request(ResourceKind::Cpu, DumpFormat::Text, &nested),
            &StructuredLogger::new("test"),
        )
        .await
        .unwrap();
        assert!(record.path.starts_with(&nested));
    }

    #[tokio::test]
    async fn test_orchestrator_reports_capture_failure() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = DumpOrchestrator::new(
            Arc::new(RecordingCapture::failing()),
            StructuredLogger::new("test"),
            EngineMetrics::new(),
        );

        orchestrator.dispatch(request(
            ResourceKind::Thread,
            DumpFormat::Binary,
            temp_dir.path(),
        ));
        let done = orchestrator.shutdown(defaults::SHUTDOWN_GRACE).await;

        assert!(done.is_empty());
        assert_eq!(orchestrator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_orchestrator_collects_finished_dumps() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = DumpOrchestrator::new(
            Arc::new(RecordingCapture::new("abc")),
            StructuredLogger::new("test"),
            EngineMetrics::new(),
        );

        orchestrator.dispatch(request(ResourceKind::Cpu, DumpFormat::Binary, temp_dir.path()));
        orchestrator.dispatch(request(
            ResourceKind::Memory,
            DumpFormat::Binary,
            temp_dir.path(),
        ));
        assert_eq!(orchestrator.in_flight(), 2);

        let done = orchestrator.shutdown(defaults::SHUTDOWN_GRACE).await;
        assert_eq!(done.len(), 2);
        assert_eq!(orchestrator.reap().len(), 0);
    }
}
