//! Built-in profile capture
//!
//! Records a point-in-time view of the process: memory figures, heap
//! counters, runtime task counts and a per-thread CPU table read from
//! /proc/self/task.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use sysinfo::{Pid, System};
use tokio::fs;

use super::ProfileCapture;
use crate::error::CaptureError;
use crate::heap::{self, HeapStats};
use crate::models::{DumpFormat, ResourceKind};

/// One OS thread of the process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadEntry {
    pub tid: u32,
    pub name: String,
    pub state: String,
    /// utime + stime in clock ticks
    pub cpu_ticks: u64,
}

/// Everything a snapshot dump contains
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub kind: ResourceKind,
    pub profile: String,
    pub captured_at_ms: i64,
    pub pid: u32,
    pub memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    pub heap: Option<HeapStats>,
    pub alive_tasks: Option<u64>,
    pub runtime_workers: Option<u64>,
    /// Sorted by CPU ticks, busiest first
    pub threads: Vec<ThreadEntry>,
}

impl ProcessSnapshot {
    /// Blank-line separated blocks: a header, then one block per thread
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "profile: {} ({})", self.profile, self.kind);
        let _ = writeln!(out, "pid: {}", self.pid);
        let _ = writeln!(out, "captured_at_ms: {}", self.captured_at_ms);
        let _ = writeln!(out, "memory_bytes: {}", self.memory_bytes);
        let _ = writeln!(out, "virtual_memory_bytes: {}", self.virtual_memory_bytes);
        if let Some(heap) = &self.heap {
            let _ = writeln!(out, "heap_live_bytes: {}", heap.live_bytes);
            let _ = writeln!(out, "heap_live_objects: {}", heap.live_objects());
        }
        if let Some(tasks) = self.alive_tasks {
            let _ = writeln!(out, "alive_tasks: {}", tasks);
        }
        if let Some(workers) = self.runtime_workers {
            let _ = writeln!(out, "runtime_workers: {}", workers);
        }
        let _ = write!(out, "threads: {}", self.threads.len());

        for thread in &self.threads {
            let _ = write!(
                out,
                "\n\nthread {} [{}]\n  state: {}\n  cpu_ticks: {}",
                thread.tid, thread.name, thread.state, thread.cpu_ticks
            );
        }
        out
    }
}

/// Parse /proc/<pid>/task/<tid>/stat into (name, state, utime + stime)
///
/// The name is wrapped in parentheses and may itself contain spaces or ')'.
pub fn parse_task_stat(content: &str) -> Option<(String, String, u64)> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close < open {
        return None;
    }
    let name = content[open + 1..close].to_string();

    // Fields after the name start at field 3 (state)
    let fields: Vec<&str> = content[close + 1..].split_whitespace().collect();
    let state = fields.first()?.to_string();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;

    Some((name, state, utime + stime))
}

/// Default capture backend
pub struct ProcSnapshotCapture {
    proc_path: PathBuf,
}

impl ProcSnapshotCapture {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create capture with custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
        }
    }

    async fn read_threads(&self) -> Vec<ThreadEntry> {
        let task_dir = self.proc_path.join("self/task");
        let mut threads = Vec::new();

        let Ok(mut entries) = fs::read_dir(&task_dir).await else {
            return threads;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(tid) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            // Threads may exit between listing and reading
            let Ok(content) = fs::read_to_string(entry.path().join("stat")).await else {
                continue;
            };
            if let Some((name, state, cpu_ticks)) = parse_task_stat(&content) {
                threads.push(ThreadEntry {
                    tid,
                    name,
                    state,
                    cpu_ticks,
                });
            }
        }

        threads.sort_by(|a, b| b.cpu_ticks.cmp(&a.cpu_ticks).then(a.tid.cmp(&b.tid)));
        threads
    }

    pub async fn snapshot(&self, kind: ResourceKind, profile: &str) -> ProcessSnapshot {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        let (memory_bytes, virtual_memory_bytes) = if system.refresh_process(pid) {
            system
                .process(pid)
                .map(|p| (p.memory(), p.virtual_memory()))
                .unwrap_or_default()
        } else {
            (0, 0)
        };

        let runtime = tokio::runtime::Handle::try_current().ok().map(|h| h.metrics());

        ProcessSnapshot {
            kind,
            profile: profile.to_string(),
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
            pid: std::process::id(),
            memory_bytes,
            virtual_memory_bytes,
            heap: heap::heap_stats(),
            alive_tasks: runtime.as_ref().map(|m| m.num_alive_tasks() as u64),
            runtime_workers: runtime.as_ref().map(|m| m.num_workers() as u64),
            threads: self.read_threads().await,
        }
    }
}

impl Default for ProcSnapshotCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileCapture for ProcSnapshotCapture {
    async fn capture(
        &self,
        kind: ResourceKind,
        profile: &'static str,
        format: DumpFormat,
    ) -> Result<Vec<u8>, CaptureError> {
        let snapshot = self.snapshot(kind, profile).await;

        match format {
            DumpFormat::Text => Ok(snapshot.render_text().into_bytes()),
            DumpFormat::Binary => {
                serde_json::to_vec(&snapshot).map_err(|e| CaptureError::Capture {
                    kind,
                    profile,
                    message: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STAT: &str = "1234 (tokio-runtime-w) S 1 1234 1234 0 -1 4194368 1520 0 0 0 37 12 0 0 20 0 8 0 123456 1000000 500 18446744073709551615";

    #[test]
    fn test_parse_task_stat() {
        let (name, state, ticks) = parse_task_stat(STAT).unwrap();
        assert_eq!(name, "tokio-runtime-w");
        assert_eq!(state, "S");
        assert_eq!(ticks, 49);
    }

    #[test]
    fn test_parse_task_stat_name_with_paren() {
        let content = STAT.replace("(tokio-runtime-w)", "(weird) name)");
        let (name, _, ticks) = parse_task_stat(&content).unwrap();
        assert_eq!(name, "weird) name");
        assert_eq!(ticks, 49);
    }

    #[test]
    fn test_parse_task_stat_truncated() {
        assert!(parse_task_stat("1234 (x) S 1 2").is_none());
        assert!(parse_task_stat("garbage").is_none());
    }

    #[tokio::test]
    async fn test_threads_sorted_by_cpu() {
        let temp_dir = TempDir::new().unwrap();
        let task_dir = temp_dir.path().join("self/task");
        for (tid, utime) in [(10, "5"), (11, "50"), (12, "20")] {
            let dir = task_dir.join(tid.to_string());
            fs::create_dir_all(&dir).await.unwrap();
            let stat = STAT.replace(" 37 12 ", &format!(" {utime} 0 "));
            fs::write(dir.join("stat"), stat).await.unwrap();
        }
        // Non-numeric entries are ignored
        fs::create_dir_all(task_dir.join("not-a-tid")).await.unwrap();

        let capture = ProcSnapshotCapture::with_proc_path(temp_dir.path());
        let snapshot = capture.snapshot(ResourceKind::Thread, "threadcreate").await;

        let tids: Vec<_> = snapshot.threads.iter().map(|t| t.tid).collect();
        assert_eq!(tids, vec![11, 12, 10]);
        assert_eq!(snapshot.threads[0].cpu_ticks, 50);
    }

    #[tokio::test]
    async fn test_text_capture_has_one_block_per_thread() {
        let capture = ProcSnapshotCapture::new();
        let bytes = capture
            .capture(ResourceKind::Cpu, "cpu", DumpFormat::Text)
            .await
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("profile: cpu (cpu)"));
        let blocks = text.split("\n\n").count();
        let threads = text.matches("\n\nthread ").count();
        assert_eq!(blocks, threads + 1);
    }

    #[tokio::test]
    async fn test_binary_capture_is_json() {
        let capture = ProcSnapshotCapture::new();
        let bytes = capture
            .capture(ResourceKind::Memory, "heap", DumpFormat::Binary)
            .await
            .unwrap();
        let snapshot: ProcessSnapshot = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(snapshot.profile, "heap");
        assert_eq!(snapshot.kind, ResourceKind::Memory);
        assert_eq!(snapshot.pid, std::process::id());
    }
}
