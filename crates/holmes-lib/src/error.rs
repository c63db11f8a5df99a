//! Error types for the trigger engine
//!
//! None of these are fatal to the monitored process: limit errors are
//! absorbed by the sampler, sample errors skip a single tick and capture
//! errors only cost one dump.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::ResourceKind;

/// Failure to resolve a container resource ceiling
#[derive(Debug, Error)]
pub enum LimitError {
    /// No cgroup mountpoint was found when the mode was probed
    #[error("no container limit information available")]
    Unavailable,

    /// A cgroup file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A cgroup file did not contain what the kernel normally writes there
    #[error("malformed limit data in {path}: {content:?}")]
    Malformed { path: PathBuf, content: String },

    /// The controller is present but no ceiling is configured
    #[error("no limit configured in {path}")]
    Unlimited { path: PathBuf },
}

/// Failure to read the current usage of a resource
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to read {what}: {message}")]
    Probe { what: &'static str, message: String },

    #[error("failed to read {path}: {source}")]
    Proc {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Lightweight task counts come from the ambient tokio runtime
    #[error("no tokio runtime available to count tasks")]
    NoRuntime,

    /// `CountingAllocator` is not installed as the global allocator
    #[error("heap accounting is not enabled")]
    HeapAccountingDisabled,
}

impl SampleError {
    /// Short label used as a metric dimension
    pub fn kind(&self) -> &'static str {
        match self {
            SampleError::Probe { .. } => "probe",
            SampleError::Proc { .. } => "proc",
            SampleError::NoRuntime => "no_runtime",
            SampleError::HeapAccountingDisabled => "heap_disabled",
        }
    }
}

/// Failure while capturing or persisting a dump
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to capture {profile} profile for {kind}: {message}")]
    Capture {
        kind: ResourceKind,
        profile: &'static str,
        message: String,
    },

    #[error("failed to write dump {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    /// Short label used as a metric dimension
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::Capture { .. } => "capture",
            CaptureError::Write { .. } => "write",
        }
    }
}

/// Invalid engine configuration, reported once at startup
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{kind}: thresholds must satisfy 0 <= min ({min}) <= abs ({abs}), diff ({diff}) >= 0")]
    InvalidThresholds {
        kind: ResourceKind,
        min: f64,
        abs: f64,
        diff: f64,
    },

    #[error("{name} must be greater than zero")]
    InvalidInterval { name: &'static str },
}
