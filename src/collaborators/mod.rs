//! External collaborator interfaces (C8) — the contracts the core
//! (C3/C6) depends on without knowing their concrete implementation.
//! One minimal concrete implementation per interface lives in a sibling
//! module as substitutable ambient scaffolding (§10.5); none of it is
//! part of the specified contract.

pub mod audit;
pub mod console;
pub mod file_gatherer;
pub mod file_writer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::RunContext;
use crate::tokencounter::FileContent;

/// Statistics the file gatherer reports alongside the gathered files,
/// consumed by `DisplayDryRunInfo` and the audit trail.
#[derive(Debug, Clone, Default)]
pub struct GatherStats {
    pub files_scanned: usize,
    pub files_included: usize,
    pub files_excluded: usize,
    pub total_bytes: u64,
}

/// Forwarded subset of [`crate::config::Config`] the file gatherer
/// actually consumes.
#[derive(Debug, Clone, Default)]
pub struct GatherConfig {
    pub paths: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub exclude_names: Vec<String>,
    pub format: Option<String>,
}

/// `FileGatherer`: `Gather(ctx, config) -> (files, stats) | error`;
/// `DisplayDryRunInfo(ctx, stats) -> error`.
#[async_trait]
pub trait FileGatherer: Send + Sync {
    async fn gather(&self, ctx: &RunContext, config: &GatherConfig) -> anyhow::Result<(Vec<FileContent>, GatherStats)>;

    async fn display_dry_run_info(&self, ctx: &RunContext, stats: &GatherStats) -> anyhow::Result<()>;
}

/// `FileWriter`: `SaveToFile(ctx, content, path) -> error`, atomic
/// write-to-temp-then-rename.
#[async_trait]
pub trait FileWriter: Send + Sync {
    async fn save_to_file(&self, ctx: &RunContext, content: &str, path: &std::path::Path) -> anyhow::Result<()>;
}

/// Lifecycle status an [`AuditEntry`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    InProgress,
    Success,
    Failure,
}

/// One audit-log record: `(timestamp, operation, status, inputs, outputs, optional error info)`.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub status: AuditStatus,
    pub inputs: HashMap<String, String>,
    pub outputs: HashMap<String, String>,
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn new(operation: impl Into<String>, status: AuditStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.into(),
            status,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            error: None,
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

/// `AuditLogger`: `Log(ctx, entry) -> error`. Failures are recorded to
/// the structured logger but never abort the run — callers should
/// treat a `Log` error as informational, not propagate it.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log(&self, ctx: &RunContext, entry: &AuditEntry) -> anyhow::Result<()>;
}

/// Status events the orchestrator emits per model, plus the terminal
/// run summary.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    ModelQueued { model: String },
    ModelStarted { model: String },
    ModelCompleted { model: String, output_path: String },
    ModelFailed { model: String, reason: String },
    ModelRateLimited { model: String, retry_after: std::time::Duration },
    SynthesisStarted { model: String },
    SynthesisCompleted { model: String, output_path: String },
    Summary { succeeded: Vec<String>, failed: Vec<String> },
}

/// `ConsoleWriter`: status-event sink.
pub trait ConsoleWriter: Send + Sync {
    fn emit(&self, event: StatusEvent);
}
