//! Audit logger — appends one JSON line per [`AuditEntry`] to a file
//! under the run's output directory. A write failure is recorded to the
//! structured logger and returned to the caller, but the orchestrator
//! never lets it abort the run (§7 propagation policy).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use super::{AuditEntry, AuditLogger, AuditStatus};
use crate::error::RunContext;

#[derive(Serialize)]
struct AuditLine<'a> {
    timestamp: chrono::DateTime<chrono::Utc>,
    correlation_id: String,
    operation: &'a str,
    status: &'static str,
    inputs: &'a std::collections::HashMap<String, String>,
    outputs: &'a std::collections::HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: &'a Option<String>,
}

impl AuditStatus {
    fn as_str(self) -> &'static str {
        match self {
            AuditStatus::InProgress => "in_progress",
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        }
    }
}

pub struct JsonlAuditLogger {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlAuditLogger {
    pub fn create(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating audit log directory for {}", path.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening audit log {}", path.display()))?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditLogger for JsonlAuditLogger {
    async fn log(&self, ctx: &RunContext, entry: &AuditEntry) -> anyhow::Result<()> {
        let line = AuditLine {
            timestamp: entry.timestamp,
            correlation_id: ctx.correlation_id.to_string(),
            operation: &entry.operation,
            status: entry.status.as_str(),
            inputs: &entry.inputs,
            outputs: &entry.outputs,
            error: &entry.error,
        };
        let serialized = serde_json::to_string(&line).context("serializing audit entry")?;

        let mut file = self.file.lock().expect("audit logger mutex poisoned");
        writeln!(file, "{serialized}").with_context(|| format!("appending to audit log {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path).unwrap().lines().map(str::to_string).collect()
    }

    #[tokio::test]
    async fn log_appends_one_json_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = JsonlAuditLogger::create(&path).unwrap();
        let ctx = RunContext::new();

        logger.log(&ctx, &AuditEntry::new("ExecuteStart", AuditStatus::InProgress)).await.unwrap();
        logger.log(&ctx, &AuditEntry::new("ExecuteEnd", AuditStatus::Success)).await.unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["operation"], "ExecuteStart");
        assert_eq!(first["status"], "in_progress");
    }

    #[tokio::test]
    async fn log_serializes_inputs_outputs_and_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = JsonlAuditLogger::create(&path).unwrap();
        let ctx = RunContext::new();

        let mut inputs = HashMap::new();
        inputs.insert("model".to_string(), "gpt-4o".to_string());
        let entry = AuditEntry {
            timestamp: chrono::Utc::now(),
            operation: "ReadInstructions".into(),
            status: AuditStatus::Failure,
            inputs,
            outputs: HashMap::new(),
            error: Some("file not found".into()),
        };
        logger.log(&ctx, &entry).await.unwrap();

        let lines = read_lines(&path);
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["inputs"]["model"], "gpt-4o");
        assert_eq!(value["error"], "file not found");
        assert_eq!(value["status"], "failure");
    }
}
