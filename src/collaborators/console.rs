//! Console writer — prints status events to stdout, one deterministic
//! line per event, plus a terminal summary. Substitutable scaffolding;
//! the orchestrator depends only on the [`ConsoleWriter`] trait.

use super::{ConsoleWriter, StatusEvent};

pub struct StdoutConsoleWriter;

impl ConsoleWriter for StdoutConsoleWriter {
    fn emit(&self, event: StatusEvent) {
        println!("{}", format_event(&event));
    }
}

fn format_event(event: &StatusEvent) -> String {
    match event {
        StatusEvent::ModelQueued { model } => format!("[queued]       {model}"),
        StatusEvent::ModelStarted { model } => format!("[started]      {model}"),
        StatusEvent::ModelCompleted { model, output_path } => format!("[completed]    {model} -> {output_path}"),
        StatusEvent::ModelFailed { model, reason } => format!("[failed]       {model}: {reason}"),
        StatusEvent::ModelRateLimited { model, retry_after } => {
            format!("[rate-limited] {model}: retrying in {}ms", retry_after.as_millis())
        }
        StatusEvent::SynthesisStarted { model } => format!("[synthesis]    started ({model})"),
        StatusEvent::SynthesisCompleted { model, output_path } => {
            format!("[synthesis]    completed ({model}) -> {output_path}")
        }
        StatusEvent::Summary { succeeded, failed } => {
            format!(
                "[summary]      {} succeeded ({}), {} failed ({})",
                succeeded.len(),
                succeeded.join(", "),
                failed.len(),
                failed.join(", ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn formats_each_event_variant_on_one_line() {
        assert!(!format_event(&StatusEvent::ModelQueued { model: "gpt-4o".into() }).contains('\n'));
        assert!(format_event(&StatusEvent::ModelFailed { model: "gpt-4o".into(), reason: "boom".into() })
            .contains("boom"));
        assert!(format_event(&StatusEvent::ModelRateLimited {
            model: "gpt-4o".into(),
            retry_after: Duration::from_millis(250)
        })
        .contains("250ms"));
    }

    #[test]
    fn summary_lists_both_succeeded_and_failed_models() {
        let line = format_event(&StatusEvent::Summary {
            succeeded: vec!["gpt-4o".into()],
            failed: vec!["sonar".into(), "deepseek-chat".into()],
        });
        assert!(line.contains("gpt-4o"));
        assert!(line.contains("sonar"));
        assert!(line.contains("deepseek-chat"));
    }
}
