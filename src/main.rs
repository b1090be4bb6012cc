//! `llmfan` — thin CLI front-end over the orchestrator core.
//!
//! Argument parsing, tracing initialization, signal handling, and
//! collaborator wiring live here; none of it is part of the core's
//! contract surface (see `lib.rs`).

use std::process::ExitCode;

use llmfan::collaborators::audit::JsonlAuditLogger;
use llmfan::collaborators::console::StdoutConsoleWriter;
use llmfan::collaborators::file_gatherer::WalkdirFileGatherer;
use llmfan::collaborators::file_writer::AtomicFileWriter;
use llmfan::config::Config;
use llmfan::error::{self, ErrorKind, RunContext};
use llmfan::orchestrator::{self, Collaborators};
use llmfan::ratelimiter::RateLimiter;
use llmfan::tokenizer::TokenizerManager;

/// Distinct exit codes the CLI-facing contract (§6) requires: full
/// success, partial success, and fatal failure are distinguishable to a
/// calling script without parsing stderr.
const EXIT_SUCCESS: u8 = 0;
const EXIT_PARTIAL_SUCCESS: u8 = 2;
const EXIT_FATAL: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("llmfan: invalid configuration: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    init_tracing(&config.resolved_log_level());

    let ctx = RunContext::new();
    tracing::info!(correlation_id = %ctx.correlation_id, "llmfan starting");

    let cancel_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received Ctrl-C, cancelling in-flight work");
            cancel_ctx.cancellation.cancel();
        }
    });

    let output_dir = config.resolved_output_dir();
    let audit_path = output_dir.join("audit.jsonl");
    let audit = match JsonlAuditLogger::create(&audit_path) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("llmfan: failed to open audit log at {}: {e}", audit_path.display());
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let gatherer = WalkdirFileGatherer;
    let writer = AtomicFileWriter::new(config.file_permissions);
    let console = StdoutConsoleWriter;
    let rate_limiter = RateLimiter::new(config.max_concurrent_requests, config.rate_limit_requests_per_minute);
    let tokenizers = TokenizerManager::new();
    let client_factory = llmfan::apiservice::DefaultClientFactory;

    let collab = Collaborators {
        gatherer: &gatherer,
        writer: &writer,
        audit: &audit,
        console: &console,
        rate_limiter: &rate_limiter,
        tokenizers: &tokenizers,
        client_factory: &client_factory,
    };

    match orchestrator::execute(&ctx, &config, &collab).await {
        Ok(()) => {
            tracing::info!("llmfan finished: all requested models succeeded");
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) if error::is_partial_success(&e) => {
            eprintln!("llmfan: partial success: {e}");
            ExitCode::from(EXIT_PARTIAL_SUCCESS)
        }
        Err(e) => {
            eprintln!("llmfan: {}", user_facing_message(&e));
            tracing::error!(error = %e, "llmfan: run failed");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// One-line, user-facing summary for a fatal error — detail beyond this
/// lives in the structured log, not on stderr.
fn user_facing_message(err: &anyhow::Error) -> String {
    for kind in [
        ErrorKind::InvalidConfiguration,
        ErrorKind::InvalidAPIKey,
        ErrorKind::InvalidInstructions,
        ErrorKind::InvalidOutputDir,
        ErrorKind::ContextGatheringFailed,
        ErrorKind::Cancelled,
    ] {
        if error::is_kind(err, kind) {
            return format!("{kind}: {err}");
        }
    }
    err.to_string()
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| format!("llmfan={level}").into()),
        )
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_facing_message_names_the_kind_for_classified_errors() {
        let err: anyhow::Error =
            llmfan::error::TaxonomyError::new(ErrorKind::InvalidInstructions, "instructions must not be empty").into();
        let message = user_facing_message(&err);
        assert!(message.starts_with("invalid instructions"));
    }

    #[test]
    fn user_facing_message_falls_back_to_display_for_unclassified_errors() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(user_facing_message(&err), "boom");
    }
}
