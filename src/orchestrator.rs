//! Orchestrator (C6) — the single entry point that ties the registry,
//! token counting, rate limiter, and per-provider clients together: gather
//! context, select compatible models, fan out one worker per model bounded
//! by the rate limiter, optionally synthesize, and report a verdict.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::future::join_all;

use crate::apiservice::{self, GenerateOutcome, Params};
use crate::collaborators::{
    AuditEntry, AuditLogger, AuditStatus, ConsoleWriter, FileGatherer, FileWriter, GatherConfig, StatusEvent,
};
use crate::config::Config;
use crate::error::{ErrorKind, RunContext, TaxonomyError};
use crate::ratelimiter::RateLimiter;
use crate::registry;
use crate::tokencounter::{self, FileContent, TokenCountingRequest};
use crate::tokenizer::TokenizerManager;

/// Retries attempted after a provider-signalled rate limit before a
/// model is recorded as Failed (§4.6 step 3e).
const RATE_LIMIT_RETRY_LIMIT: u32 = 2;

struct ModelSuccess {
    model: String,
    content: String,
    output_path: String,
}

enum ModelOutcome {
    Succeeded(ModelSuccess),
    /// Carries the classified `anyhow::Error` (not a stringified reason)
    /// so `verdict` can recognize `ErrorKind::Cancelled` without losing
    /// it to a plain `String`.
    Failed { model: String, error: anyhow::Error },
}

/// Everything [`execute`] needs beyond `ctx`/`config`, bundled so the
/// fan-out loop doesn't thread eight parameters through every helper.
#[allow(clippy::too_many_arguments)]
pub struct Collaborators<'a> {
    pub gatherer: &'a dyn FileGatherer,
    pub writer: &'a dyn FileWriter,
    pub audit: &'a dyn AuditLogger,
    pub console: &'a dyn ConsoleWriter,
    pub rate_limiter: &'a RateLimiter,
    pub tokenizers: &'a TokenizerManager,
    /// Resolves a model name to an [`apiservice::LLMClient`]. Production
    /// callers pass [`apiservice::DefaultClientFactory`]; tests pass a
    /// stub so the fan-out loop never makes a real network call.
    pub client_factory: &'a dyn apiservice::ClientFactory,
}

/// `Execute(ctx, config, logger, auditLogger, apiService, consoleWriter) → error`.
///
/// `apiService` in the contract names the C4 dispatch surface; here it is
/// `collab.client_factory`, an injected [`apiservice::ClientFactory`]
/// rather than a direct call into the free-function `apiservice` module,
/// so the fan-out loop stays substitutable in tests.
/// `logger` is `tracing`, used directly by every helper below rather than
/// threaded as a parameter, matching the grounding codebase's own use of
/// module-level `tracing` macros instead of an injected logger handle.
pub async fn execute(ctx: &RunContext, config: &Config, collab: &Collaborators<'_>) -> Result<()> {
    log_audit(ctx, collab.audit, AuditEntry::new("ExecuteStart", AuditStatus::InProgress)).await;

    let result = run(ctx, config, collab).await;

    let end_entry = match &result {
        Ok(()) => AuditEntry::new("ExecuteEnd", AuditStatus::Success),
        Err(e) => AuditEntry::new("ExecuteEnd", AuditStatus::Failure).with_error(e.to_string()),
    };
    log_audit(ctx, collab.audit, end_entry).await;

    result
}

async fn run(ctx: &RunContext, config: &Config, collab: &Collaborators<'_>) -> Result<()> {
    let instructions = read_instructions(ctx, config, collab.audit).await?;

    let gather_config = GatherConfig {
        paths: config.paths.clone(),
        include: config.include.clone(),
        exclude: config.exclude.clone(),
        exclude_names: config.exclude_names.clone(),
        format: Some(config.format.clone()),
    };
    let (files, stats) = collab
        .gatherer
        .gather(ctx, &gather_config)
        .await
        .context(TaxonomyError::new(ErrorKind::ContextGatheringFailed, "gathering context files"))?;

    if config.dry_run {
        collab.gatherer.display_dry_run_info(ctx, &stats).await?;
        let compatibility = select_models(collab.tokenizers, &instructions, &files, config).await;
        for m in &compatibility {
            tracing::info!(model = m.model_name, is_compatible = m.is_compatible, "dry run: model evaluated");
        }
        return Ok(());
    }

    if ctx.is_cancelled() {
        return Err(TaxonomyError::new(ErrorKind::Cancelled, "execute: cancelled before fan-out").into());
    }

    let output_dir = config.resolved_output_dir();
    create_output_dir(&output_dir, config.dir_permissions)?;

    let compatibility = select_models(collab.tokenizers, &instructions, &files, config).await;
    let compatibility: HashMap<&str, _> = compatibility.iter().map(|m| (m.model_name.as_str(), m)).collect();

    let mut outcomes: Vec<ModelOutcome> = Vec::new();
    let mut runnable: Vec<&str> = Vec::new();

    for model in &config.model_names {
        match compatibility.get(model.as_str()) {
            // `select_models` derives its provider set from exactly
            // `config.model_names`' own known providers, so the only way
            // to miss an entry here is a model with no registry entry at
            // all — there is no reachable "provider not available" case
            // to distinguish from that.
            None => {
                outcomes.push(ModelOutcome::Failed {
                    model: model.clone(),
                    error: TaxonomyError::new(ErrorKind::ModelNotFound, format!("unknown model '{model}'")).into(),
                });
            }
            Some(m) if !m.is_compatible => {
                outcomes.push(ModelOutcome::Failed {
                    model: model.clone(),
                    error: TaxonomyError::new(ErrorKind::InvalidConfiguration, m.reason.clone()).into(),
                });
            }
            Some(_) => runnable.push(model),
        }
    }

    let prompt = build_prompt(&instructions, &files);

    // One concurrent pipeline per compatible model, admitted by the rate
    // limiter's global semaphore — the gate named in §5, not an
    // additional cap imposed here. Driving them concurrently via
    // `join_all` rather than `tokio::spawn` keeps every collaborator
    // reference borrowed for the duration of `execute`, with no `Arc`
    // wrapping required around trait objects the caller still owns.
    let model_runs = join_all(runnable.into_iter().map(|model| {
        let output_path = output_dir.join(format!("{}.{}", sanitize_model_name(model), config.format));
        run_pipeline(ctx, collab, model, &prompt, config.api_key.as_deref(), config.api_endpoint.as_deref(), &output_path)
    }))
    .await;

    for (model, result) in model_runs {
        match result {
            Ok((content, output_path)) => {
                collab.console.emit(StatusEvent::ModelCompleted { model: model.clone(), output_path: output_path.clone() });
                outcomes.push(ModelOutcome::Succeeded(ModelSuccess { model, content, output_path }));
            }
            Err(error) => {
                collab.console.emit(StatusEvent::ModelFailed { model: model.clone(), reason: error.to_string() });
                outcomes.push(ModelOutcome::Failed { model, error });
            }
        }
    }

    let mut succeeded: Vec<ModelSuccess> = Vec::new();
    let mut failed: Vec<(String, anyhow::Error)> = Vec::new();
    for outcome in outcomes {
        match outcome {
            ModelOutcome::Succeeded(s) => succeeded.push(s),
            ModelOutcome::Failed { model, error } => failed.push((model, error)),
        }
    }
    succeeded.sort_by_key(|s| config.model_names.iter().position(|m| m == &s.model).unwrap_or(usize::MAX));

    let mut synthesis_error: Option<anyhow::Error> = None;
    if let Some(synthesis_model) = &config.synthesis_model {
        if succeeded.len() >= 2 {
            collab.console.emit(StatusEvent::SynthesisStarted { model: synthesis_model.clone() });
            let synthesis_prompt = build_synthesis_prompt(&instructions, &succeeded);
            let output_path = output_dir.join(format!("{}-synthesis.{}", sanitize_model_name(synthesis_model), config.format));
            match run_pipeline(
                ctx,
                collab,
                synthesis_model,
                &synthesis_prompt,
                config.api_key.as_deref(),
                config.api_endpoint.as_deref(),
                &output_path,
            )
            .await
            .1
            {
                Ok((_, path)) => collab.console.emit(StatusEvent::SynthesisCompleted { model: synthesis_model.clone(), output_path: path }),
                Err(e) => {
                    tracing::warn!(model = synthesis_model.as_str(), error = %e, "synthesis failed");
                    synthesis_error = Some(e);
                }
            }
        } else {
            tracing::info!("synthesis requested but fewer than two models succeeded; skipping");
        }
    }

    collab.console.emit(StatusEvent::Summary {
        succeeded: succeeded.iter().map(|s| s.model.clone()).collect(),
        failed: failed.iter().map(|(m, _)| m.clone()).collect(),
    });

    verdict(&succeeded, &failed, synthesis_error.as_ref())
}

fn verdict(succeeded: &[ModelSuccess], failed: &[(String, anyhow::Error)], synthesis_error: Option<&anyhow::Error>) -> Result<()> {
    // Cancellation takes priority over every other classification: a run
    // cancelled mid-flight must surface `Is(err, Cancelled)` regardless
    // of how many models happened to succeed before the signal arrived.
    let cancelled = failed.iter().any(|(_, e)| crate::error::is_cancelled(e))
        || synthesis_error.is_some_and(crate::error::is_cancelled);
    if cancelled {
        return Err(TaxonomyError::new(ErrorKind::Cancelled, "run cancelled mid-flight").into());
    }
    if succeeded.is_empty() {
        let reasons = failed.iter().map(|(m, e)| format!("{m}: {e}")).collect::<Vec<_>>().join("; ");
        // Not `ContextGatheringFailed` — that kind is specifically the
        // file-gather collaborator/init error, and this path fires for
        // any mix of per-model causes (unknown model, incompatible
        // context window, provider failure). `InvalidConfiguration`
        // already covers "input larger than model can accept", which is
        // the common case driving a full wipeout.
        return Err(TaxonomyError::new(ErrorKind::InvalidConfiguration, format!("no model produced output ({reasons})")).into());
    }
    if !failed.is_empty() || synthesis_error.is_some() {
        return Err(TaxonomyError::new(
            ErrorKind::PartialSuccess,
            format!("{} of {} requested models failed", failed.len(), succeeded.len() + failed.len()),
        )
        .into());
    }
    Ok(())
}

async fn read_instructions(ctx: &RunContext, config: &Config, audit: &dyn AuditLogger) -> Result<String> {
    log_audit(ctx, audit, AuditEntry::new("ReadInstructions", AuditStatus::InProgress)).await;

    let instructions = match (&config.instructions_file, config.dry_run) {
        (Some(path), _) => match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                let err = TaxonomyError::new(
                    ErrorKind::InvalidInstructions,
                    format!("failed to read instructions file '{}': {e}", path.display()),
                );
                log_audit(ctx, audit, AuditEntry::new("ReadInstructions", AuditStatus::Failure).with_error(err.to_string())).await;
                return Err(err.into());
            }
        },
        (None, true) => String::new(),
        (None, false) => {
            let err = TaxonomyError::new(ErrorKind::InvalidInstructions, "instructions file is required outside dry-run");
            log_audit(ctx, audit, AuditEntry::new("ReadInstructions", AuditStatus::Failure).with_error(err.to_string())).await;
            return Err(err.into());
        }
    };

    if instructions.trim().is_empty() && !config.dry_run {
        let err = TaxonomyError::new(ErrorKind::InvalidInstructions, "instructions must not be empty");
        log_audit(ctx, audit, AuditEntry::new("ReadInstructions", AuditStatus::Failure).with_error(err.to_string())).await;
        return Err(err.into());
    }

    log_audit(ctx, audit, AuditEntry::new("ReadInstructions", AuditStatus::Success)).await;
    Ok(instructions)
}

fn create_output_dir(dir: &Path, mode: u32) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| TaxonomyError::new(ErrorKind::InvalidOutputDir, format!("creating output directory '{}': {e}", dir.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode))
            .map_err(|e| TaxonomyError::new(ErrorKind::InvalidOutputDir, format!("setting permissions on '{}': {e}", dir.display())))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

async fn select_models(
    tokenizers: &TokenizerManager,
    instructions: &str,
    files: &[FileContent],
    config: &Config,
) -> Vec<tokencounter::ModelCompatibility> {
    let providers: Vec<String> = config
        .model_names
        .iter()
        .filter_map(|m| registry::get_provider_for_model(m))
        .map(|p| p.to_string())
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();

    let req = TokenCountingRequest {
        instructions: instructions.to_string(),
        files: files.to_vec(),
        safety_margin_percent: config.safety_margin_percent,
    };
    tokencounter::get_compatible_models(tokenizers, &req, &providers).await
}

fn build_prompt(instructions: &str, files: &[FileContent]) -> String {
    let mut prompt = instructions.to_string();
    for file in files {
        prompt.push_str("\n\n--- ");
        prompt.push_str(&file.path);
        prompt.push_str(" ---\n");
        prompt.push_str(&String::from_utf8_lossy(&file.content));
    }
    prompt
}

fn build_synthesis_prompt(instructions: &str, succeeded: &[ModelSuccess]) -> String {
    let mut prompt = instructions.to_string();
    for s in succeeded {
        prompt.push_str("\n\n--- ");
        prompt.push_str(&s.model);
        prompt.push_str(" ---\n");
        prompt.push_str(&s.content);
    }
    prompt
}

fn sanitize_model_name(model: &str) -> String {
    model.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '-' }).collect()
}

/// Runs one model's full queue → rate-limit-acquire → init → generate →
/// process → write pipeline (§4.6 step 3), retrying provider-signalled
/// rate limits up to [`RATE_LIMIT_RETRY_LIMIT`] times. Shared by the
/// per-model fan-out and the synthesis stage, which differ only in
/// their prompt and output path.
async fn run_pipeline(
    ctx: &RunContext,
    collab: &Collaborators<'_>,
    model: &str,
    prompt: &str,
    api_key: Option<&str>,
    api_endpoint: Option<&str>,
    output_path: &Path,
) -> (String, Result<(String, String)>) {
    let result = run_pipeline_inner(ctx, collab, model, prompt, api_key, api_endpoint, output_path).await;
    (model.to_string(), result)
}

async fn run_pipeline_inner(
    ctx: &RunContext,
    collab: &Collaborators<'_>,
    model: &str,
    prompt: &str,
    api_key: Option<&str>,
    api_endpoint: Option<&str>,
    output_path: &Path,
) -> Result<(String, String)> {
    collab.console.emit(StatusEvent::ModelQueued { model: model.to_string() });

    let provider = registry::get_provider_for_model(model).unwrap_or("unknown");
    let _permit = collab.rate_limiter.acquire(ctx, provider).await?;

    collab.console.emit(StatusEvent::ModelStarted { model: model.to_string() });

    let client = collab.client_factory.init(ctx, api_key, model, api_endpoint).await?;
    let params = apiservice::get_model_parameters(model).unwrap_or_default();

    let content = generate_and_process(ctx, collab.console, client.as_ref(), model, prompt, &params).await?;

    collab
        .writer
        .save_to_file(ctx, &content, output_path)
        .await
        .with_context(|| format!("writing output for '{model}'"))?;

    Ok((content, output_path.to_string_lossy().to_string()))
}

async fn generate_and_process(
    ctx: &RunContext,
    console: &dyn ConsoleWriter,
    client: &dyn apiservice::LLMClient,
    model: &str,
    prompt: &str,
    params: &Params,
) -> Result<String> {
    let mut attempts = 0;
    loop {
        if ctx.is_cancelled() {
            return Err(TaxonomyError::new(ErrorKind::Cancelled, format!("'{model}': cancelled before generate")).into());
        }
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => {
                return Err(TaxonomyError::new(ErrorKind::Cancelled, format!("'{model}': cancelled during generate")).into());
            }
            result = client.generate_content(ctx, prompt, params) => result?,
        };
        match outcome {
            GenerateOutcome::Result(result) => return apiservice::process_llm_response(Some(&result)),
            GenerateOutcome::RateLimited(signal) => {
                if attempts >= RATE_LIMIT_RETRY_LIMIT {
                    return Err(anyhow::anyhow!("'{model}' exhausted rate-limit retries"));
                }
                let wait = signal.retry_after.min(crate::error::RETRY_AFTER_CEILING);
                console.emit(StatusEvent::ModelRateLimited { model: model.to_string(), retry_after: wait });
                tokio::select! {
                    biased;
                    _ = ctx.cancellation.cancelled() => {
                        return Err(TaxonomyError::new(ErrorKind::Cancelled, format!("'{model}': cancelled waiting for rate-limit retry")).into());
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
                attempts += 1;
            }
        }
    }
}

async fn log_audit(ctx: &RunContext, audit: &dyn AuditLogger, entry: AuditEntry) {
    if let Err(e) = audit.log(ctx, &entry).await {
        tracing::warn!(operation = entry.operation.as_str(), error = %e, "audit log write failed");
    }
}
