//! APIService (C4) — resolves a model name to a provider client,
//! normalizes provider responses, and classifies errors into the shared
//! taxonomy.
//!
//! Every provider implements [`LLMClient`]. Adding a provider means adding
//! a module here and one arm in [`init_llm_client`]'s dispatch.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{ErrorKind, RunContext, TaxonomyError};
use crate::registry::{self, ParamValue};

pub mod anthropic;
mod chat_completions;
pub mod deepseek;
pub mod google;
pub mod groq;
pub mod openai;
pub mod perplexity;

/// A single generation parameter value as passed across the client
/// boundary. Mirrors [`ParamValue`] but owns its string variant, since
/// caller-supplied overrides are not `'static`.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Float(f64),
    Int(i64),
    Str(String),
}

impl From<ParamValue> for Param {
    fn from(v: ParamValue) -> Self {
        match v {
            ParamValue::Float(f) => Param::Float(f),
            ParamValue::Int(i) => Param::Int(i),
            ParamValue::Str(s) => Param::Str(s.to_string()),
        }
    }
}

pub type Params = HashMap<String, Param>;

/// A safety-filter record attached to a provider response.
#[derive(Debug, Clone)]
pub struct SafetyRecord {
    pub category: String,
    pub blocked: bool,
}

/// The raw, provider-normalized result of a single generation call.
/// `ProcessLLMResponse` turns this into plain content or a classified
/// error.
#[derive(Debug, Clone, Default)]
pub struct ProviderResult {
    pub content: Option<String>,
    pub safety_records: Vec<SafetyRecord>,
    pub finish_reason: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Signalled by a client when the provider itself reports a rate limit
/// on a generation call — distinct from our own concurrency/RPM gate.
#[derive(Debug, Clone)]
pub struct RateLimitSignal {
    pub retry_after: Duration,
}

/// The per-call outcome a worker in the orchestrator reacts to.
pub enum GenerateOutcome {
    Result(ProviderResult),
    RateLimited(RateLimitSignal),
}

/// A live client bound to one model, one resolved API key, and one
/// endpoint. Constructed by [`init_llm_client`]; closed by the caller
/// once the worker is done with it.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn generate_content(
        &self,
        ctx: &RunContext,
        prompt: &str,
        params: &Params,
    ) -> Result<GenerateOutcome>;

    fn get_model_name(&self) -> &str;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// `InitLLMClient(ctx, apiKey, modelName, apiEndpoint) → client | error`.
pub async fn init_llm_client(
    ctx: &RunContext,
    api_key: Option<&str>,
    model_name: &str,
    api_endpoint: Option<&str>,
) -> Result<Box<dyn LLMClient>> {
    if model_name.trim().is_empty() {
        return Err(TaxonomyError::new(
            ErrorKind::ClientInitialization,
            "model name must not be empty",
        )
        .into());
    }
    if ctx.is_cancelled() {
        return Err(TaxonomyError::new(ErrorKind::Cancelled, "init_llm_client: context cancelled").into());
    }

    let info = registry::get_model_info(model_name).ok_or_else(|| {
        TaxonomyError::new(ErrorKind::ModelNotFound, format!("unknown model '{model_name}'"))
    })?;
    let provider = info.provider;

    let env_var = registry::get_api_key_env_var(provider);
    let resolved_key = match std::env::var(&env_var) {
        Ok(v) if !v.is_empty() => {
            tracing::debug!(provider, source = "env", key_len = v.len(), "resolved API key");
            v
        }
        _ => match api_key {
            Some(v) if !v.is_empty() => {
                tracing::debug!(provider, source = "caller", key_len = v.len(), "resolved API key");
                v.to_string()
            }
            _ => {
                return Err(TaxonomyError::new(
                    ErrorKind::InvalidAPIKey,
                    format!("no API key for provider '{provider}': set {env_var}"),
                )
                .into());
            }
        },
    };

    let client: Box<dyn LLMClient> = match provider {
        "google" => Box::new(google::GoogleClient::new(model_name, &resolved_key, api_endpoint)),
        "anthropic" => Box::new(anthropic::AnthropicClient::new(model_name, &resolved_key, api_endpoint)),
        "openai" => Box::new(openai::OpenAIClient::new(model_name, &resolved_key, api_endpoint)),
        "groq" => Box::new(groq::GroqClient::new(model_name, &resolved_key, api_endpoint)),
        "deepseek" => Box::new(deepseek::DeepSeekClient::new(model_name, &resolved_key, api_endpoint)),
        "perplexity" => Box::new(perplexity::PerplexityClient::new(model_name, &resolved_key, api_endpoint)),
        other => {
            return Err(TaxonomyError::new(
                ErrorKind::ProviderNotFound,
                format!("no client dispatch for provider '{other}'"),
            )
            .into());
        }
    };

    Ok(client)
}

/// Builds a client for a model, given the caller-supplied API key and
/// endpoint override. The orchestrator depends on this trait rather than
/// calling [`init_llm_client`] directly, so tests can inject a stub
/// factory instead of resolving a real provider client.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn init(
        &self,
        ctx: &RunContext,
        api_key: Option<&str>,
        model_name: &str,
        api_endpoint: Option<&str>,
    ) -> Result<Box<dyn LLMClient>>;
}

/// The production factory: delegates straight to [`init_llm_client`].
pub struct DefaultClientFactory;

#[async_trait]
impl ClientFactory for DefaultClientFactory {
    async fn init(
        &self,
        ctx: &RunContext,
        api_key: Option<&str>,
        model_name: &str,
        api_endpoint: Option<&str>,
    ) -> Result<Box<dyn LLMClient>> {
        init_llm_client(ctx, api_key, model_name, api_endpoint).await
    }
}

const EMPTY_VOCAB: &[&str] = &[
    "empty response",
    "empty content",
    "empty output",
    "empty result",
    "zero candidates",
    "empty candidates",
    "no output",
];

const SAFETY_VOCAB: &[&str] = &[
    "safety",
    "content policy",
    "content filter",
    "moderation",
    "blocked",
    "filtered",
    "harm_category",
];

/// `ProcessLLMResponse(result) → content | error`.
pub fn process_llm_response(result: Option<&ProviderResult>) -> Result<String> {
    let result = result.ok_or_else(|| TaxonomyError::new(ErrorKind::EmptyResponse, "nil provider result"))?;

    let content = result.content.as_deref().unwrap_or("");
    if content.is_empty() {
        if let Some(blocked) = result.safety_records.iter().find(|r| r.blocked) {
            return Err(TaxonomyError::new(
                ErrorKind::SafetyBlocked,
                format!("blocked by safety category '{}'", blocked.category),
            )
            .into());
        }
        let mut msg = "empty response content".to_string();
        if let Some(reason) = &result.finish_reason {
            msg.push_str(&format!(" (finish reason: {reason})"));
        }
        return Err(TaxonomyError::new(ErrorKind::EmptyResponse, msg).into());
    }

    if content.trim().is_empty() {
        return Err(TaxonomyError::new(ErrorKind::WhitespaceContent, "whitespace-only content").into());
    }

    Ok(content.to_string())
}

/// `GetModelParameters(ctx, model) → map | error` — a defensive copy of
/// the model's declared defaults.
pub fn get_model_parameters(model: &str) -> Result<Params> {
    let info = registry::get_model_info(model)
        .ok_or_else(|| TaxonomyError::new(ErrorKind::ModelNotFound, format!("unknown model '{model}'")))?;
    Ok(info
        .parameters
        .iter()
        .map(|p| (p.name.to_string(), Param::from(p.default)))
        .collect())
}

/// `ValidateModelParameter(ctx, model, paramName, value) → bool | error`.
pub fn validate_model_parameter(model: &str, param_name: &str, value: ParamValue) -> Result<bool> {
    match registry::validate_parameter(model, param_name, value) {
        Ok(()) => Ok(true),
        Err(e) if e.kind == ErrorKind::InvalidConfiguration => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// `GetModelDefinition(ctx, model) → ModelInfo | error`.
pub fn get_model_definition(model: &str) -> Result<&'static registry::ModelInfo> {
    registry::get_model_info(model)
        .ok_or_else(|| TaxonomyError::new(ErrorKind::ModelNotFound, format!("unknown model '{model}'")).into())
}

/// `GetModelTokenLimits(ctx, model) → (contextWindow, maxOutputTokens) | error`.
pub fn get_model_token_limits(model: &str) -> Result<(u64, u64)> {
    let info = get_model_definition(model)?;
    Ok((info.context_window, info.max_output_tokens))
}

fn chain_contains_any(err: &anyhow::Error, vocab: &[&str]) -> bool {
    err.chain().any(|cause| {
        let text = cause.to_string().to_lowercase();
        vocab.iter().any(|needle| text.contains(needle))
    })
}

/// `IsEmptyResponseError(err) → bool`.
pub fn is_empty_response_error(err: &anyhow::Error) -> bool {
    if crate::error::is_kind(err, ErrorKind::EmptyResponse) {
        return true;
    }
    chain_contains_any(err, EMPTY_VOCAB)
}

/// `IsSafetyBlockedError(err) → bool`.
pub fn is_safety_blocked_error(err: &anyhow::Error) -> bool {
    if crate::error::is_kind(err, ErrorKind::SafetyBlocked) {
        return true;
    }
    chain_contains_any(err, SAFETY_VOCAB)
}

/// `GetErrorDetails(err) → string`.
pub fn get_error_details(err: Option<&anyhow::Error>) -> String {
    crate::error::error_details(err)
}

/// Truncates an HTTP error body for inclusion in a message, preserving
/// only the first `limit` bytes — providers sometimes return bodies in
/// the tens of kilobytes for a 500.
pub(crate) fn truncate_body(body: &str, limit: usize) -> &str {
    &body[..body.len().min(limit)]
}

/// Shared helper: build `Context` for a reqwest send, normalizing the
/// "connection never reached the provider" case into ClientInitialization
/// rather than letting a bare reqwest error escape un-classified.
pub(crate) fn wrap_send_err(provider: &'static str) -> impl Fn(reqwest::Error) -> anyhow::Error {
    move |e| {
        anyhow::Error::new(TaxonomyError::new(
            ErrorKind::ClientInitialization,
            format!("{provider}: request failed: {e}"),
        ))
    }
}
