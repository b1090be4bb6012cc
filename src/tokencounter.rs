//! Token Counting Service (C3) — consumes the Model Registry (C1) and
//! Tokenizer Manager (C2) to compute per-model token totals, degrading
//! from exact tokenization to a cheap character-based estimate without
//! ever surfacing an error from the estimation path itself.

use std::cmp::Ordering;

use crate::registry;
use crate::tokenizer::TokenizerManager;

/// Fixed structural overhead added to every count — message wrapping,
/// role markers, and similar formatting a provider's wire format adds
/// around the raw instruction/file text. A tuning parameter, not part
/// of the contract (see design note on its provenance).
pub const FORMATTING_OVERHEAD_TOKENS: u64 = 500;

/// A single gathered source file, read-only past construction.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub path: String,
    pub content: Vec<u8>,
}

/// `TokenCountingRequest` — instructions, ordered files, and the safety
/// margin to apply against a model's context window.
#[derive(Debug, Clone)]
pub struct TokenCountingRequest {
    pub instructions: String,
    pub files: Vec<FileContent>,
    /// Safety margin percent in `[0, 100]`. `None` defers to the
    /// service default of 10%.
    pub safety_margin_percent: Option<f64>,
}

impl TokenCountingRequest {
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty() && self.files.is_empty()
    }

    fn safety_margin_fraction(&self) -> f64 {
        self.safety_margin_percent.map(|p| p / 100.0).unwrap_or(0.1)
    }

    fn total_file_bytes(&self) -> usize {
        self.files.iter().map(|f| f.content.len()).sum()
    }
}

/// Plain instruction/file/overhead breakdown, with no model attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCountingResult {
    pub total_tokens: u64,
    pub instruction_tokens: u64,
    pub file_tokens: u64,
    pub overhead_tokens: u64,
}

/// [`TokenCountingResult`] attributed to one model/provider, plus which
/// counting strategy produced it.
#[derive(Debug, Clone)]
pub struct ModelTokenCountingResult {
    pub counts: TokenCountingResult,
    pub model_name: String,
    pub provider: String,
    pub tokenizer_used: &'static str,
    pub is_accurate: bool,
}

/// Per-model compatibility verdict against a usable context window.
#[derive(Debug, Clone)]
pub struct ModelCompatibility {
    pub model_name: String,
    pub provider: String,
    pub token_count: u64,
    pub context_window: u64,
    pub usable_context: u64,
    pub is_compatible: bool,
    pub tokenizer_used: &'static str,
    pub is_accurate: bool,
    /// Empty iff compatible.
    pub reason: String,
}

/// `CountTokens(req) -> TokenCountingResult`. Pure estimation path —
/// never fails, never touches C1/C2. Streams per-file lengths instead
/// of concatenating file contents, keeping the contract O(total bytes)
/// rather than the source's repeated-concatenation O(total²).
pub fn count_tokens(req: &TokenCountingRequest) -> TokenCountingResult {
    if req.is_empty() {
        return TokenCountingResult::default();
    }
    let instruction_tokens = estimate_from_chars(req.instructions.chars().count());
    let file_tokens = estimate_from_file_bytes(req.total_file_bytes());
    let overhead_tokens = FORMATTING_OVERHEAD_TOKENS;
    TokenCountingResult {
        total_tokens: instruction_tokens + file_tokens + overhead_tokens,
        instruction_tokens,
        file_tokens,
        overhead_tokens,
    }
}

/// `CountTokensForModel(req, modelName) -> ModelTokenCountingResult | error(ModelNotFound)`.
pub async fn count_tokens_for_model(
    tokenizers: &TokenizerManager,
    req: &TokenCountingRequest,
    model_name: &str,
) -> anyhow::Result<ModelTokenCountingResult> {
    let provider = registry::get_provider_for_model(model_name)
        .ok_or_else(|| {
            crate::error::TaxonomyError::new(
                crate::error::ErrorKind::ModelNotFound,
                format!("unknown model '{model_name}'"),
            )
        })?
        .to_string();

    if req.is_empty() {
        return Ok(ModelTokenCountingResult {
            counts: TokenCountingResult::default(),
            model_name: model_name.to_string(),
            provider,
            tokenizer_used: tokenizer_label_for_provider(&provider),
            is_accurate: true,
        });
    }

    match try_accurate_count(tokenizers, req, &provider).await {
        Ok(counts) => Ok(ModelTokenCountingResult {
            counts,
            model_name: model_name.to_string(),
            provider: provider.clone(),
            tokenizer_used: tokenizer_label_for_provider(&provider),
            is_accurate: true,
        }),
        Err(reason) => {
            tracing::warn!(
                model = model_name,
                provider = provider.as_str(),
                reason = reason.as_str(),
                "token counting: falling back to estimation"
            );
            let counts = count_tokens(req);
            Ok(ModelTokenCountingResult {
                counts,
                model_name: model_name.to_string(),
                provider,
                tokenizer_used: "estimation",
                is_accurate: false,
            })
        }
    }
}

/// The provider-specific label an accurate count would carry, used even
/// on the empty-request fast path where no tokenizer is actually
/// invoked.
fn tokenizer_label_for_provider(provider: &str) -> &'static str {
    match provider {
        "openai" | "groq" | "deepseek" | "perplexity" => "exact-A",
        "anthropic" | "google" => "exact-B",
        _ => "estimation",
    }
}

/// Attempts the accurate counting path; any failure — unsupported
/// provider, tokenizer construction failure, or a per-call tokenization
/// error — is surfaced as `Err(reason)` for the caller to log and fall
/// back from. Per-file counts are summed rather than concatenating file
/// contents first, per the O(total bytes) contract; this is a
/// documented small-error approximation relative to tokenizing the
/// fully joined text.
async fn try_accurate_count(
    tokenizers: &TokenizerManager,
    req: &TokenCountingRequest,
    provider: &str,
) -> Result<TokenCountingResult, String> {
    if !tokenizers.supports_provider(provider) {
        return Err(format!("tokenizer manager does not support provider '{provider}'"));
    }
    let counter = tokenizers.get_tokenizer(provider).await.map_err(|e| e.to_string())?;

    let instruction_tokens = counter.count(&req.instructions).map_err(|e| e.to_string())?;

    let mut file_tokens = 0u64;
    for file in &req.files {
        let text = String::from_utf8_lossy(&file.content);
        file_tokens += counter.count(&text).map_err(|e| e.to_string())?;
    }

    let overhead_tokens = FORMATTING_OVERHEAD_TOKENS;
    Ok(TokenCountingResult {
        total_tokens: instruction_tokens + file_tokens + overhead_tokens,
        instruction_tokens,
        file_tokens,
        overhead_tokens,
    })
}

/// `GetCompatibleModels(req, availableProviders) -> sequence<ModelCompatibility>`.
pub async fn get_compatible_models(
    tokenizers: &TokenizerManager,
    req: &TokenCountingRequest,
    available_providers: &[String],
) -> Vec<ModelCompatibility> {
    tracing::info!(
        provider_count = available_providers.len(),
        file_count = req.files.len(),
        has_instructions = !req.instructions.is_empty(),
        "token counting: starting compatibility check"
    );

    let margin = req.safety_margin_fraction();
    let mut results = Vec::new();

    for model in registry::list_all_models() {
        if !available_providers.iter().any(|p| p == model.provider) {
            continue;
        }

        let counted = count_tokens_for_model(tokenizers, req, model.id)
            .await
            .expect("model id sourced from the registry always resolves");

        let usable_context = (model.context_window as f64 * (1.0 - margin)).floor() as u64;
        let is_compatible = counted.counts.total_tokens <= usable_context;
        let reason = if is_compatible {
            String::new()
        } else {
            format!(
                "model '{}' needs {} tokens but usable context is {} (context window {} minus safety margin)",
                model.id, counted.counts.total_tokens, usable_context, model.context_window
            )
        };

        tracing::info!(
            model = model.id,
            provider = model.provider,
            is_compatible,
            reason = reason.as_str(),
            "token counting: model evaluated"
        );

        results.push(ModelCompatibility {
            model_name: model.id.to_string(),
            provider: model.provider.to_string(),
            token_count: counted.counts.total_tokens,
            context_window: model.context_window,
            usable_context,
            is_compatible,
            tokenizer_used: counted.tokenizer_used,
            is_accurate: counted.is_accurate,
            reason,
        });
    }

    results.sort_by(|a, b| match (a.is_compatible, b.is_compatible) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => b.context_window.cmp(&a.context_window).then_with(|| a.model_name.cmp(&b.model_name)),
    });

    let compatible_count = results.iter().filter(|m| m.is_compatible).count();
    let accurate_count = results.iter().filter(|m| m.is_accurate).count();
    tracing::info!(
        compatible_count,
        accurate_count,
        estimated_count = results.len() - accurate_count,
        "token counting: compatibility check complete"
    );

    results
}

/// `4.3.1` estimation fallback — instruction side. Monotonic, pure,
/// deliberately conservative-biasing rather than tuned for accuracy.
fn estimate_from_chars(char_count: usize) -> u64 {
    ((char_count as f64) / 4.0).ceil() as u64
}

/// `4.3.1` estimation fallback — file side, at the documented 0.75
/// tokens-per-byte ratio.
fn estimate_from_file_bytes(total_bytes: usize) -> u64 {
    ((total_bytes as f64) * 0.75).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(instructions: &str, files: Vec<(&str, &str)>) -> TokenCountingRequest {
        TokenCountingRequest {
            instructions: instructions.to_string(),
            files: files
                .into_iter()
                .map(|(path, content)| FileContent { path: path.to_string(), content: content.as_bytes().to_vec() })
                .collect(),
            safety_margin_percent: None,
        }
    }

    #[test]
    fn count_tokens_on_empty_request_is_the_zero_result() {
        let r = req("", vec![]);
        assert_eq!(count_tokens(&r), TokenCountingResult::default());
    }

    #[test]
    fn count_tokens_total_equals_sum_of_parts() {
        let r = req("Summarize this code.", vec![("main.go", "package main\n")]);
        let result = count_tokens(&r);
        assert_eq!(result.total_tokens, result.instruction_tokens + result.file_tokens + result.overhead_tokens);
        assert_eq!(result.overhead_tokens, FORMATTING_OVERHEAD_TOKENS);
    }

    #[test]
    fn estimation_is_monotonic_in_input_length() {
        assert!(estimate_from_chars(100) < estimate_from_chars(1000));
        assert!(estimate_from_file_bytes(100) < estimate_from_file_bytes(1000));
    }

    #[tokio::test]
    async fn count_tokens_for_model_unknown_model_is_model_not_found() {
        let tokenizers = TokenizerManager::new();
        let r = req("hi", vec![]);
        let err = count_tokens_for_model(&tokenizers, &r, "not-a-model").await.unwrap_err();
        assert!(crate::error::is_kind(&err, crate::error::ErrorKind::ModelNotFound));
    }

    #[tokio::test]
    async fn count_tokens_for_model_falls_back_to_estimation_without_vocab_or_network() {
        std::env::remove_var("ANTHROPIC_TOKENIZER_VOCAB_PATH");
        let tokenizers = TokenizerManager::new();
        let r = req("Summarize this code.", vec![("main.go", "package main\n")]);
        let result = count_tokens_for_model(&tokenizers, &r, "claude-sonnet-4-20250514").await.unwrap();
        assert_eq!(result.tokenizer_used, "estimation");
        assert!(!result.is_accurate);
        assert!(result.counts.total_tokens > 0);
        assert_eq!(result.model_name, "claude-sonnet-4-20250514");
        assert_eq!(result.provider, "anthropic");
    }

    #[tokio::test]
    async fn count_tokens_for_model_empty_request_still_populates_identity_fields() {
        let tokenizers = TokenizerManager::new();
        let r = req("", vec![]);
        let result = count_tokens_for_model(&tokenizers, &r, "gpt-4o").await.unwrap();
        assert_eq!(result.counts, TokenCountingResult::default());
        assert_eq!(result.model_name, "gpt-4o");
        assert_eq!(result.provider, "openai");
    }

    #[tokio::test]
    async fn get_compatible_models_marks_oversized_instructions_incompatible() {
        let tokenizers = TokenizerManager::new();
        let r = TokenCountingRequest {
            instructions: "x".repeat(500_000),
            files: vec![],
            safety_margin_percent: Some(10.0),
        };
        let results = get_compatible_models(&tokenizers, &r, &["deepseek".to_string()]).await;
        let deepseek_chat = results.iter().find(|m| m.model_name == "deepseek-chat").unwrap();
        assert!(!deepseek_chat.is_compatible);
        assert!(deepseek_chat.reason.contains(&deepseek_chat.token_count.to_string()));
        assert!(deepseek_chat.reason.contains(&deepseek_chat.usable_context.to_string()));
        assert!(deepseek_chat.reason.contains("deepseek-chat"));
    }

    #[tokio::test]
    async fn get_compatible_models_filters_to_available_providers() {
        let tokenizers = TokenizerManager::new();
        let r = req("hi", vec![]);
        let results = get_compatible_models(&tokenizers, &r, &["openai".to_string()]).await;
        assert!(results.iter().all(|m| m.provider == "openai"));
    }

    #[tokio::test]
    async fn get_compatible_models_sorts_compatible_first_then_by_context_window_then_name() {
        let tokenizers = TokenizerManager::new();
        let r = req("hi", vec![]);
        let results = get_compatible_models(&tokenizers, &r, &["google".to_string(), "anthropic".to_string()]).await;

        let mut saw_incompatible = false;
        for window in results.windows(2) {
            if !window[0].is_compatible {
                saw_incompatible = true;
            }
            if saw_incompatible {
                assert!(!window[1].is_compatible, "compatible models must precede incompatible ones");
            } else if window[0].is_compatible && window[1].is_compatible {
                if window[0].context_window == window[1].context_window {
                    assert!(window[0].model_name <= window[1].model_name);
                } else {
                    assert!(window[0].context_window > window[1].context_window);
                }
            }
        }
    }

    #[tokio::test]
    async fn usable_context_matches_context_window_times_one_minus_margin() {
        let tokenizers = TokenizerManager::new();
        let r = TokenCountingRequest { instructions: "hi".into(), files: vec![], safety_margin_percent: Some(25.0) };
        let results = get_compatible_models(&tokenizers, &r, &["openai".to_string()]).await;
        for m in &results {
            assert_eq!(m.usable_context, (m.context_window as f64 * 0.75).floor() as u64);
            assert_eq!(m.is_compatible, m.token_count <= m.usable_context);
        }
    }
}
