//! Tokenizer Manager (C2) — per-provider accurate token counters, cached
//! for the process lifetime, with a fallback path C3 treats as never-fatal.
//!
//! Two accurate counter families back the `"exact-A"` / `"exact-B"` labels
//! the spec's tokenizer-used enumeration names:
//!
//! - **exact-A** — a BPE counter (`tiktoken-rs`, `cl100k_base` vocabulary)
//!   for the OpenAI-shaped providers (`openai`, `groq`, `deepseek`,
//!   `perplexity`), all of which speak the same chat-completions wire
//!   format and are billed against BPE vocabularies.
//! - **exact-B** — a pretrained subword tokenizer (`tokenizers`) loaded
//!   from a local vocabulary file for `anthropic` and `google`, whose
//!   vocabularies are not BPE-compatible with the exact-A family.
//!
//! Construction is lazy (first use per provider) and memoized with
//! at-most-one construction per provider across concurrent callers: a
//! `tokio::sync::OnceCell` per provider, itself reached through a
//! mutex-guarded map, so concurrent `get_tokenizer` calls on the same
//! provider either drive the one initializer or observe its cached
//! terminal outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::OnceCell;

/// A function from text to an integer token count, per provider.
/// Implementations may fail per call (malformed input, encoder error);
/// such failures are returned, never panicked — the caller (C3) treats
/// them as a fallback trigger.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> Result<u64>;

    /// The tokenizer-used label C3 records on a successful count.
    fn label(&self) -> &'static str;
}

/// `tiktoken-rs` BPE counter backing the exact-A label.
struct ExactABpeCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TokenCounter for ExactABpeCounter {
    fn count(&self, text: &str) -> Result<u64> {
        Ok(self.bpe.encode_with_special_tokens(text).len() as u64)
    }

    fn label(&self) -> &'static str {
        "exact-A"
    }
}

fn build_exact_a() -> Result<Arc<dyn TokenCounter>> {
    let bpe = tiktoken_rs::cl100k_base()?;
    Ok(Arc::new(ExactABpeCounter { bpe }))
}

/// `tokenizers` pretrained subword counter backing the exact-B label.
/// Loaded from a local vocabulary file; a missing or malformed file is a
/// construction failure, not a panic.
struct ExactBSubwordCounter {
    tokenizer: tokenizers::Tokenizer,
}

impl TokenCounter for ExactBSubwordCounter {
    fn count(&self, text: &str) -> Result<u64> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("exact-B encode failed: {e}"))?;
        Ok(encoding.get_ids().len() as u64)
    }

    fn label(&self) -> &'static str {
        "exact-B"
    }
}

/// The local vocabulary file path for a provider's exact-B tokenizer.
/// Overridable per-provider via `{PROVIDER}_TOKENIZER_VOCAB_PATH`; the
/// default path is looked for under a `vocab/` directory beside the
/// binary, which in most deployments simply will not exist — that
/// absence is the common case, not an error, and drives estimation
/// fallback until an operator supplies a real vocabulary file.
fn exact_b_vocab_path(provider: &str) -> String {
    let env_var = format!("{}_TOKENIZER_VOCAB_PATH", provider.to_uppercase());
    std::env::var(&env_var).unwrap_or_else(|_| format!("vocab/{provider}.json"))
}

fn build_exact_b(provider: &str) -> Result<Arc<dyn TokenCounter>> {
    let path = exact_b_vocab_path(provider);
    let tokenizer = tokenizers::Tokenizer::from_file(&path)
        .map_err(|e| anyhow::anyhow!("exact-B: failed to load vocabulary '{path}': {e}"))?;
    Ok(Arc::new(ExactBSubwordCounter { tokenizer }))
}

/// Providers whose tokens are counted by the exact-A BPE family.
const EXACT_A_PROVIDERS: &[&str] = &["openai", "groq", "deepseek", "perplexity"];
/// Providers whose tokens are counted by the exact-B subword family.
const EXACT_B_PROVIDERS: &[&str] = &["anthropic", "google"];

type ConstructResult = std::result::Result<Arc<dyn TokenCounter>, String>;

/// Per-provider lazily-initialized, cached token counters.
pub struct TokenizerManager {
    cells: Mutex<HashMap<String, Arc<OnceCell<ConstructResult>>>>,
}

impl TokenizerManager {
    pub fn new() -> Self {
        Self { cells: Mutex::new(HashMap::new()) }
    }

    /// `SupportsProvider(provider) -> bool`.
    pub fn supports_provider(&self, provider: &str) -> bool {
        EXACT_A_PROVIDERS.contains(&provider) || EXACT_B_PROVIDERS.contains(&provider)
    }

    /// `GetTokenizer(provider) -> counter | error`.
    ///
    /// At-most-one construction per provider across concurrent callers:
    /// the first caller to reach a fresh `OnceCell` for `provider` runs
    /// the constructor; every other concurrent caller awaits the same
    /// cell and observes its terminal outcome.
    pub async fn get_tokenizer(&self, provider: &str) -> Result<Arc<dyn TokenCounter>> {
        if !self.supports_provider(provider) {
            anyhow::bail!("tokenizer manager: unsupported provider '{provider}'");
        }

        let cell = {
            let mut cells = self.cells.lock().expect("tokenizer manager mutex poisoned");
            Arc::clone(cells.entry(provider.to_string()).or_insert_with(|| Arc::new(OnceCell::new())))
        };

        let provider_owned = provider.to_string();
        let result = cell
            .get_or_init(move || async move {
                if EXACT_A_PROVIDERS.contains(&provider_owned.as_str()) {
                    build_exact_a().map_err(|e| e.to_string())
                } else {
                    build_exact_b(&provider_owned).map_err(|e| e.to_string())
                }
            })
            .await;

        match result {
            Ok(counter) => Ok(Arc::clone(counter)),
            Err(message) => Err(anyhow::anyhow!("{message}")),
        }
    }

    /// `ClearCache()` — drops all cached counters (test hook).
    pub fn clear_cache(&self) {
        self.cells.lock().expect("tokenizer manager mutex poisoned").clear();
    }
}

impl Default for TokenizerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_provider_covers_both_families() {
        let manager = TokenizerManager::new();
        assert!(manager.supports_provider("openai"));
        assert!(manager.supports_provider("anthropic"));
        assert!(!manager.supports_provider("not-a-real-provider"));
    }

    #[tokio::test]
    async fn get_tokenizer_rejects_unsupported_provider() {
        let manager = TokenizerManager::new();
        assert!(manager.get_tokenizer("not-a-real-provider").await.is_err());
    }

    #[tokio::test]
    async fn get_tokenizer_for_exact_b_fails_gracefully_without_a_vocab_file() {
        // No ANTHROPIC_TOKENIZER_VOCAB_PATH is set in the test environment and
        // vocab/anthropic.json does not exist relative to the test binary, so
        // construction fails — the contract is an Err, never a panic.
        std::env::remove_var("ANTHROPIC_TOKENIZER_VOCAB_PATH");
        let manager = TokenizerManager::new();
        assert!(manager.get_tokenizer("anthropic").await.is_err());
    }

    #[tokio::test]
    async fn get_tokenizer_memoizes_construction_failure() {
        std::env::remove_var("GOOGLE_TOKENIZER_VOCAB_PATH");
        let manager = TokenizerManager::new();
        let first = manager.get_tokenizer("google").await;
        let second = manager.get_tokenizer("google").await;
        assert!(first.is_err() && second.is_err());
    }

    #[tokio::test]
    async fn clear_cache_drops_cached_entries() {
        std::env::remove_var("GOOGLE_TOKENIZER_VOCAB_PATH");
        let manager = TokenizerManager::new();
        let _ = manager.get_tokenizer("google").await;
        assert!(!manager.cells.lock().unwrap().is_empty());
        manager.clear_cache();
        assert!(manager.cells.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_callers_on_same_provider_observe_one_outcome() {
        std::env::remove_var("GOOGLE_TOKENIZER_VOCAB_PATH");
        let manager = Arc::new(TokenizerManager::new());
        let a = Arc::clone(&manager);
        let b = Arc::clone(&manager);
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.get_tokenizer("google").await.is_err() }),
            tokio::spawn(async move { b.get_tokenizer("google").await.is_err() }),
        );
        assert!(ra.unwrap() && rb.unwrap());
    }
}
