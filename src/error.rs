//! Error taxonomy (C7) — a closed set of semantic kinds carried as a
//! structured field on a single wrapping error type, plus the chain-walking
//! classifiers C3/C4/C6 rely on.
//!
//! The upstream system this is modeled on mixes sentinel errors, a wrapped
//! error with a category field, and ad-hoc substring matching. Here the
//! kind enum is the primary mechanism; the legacy substring-matching
//! fallback for third-party HTTP bodies that never pass through our own
//! classification path lives at the call site that needs it
//! ([`crate::apiservice::is_empty_response_error`] /
//! `is_safety_blocked_error`), not duplicated here.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Invocation-scoped identifiers threaded through every log line and
/// cancellation check: a correlation id for log correlation, and a
/// cancellation token propagated to every suspension point.
#[derive(Clone)]
pub struct RunContext {
    pub correlation_id: uuid::Uuid,
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4(),
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }

    pub fn child(&self) -> Self {
        Self {
            correlation_id: self.correlation_id,
            cancellation: self.cancellation.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Semantic error kind. Names are chosen for what they mean to a caller
/// deciding an exit code, not for any language-specific error mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidConfiguration,
    InvalidAPIKey,
    InvalidModelName,
    InvalidInstructions,
    InvalidOutputDir,
    ContextGatheringFailed,
    ModelNotFound,
    ProviderNotFound,
    ClientInitialization,
    EmptyResponse,
    WhitespaceContent,
    SafetyBlocked,
    PartialSuccess,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidConfiguration => "invalid configuration",
            ErrorKind::InvalidAPIKey => "invalid API key",
            ErrorKind::InvalidModelName => "invalid model name",
            ErrorKind::InvalidInstructions => "invalid instructions",
            ErrorKind::InvalidOutputDir => "invalid output directory",
            ErrorKind::ContextGatheringFailed => "context gathering failed",
            ErrorKind::ModelNotFound => "model not found",
            ErrorKind::ProviderNotFound => "provider not found",
            ErrorKind::ClientInitialization => "client initialization failed",
            ErrorKind::EmptyResponse => "empty response",
            ErrorKind::WhitespaceContent => "whitespace-only content",
            ErrorKind::SafetyBlocked => "safety blocked",
            ErrorKind::PartialSuccess => "partial success",
            ErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// The single wrapping error type carrying a taxonomy kind plus a
/// human-facing message. Chain-walk classifiers (`is_kind`, `IsEmptyResponseError`
/// equivalents) look for this type at any depth of an `anyhow` chain.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TaxonomyError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaxonomyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// True if `err`'s chain contains a `TaxonomyError` of exactly `kind`.
pub fn is_kind(err: &anyhow::Error, kind: ErrorKind) -> bool {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<TaxonomyError>())
        .is_some_and(|t| t.kind == kind)
}

pub fn is_cancelled(err: &anyhow::Error) -> bool {
    is_kind(err, ErrorKind::Cancelled)
}

pub fn is_partial_success(err: &anyhow::Error) -> bool {
    is_kind(err, ErrorKind::PartialSuccess)
}

/// Prefers a provider-specific user-facing string when the top-level
/// cause carries one via `Display`; otherwise `err.to_string()`.
pub fn error_details(err: Option<&anyhow::Error>) -> String {
    match err {
        Some(e) => e.to_string(),
        None => "no error".to_string(),
    }
}

/// Ceiling on provider-indicated retry-after sleeps, preventing unbounded
/// waits on pathological server responses (design value: 60s, per spec).
pub const RETRY_AFTER_CEILING: Duration = Duration::from_secs(60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_error_chain_walk_finds_kind_at_depth() {
        let base = anyhow::Error::new(TaxonomyError::new(ErrorKind::Cancelled, "cancelled mid-flight"));
        let wrapped = base.context("worker aborted").context("run aborted");
        assert!(is_cancelled(&wrapped));
        assert!(!is_partial_success(&wrapped));
    }

    #[test]
    fn error_details_prefers_message_falls_back_to_no_error() {
        assert_eq!(error_details(None), "no error");
        let err = anyhow::anyhow!("boom");
        assert_eq!(error_details(Some(&err)), "boom");
    }
}
