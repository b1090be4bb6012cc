//! Rate Limiter (C5) — two cooperating gates in front of every generation
//! call: a global concurrency semaphore bounding total in-flight calls,
//! and a per-provider sliding-window RPM gate.
//!
//! `acquire` blocks until both gates admit the caller or the run's
//! cancellation token fires. The returned [`Permit`] releases the global
//! slot on drop — callers never call `release()` explicitly; RAII does it
//! on every exit path, including early returns and panics during the
//! generation call.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::{ErrorKind, RunContext, TaxonomyError};

mod window;
use window::SlidingWindow;

pub struct RateLimiter {
    global: Semaphore,
    provider_windows: Mutex<HashMap<String, SlidingWindow>>,
    requests_per_minute: u32,
}

/// Held for the duration of one generation call. Releases the global
/// concurrency slot when dropped.
pub struct Permit<'a> {
    _global: SemaphorePermit<'a>,
}

impl RateLimiter {
    /// `max_concurrent` bounds total in-flight generation calls across all
    /// providers. `requests_per_minute` of `0` disables the per-provider
    /// RPM gate (unlimited).
    pub fn new(max_concurrent: usize, requests_per_minute: u32) -> Self {
        Self {
            global: Semaphore::new(max_concurrent.max(1)),
            provider_windows: Mutex::new(HashMap::new()),
            requests_per_minute,
        }
    }

    /// `Acquire(ctx, provider) -> release() | cancelled`.
    pub async fn acquire(&self, ctx: &RunContext, provider: &str) -> anyhow::Result<Permit<'_>> {
        let global = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => return Err(cancelled_err("rate limiter: cancelled waiting for concurrency slot")),
            permit = self.global.acquire() => permit.expect("rate limiter semaphore is never closed"),
        };

        if self.requests_per_minute > 0 {
            loop {
                if ctx.is_cancelled() {
                    return Err(cancelled_err("rate limiter: cancelled waiting for RPM window"));
                }
                let wait = {
                    let mut windows = self.provider_windows.lock().expect("rate limiter mutex poisoned");
                    windows
                        .entry(provider.to_string())
                        .or_insert_with(SlidingWindow::new)
                        .try_admit(Instant::now(), self.requests_per_minute)
                };
                match wait {
                    Ok(()) => break,
                    Err(duration) => {
                        tokio::select! {
                            biased;
                            _ = ctx.cancellation.cancelled() => {
                                return Err(cancelled_err("rate limiter: cancelled waiting for RPM window"));
                            }
                            _ = tokio::time::sleep(duration) => {}
                        }
                    }
                }
            }
        }

        Ok(Permit { _global: global })
    }
}

fn cancelled_err(message: &str) -> anyhow::Error {
    TaxonomyError::new(ErrorKind::Cancelled, message).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_admits_immediately_under_capacity() {
        let limiter = RateLimiter::new(4, 60);
        let ctx = RunContext::new();
        let permit = limiter.acquire(&ctx, "openai").await;
        assert!(permit.is_ok());
    }

    #[tokio::test]
    async fn acquire_respects_cancellation_on_concurrency_gate() {
        let limiter = Arc::new(RateLimiter::new(1, 60));
        let ctx = RunContext::new();
        let held = limiter.acquire(&ctx, "openai").await.unwrap();

        let waiter_ctx = ctx.child();
        let waiter_limiter = Arc::clone(&limiter);
        let waiter = tokio::spawn(async move { waiter_limiter.acquire(&waiter_ctx, "openai").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancellation.cancel();

        let result = waiter.await.unwrap();
        assert!(result.is_err());
        assert!(crate::error::is_cancelled(&result.unwrap_err()));
        drop(held);
    }

    #[tokio::test]
    async fn zero_rpm_disables_the_provider_gate() {
        let limiter = RateLimiter::new(8, 0);
        let ctx = RunContext::new();
        for _ in 0..10 {
            assert!(limiter.acquire(&ctx, "groq").await.is_ok());
        }
    }

    #[tokio::test]
    async fn per_provider_rpm_gate_blocks_until_window_admits() {
        let limiter = RateLimiter::new(8, 1);
        let ctx = RunContext::new();
        let _first = limiter.acquire(&ctx, "anthropic").await.unwrap();

        let start = Instant::now();
        let second = tokio::time::timeout(Duration::from_millis(50), limiter.acquire(&ctx, "anthropic")).await;
        assert!(second.is_err(), "second acquire on a 1-RPM provider should still be waiting");
        let _ = start;
    }

    #[tokio::test]
    async fn distinct_providers_have_independent_windows() {
        let limiter = RateLimiter::new(8, 1);
        let ctx = RunContext::new();
        let _a = limiter.acquire(&ctx, "openai").await.unwrap();
        let b = limiter.acquire(&ctx, "anthropic").await;
        assert!(b.is_ok());
    }
}
