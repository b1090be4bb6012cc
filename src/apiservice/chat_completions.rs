//! Shared request/response plumbing for OpenAI-compatible chat completion
//! APIs. OpenAI, Groq, DeepSeek, and Perplexity all speak this shape, so
//! the wire handling lives here once; each provider module supplies only
//! its endpoint, auth header style, and provider name.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::Value;

use super::{wrap_send_err, GenerateOutcome, Param, Params, ProviderResult, RateLimitSignal};
use crate::error::{ErrorKind, TaxonomyError};

pub enum AuthStyle {
    Bearer,
    Header(&'static str),
}

pub async fn generate(
    client: &reqwest::Client,
    provider: &'static str,
    endpoint: &str,
    model: &str,
    api_key: &str,
    prompt: &str,
    params: &Params,
    auth: AuthStyle,
) -> Result<GenerateOutcome> {
    let mut body = serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
    });
    merge_params(&mut body, params);

    let mut req = client.post(endpoint).json(&body);
    req = match auth {
        AuthStyle::Bearer => req.bearer_auth(api_key),
        AuthStyle::Header(name) => req.header(name, api_key),
    };

    let resp = req.send().await.map_err(wrap_send_err(provider))?;
    let status = resp.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after_from_headers(resp.headers()).unwrap_or(Duration::from_secs(5));
        tracing::debug!(provider, retry_after_ms = retry_after.as_millis() as u64, "provider signalled rate limit");
        return Ok(GenerateOutcome::RateLimited(RateLimitSignal { retry_after }));
    }

    if !status.is_success() {
        let body_text = resp.text().await.unwrap_or_default();
        return Err(TaxonomyError::new(
            ErrorKind::ClientInitialization,
            format!(
                "{provider}: generate failed ({status}): {}",
                super::truncate_body(&body_text, 500)
            ),
        )
        .into());
    }

    let body: Value = resp
        .json()
        .await
        .with_context(|| format!("{provider}: decoding response body"))?;

    let content = body["choices"][0]["message"]["content"].as_str().map(str::to_string);
    let finish_reason = body["choices"][0]["finish_reason"].as_str().map(str::to_string);
    let input_tokens = body["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
    let output_tokens = body["usage"]["completion_tokens"].as_u64().unwrap_or(0);

    Ok(GenerateOutcome::Result(ProviderResult {
        content,
        safety_records: Vec::new(),
        finish_reason,
        input_tokens,
        output_tokens,
    }))
}

fn merge_params(body: &mut Value, params: &Params) {
    let obj = body.as_object_mut().expect("chat completion body is always an object");
    for (name, value) in params {
        let json_value = match value {
            Param::Float(f) => serde_json::json!(f),
            Param::Int(i) => serde_json::json!(i),
            Param::Str(s) => serde_json::json!(s),
        };
        obj.insert(name.clone(), json_value);
    }
}

fn retry_after_from_headers(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
