//! Anthropic Claude adapter — Messages API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use super::{wrap_send_err, GenerateOutcome, LLMClient, Param, Params, ProviderResult, RateLimitSignal};
use crate::error::{ErrorKind, RunContext, TaxonomyError};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
}

impl AnthropicClient {
    pub fn new(model: &str, api_key: &str, endpoint: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            endpoint: endpoint.unwrap_or(DEFAULT_ENDPOINT).to_string(),
        }
    }
}

#[async_trait]
impl LLMClient for AnthropicClient {
    async fn generate_content(
        &self,
        _ctx: &RunContext,
        prompt: &str,
        params: &Params,
    ) -> Result<GenerateOutcome> {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": 4096,
            "messages": [{"role": "user", "content": prompt}],
        });
        merge_params(&mut body, params);

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(wrap_send_err("anthropic"))?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_from_headers(resp.headers()).unwrap_or(Duration::from_secs(5));
            tracing::debug!(provider = "anthropic", retry_after_ms = retry_after.as_millis() as u64, "provider signalled rate limit");
            return Ok(GenerateOutcome::RateLimited(RateLimitSignal { retry_after }));
        }

        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(TaxonomyError::new(
                ErrorKind::ClientInitialization,
                format!(
                    "anthropic: generate failed ({status}): {}",
                    super::truncate_body(&body_text, 500)
                ),
            )
            .into());
        }

        let body: Value = resp.json().await.context("anthropic: decoding response body")?;
        let content = body["content"][0]["text"].as_str().map(str::to_string);
        let finish_reason = body["stop_reason"].as_str().map(str::to_string);
        let input_tokens = body["usage"]["input_tokens"].as_u64().unwrap_or(0);
        let output_tokens = body["usage"]["output_tokens"].as_u64().unwrap_or(0);

        Ok(GenerateOutcome::Result(ProviderResult {
            content,
            safety_records: Vec::new(),
            finish_reason,
            input_tokens,
            output_tokens,
        }))
    }

    fn get_model_name(&self) -> &str {
        &self.model
    }
}

fn merge_params(body: &mut Value, params: &Params) {
    let obj = body.as_object_mut().expect("anthropic message body is always an object");
    for (name, value) in params {
        if name == "max_tokens" {
            if let Param::Int(i) = value {
                obj.insert(name.clone(), serde_json::json!(i));
                continue;
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_reports_its_model_name() {
        let c = AnthropicClient::new("claude-sonnet-4-20250514", "sk-ant-test", None);
        assert_eq!(c.get_model_name(), "claude-sonnet-4-20250514");
    }

    #[test]
    fn merge_params_overrides_default_max_tokens() {
        let mut body = serde_json::json!({"max_tokens": 4096});
        let mut params: Params = Params::new();
        params.insert("max_tokens".into(), Param::Int(256));
        merge_params(&mut body, &params);
        assert_eq!(body["max_tokens"], serde_json::json!(256));
    }
}
