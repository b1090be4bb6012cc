//! Google Gemini adapter — generativelanguage REST API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use super::{wrap_send_err, GenerateOutcome, LLMClient, Param, Params, ProviderResult, RateLimitSignal, SafetyRecord};
use crate::error::{ErrorKind, RunContext, TaxonomyError};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleClient {
    client: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
}

impl GoogleClient {
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
impl LLMClient for GoogleClient {
    async fn generate_content(
        &self,
        _ctx: &RunContext,
        prompt: &str,
        params: &Params,
    ) -> Result<GenerateOutcome> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.endpoint, self.model, self.api_key
        );

        let mut body = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        });
        let generation_config = generation_config_from_params(params);
        if !generation_config.as_object().unwrap().is_empty() {
            body["generationConfig"] = generation_config;
        }

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(wrap_send_err("google"))?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_from_headers(resp.headers()).unwrap_or(Duration::from_secs(5));
            tracing::debug!(provider = "google", retry_after_ms = retry_after.as_millis() as u64, "provider signalled rate limit");
            return Ok(GenerateOutcome::RateLimited(RateLimitSignal { retry_after }));
        }

        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(TaxonomyError::new(
                ErrorKind::ClientInitialization,
                format!(
                    "google: generate failed ({status}): {}",
                    super::truncate_body(&body_text, 500)
                ),
            )
            .into());
        }

        let body: Value = resp.json().await.context("google: decoding response body")?;
        let candidate = &body["candidates"][0];
        let content = candidate["content"]["parts"][0]["text"].as_str().map(str::to_string);
        let finish_reason = candidate["finishReason"].as_str().map(str::to_string);

        let safety_records = candidate["safetyRatings"]
            .as_array()
            .map(|ratings| {
                ratings
                    .iter()
                    .filter_map(|r| {
                        let category = r["category"].as_str()?.to_string();
                        let blocked = r["blocked"].as_bool().unwrap_or(false);
                        Some(SafetyRecord { category, blocked })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = &body["usageMetadata"];
        let input_tokens = usage["promptTokenCount"].as_u64().unwrap_or(0);
        let output_tokens = usage["candidatesTokenCount"].as_u64().unwrap_or(0);

        Ok(GenerateOutcome::Result(ProviderResult {
            content,
            safety_records,
            finish_reason,
            input_tokens,
            output_tokens,
        }))
    }

    fn get_model_name(&self) -> &str {
        &self.model
    }
}

fn generation_config_from_params(params: &Params) -> Value {
    let mut config = serde_json::json!({});
    let obj = config.as_object_mut().unwrap();
    for (name, value) in params {
        let key = match name.as_str() {
            "temperature" => "temperature",
            "max_tokens" => "maxOutputTokens",
            other => other,
        };
        let json_value = match value {
            Param::Float(f) => serde_json::json!(f),
            Param::Int(i) => serde_json::json!(i),
            Param::Str(s) => serde_json::json!(s),
        };
        obj.insert(key.to_string(), json_value);
    }
    config
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
