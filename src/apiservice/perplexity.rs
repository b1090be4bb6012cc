//! Perplexity adapter — OpenAI-compatible chat completions API.

use anyhow::Result;
use async_trait::async_trait;

use super::chat_completions::{self, AuthStyle};
use super::{GenerateOutcome, LLMClient, Params};
use crate::error::RunContext;

const DEFAULT_ENDPOINT: &str = "https://api.perplexity.ai/chat/completions";

pub struct PerplexityClient {
    client: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
}

impl PerplexityClient {
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
impl LLMClient for PerplexityClient {
    async fn generate_content(
        &self,
        _ctx: &RunContext,
        prompt: &str,
        params: &Params,
    ) -> Result<GenerateOutcome> {
        chat_completions::generate(
            &self.client,
            "perplexity",
            &self.endpoint,
            &self.model,
            &self.api_key,
            prompt,
            params,
            AuthStyle::Bearer,
        )
        .await
    }

    fn get_model_name(&self) -> &str {
        &self.model
    }
}
