//! OpenAI adapter — chat completions API.

use anyhow::Result;
use async_trait::async_trait;

use super::chat_completions::{self, AuthStyle};
use super::{GenerateOutcome, LLMClient, Params};
use crate::error::RunContext;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAIClient {
    client: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
}

impl OpenAIClient {
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
impl LLMClient for OpenAIClient {
    async fn generate_content(
        &self,
        _ctx: &RunContext,
        prompt: &str,
        params: &Params,
    ) -> Result<GenerateOutcome> {
        chat_completions::generate(
            &self.client,
            "openai",
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_reports_its_model_name() {
        let c = OpenAIClient::new("gpt-4o", "sk-test", None);
        assert_eq!(c.get_model_name(), "gpt-4o");
    }

    #[test]
    fn caller_supplied_endpoint_overrides_default() {
        let c = OpenAIClient::new("gpt-4o", "sk-test", Some("https://proxy.example/v1"));
        assert_eq!(c.endpoint, "https://proxy.example/v1");
    }

    #[test]
    fn missing_endpoint_falls_back_to_provider_default() {
        let c = OpenAIClient::new("gpt-4o", "sk-test", None);
        assert_eq!(c.endpoint, DEFAULT_ENDPOINT);
    }
}
