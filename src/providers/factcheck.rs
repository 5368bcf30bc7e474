use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::config::Settings;
use crate::providers::{FactCheckProvider, FactCheckRequest, ProviderError};

const FACT_CHECK_SYSTEM_PROMPT: &str = "You are an educational fact-checker for \
K-5 students. Provide accurate, age-appropriate information. Structure your \
reply as short lines covering: factual accuracy of the student's answer, \
alternative correct answers, educational insights, and suggestions for \
improvement.";

#[derive(Debug, Clone)]
pub(crate) struct LiveFactCheckProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl LiveFactCheckProvider {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.fact_check().request_timeout);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: settings.fact_check().api_key.clone(),
            base_url: settings.fact_check().base_url.trim_end_matches('/').to_string(),
            model: settings.fact_check().model.clone(),
            max_tokens: settings.fact_check().max_tokens,
        })
    }

    fn user_prompt(request: &FactCheckRequest) -> String {
        format!(
            "Fact-check this K-5 student answer.\n\nQuestion number: {}\n\
             Student answer: \"{}\"\nExpected answer: \"{}\"\n\n\
             Cover: whether the answer is factually correct, other valid ways \
             to answer, educational insights, and suggestions for improvement. \
             Keep it concise and encouraging.",
            request.question_number, request.student_answer, request.expected_answer,
        )
    }
}

#[async_trait]
impl FactCheckProvider for LiveFactCheckProvider {
    async fn fact_check(&self, request: &FactCheckRequest) -> Result<String, ProviderError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": FACT_CHECK_SYSTEM_PROMPT},
                {"role": "user", "content": Self::user_prompt(request)}
            ],
            "max_tokens": self.max_tokens,
            "temperature": 0.1,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self.client.post(&url).bearer_auth(&self.api_key).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status: status.as_u16(), body });
        }

        let body: Value = response.json().await?;
        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|value| value.as_str())
            .map(|content| content.to_string())
            .ok_or(ProviderError::MissingContent)
    }
}

/// Canned fact-check response in the line-prefixed shape the pipeline
/// parser understands.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StubFactCheckProvider;

#[async_trait]
impl FactCheckProvider for StubFactCheckProvider {
    async fn fact_check(&self, request: &FactCheckRequest) -> Result<String, ProviderError> {
        Ok(format!(
            "The answer \"{}\" is factually correct for this question.\n\
             Alternative: students might also phrase this as \"{}\".\n\
             This demonstrates a solid grasp of grade-level concepts.\n\
             Suggestion: try explaining the reasoning behind the answer.",
            request.student_answer, request.expected_answer,
        ))
    }
}
