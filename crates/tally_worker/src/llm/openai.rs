//! OpenAI-compatible chat completions client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tally_protocol::{DatasetProfile, KpiProposal, KpiSummary, ReportDraft};
use tracing::{debug, warn};

use super::prompts::{
    business_model_user_prompt, parse_business_model, parse_proposals, parse_report,
    proposal_system_prompt, proposal_user_prompt, report_user_prompt,
    BUSINESS_MODEL_SYSTEM_PROMPT, REPORT_SYSTEM_PROMPT,
};
use super::{LlmCollaborator, LlmError};
use crate::config::LlmConfig;

/// Retries for transient HTTP failures within one call
const MAX_RETRIES: u32 = 2;

const INITIAL_BACKOFF_MS: u64 = 1000;

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 500 | 502 | 503 | 504)
}

pub struct OpenAiCollaborator {
    http: Client,
    model: String,
    base_url: String,
    api_key: String,
    proposal_count: usize,
    timeout: Duration,
}

impl OpenAiCollaborator {
    /// Build a client from `[llm]` settings. The API key is read from the
    /// configured environment variable.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key()
            .ok_or_else(|| LlmError::MissingApiKey(config.api_key_env.clone()))?;
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self {
            http,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            proposal_count: config.kpi_proposals,
            timeout: config.timeout(),
        })
    }

    /// One JSON-mode chat completion, returning the parsed JSON content.
    async fn chat_json(&self, system: &str, user: &str) -> Result<Value, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "response_format": {"type": "json_object"},
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);
                warn!(attempt, backoff_ms = backoff, "Retrying chat completion after transient error");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let response = match self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    return Err(LlmError::Timeout(self.timeout));
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Chat completion network error");
                    last_error = Some(LlmError::Network(e));
                    continue;
                }
            };

            let status = response.status().as_u16();
            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(60);
                return Err(LlmError::RateLimited {
                    retry_after: Duration::from_secs(retry_after),
                });
            }

            if is_retryable_status(status) && attempt < MAX_RETRIES {
                let message = response.text().await.unwrap_or_default();
                last_error = Some(LlmError::ApiError { status, message });
                continue;
            }

            if !response.status().is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(LlmError::ApiError { status, message });
            }

            let completion: ChatCompletion = response.json().await?;
            let content = completion
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| LlmError::InvalidResponse("completion has no content".to_string()))?;
            debug!(model = %self.model, chars = content.len(), "Chat completion received");
            return serde_json::from_str(&content)
                .map_err(|e| LlmError::InvalidResponse(format!("content is not JSON: {e}")));
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::InvalidResponse("Max retries exceeded".to_string())))
    }
}

#[async_trait]
impl LlmCollaborator for OpenAiCollaborator {
    async fn interpret_business_model(
        &self,
        profile: &DatasetProfile,
        business_description: &str,
    ) -> Result<String, LlmError> {
        let response = self
            .chat_json(
                BUSINESS_MODEL_SYSTEM_PROMPT,
                &business_model_user_prompt(profile, business_description),
            )
            .await?;
        parse_business_model(response)
    }

    async fn propose_kpis(
        &self,
        profile: &DatasetProfile,
        business_description: &str,
        business_model: &str,
    ) -> Result<Vec<KpiProposal>, LlmError> {
        let response = self
            .chat_json(
                &proposal_system_prompt(self.proposal_count),
                &proposal_user_prompt(profile, business_description, business_model),
            )
            .await?;
        parse_proposals(response)
    }

    async fn generate_report(
        &self,
        kpis: &[KpiSummary],
        business_description: &str,
        business_model: &str,
    ) -> Result<ReportDraft, LlmError> {
        let response = self
            .chat_json(
                REPORT_SYSTEM_PROMPT,
                &report_user_prompt(kpis, business_description, business_model),
            )
            .await?;
        parse_report(response)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key() {
        let config = LlmConfig {
            api_key_env: "TALLY_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..LlmConfig::default()
        };
        let err = OpenAiCollaborator::from_config(&config).err().unwrap();
        assert!(
            matches!(err, LlmError::MissingApiKey(var) if var == "TALLY_TEST_KEY_THAT_IS_NEVER_SET")
        );
    }

    #[test]
    fn test_completion_content_shape() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"{\"kpis\":[]}"}}]}"#;
        let completion: ChatCompletion = serde_json::from_str(raw).unwrap();
        assert_eq!(
            completion.choices[0].message.content.as_deref(),
            Some(r#"{"kpis":[]}"#)
        );
    }
}
