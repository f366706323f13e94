use crate::config::AssistantConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// External text-completion capability: prompt in, free text out.
#[async_trait]
pub trait TextOracle: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// OpenAI chat-completions client.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Oracle(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http,
        })
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        Self::new(
            config.require_api_key()?.to_string(),
            config.model.clone(),
            config.base_url.clone(),
            config.oracle_timeout,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.0,
        });

        // Reasoning models spend completion tokens on reasoning
        if self.model.starts_with("gpt-5") || self.model.contains("o1") {
            body["max_completion_tokens"] = serde_json::json!(4000);
        } else {
            body["max_tokens"] = serde_json::json!(1500);
        }
        body
    }
}

#[async_trait]
impl TextOracle for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!("LLM prompt ({} chars)", prompt.len());

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Oracle("LLM API call timed out".to_string())
                } else {
                    PipelineError::Oracle(format!("LLM API call failed: {}", e))
                }
            })?;

        // Check HTTP status
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PipelineError::Oracle(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Oracle(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(PipelineError::Oracle(format!("LLM API error: {}", error)));
        }

        let choice = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| PipelineError::Oracle("No choices in LLM response".to_string()))?;

        match choice.get("finish_reason").and_then(|r| r.as_str()) {
            Some("length") => warn!("LLM response was truncated due to length limit"),
            Some("content_filter") => {
                return Err(PipelineError::Oracle(
                    "LLM response was filtered by content policy".to_string(),
                ))
            }
            _ => {}
        }

        let content = choice["message"]["content"]
            .as_str()
            .ok_or_else(|| PipelineError::Oracle("No content in LLM response".to_string()))?;

        if content.trim().is_empty() {
            return Err(PipelineError::Oracle("Empty content in LLM response".to_string()));
        }

        debug!("LLM completion: {}", content);
        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(model: &str) -> LlmClient {
        LlmClient::new(
            "sk-test".to_string(),
            model.to_string(),
            "https://example.invalid/v1/".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_request_body_uses_deterministic_sampling() {
        let body = client("gpt-4").request_body("hello");
        assert_eq!(body["temperature"], serde_json::json!(0.0));
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["max_tokens"], serde_json::json!(1500));
    }

    #[test]
    fn test_reasoning_models_use_completion_token_budget() {
        let body = client("gpt-5.2").request_body("hello");
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["max_completion_tokens"], serde_json::json!(4000));
    }

    #[test]
    fn test_base_url_is_normalised() {
        assert_eq!(client("gpt-4").base_url, "https://example.invalid/v1");
    }
}
