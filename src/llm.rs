//! Language-model clients.
//!
//! [`LanguageModel`] is the seam the answer pipeline calls through. The one
//! production implementation, [`ChatModel`], speaks the OpenAI-compatible
//! `POST {base}/chat/completions` protocol, which the Hugging Face router,
//! OpenAI and Ollama all serve.
//!
//! | Provider | Default base URL | API key env var |
//! |----------|------------------|-----------------|
//! | `huggingface` | `https://router.huggingface.co/v1` | `HUGGINGFACEHUB_API_TOKEN` or `HF_TOKEN` |
//! | `openai` | `https://api.openai.com/v1` | `OPENAI_API_KEY` |
//! | `ollama` | `http://localhost:11434/v1` | none |
//!
//! There is no retry here. A failed call is reported to the caller, which
//! decides whether to ask again.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;

const HF_KEY_VARS: &[&str] = &["HUGGINGFACEHUB_API_TOKEN", "HF_TOKEN"];
const OPENAI_KEY_VARS: &[&str] = &["OPENAI_API_KEY"];
const NO_KEY_VARS: &[&str] = &[];

/// A text-in, text-out language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Identifier of the model, for logs and status output.
    fn name(&self) -> &str;

    /// Generate a completion for a single user prompt.
    ///
    /// Returns an error on transport failures, non-success statuses, and
    /// responses without usable text.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Like [`generate`](Self::generate), with `max_tokens` replacing the
    /// configured reply budget. Models without a budget ignore it.
    async fn generate_with_limit(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let _ = max_tokens;
        self.generate(prompt).await
    }
}

/// OpenAI-compatible chat-completions client.
pub struct ChatModel {
    provider: String,
    model: String,
    base_url: String,
    api_key_vars: &'static [&'static str],
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl ChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let (default_url, api_key_vars) = match config.provider.as_str() {
            "huggingface" => ("https://router.huggingface.co/v1", HF_KEY_VARS),
            "openai" => ("https://api.openai.com/v1", OPENAI_KEY_VARS),
            "ollama" => ("http://localhost:11434/v1", NO_KEY_VARS),
            other => bail!("Unknown llm provider: {}", other),
        };

        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| default_url.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            provider: config.provider.clone(),
            model: config.model.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key_vars,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client,
        })
    }

    /// Resolve the API key. Providers without a key variable need none.
    fn api_key(&self) -> Result<Option<String>> {
        if self.api_key_vars.is_empty() {
            return Ok(None);
        }
        for var in self.api_key_vars {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    return Ok(Some(value));
                }
            }
        }
        bail!(
            "{} API key not set (expected one of: {})",
            self.provider,
            self.api_key_vars.join(", ")
        )
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let api_key = self.api_key()?;

        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": self.temperature,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("{} connection failed ({})", self.provider, url))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("{} API error {}: {}", self.provider, status, text);
        }

        let json: Value = resp
            .json()
            .await
            .with_context(|| format!("{} returned a non-JSON body", self.provider))?;
        parse_chat_response(&json)
    }
}

#[async_trait]
impl LanguageModel for ChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.complete(prompt, self.max_tokens).await
    }

    async fn generate_with_limit(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        self.complete(prompt, max_tokens).await
    }
}

/// Extract the first choice's message text.
fn parse_chat_response(json: &Value) -> Result<String> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| anyhow::anyhow!("No choices in response"))?;

    let content = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Response choice has no text content"))?
        .trim();

    if content.is_empty() {
        bail!("Model returned an empty answer");
    }
    Ok(content.to_string())
}

/// Create the [`LanguageModel`] named in configuration.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    Ok(Arc::new(ChatModel::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice() {
        let json = json!({
            "choices": [
                { "message": { "role": "assistant", "content": "  Paris.  " } },
                { "message": { "role": "assistant", "content": "Lyon." } }
            ]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "Paris.");
    }

    #[test]
    fn rejects_unusable_responses() {
        assert!(parse_chat_response(&json!({ "choices": [] })).is_err());
        assert!(parse_chat_response(&json!({ "error": "boom" })).is_err());
        let empty = json!({ "choices": [{ "message": { "content": "   " } }] });
        assert!(parse_chat_response(&empty).is_err());
        let null = json!({ "choices": [{ "message": { "content": null } }] });
        assert!(parse_chat_response(&null).is_err());
    }

    #[test]
    fn ollama_needs_no_key_and_honors_url() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            url: Some("http://127.0.0.1:9/v1/".to_string()),
            ..LlmConfig::default()
        };
        let model = ChatModel::new(&config).unwrap();
        assert_eq!(model.api_key().unwrap(), None);
        assert_eq!(model.base_url, "http://127.0.0.1:9/v1");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = LlmConfig {
            provider: "mystery".to_string(),
            ..LlmConfig::default()
        };
        assert!(ChatModel::new(&config).is_err());
    }
}
