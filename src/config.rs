//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so a minimal file only names the
//! database path. API keys are never read from this file; providers take
//! them from the environment.

use anyhow::{Context, Result};
use askdoc_core::chunk::ChunkParams;
use askdoc_core::retrieve::Retriever;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    #[serde(default = "default_lambda_mult")]
    pub lambda_mult: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            fetch_k: default_fetch_k(),
            lambda_mult: default_lambda_mult(),
        }
    }
}

impl RetrievalConfig {
    pub fn retriever(&self) -> Retriever {
        Retriever {
            k: self.k,
            fetch_k: self.fetch_k,
            lambda_mult: self.lambda_mult,
        }
    }
}

fn default_k() -> usize {
    3
}
fn default_fetch_k() -> usize {
    20
}
fn default_lambda_mult() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Limit per embedding call. Loading or downloading a local model
    /// happens before the first call and is not counted.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL; only used by the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "all-mpnet-base-v2".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

pub const EMBEDDING_PROVIDERS: [&str; 4] = ["local", "openai", "ollama", "hashed"];

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Reply budget for quiz generation, which returns a JSON document
    /// rather than a short answer.
    #[serde(default = "default_quiz_max_tokens")]
    pub quiz_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override for the chat-completions endpoint.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            quiz_max_tokens: default_quiz_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            url: None,
        }
    }
}

fn default_llm_provider() -> String {
    "huggingface".to_string()
}
fn default_llm_model() -> String {
    "mistralai/Mistral-7B-Instruct-v0.3".to_string()
}
fn default_max_tokens() -> u32 {
    256
}
fn default_quiz_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_timeout_secs() -> u64 {
    60
}

pub const LLM_PROVIDERS: [&str; 3] = ["huggingface", "openai", "ollama"];

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_max_answer_words")]
    pub max_answer_words: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_answer_words: default_max_answer_words(),
        }
    }
}

fn default_max_answer_words() -> usize {
    askdoc_core::prompt::DEFAULT_MAX_ANSWER_WORDS
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}
fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    config
        .chunking
        .params()
        .validate()
        .context("invalid [chunking] section")?;

    config
        .retrieval
        .retriever()
        .validate()
        .context("invalid [retrieval] section")?;

    let embedding = &config.embedding;
    if !EMBEDDING_PROVIDERS.contains(&embedding.provider.as_str()) {
        anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be one of: {}.",
            embedding.provider,
            EMBEDDING_PROVIDERS.join(", ")
        );
    }
    if matches!(embedding.provider.as_str(), "openai" | "ollama")
        && matches!(embedding.dims, None | Some(0))
    {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            embedding.provider
        );
    }
    if embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }

    let llm = &config.llm;
    if !LLM_PROVIDERS.contains(&llm.provider.as_str()) {
        anyhow::bail!(
            "Unknown llm provider: '{}'. Must be one of: {}.",
            llm.provider,
            LLM_PROVIDERS.join(", ")
        );
    }
    if llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }
    if llm.max_tokens == 0 {
        anyhow::bail!("llm.max_tokens must be > 0");
    }
    if llm.quiz_max_tokens == 0 {
        anyhow::bail!("llm.quiz_max_tokens must be > 0");
    }

    if config.prompt.max_answer_words == 0 {
        anyhow::bail!("prompt.max_answer_words must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/askdoc.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 150);
        assert_eq!(config.retrieval.k, 3);
        assert_eq!(config.retrieval.fetch_k, 20);
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.llm.provider, "huggingface");
        assert_eq!(config.prompt.max_answer_words, 20);
        assert_eq!(config.llm.max_tokens, 256);
        assert_eq!(config.llm.quiz_max_tokens, 1024);
        assert_eq!(config.server.bind, "127.0.0.1:5000");
    }

    #[test]
    fn example_config_is_valid() {
        let config = parse(include_str!("../config/askdoc.example.toml")).unwrap();
        assert_eq!(config.server.max_upload_bytes, 32 * 1024 * 1024);
        assert_eq!(config.embedding.dims, None);
    }

    #[test]
    fn missing_db_section_is_an_error() {
        assert!(parse("[chunking]\nchunk_size = 10\n").is_err());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("chunk_overlap"));
    }

    #[test]
    fn rejects_bad_retrieval() {
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\nk = 0\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\nk = 5\nfetch_k = 2\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\nlambda_mult = -0.1\n").is_err());
    }

    #[test]
    fn network_embedding_requires_dims() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n"
        )
        .is_ok());
    }

    #[test]
    fn rejects_zero_token_budgets() {
        assert!(parse("[db]\npath = \"x\"\n[llm]\nmax_tokens = 0\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[llm]\nquiz_max_tokens = 0\n").is_err());
    }

    #[test]
    fn rejects_unknown_providers() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[llm]\nprovider = \"magic\"\n").is_err());
    }
}
