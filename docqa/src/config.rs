use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::pipeline::embedder::DEFAULT_EMBEDDING_MODEL;
use crate::pipeline::generator::{DEFAULT_GENERATION_MODEL, DEFAULT_TEMPERATURE};
use crate::pipeline::reranker::{DEFAULT_RERANK_MODEL, DEFAULT_TOP_N};
use crate::pipeline::selector::DEFAULT_TOP_K;
use crate::pipeline::{RerankFallback, RetrievalSettings, RetryPolicy};
use crate::store::StoreSource;

const ENV_PREFIX: &str = "DOCQA";
const CONFIG_FILE: &str = "docqa";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub chunks_path: String,
    pub embeddings_path: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub embedding_model: String,
    pub embedding_dimensions: Option<usize>,
    pub cohere_api_key: String,
    pub cohere_base_url: String,
    pub rerank_model: String,
    pub generation_model: String,
    pub generation_temperature: f32,
    pub request_timeout_secs: u64,
    pub top_k: usize,
    pub top_n: usize,
    pub rerank_fallback: RerankFallback,
    pub retry_max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_requests_per_minute: u32,
    pub rate_limit_burst: u32,
    pub log_level: String,
}

impl Config {
    /// Defaults, then `docqa.toml` if present, then `DOCQA_*` variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    fn load(env: config::Environment) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("port", 8080)?
            .set_default("chunks_path", "data/processed_data.csv")?
            .set_default("embeddings_path", "embeddings/split_embeddings.npy")?
            .set_default(
                "openai_api_key",
                std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            )?
            .set_default("openai_base_url", "https://api.openai.com/v1")?
            .set_default("embedding_model", DEFAULT_EMBEDDING_MODEL)?
            .set_default(
                "cohere_api_key",
                std::env::var("COHERE_API_KEY").unwrap_or_default(),
            )?
            .set_default("cohere_base_url", "https://api.cohere.ai/v1")?
            .set_default("rerank_model", DEFAULT_RERANK_MODEL)?
            .set_default("generation_model", DEFAULT_GENERATION_MODEL)?
            .set_default("generation_temperature", DEFAULT_TEMPERATURE as f64)?
            .set_default("request_timeout_secs", 30)?
            .set_default("top_k", DEFAULT_TOP_K as i64)?
            .set_default("top_n", DEFAULT_TOP_N as i64)?
            .set_default("rerank_fallback", "fail")?
            .set_default("retry_max_attempts", 1)?
            .set_default("retry_backoff_ms", 500)?
            .set_default("max_requests_per_minute", 120)?
            .set_default("rate_limit_burst", 12)?
            .set_default("log_level", "info")?
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(env)
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.top_k >= 1, "top_k must be at least 1");
        anyhow::ensure!(
            (1..=self.top_k).contains(&self.top_n),
            "top_n must be between 1 and top_k ({})",
            self.top_k
        );
        anyhow::ensure!(
            self.retry_max_attempts >= 1,
            "retry_max_attempts must be at least 1"
        );
        anyhow::ensure!(
            self.request_timeout_secs >= 1,
            "request_timeout_secs must be at least 1"
        );
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            top_k: self.top_k,
            top_n: self.top_n,
            fallback: self.rerank_fallback,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    pub fn store_source(&self) -> StoreSource {
        StoreSource::new(&self.chunks_path, &self.embeddings_path)
    }
}
