// Generator: grounded answer from the assembled context via chat completions

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::failure_detail;
use crate::error::RetrievalError;

pub const DEFAULT_GENERATION_MODEL: &str = "gpt-3.5-turbo-0125";
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// Reply the model is told to give when the context does not answer the query.
pub const INSUFFICIENT_INFORMATION: &str = "I don't know.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant answering a user's question. \
Use only the given data to answer the query. If the data does not contain the answer, \
reply exactly \"I don't know.\" instead of making things up. If the user asks a generic \
question that is not related to the content, politely ask them to stay within the context.";

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, query: &str, context: &str) -> Result<String, RetrievalError>;
}

/// True when `answer` is the insufficient-information sentinel.
pub fn is_insufficient(answer: &str) -> bool {
    answer
        .trim()
        .trim_end_matches('.')
        .eq_ignore_ascii_case(INSUFFICIENT_INFORMATION.trim_end_matches('.'))
}

fn user_message(query: &str, context: &str) -> String {
    format!("{}\n\n{}", query, context)
}

pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing generation model name");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build generation HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            temperature,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, query: &str, context: &str) -> Result<String, RetrievalError> {
        let content = user_message(query, context);
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &content,
                },
            ],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| RetrievalError::GenerationService(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(RetrievalError::GenerationService(failure_detail(resp).await));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|err| {
            RetrievalError::GenerationService(format!("malformed completion response: {err}"))
        })?;
        let answer = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| {
                RetrievalError::GenerationService("completion contained no message".into())
            })?;
        debug!(chars = answer.len(), "Answer generated");
        Ok(answer)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
