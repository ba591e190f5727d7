//! OpenAI-compatible HTTP embedding client
//!
//! `POST {endpoint}` with `{"model": ..., "input": ...}`; the vector is read
//! from `data[0].embedding`. Works with OpenAI, Ollama's `/v1/embeddings`,
//! LM Studio, vLLM and similar servers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Embedder;
use crate::config::RemoteEmbeddingConfig;
use crate::errors::{EngineError, Result};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct RemoteEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    /// Learned from the first successful response
    dimension: usize,
}

impl RemoteEmbedder {
    /// Build the client and probe the endpoint once to learn the dimension.
    ///
    /// Fails with `EmbeddingUnavailable` when the endpoint cannot be reached
    /// or answers with something other than an embedding.
    pub fn connect(config: &RemoteEmbeddingConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                EngineError::EmbeddingUnavailable(format!("Failed to create HTTP client: {e}"))
            })?;

        let mut embedder = Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimension: 0,
        };
        let probe = embedder.request("dimension probe")?;
        embedder.dimension = probe.len();

        tracing::info!(
            endpoint = %embedder.endpoint,
            model = %embedder.model,
            dimension = embedder.dimension,
            "Remote embedding endpoint reachable"
        );
        Ok(embedder)
    }

    fn request(&self, text: &str) -> Result<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            EngineError::EmbeddingUnavailable(format!("HTTP request failed: {e}"))
        })?;
        if !response.status().is_success() {
            return Err(EngineError::EmbeddingUnavailable(format!(
                "API returned status: {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response.json().map_err(|e| {
            EngineError::EmbeddingUnavailable(format!("Failed to parse response: {e}"))
        })?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EngineError::EmbeddingUnavailable("response had no data".to_string()))?;

        if embedding.is_empty() || embedding.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::EmbeddingUnavailable(
                "endpoint returned an empty or non-finite vector".to_string(),
            ));
        }
        Ok(embedding)
    }
}

impl Embedder for RemoteEmbedder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self.request(text)?;
        if embedding.len() != self.dimension {
            return Err(EngineError::EmbeddingUnavailable(format!(
                "endpoint changed dimension from {} to {}",
                self.dimension,
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
