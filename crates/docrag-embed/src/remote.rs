//! OpenAI-compatible `/v1/embeddings` client.

use std::time::Duration;

use async_trait::async_trait;
use docrag_core::{config::RemoteEmbeddingSettings, traits::Embedder, Error, Result};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

pub struct RemoteEmbedder {
    client: reqwest::Client,
    api_key: Option<Secret<String>>,
    endpoint: String,
    model: String,
    dim: Option<usize>,
    id: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        let endpoint = endpoint.into();
        let model = model.into();
        let id = format!("remote:{model}");
        Ok(Self { client, api_key: api_key.map(Secret::new), endpoint, model, dim: None, id })
    }

    /// Builds the client from settings; the key is read from `api_key_env` when set.
    pub fn from_settings(settings: &RemoteEmbeddingSettings, dim: Option<usize>) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(var = %settings.api_key_env, "no API key for the remote embedder; sending unauthenticated requests");
        }
        Ok(Self::new(&settings.endpoint, &settings.model, api_key, Duration::from_secs(settings.timeout_secs))?.with_dim(dim))
    }

    pub fn with_dim(mut self, dim: Option<usize>) -> Self {
        self.dim = dim;
        self.id = match dim {
            Some(d) => format!("remote:{}:d{d}", self.model),
            None => format!("remote:{}", self.model),
        };
        self
    }
}

/// Connection failures, timeouts, 429 and 5xx are worth retrying; everything else is not.
fn classify_status(status: reqwest::StatusCode, body: &str) -> Error {
    let msg = format!("embedding service returned {status}: {body}");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Error::EmbeddingUnavailable(msg)
    } else {
        Error::EmbeddingBackend(msg)
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> Option<usize> {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = EmbeddingRequest { model: &self.model, input: texts, dimensions: self.dim };
        let mut builder = self.client.post(&self.endpoint).json(&req);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("HTTP error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingBackend(format!("JSON parse error: {e}")))?;
        if parsed.data.iter().all(|d| d.index.is_some()) {
            parsed.data.sort_by_key(|d| d.index);
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
