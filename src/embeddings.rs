//! Embedding providers.
//!
//! [`EmbeddingProvider`] is the seam between the pipeline and whatever
//! model produces vectors. [`HttpEmbeddingProvider`] speaks the common
//! OpenAI-style `/embeddings` contract; [`MockEmbeddingProvider`] derives
//! deterministic vectors from a hash of the text, which is enough for
//! store and pipeline tests without a network.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::RagError;

/// Produces fixed-dimension embedding vectors for batches of text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier pinned into the store so a database cannot be
    /// reopened with vectors from a different model.
    fn id(&self) -> String;

    fn dimensions(&self) -> usize;

    /// Embeds a batch in order: output `i` corresponds to input `i`.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;
}

/// Hash-derived deterministic embeddings for tests and offline runs.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dims: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn hash_to_vec(&self, text: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dims);
        for salt in 0..self.dims {
            let mut hasher = DefaultHasher::new();
            salt.hash(&mut hasher);
            text.hash(&mut hasher);
            let raw = hasher.finish();
            vector.push((raw % 2000) as f32 / 1000.0 - 1.0);
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn id(&self) -> String {
        format!("mock-{}", self.dims)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts.iter().map(|text| self.hash_to_vec(text)).collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbeddingProvider {
    http: reqwest::Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    dims: usize,
}

impl HttpEmbeddingProvider {
    /// `timeout` bounds every embedding request; a stalled provider
    /// surfaces as [`RagError::EmbeddingUnavailable`] instead of hanging
    /// the pipeline.
    pub fn new(
        base_url: Url,
        model: impl Into<String>,
        api_key: Option<String>,
        dims: usize,
        timeout: Duration,
    ) -> Result<Self, RagError> {
        let endpoint = base_url
            .join("embeddings")
            .map_err(|err| RagError::Config(format!("embeddings url: {err}")))?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|err| RagError::Config(format!("http client: {err}")))?;
        Ok(Self {
            http,
            endpoint,
            model: model.into(),
            api_key,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn id(&self) -> String {
        format!("http-{}-{}", self.model, self.dims)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.http.post(self.endpoint.clone()).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| RagError::EmbeddingUnavailable(err.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(RagError::EmbeddingRateLimited),
            status if status.is_server_error() => {
                return Err(RagError::EmbeddingUnavailable(format!(
                    "provider returned {status}"
                )));
            }
            status if !status.is_success() => {
                return Err(RagError::EmbeddingUnavailable(format!(
                    "provider returned {status}"
                )));
            }
            _ => {}
        }

        let mut body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| RagError::EmbeddingUnavailable(format!("decode: {err}")))?;

        if body.data.len() != texts.len() {
            return Err(RagError::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.data.len()
            )));
        }

        // Responses are not guaranteed to arrive in request order.
        body.data.sort_by_key(|entry| entry.index);
        for entry in &body.data {
            if entry.embedding.len() != self.dims {
                return Err(RagError::EmbeddingUnavailable(format!(
                    "expected {} dimensions, got {}",
                    self.dims,
                    entry.embedding.len()
                )));
            }
        }
        Ok(body.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_vectors_are_deterministic_and_normalized() {
        let provider = MockEmbeddingProvider::new(8);
        let texts = vec!["first speech".to_string(), "second speech".to_string()];

        let a = provider.embed_batch(&texts).await.unwrap();
        let b = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);

        for vector in &a {
            assert_eq!(vector.len(), 8);
            let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn stalled_http_provider_times_out() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/embeddings");
                then.status(200)
                    .delay(Duration::from_secs(5))
                    .json_body(serde_json::json!({"data": []}));
            })
            .await;

        let provider = HttpEmbeddingProvider::new(
            Url::parse(&server.base_url()).unwrap(),
            "test-model",
            None,
            4,
            Duration::from_millis(100),
        )
        .unwrap();

        let err = provider
            .embed_batch(&["hello".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmbeddingUnavailable(_)));
    }
}
