//! Embedder client and vector utilities.
//!
//! The embedding model runs as an external loopback HTTP process exposing
//! `POST /embed` with `{model, input: [...]}` → `{embeddings: [[...]], model,
//! dim}`. The engine never manages its lifecycle; absence manifests as a
//! connection error which callers degrade on (§ search) or retry (§ pipeline).
//!
//! Concurrency is bounded by a semaphore (`max_in_flight`); requests are
//! idempotent and retried with exponential backoff on 429/5xx/network
//! errors: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5).
//!
//! Also provides the vector helpers shared with the store:
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes
//! - [`blob_to_vec`] — decode a BLOB back into a `Vec<f32>`
//! - [`cosine_similarity`] — similarity between two embedding vectors

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::error::{ConfigError, EmbedderError};

#[derive(Clone)]
pub struct EmbedClient {
    url: String,
    model: String,
    advertised_dim: Option<usize>,
    http: reqwest::Client,
    in_flight: Arc<Semaphore>,
    max_retries: u32,
    call_timeout: Duration,
    query_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
    #[allow(dead_code)]
    model: String,
    dim: usize,
}

impl EmbedClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError(format!("embedder http client: {e}")))?;

        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            advertised_dim: config.dim,
            http,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight)),
            max_retries: config.max_retries,
            call_timeout: Duration::from_secs(config.timeout_secs),
            query_timeout: Duration::from_millis(config.query_timeout_ms),
        })
    }

    /// The active model id. Embeddings stored under another id are invalid.
    pub fn model_id(&self) -> &str {
        &self.model
    }

    /// Embed a batch of texts, in order. Holds one in-flight permit for the
    /// duration of the call, including retries.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| EmbedderError::Http("embedder client shut down".into()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err: Option<EmbedderError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(format!("{}/embed", self.url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbedResponse = response
                            .json()
                            .await
                            .map_err(|e| EmbedderError::Http(e.to_string()))?;
                        return self.validate(texts.len(), parsed);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(EmbedderError::Http(format!("{status}: {body_text}")));
                        continue;
                    }
                    return Err(EmbedderError::Http(format!("{status}: {body_text}")));
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(EmbedderError::Timeout(self.call_timeout));
                    continue;
                }
                Err(e) => {
                    last_err = Some(EmbedderError::Http(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| EmbedderError::Http("embedding failed".into())))
    }

    /// Embed a single query under the short search deadline. No retries; a
    /// miss degrades the caller to lexical-only retrieval.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let fut = async {
            let _permit = self
                .in_flight
                .acquire()
                .await
                .map_err(|_| EmbedderError::Http("embedder client shut down".into()))?;

            let body = serde_json::json!({
                "model": self.model,
                "input": [text],
            });

            let response = self
                .http
                .post(format!("{}/embed", self.url))
                .json(&body)
                .send()
                .await
                .map_err(|e| EmbedderError::Http(e.to_string()))?;

            if !response.status().is_success() {
                return Err(EmbedderError::Http(response.status().to_string()));
            }

            let parsed: EmbedResponse = response
                .json()
                .await
                .map_err(|e| EmbedderError::Http(e.to_string()))?;
            let mut vectors = self.validate(1, parsed)?;
            Ok(vectors.remove(0))
        };

        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(EmbedderError::Timeout(self.query_timeout)),
        }
    }

    fn validate(
        &self,
        expected: usize,
        resp: EmbedResponse,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if resp.embeddings.len() != expected {
            return Err(EmbedderError::ShapeMismatch(format!(
                "expected {} vectors, got {}",
                expected,
                resp.embeddings.len()
            )));
        }
        if let Some(dim) = self.advertised_dim {
            if resp.dim != dim {
                return Err(EmbedderError::ShapeMismatch(format!(
                    "model advertises dim {}, response claims {}",
                    dim, resp.dim
                )));
            }
        }
        for v in &resp.embeddings {
            if v.len() != resp.dim {
                return Err(EmbedderError::ShapeMismatch(format!(
                    "vector of {} floats under dim {}",
                    v.len(),
                    resp.dim
                )));
            }
        }
        Ok(resp.embeddings)
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty or
/// mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn shape_validation_rejects_count_mismatch() {
        let client = EmbedClient::new(&crate::config::EmbeddingConfig::default()).unwrap();
        let resp = EmbedResponse {
            embeddings: vec![vec![0.0; 4]],
            model: "m".into(),
            dim: 4,
        };
        assert!(client.validate(2, resp).is_err());
    }

    #[test]
    fn shape_validation_rejects_dim_mismatch() {
        let mut config = crate::config::EmbeddingConfig::default();
        config.dim = Some(8);
        let client = EmbedClient::new(&config).unwrap();
        let resp = EmbedResponse {
            embeddings: vec![vec![0.0; 4]],
            model: "m".into(),
            dim: 4,
        };
        assert!(matches!(
            client.validate(1, resp),
            Err(EmbedderError::ShapeMismatch(_))
        ));
    }
}
