//! Embedding provider seam and the OpenAI-compatible HTTP implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use shelfmark_common::Config;

/// Texts shorter than this are not worth embedding.
const MIN_TEXT_LEN: usize = 5;
/// Inputs are truncated to keep requests within model context limits.
const MAX_TEXT_LEN: usize = 2000;

/// Produces one embedding per input text. Infallible by contract: transport
/// or provider errors surface as `None` entries so a flaky upstream never
/// aborts a whole batch. Callers mark `None` items failed and move on.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>>;
}

/// OpenAI-compatible `/embeddings` client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.embedding_api_url.clone(),
            api_key: config.embedding_api_key.clone(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
        }
    }

    async fn request(&self, inputs: &[&str]) -> anyhow::Result<Vec<Option<Vec<f32>>>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let response = self
            .client
            .post(format!("{}/embeddings", self.api_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<EmbeddingResponse>()
            .await?;

        let mut out: Vec<Option<Vec<f32>>> = vec![None; inputs.len()];
        for datum in response.data {
            if datum.index >= out.len() || datum.embedding.len() != self.dimension {
                warn!(
                    index = datum.index,
                    got = datum.embedding.len(),
                    expected = self.dimension,
                    "Discarding malformed embedding from provider"
                );
                continue;
            }
            out[datum.index] = Some(l2_normalize(datum.embedding));
        }
        Ok(out)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        // Texts too short to embed are filtered out up front and stay None.
        let mut usable: Vec<(usize, &str)> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let trimmed = text.trim();
            if trimmed.chars().count() >= MIN_TEXT_LEN {
                let end = trimmed
                    .char_indices()
                    .nth(MAX_TEXT_LEN)
                    .map(|(idx, _)| idx)
                    .unwrap_or(trimmed.len());
                usable.push((i, &trimmed[..end]));
            }
        }

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        if usable.is_empty() {
            return results;
        }

        let inputs: Vec<&str> = usable.iter().map(|(_, t)| *t).collect();
        match self.request(&inputs).await {
            Ok(embeddings) => {
                for ((original, _), embedding) in usable.into_iter().zip(embeddings) {
                    results[original] = embedding;
                }
            }
            Err(e) => {
                warn!(error = %e, count = inputs.len(), "Embedding request failed");
            }
        }
        results
    }
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_yields_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_stays_zero() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
