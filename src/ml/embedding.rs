//! Embedding generation via OpenAI-compatible endpoints
//!
//! The [`Embedder`] trait is the seam between the pipeline and the embedding
//! service: the index builder and the schema retriever are generic over it,
//! so tests inject a deterministic stub and never touch the network.

use crate::config::Config;
use crate::error::{AskDbError, Result};
use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::CreateEmbeddingRequestArgs;

/// Embedding vector type
pub type Embedding = Vec<f32>;

/// Anything that can turn texts into fixed-dimension vectors.
///
/// The same implementation must be used at build time and at query time so
/// that dimensionality and vector space match.
pub trait Embedder {
    /// Embed a batch of texts, one vector per input, in input order.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Embedding>>> + Send;

    /// Identity recorded in the index manifest and cross-checked on open.
    fn model_name(&self) -> &str;
}

/// Production embedder backed by an OpenAI-compatible embeddings API
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let client = openai_client(config)?;
        Ok(Self {
            client,
            model: config.embedding.model.clone(),
            batch_size: config.embedding.batch_size.max(1),
        })
    }
}

impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut vectors: Vec<Embedding> = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let request = CreateEmbeddingRequestArgs::default()
                .model(&self.model)
                .input(batch.to_vec())
                .build()
                .map_err(|e| {
                    AskDbError::ModelInvocation(format!("embedding request build failed: {e}"))
                })?;

            let response = self.client.embeddings().create(request).await.map_err(|e| {
                AskDbError::ModelInvocation(format!("embedding request failed: {e}"))
            })?;

            if response.data.len() != batch.len() {
                return Err(AskDbError::ModelInvocation(format!(
                    "embedding endpoint returned {} vectors for {} inputs",
                    response.data.len(),
                    batch.len()
                )));
            }

            // Response data is ordered by input index.
            let mut batch_vectors: Vec<_> = response.data;
            batch_vectors.sort_by_key(|d| d.index);
            vectors.extend(batch_vectors.into_iter().map(|d| d.embedding));
        }

        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Build an `async-openai` client from the endpoint section of the config.
///
/// An empty API key is fine when a base URL points at a local endpoint.
pub(crate) fn openai_client(config: &Config) -> Result<Client<OpenAIConfig>> {
    if config.endpoint.api_key.is_none() && config.endpoint.api_base.is_none() {
        return Err(AskDbError::Config(
            "no model endpoint configured: set OPENAI_API_KEY, or OPENAI_API_BASE \
             for a local OpenAI-compatible server"
                .to_string(),
        ));
    }

    let mut openai_config = OpenAIConfig::new();
    if let Some(key) = &config.endpoint.api_key {
        openai_config = openai_config.with_api_key(key);
    }
    if let Some(base) = &config.endpoint.api_base {
        openai_config = openai_config.with_api_base(base);
    }
    Ok(Client::with_config(openai_config))
}

/// L2-normalize a vector in place so that inner product equals cosine
/// similarity. The epsilon guards zero vectors.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt() + 1e-10;
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
