//! Schema retrieval: question in, top-K schema records out

use crate::error::Result;
use crate::ml::embedding::{Embedder, l2_normalize};
use crate::ml::index::{RetrievalResult, SchemaIndex};

/// Embeds questions and runs similarity search against a [`SchemaIndex`].
///
/// Read-only after construction; one retriever can serve concurrent
/// sessions.
pub struct SchemaRetriever<E: Embedder> {
    index: SchemaIndex,
    embedder: E,
}

impl<E: Embedder> SchemaRetriever<E> {
    pub fn new(index: SchemaIndex, embedder: E) -> Self {
        if index.manifest().embedding_model != embedder.model_name() {
            log::warn!(
                "index was built with embedding model '{}' but retrieval uses '{}'; \
                 similarity scores may be meaningless",
                index.manifest().embedding_model,
                embedder.model_name()
            );
        }
        Self { index, embedder }
    }

    /// Open the index at `dir` and wrap it with `embedder`.
    pub fn open(dir: impl AsRef<std::path::Path>, embedder: E) -> Result<Self> {
        Ok(Self::new(SchemaIndex::open(dir)?, embedder))
    }

    /// Top-K schema records for a question, by cosine similarity.
    ///
    /// Deterministic for a given question and index: stable ordering with
    /// ordinal tie-breaks.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<RetrievalResult> {
        let mut vectors = self.embedder.embed(&[question.to_string()]).await?;
        let mut query = vectors.pop().ok_or_else(|| {
            crate::error::AskDbError::ModelInvocation(
                "embedding endpoint returned no vector for the question".to_string(),
            )
        })?;
        l2_normalize(&mut query);

        let results = self.index.search(&query, k)?;
        log::debug!(
            "retrieved {} schema records for question ({} chars)",
            results.len(),
            question.len()
        );
        Ok(results)
    }

    pub fn index(&self) -> &SchemaIndex {
        &self.index
    }
}
