//! Exact cosine-similarity search over the schema vectors
//!
//! The index is table-level and small (hundreds to low thousands of
//! records), so an exact scan is both fast enough and exactly deterministic,
//! which the retrieval contract requires: descending similarity, ties broken
//! by record ordinal.

use crate::error::{AskDbError, Result};
use crate::ml::embedding::Embedding;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Flat vector store keyed by insertion ordinal
#[derive(Debug, Clone)]
pub struct VectorIndex {
    vectors: Vec<Embedding>,
    dimension: usize,
}

/// On-disk shape of `vectors.bin`
#[derive(Serialize, Deserialize)]
struct PackedVectors {
    dimension: usize,
    vectors: Vec<Embedding>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            vectors: Vec::new(),
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Append a vector; its ordinal is its position.
    pub fn push(&mut self, vector: Embedding) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(AskDbError::Search(format!(
                "vector dimension {} doesn't match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        self.vectors.push(vector);
        Ok(())
    }

    /// Top-k ordinals by cosine similarity, descending, ordinal tie-break.
    ///
    /// Returns exactly `min(k, len)` results. Read-only and safe to call
    /// from concurrent sessions.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dimension {
            return Err(AskDbError::Search(format!(
                "query dimension {} doesn't match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(ordinal, vector)| (ordinal, cosine_similarity(query, vector)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Save the packed vectors to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let packed = PackedVectors {
            dimension: self.dimension,
            vectors: self.vectors.clone(),
        };
        let data = bincode::serialize(&packed)
            .map_err(|e| AskDbError::Search(format!("failed to serialize vectors: {e}")))?;
        std::fs::write(path.as_ref(), data)?;
        Ok(())
    }

    /// Load packed vectors from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let packed: PackedVectors = bincode::deserialize(&data)
            .map_err(|e| AskDbError::Search(format!("failed to deserialize vectors: {e}")))?;

        for (ordinal, vector) in packed.vectors.iter().enumerate() {
            if vector.len() != packed.dimension {
                return Err(AskDbError::Search(format!(
                    "vector {ordinal} has dimension {} but the index declares {}",
                    vector.len(),
                    packed.dimension
                )));
            }
        }

        Ok(Self {
            vectors: packed.vectors,
            dimension: packed.dimension,
        })
    }
}

/// Cosine similarity; zero vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
