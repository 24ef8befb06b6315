//! Persisted schema index: vectors + metadata + manifest
//!
//! Three co-located artifacts share the record ordinal as their key:
//! `vectors.bin` (packed embeddings), `records.json` (schema records in
//! ordinal order), and `manifest.json` (dimension, counts, embedding model,
//! build time). [`build_index`] writes them atomically; [`SchemaIndex`]
//! opens them read-only and serves similarity queries to any number of
//! concurrent sessions.

use crate::error::{AskDbError, Result};
use crate::ml::embedding::{Embedder, Embedding, l2_normalize};
use crate::ml::search::VectorIndex;
use crate::schema::SchemaRecord;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const VECTORS_FILE: &str = "vectors.bin";
const RECORDS_FILE: &str = "records.json";
const MANIFEST_FILE: &str = "manifest.json";

/// Build metadata persisted alongside the vectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub dimension: usize,
    pub record_count: usize,
    pub embedding_model: String,
    pub built_at: chrono::DateTime<chrono::Utc>,
}

/// One retrieved schema record with its similarity score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedTable {
    pub record: SchemaRecord,
    pub score: f32,
}

/// Ordered retrieval output: descending score, ordinal tie-break, length ≤ K
pub type RetrievalResult = Vec<RetrievedTable>;

/// Read-only view over the persisted index artifacts
pub struct SchemaIndex {
    vectors: VectorIndex,
    records: Vec<SchemaRecord>,
    manifest: IndexManifest,
}

impl SchemaIndex {
    /// Open the index directory, surfacing any missing or inconsistent
    /// artifact as `IndexUnavailable`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let unavailable =
            |reason: String| AskDbError::index_unavailable(dir.to_path_buf(), reason);

        if !dir.is_dir() {
            return Err(unavailable("index directory does not exist".to_string()));
        }

        let vectors = VectorIndex::load(dir.join(VECTORS_FILE))
            .map_err(|e| unavailable(format!("cannot load {VECTORS_FILE}: {e}")))?;

        let records_data = std::fs::read_to_string(dir.join(RECORDS_FILE))
            .map_err(|e| unavailable(format!("cannot read {RECORDS_FILE}: {e}")))?;
        let records: Vec<SchemaRecord> = serde_json::from_str(&records_data)
            .map_err(|e| unavailable(format!("cannot parse {RECORDS_FILE}: {e}")))?;

        let manifest_data = std::fs::read_to_string(dir.join(MANIFEST_FILE))
            .map_err(|e| unavailable(format!("cannot read {MANIFEST_FILE}: {e}")))?;
        let manifest: IndexManifest = serde_json::from_str(&manifest_data)
            .map_err(|e| unavailable(format!("cannot parse {MANIFEST_FILE}: {e}")))?;

        // The three artifacts must agree; a mismatch means a torn or
        // hand-edited index.
        if vectors.len() != records.len() || vectors.len() != manifest.record_count {
            return Err(unavailable(format!(
                "artifact mismatch: {} vectors, {} records, manifest says {}",
                vectors.len(),
                records.len(),
                manifest.record_count
            )));
        }
        if vectors.dimension() != manifest.dimension {
            return Err(unavailable(format!(
                "vector dimension {} does not match manifest dimension {}",
                vectors.dimension(),
                manifest.dimension
            )));
        }

        log::info!(
            "Opened schema index at {} ({} records, dimension {}, model '{}')",
            dir.display(),
            records.len(),
            manifest.dimension,
            manifest.embedding_model
        );

        Ok(Self {
            vectors,
            records,
            manifest,
        })
    }

    /// Nearest records to an already-normalized query embedding.
    pub fn search(&self, query: &Embedding, k: usize) -> Result<RetrievalResult> {
        let hits = self.vectors.search(query, k)?;
        Ok(hits
            .into_iter()
            .map(|(ordinal, score)| RetrievedTable {
                record: self.records[ordinal].clone(),
                score,
            })
            .collect())
    }

    pub fn records(&self) -> &[SchemaRecord] {
        &self.records
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Embed every schema record and persist the index to `dir`.
///
/// Idempotent: a rerun fully replaces the prior index. Artifacts are staged
/// in a sibling `<dir>.tmp` and swapped in only after every record embedded
/// and every file was written, so a failed build never leaves a readable but
/// inconsistent index behind.
pub async fn build_index<E: Embedder>(
    records: &[SchemaRecord],
    embedder: &E,
    dir: impl AsRef<Path>,
) -> Result<()> {
    let dir = dir.as_ref();

    if records.is_empty() {
        return Err(AskDbError::IndexBuild(
            "no schema records to index".to_string(),
        ));
    }

    // Ordinals are positional; re-id defensively in case the caller skipped
    // `schema::load_records`.
    let records: Vec<SchemaRecord> = records
        .iter()
        .enumerate()
        .map(|(ordinal, record)| SchemaRecord {
            id: ordinal,
            ..record.clone()
        })
        .collect();

    let texts: Vec<String> = records.iter().map(|r| r.render_description()).collect();

    log::info!(
        "Embedding {} schema records with '{}'",
        records.len(),
        embedder.model_name()
    );
    let progress = ProgressBar::new(records.len() as u64);
    progress.set_message("embedding schema records");

    let mut embeddings: Vec<Embedding> = Vec::with_capacity(texts.len());
    for batch in texts.chunks(16) {
        let batch_vectors = embedder
            .embed(batch)
            .await
            .map_err(|e| AskDbError::IndexBuild(format!("embedding failed: {e}")))?;
        if batch_vectors.len() != batch.len() {
            return Err(AskDbError::IndexBuild(format!(
                "embedder returned {} vectors for {} records",
                batch_vectors.len(),
                batch.len()
            )));
        }
        embeddings.extend(batch_vectors);
        progress.inc(batch.len() as u64);
    }
    progress.finish_and_clear();

    let dimension = embeddings[0].len();
    if dimension == 0 {
        return Err(AskDbError::IndexBuild(
            "embedder produced zero-dimensional vectors".to_string(),
        ));
    }

    let mut vectors = VectorIndex::new(dimension);
    for (ordinal, mut embedding) in embeddings.into_iter().enumerate() {
        if embedding.len() != dimension {
            return Err(AskDbError::IndexBuild(format!(
                "record {ordinal} embedded to dimension {} but the index uses {dimension}",
                embedding.len()
            )));
        }
        l2_normalize(&mut embedding);
        vectors
            .push(embedding)
            .map_err(|e| AskDbError::IndexBuild(e.to_string()))?;
    }

    let manifest = IndexManifest {
        dimension,
        record_count: records.len(),
        embedding_model: embedder.model_name().to_string(),
        built_at: chrono::Utc::now(),
    };

    write_artifacts(dir, &vectors, &records, &manifest)?;

    log::info!(
        "Built schema index at {} ({} records, dimension {})",
        dir.display(),
        records.len(),
        dimension
    );
    Ok(())
}

/// Stage into `<dir>.tmp`, then swap it into place.
fn write_artifacts(
    dir: &Path,
    vectors: &VectorIndex,
    records: &[SchemaRecord],
    manifest: &IndexManifest,
) -> Result<()> {
    let staging = sibling_path(dir, "tmp");
    let retired = sibling_path(dir, "old");

    let build_err = |what: &str, e: &dyn std::fmt::Display| {
        AskDbError::IndexBuild(format!("cannot write {what} under '{}': {e}", staging.display()))
    };

    if staging.exists() {
        std::fs::remove_dir_all(&staging).map_err(|e| build_err("staging directory", &e))?;
    }
    std::fs::create_dir_all(&staging).map_err(|e| build_err("staging directory", &e))?;

    vectors
        .save(staging.join(VECTORS_FILE))
        .map_err(|e| build_err(VECTORS_FILE, &e))?;

    let records_json =
        serde_json::to_string_pretty(records).map_err(|e| build_err(RECORDS_FILE, &e))?;
    std::fs::write(staging.join(RECORDS_FILE), records_json)
        .map_err(|e| build_err(RECORDS_FILE, &e))?;

    let manifest_json =
        serde_json::to_string_pretty(manifest).map_err(|e| build_err(MANIFEST_FILE, &e))?;
    std::fs::write(staging.join(MANIFEST_FILE), manifest_json)
        .map_err(|e| build_err(MANIFEST_FILE, &e))?;

    // Swap: retire the live directory (if any), promote the staging copy,
    // then drop the retired one.
    if retired.exists() {
        std::fs::remove_dir_all(&retired)
            .map_err(|e| AskDbError::IndexBuild(format!("cannot clear '{}': {e}", retired.display())))?;
    }
    if dir.exists() {
        std::fs::rename(dir, &retired).map_err(|e| {
            AskDbError::IndexBuild(format!("cannot retire previous index '{}': {e}", dir.display()))
        })?;
    }
    std::fs::rename(&staging, dir).map_err(|e| {
        AskDbError::IndexBuild(format!("cannot promote new index to '{}': {e}", dir.display()))
    })?;
    if retired.exists() {
        if let Err(e) = std::fs::remove_dir_all(&retired) {
            log::warn!("leftover retired index at {}: {e}", retired.display());
        }
    }

    Ok(())
}

fn sibling_path(dir: &Path, suffix: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "schema_index".to_string());
    dir.with_file_name(format!("{name}.{suffix}"))
}
