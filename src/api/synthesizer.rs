//! SqlSynthesizer - the high-level question-to-SQL API
//!
//! Wires retrieval, prompt composition, generation, and validation into one
//! façade. The index is opened once and shared read-only across questions;
//! each call to [`SqlSynthesizer::synthesize`] is an independent session.

use crate::config::Config;
use crate::error::{AskDbError, Result};
use crate::ml::embedding::{Embedder, OpenAiEmbedder};
use crate::ml::index::SchemaIndex;
use crate::ml::retriever::SchemaRetriever;
use crate::sql::generate::{LanguageModel, OpenAiGenerator};
use crate::sql::prompt::PromptComposer;
use crate::sql::session::{AttemptController, FailureReason, Synthesis, SynthesisFailure};
use crate::sql::validate::Validator;

/// End-to-end synthesizer for natural-language questions
pub struct SqlSynthesizer<E: Embedder, M: LanguageModel> {
    config: Config,
    retriever: SchemaRetriever<E>,
    model: M,
}

impl SqlSynthesizer<OpenAiEmbedder, OpenAiGenerator> {
    /// Open the configured index and connect the production embedder and
    /// generator. Surfaces `IndexUnavailable` before anything touches the
    /// network.
    pub fn open(config: Config) -> Result<Self> {
        let index = SchemaIndex::open(&config.index_dir)?;
        let embedder = OpenAiEmbedder::new(&config)?;
        let model = OpenAiGenerator::new(&config)?;
        Ok(Self::with_components(config, index, embedder, model))
    }
}

impl<E: Embedder, M: LanguageModel> SqlSynthesizer<E, M> {
    /// Assemble a synthesizer from explicit components. Tests use this with
    /// stub embedders/models to drive the pipeline deterministically.
    pub fn with_components(config: Config, index: SchemaIndex, embedder: E, model: M) -> Self {
        Self {
            retriever: SchemaRetriever::new(index, embedder),
            config,
            model,
        }
    }

    /// Turn one question into validated SQL, or a failure carrying the full
    /// attempt history.
    pub async fn synthesize(
        &self,
        question: &str,
    ) -> std::result::Result<Synthesis, SynthesisFailure> {
        let retrieval = self
            .retriever
            .retrieve(question, self.config.retrieval.top_k)
            .await
            .map_err(failure_from_error)?;

        let controller = AttemptController::new(
            &self.model,
            PromptComposer::new(self.config.retrieval.prompt_budget_chars),
            Validator::new(),
            self.config.max_attempts,
        );
        controller.run(question, &retrieval).await
    }

    /// Raw retrieval preview: the records a question would be grounded on,
    /// without invoking the language model.
    pub async fn preview_retrieval(
        &self,
        question: &str,
    ) -> Result<crate::ml::index::RetrievalResult> {
        self.retriever
            .retrieve(question, self.config.retrieval.top_k)
            .await
    }

    pub fn index(&self) -> &SchemaIndex {
        self.retriever.index()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// One-shot convenience: open the index for `config` and synthesize a single
/// question. A missing index returns `IndexUnavailable` without ever
/// invoking the language model.
pub async fn synthesize_question(
    config: &Config,
    question: &str,
) -> std::result::Result<Synthesis, SynthesisFailure> {
    let synthesizer = match SqlSynthesizer::open(config.clone()) {
        Ok(synthesizer) => synthesizer,
        Err(e) => return Err(failure_from_error(e)),
    };
    synthesizer.synthesize(question).await
}

/// Fold an infrastructure error into the caller-facing failure shape.
fn failure_from_error(error: AskDbError) -> SynthesisFailure {
    let reason = match &error {
        AskDbError::IndexUnavailable { .. } => FailureReason::IndexUnavailable(error.to_string()),
        _ => FailureReason::ModelInvocation(error.to_string()),
    };
    SynthesisFailure::without_attempts(reason)
}
