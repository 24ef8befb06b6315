//! SQL synthesis pipeline: prompt, generate, validate, retry

pub mod generate;
pub mod prompt;
pub mod session;
pub mod validate;

pub use generate::{LanguageModel, OpenAiGenerator, SqlExtraction, extract_sql};
pub use prompt::{PromptComposer, RetryFeedback};
pub use session::{Attempt, AttemptController, FailureReason, Synthesis, SynthesisFailure};
pub use validate::{ValidationOutcome, Validator};
