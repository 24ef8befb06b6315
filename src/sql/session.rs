//! Attempt controller: the generate/validate state machine
//!
//! One session processes one question. The controller drives
//! `Drafting -> Validating -> {Accepted, Retrying, Exhausted}` with the
//! attempt history as an explicit accumulating value, which keeps every
//! transition unit-testable with a scripted [`LanguageModel`] stub.

use crate::ml::index::RetrievalResult;
use crate::sql::generate::{LanguageModel, extract_sql};
use crate::sql::prompt::{PromptComposer, RetryFeedback};
use crate::sql::validate::{ValidationOutcome, Validator};
use serde::{Deserialize, Serialize};

/// One generate-then-validate cycle, recorded for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based attempt number
    pub number: usize,
    pub prompt: String,
    pub raw_response: String,
    pub extracted_sql: Option<String>,
    pub validation: ValidationOutcome,
}

/// Successful synthesis: the accepted SQL plus the full session trace
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub sql: String,
    pub attempts: Vec<Attempt>,
    pub retrieval: RetrievalResult,
}

/// Why a session terminated without an accepted query
#[derive(Debug, Clone)]
pub enum FailureReason {
    /// Every attempt was rejected
    Exhausted,
    /// Infrastructure fault talking to the model service
    ModelInvocation(String),
    /// The schema index could not be opened
    IndexUnavailable(String),
}

/// Terminal failure carrying the complete attempt history, so callers can
/// diagnose systematic mismatches between question and schema.
#[derive(Debug)]
pub struct SynthesisFailure {
    pub reason: FailureReason,
    pub attempts: Vec<Attempt>,
}

impl std::fmt::Display for SynthesisFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            FailureReason::Exhausted => write!(
                f,
                "no valid SQL after {} attempt(s); last rejection: {}",
                self.attempts.len(),
                self.attempts
                    .last()
                    .and_then(|a| a.validation.feedback_reason())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
            FailureReason::ModelInvocation(reason) => {
                write!(f, "model invocation failed: {reason}")
            }
            FailureReason::IndexUnavailable(reason) => {
                write!(f, "schema index unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for SynthesisFailure {}

impl SynthesisFailure {
    pub(crate) fn without_attempts(reason: FailureReason) -> Self {
        Self {
            reason,
            attempts: Vec::new(),
        }
    }
}

/// Controller states; transitions are documented on [`AttemptController::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Drafting,
    Validating,
    Accepted,
    Retrying,
    Exhausted,
}

/// In-flight draft carried from `Drafting` into `Validating`
struct Draft {
    prompt: String,
    raw_response: String,
    extracted_sql: Option<String>,
}

/// Bounded generate/validate loop with rejection feedback
pub struct AttemptController<'a, M: LanguageModel> {
    model: &'a M,
    composer: PromptComposer,
    validator: Validator,
    max_attempts: usize,
}

impl<'a, M: LanguageModel> AttemptController<'a, M> {
    pub fn new(
        model: &'a M,
        composer: PromptComposer,
        validator: Validator,
        max_attempts: usize,
    ) -> Self {
        Self {
            model,
            composer,
            validator,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run the session state machine for one question.
    ///
    /// `Drafting -> Validating` once the model responded and extraction ran;
    /// `Validating -> Accepted` on a pass; `Validating -> Retrying` on a
    /// rejection with attempts remaining (the rejection becomes prompt
    /// feedback); `Validating -> Exhausted` on the final rejection.
    /// A `ModelInvocation` error is fatal at any state and does not consume
    /// a retry.
    pub async fn run(
        &self,
        question: &str,
        retrieval: &RetrievalResult,
    ) -> std::result::Result<Synthesis, SynthesisFailure> {
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut feedback: Option<RetryFeedback> = None;
        let mut draft: Option<Draft> = None;
        let mut accepted_sql: Option<String> = None;
        let mut state = State::Drafting;

        loop {
            match state {
                State::Drafting => {
                    let prompt = self.composer.compose(question, retrieval, feedback.as_ref());
                    log::debug!(
                        "attempt {}/{}: invoking model ({} char prompt)",
                        attempts.len() + 1,
                        self.max_attempts,
                        prompt.len()
                    );

                    let raw_response = match self.model.complete(&prompt).await {
                        Ok(response) => response,
                        Err(e) => {
                            return Err(SynthesisFailure {
                                reason: FailureReason::ModelInvocation(e.to_string()),
                                attempts,
                            });
                        }
                    };

                    let extracted_sql = extract_sql(&raw_response).into_sql();
                    draft = Some(Draft {
                        prompt,
                        raw_response,
                        extracted_sql,
                    });
                    state = State::Validating;
                }

                State::Validating => {
                    let Draft {
                        prompt,
                        raw_response,
                        extracted_sql,
                    } = draft.take().unwrap_or(Draft {
                        prompt: String::new(),
                        raw_response: String::new(),
                        extracted_sql: None,
                    });

                    let validation = match &extracted_sql {
                        Some(sql) => self.validator.validate(sql, retrieval),
                        None => ValidationOutcome::ExtractionFailed,
                    };

                    attempts.push(Attempt {
                        number: attempts.len() + 1,
                        prompt,
                        raw_response,
                        extracted_sql: extracted_sql.clone(),
                        validation: validation.clone(),
                    });

                    if validation.is_accepted() {
                        accepted_sql = extracted_sql;
                        state = State::Accepted;
                    } else {
                        let reason = validation
                            .feedback_reason()
                            .unwrap_or_else(|| "rejected".to_string());
                        log::info!(
                            "attempt {}/{} rejected: {reason}",
                            attempts.len(),
                            self.max_attempts
                        );
                        if attempts.len() < self.max_attempts {
                            feedback = Some(RetryFeedback {
                                candidate_sql: extracted_sql.unwrap_or_default(),
                                reason,
                            });
                            state = State::Retrying;
                        } else {
                            state = State::Exhausted;
                        }
                    }
                }

                State::Retrying => {
                    state = State::Drafting;
                }

                State::Accepted => {
                    let sql = match accepted_sql.take() {
                        Some(sql) => sql,
                        // Unreachable: Accepted is only entered with SQL in hand.
                        None => {
                            return Err(SynthesisFailure {
                                reason: FailureReason::Exhausted,
                                attempts,
                            });
                        }
                    };
                    log::info!("accepted SQL on attempt {}", attempts.len());
                    return Ok(Synthesis {
                        sql,
                        attempts,
                        retrieval: retrieval.clone(),
                    });
                }

                State::Exhausted => {
                    return Err(SynthesisFailure {
                        reason: FailureReason::Exhausted,
                        attempts,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AskDbError, Result};
    use crate::ml::index::RetrievedTable;
    use crate::schema::{SchemaColumn, SchemaRecord};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedModel {
        responses: Mutex<VecDeque<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl LanguageModel for ScriptedModel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .expect("scripted model mutex poisoned")
                .pop_front()
                .ok_or_else(|| AskDbError::ModelInvocation("script exhausted".to_string()))
        }
    }

    struct FailingModel;

    impl LanguageModel for FailingModel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Err(AskDbError::ModelInvocation("connection refused".to_string()))
        }
    }

    fn retrieval() -> RetrievalResult {
        vec![RetrievedTable {
            score: 0.9,
            record: SchemaRecord {
                id: 0,
                table_name: "Customers".to_string(),
                description: None,
                columns: vec![SchemaColumn {
                    name: "name".to_string(),
                    data_type: "varchar".to_string(),
                    description: None,
                    nullable: true,
                    primary_key: false,
                    foreign_key: None,
                }],
            },
        }]
    }

    fn controller<M: LanguageModel>(model: &M) -> AttemptController<'_, M> {
        AttemptController::new(model, PromptComposer::new(12_000), Validator::new(), 3)
    }

    #[tokio::test]
    async fn test_accept_on_first_try() {
        let model = ScriptedModel::new(&["```sql\nSELECT * FROM Customers\n```"]);
        let synthesis = controller(&model)
            .run("List all customers", &retrieval())
            .await
            .unwrap();

        assert_eq!(synthesis.sql, "SELECT * FROM Customers");
        assert_eq!(synthesis.attempts.len(), 1);
        assert_eq!(synthesis.attempts[0].number, 1);
        assert!(synthesis.attempts[0].validation.is_accepted());
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_feeds_rejection_into_next_prompt() {
        let model = ScriptedModel::new(&[
            "```sql\nSELECT * FROM Client\n```",
            "```sql\nSELECT * FROM Customers\n```",
        ]);
        let synthesis = controller(&model)
            .run("List all customers", &retrieval())
            .await
            .unwrap();

        assert_eq!(synthesis.attempts.len(), 2);
        assert!(matches!(
            synthesis.attempts[0].validation,
            ValidationOutcome::RejectedSchema(_)
        ));
        // The second prompt must carry the first rejection's reason.
        assert!(synthesis.attempts[1].prompt.contains("Client"));
        assert!(synthesis.attempts[1].prompt.contains("not found"));
        assert_eq!(synthesis.sql, "SELECT * FROM Customers");
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_full_history() {
        let model = ScriptedModel::new(&[
            "no sql here",
            "also nothing useful",
            "still no statement",
        ]);
        let failure = controller(&model)
            .run("List all customers", &retrieval())
            .await
            .unwrap_err();

        assert!(matches!(failure.reason, FailureReason::Exhausted));
        assert_eq!(failure.attempts.len(), 3);
        assert_eq!(model.call_count(), 3);
        for (i, attempt) in failure.attempts.iter().enumerate() {
            assert_eq!(attempt.number, i + 1);
            assert_eq!(attempt.validation, ValidationOutcome::ExtractionFailed);
        }
    }

    #[tokio::test]
    async fn test_never_more_than_max_attempts() {
        let model = ScriptedModel::new(&["garbage"; 10]);
        let failure = controller(&model)
            .run("List all customers", &retrieval())
            .await
            .unwrap_err();

        assert_eq!(failure.attempts.len(), 3);
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_model_invocation_error_is_fatal_without_consuming_attempts() {
        let failure = controller(&FailingModel)
            .run("List all customers", &retrieval())
            .await
            .unwrap_err();

        assert!(matches!(failure.reason, FailureReason::ModelInvocation(_)));
        assert!(failure.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_extraction_failure_consumes_a_retry() {
        let model = ScriptedModel::new(&["nothing", "```sql\nSELECT * FROM Customers\n```"]);
        let synthesis = controller(&model)
            .run("List all customers", &retrieval())
            .await
            .unwrap();

        assert_eq!(synthesis.attempts.len(), 2);
        assert_eq!(
            synthesis.attempts[0].validation,
            ValidationOutcome::ExtractionFailed
        );
        assert!(synthesis.attempts[1].prompt.contains("```sql"));
    }
}
