//! Prompt composition for SQL generation
//!
//! Rendering is deterministic: the question verbatim, the retrieved schema
//! records in similarity order, and on retry the previous candidate with
//! the specific rejection phrased as corrective guidance. A configured
//! character budget trims whole records from the lowest-similarity end
//! first; the top-1 record always survives, and nothing is dropped silently.

use crate::ml::index::RetrievedTable;

const PREAMBLE: &str = "\
You are an expert T-SQL assistant. You write correct and efficient queries \
for Microsoft SQL Server.

Rules:
- Use only the tables and columns listed below; do not fabricate names.
- Use explicit JOIN syntax and table aliases for readability.
- Answer with exactly one T-SQL statement inside a ```sql code block.";

/// Prior-attempt context carried into a retry prompt
#[derive(Debug, Clone)]
pub struct RetryFeedback {
    pub candidate_sql: String,
    pub reason: String,
}

/// Deterministic prompt renderer with a schema-section size budget
#[derive(Debug, Clone)]
pub struct PromptComposer {
    budget_chars: usize,
}

impl PromptComposer {
    pub fn new(budget_chars: usize) -> Self {
        Self { budget_chars }
    }

    pub fn compose(
        &self,
        question: &str,
        retrieval: &[RetrievedTable],
        feedback: Option<&RetryFeedback>,
    ) -> String {
        let mut prompt = String::with_capacity(self.budget_chars.min(1 << 16));
        prompt.push_str(PREAMBLE);
        prompt.push_str("\n\nUser question:\n");
        prompt.push_str(question);
        prompt.push_str("\n\nRelevant tables (most relevant first):\n\n");
        prompt.push_str(&self.render_schema_section(retrieval));

        if let Some(feedback) = feedback {
            prompt.push_str("\n\nYour previous attempt was rejected.\n\nPrevious query:\n```sql\n");
            prompt.push_str(&feedback.candidate_sql);
            prompt.push_str("\n```\n\nRejection reason:\n");
            prompt.push_str(&feedback.reason);
            prompt.push_str(
                "\n\nProvide a corrected T-SQL query that fixes the problem above, \
                 uses only the listed tables and columns, and still answers the \
                 original question.",
            );
        }

        prompt
    }

    /// Render retrieved records within the budget. Truncation drops whole
    /// records from the tail (lowest similarity); the top-1 record is always
    /// kept even when it alone exceeds the budget.
    fn render_schema_section(&self, retrieval: &[RetrievedTable]) -> String {
        let mut section = String::new();
        let mut dropped = 0usize;

        for (rank, retrieved) in retrieval.iter().enumerate() {
            let rendered = format!(
                "Rank {} (score {:.3}):\n{}\n\n",
                rank + 1,
                retrieved.score,
                retrieved.record.render_description()
            );

            if rank > 0 && section.len() + rendered.len() > self.budget_chars {
                dropped = retrieval.len() - rank;
                break;
            }
            section.push_str(&rendered);
        }

        if dropped > 0 {
            log::warn!(
                "prompt budget of {} chars exceeded; dropped the {} lowest-similarity \
                 schema record(s) from the prompt",
                self.budget_chars,
                dropped
            );
        }

        section.trim_end().to_string()
    }
}
