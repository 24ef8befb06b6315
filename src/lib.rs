//! # askdb-rs
//!
//! Retrieval-augmented natural-language-to-SQL synthesis: embed a database
//! schema once, then turn questions into validated T-SQL by retrieving the
//! most relevant tables, prompting a language model with them, and repairing
//! rejected candidates through a bounded feedback loop.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use askdb_rs::{Config, OpenAiEmbedder, build_index, schema, synthesize_question};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!
//!     // Offline: embed the schema records produced by your schema parser
//!     let records = schema::load_records("schema.json")?;
//!     let embedder = OpenAiEmbedder::new(&config)?;
//!     build_index(&records, &embedder, &config.index_dir).await?;
//!
//!     // Online: one question, one validated SQL string
//!     let synthesis = synthesize_question(&config, "List all customers").await?;
//!     println!("{}", synthesis.sql);
//!
//!     Ok(())
//! }
//! ```

// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod ml;
pub mod schema;
pub mod sql;

// Re-export main API types
pub use api::{SqlSynthesizer, chat, synthesize_question};
pub use config::Config;
pub use error::{AskDbError, Result};

// Re-export commonly used types
pub use ml::{
    Embedder, Embedding, OpenAiEmbedder, RetrievalResult, RetrievedTable, SchemaIndex,
    SchemaRetriever, build_index,
};
pub use schema::{SchemaColumn, SchemaRecord};
pub use sql::{
    Attempt, AttemptController, FailureReason, LanguageModel, OpenAiGenerator, PromptComposer,
    SqlExtraction, Synthesis, SynthesisFailure, ValidationOutcome, Validator, extract_sql,
};
