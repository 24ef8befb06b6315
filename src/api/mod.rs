//! High-level API for askdb-rs
//!
//! This module provides the main public interfaces: the question-to-SQL
//! synthesizer façade and the interactive chat loop.

pub mod chat;
pub mod synthesizer;

pub use chat::chat;
pub use synthesizer::{SqlSynthesizer, synthesize_question};
