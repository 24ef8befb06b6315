//! Query generation: language model invocation and SQL extraction
//!
//! The [`LanguageModel`] trait isolates the network call so the attempt
//! controller can be driven by a scripted stub in tests. Extraction is
//! modeled as a tagged outcome with an explicit priority order, fenced
//! block first and statement heuristic second, instead of ad hoc string
//! probing.

use crate::config::Config;
use crate::error::{AskDbError, Result};
use crate::ml::embedding::openai_client;
use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs, Stop,
};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You translate natural language questions into T-SQL. \
Respond with a single T-SQL statement inside a ```sql code block.";

/// Anything that maps a prompt to free-form completion text.
///
/// Implementations fail with `ModelInvocation` only for transport, auth,
/// rate-limit, or timeout problems; content problems are not errors here.
pub trait LanguageModel {
    fn complete(&self, prompt: &str) -> impl std::future::Future<Output = Result<String>> + Send;
}

/// Production generator backed by an OpenAI-compatible chat completions API
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u16,
    stop_sequences: Option<Vec<String>>,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: openai_client(config)?,
            model: config.generation.model.clone(),
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
            stop_sequences: config.generation.stop_sequences.clone(),
            timeout: config.generation.timeout(),
        })
    }
}

impl LanguageModel for OpenAiGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(
                    SYSTEM_PROMPT.to_string(),
                ),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                name: None,
            }),
        ];

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens);
        if let Some(stop) = &self.stop_sequences {
            args.stop(Stop::StringArray(stop.clone()));
        }
        let request = args
            .build()
            .map_err(|e| AskDbError::ModelInvocation(format!("request build failed: {e}")))?;

        // No lock is held here; a hung endpoint only costs this session its
        // timeout.
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                AskDbError::ModelInvocation(format!(
                    "model call timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| AskDbError::ModelInvocation(format!("chat completion failed: {e}")))?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| {
                AskDbError::ModelInvocation("no content in chat completion response".to_string())
            })
    }
}

/// Tagged outcome of SQL extraction, resolved in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlExtraction {
    /// Contents of a fenced ```sql block, trimmed but otherwise verbatim
    FencedBlock(String),
    /// Exactly one statement-like region found in free text
    HeuristicMatch(String),
    /// No SQL could be isolated; a normal, retryable outcome
    None,
}

impl SqlExtraction {
    pub fn into_sql(self) -> Option<String> {
        match self {
            SqlExtraction::FencedBlock(sql) | SqlExtraction::HeuristicMatch(sql) => Some(sql),
            SqlExtraction::None => None,
        }
    }
}

static FENCED_SQL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```sql\s*\n?(.*?)```").expect("fenced-sql regex is valid")
});

const SQL_VERBS: [&str; 5] = ["SELECT", "WITH", "INSERT", "UPDATE", "DELETE"];

/// Extract a single SQL statement from free-form model output.
///
/// Priority: the first fenced ```sql block; otherwise exactly one
/// statement-like region starting with a SQL verb. Anything else is
/// [`SqlExtraction::None`].
pub fn extract_sql(response: &str) -> SqlExtraction {
    if let Some(captures) = FENCED_SQL.captures(response) {
        if let Some(body) = captures.get(1) {
            let sql = body.as_str().trim();
            if !sql.is_empty() {
                return SqlExtraction::FencedBlock(sql.to_string());
            }
        }
    }

    let regions = statement_regions(response);
    match regions.as_slice() {
        [only] => SqlExtraction::HeuristicMatch(only.clone()),
        _ => SqlExtraction::None,
    }
}

/// Collect statement-like regions: runs of lines starting at a SQL verb and
/// ending at a `;`, a blank line, or end of text.
fn statement_regions(response: &str) -> Vec<String> {
    let mut regions = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_region = false;

    for line in response.lines() {
        let trimmed = line.trim();
        // Fence markers around an untagged code block are not part of the
        // statement.
        if trimmed.starts_with("```") {
            continue;
        }

        if !in_region {
            if starts_with_sql_verb(trimmed) {
                current.push(line);
                in_region = true;
                if trimmed.ends_with(';') {
                    regions.push(take_region(&mut current));
                    in_region = false;
                }
            }
        } else if trimmed.is_empty() {
            regions.push(take_region(&mut current));
            in_region = false;
        } else {
            current.push(line);
            if trimmed.ends_with(';') {
                regions.push(take_region(&mut current));
                in_region = false;
            }
        }
    }
    if in_region {
        regions.push(take_region(&mut current));
    }

    regions
}

fn take_region(lines: &mut Vec<&str>) -> String {
    let region = lines.join("\n").trim().to_string();
    lines.clear();
    region
}

fn starts_with_sql_verb(line: &str) -> bool {
    let first_word = line.split_whitespace().next().unwrap_or("");
    SQL_VERBS
        .iter()
        .any(|verb| first_word.eq_ignore_ascii_case(verb))
}
