//! askdb-rs CLI application
//!
//! Command-line interface for the askdb-rs library.

use anyhow::Context;
use askdb_rs::{
    Config, FailureReason, OpenAiEmbedder, build_index, chat, schema, synthesize_question,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "askdb-rs")]
#[command(about = "Turn natural language questions into schema-grounded T-SQL queries")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or rebuild) the schema embedding index
    BuildIndex {
        /// Schema records file (JSON array produced by the schema parser)
        #[arg(short, long)]
        schema: PathBuf,

        /// Output index directory
        #[arg(short, long, default_value = "schema_index")]
        index: PathBuf,
    },

    /// Answer a single question with a validated SQL query
    Ask {
        /// Index directory
        #[arg(short, long, default_value = "schema_index")]
        index: PathBuf,

        /// Natural language question
        question: String,

        /// Number of schema records to retrieve
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,

        /// Maximum generate/validate attempts
        #[arg(long, default_value = "3")]
        max_attempts: usize,
    },

    /// Interactive question loop
    Chat {
        /// Index directory
        #[arg(short, long, default_value = "schema_index")]
        index: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::BuildIndex { schema, index } => {
            build_index_command(schema, index).await?;
        }
        Commands::Ask {
            index,
            question,
            top_k,
            max_attempts,
        } => {
            let mut config = Config::from_env();
            config.index_dir = index;
            config.retrieval.top_k = top_k;
            config.max_attempts = max_attempts;
            ask_command(config, &question).await?;
        }
        Commands::Chat { index } => {
            let mut config = Config::from_env();
            config.index_dir = index;
            chat(config).await?;
        }
    }

    Ok(())
}

async fn build_index_command(schema_path: PathBuf, index_dir: PathBuf) -> anyhow::Result<()> {
    let config = Config::from_env();

    let records = schema::load_records(&schema_path)
        .with_context(|| format!("loading schema records from {}", schema_path.display()))?;
    println!("Loaded {} schema records", records.len());

    let embedder = OpenAiEmbedder::new(&config).context("configuring the embedding endpoint")?;
    build_index(&records, &embedder, &index_dir)
        .await
        .context("building the schema index")?;

    println!(
        "Schema index built at {} ({} tables)",
        index_dir.display(),
        records.len()
    );
    Ok(())
}

async fn ask_command(config: Config, question: &str) -> anyhow::Result<()> {
    match synthesize_question(&config, question).await {
        Ok(synthesis) => {
            eprintln!(
                "-- accepted on attempt {} using {} retrieved table(s)",
                synthesis.attempts.len(),
                synthesis.retrieval.len()
            );
            println!("{}", synthesis.sql);
            Ok(())
        }
        Err(failure) => {
            eprintln!("Failed: {failure}");
            if matches!(failure.reason, FailureReason::Exhausted) {
                eprintln!("\nAttempt history:");
                for attempt in &failure.attempts {
                    let reason = attempt
                        .validation
                        .feedback_reason()
                        .unwrap_or_else(|| "accepted".to_string());
                    eprintln!("  attempt {}: {reason}", attempt.number);
                    if let Some(sql) = &attempt.extracted_sql {
                        for line in sql.lines() {
                            eprintln!("    | {line}");
                        }
                    }
                }
            }
            anyhow::bail!("no valid SQL produced for the question");
        }
    }
}
