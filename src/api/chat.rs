//! Interactive question loop
//!
//! A small REPL over [`SqlSynthesizer`]: type a question, get SQL back, with
//! a few commands for poking at the index. This is the interactive front end
//! the library itself treats as just a source of question strings.

use crate::api::synthesizer::SqlSynthesizer;
use crate::config::Config;
use crate::error::Result;
use crate::sql::session::FailureReason;
use std::io::{self, Write};

/// Run the interactive loop until `exit` or end of input.
pub async fn chat(config: Config) -> Result<()> {
    let synthesizer = SqlSynthesizer::open(config)?;

    println!("askdb interactive mode");
    println!("   Ask natural language questions to generate T-SQL queries.");
    println!("   Type 'help' for commands, 'exit' to quit");

    let manifest = synthesizer.index().manifest();
    println!(
        "\nSchema index loaded: {} tables (embedding model '{}')",
        synthesizer.index().len(),
        manifest.embedding_model
    );
    println!("{}", "-".repeat(50));

    loop {
        print!("\nQuestion: ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            println!("\nGoodbye!");
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye!");
                break;
            }
            "help" => {
                println!("\nCommands:");
                println!("  schema <query> - Show the raw schema records retrieved for a query");
                println!("  stats          - Show index statistics");
                println!("  help           - Show this help");
                println!("  exit/quit      - End session");
                continue;
            }
            "stats" => {
                let manifest = synthesizer.index().manifest();
                println!("\nIndex statistics:");
                println!("  Tables:          {}", synthesizer.index().len());
                println!("  Dimension:       {}", manifest.dimension);
                println!("  Embedding model: {}", manifest.embedding_model);
                println!("  Built at:        {}", manifest.built_at);
                continue;
            }
            _ => {}
        }

        if let Some(query) = input.strip_prefix("schema ") {
            show_retrieval(&synthesizer, query.trim()).await;
            continue;
        }

        let start = std::time::Instant::now();
        match synthesizer.synthesize(input).await {
            Ok(synthesis) => {
                println!(
                    "\nSQL (accepted on attempt {}):\n",
                    synthesis.attempts.len()
                );
                println!("{}", synthesis.sql);
            }
            Err(failure) => {
                println!("\nFailed: {failure}");
                match failure.reason {
                    FailureReason::Exhausted => {
                        for attempt in &failure.attempts {
                            let reason = attempt
                                .validation
                                .feedback_reason()
                                .unwrap_or_else(|| "accepted".to_string());
                            println!("  attempt {}: {reason}", attempt.number);
                        }
                    }
                    FailureReason::IndexUnavailable(_) | FailureReason::ModelInvocation(_) => {}
                }
            }
        }
        println!("[{:.1}s]", start.elapsed().as_secs_f64());
    }

    Ok(())
}

async fn show_retrieval<E, M>(synthesizer: &SqlSynthesizer<E, M>, query: &str)
where
    E: crate::ml::embedding::Embedder,
    M: crate::sql::generate::LanguageModel,
{
    println!("\nRetrieving schema records for: '{query}'");
    // Reuse the synthesizer's retriever through a plain retrieval preview.
    match synthesizer.preview_retrieval(query).await {
        Ok(results) => {
            for (rank, retrieved) in results.iter().enumerate() {
                println!(
                    "\nRank {} (score {:.3}): {}",
                    rank + 1,
                    retrieved.score,
                    retrieved.record.table_name
                );
                let columns: Vec<&str> = retrieved
                    .record
                    .columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect();
                println!("  columns: {}", columns.join(", "));
            }
        }
        Err(e) => println!("Retrieval error: {e}"),
    }
}
