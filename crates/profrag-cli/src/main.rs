// ============================================================================
// profrag: run questions through the review pipeline from a terminal
// ============================================================================
// Usage:
//   profrag ask "Who teaches easy intro physics?"        Stream an answer
//   profrag search "organic chemistry" [--top-k 5]       Show raw matches
//   profrag search "organic chemistry" --json            Matches as JSON
//
// Reads the same environment (and .env) as profrag-server.
// ============================================================================

use std::io::Write;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use profrag_core::{ChatMessage, ProfessorMatch};
use profrag_server::config::{build_pipeline, UpstreamArgs, UpstreamConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Professor review assistant
#[derive(Parser)]
#[command(name = "profrag", version, about = "Ask the professor review assistant from the terminal")]
struct Cli {
    #[command(flatten)]
    upstream: UpstreamArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question, printing the answer as it streams
    Ask {
        question: String,
    },

    /// Show the reviews a question retrieves, without generating an answer
    Search {
        question: String,

        /// Override how many reviews to fetch
        #[arg(long)]
        top_k: Option<u64>,

        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut upstream = cli.upstream;

    match cli.command {
        Commands::Ask { question } => {
            let config = UpstreamConfig::from_args(upstream)?;
            cmd_ask(&config, question).await
        }
        Commands::Search {
            question,
            top_k,
            json,
        } => {
            if let Some(top_k) = top_k {
                upstream.top_k = top_k;
            }
            let config = UpstreamConfig::from_args(upstream)?;
            cmd_search(&config, &question, json).await
        }
    }
}

async fn cmd_ask(config: &UpstreamConfig, question: String) -> Result<()> {
    let pipeline = build_pipeline(config)
        .await
        .context("Failed to set up the review pipeline")?;

    let request_id = uuid::Uuid::new_v4().to_string();
    let mut relay = pipeline.answer(&[ChatMessage::user(question)], &request_id).await?;
    info!(request_id = relay.request_id(), "answer stream opened");

    let mut stdout = std::io::stdout();
    while let Some(fragment) = relay.next().await {
        let fragment = fragment.context("Answer stream failed")?;
        stdout.write_all(fragment.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    Ok(())
}

async fn cmd_search(config: &UpstreamConfig, question: &str, json: bool) -> Result<()> {
    let pipeline = build_pipeline(config)
        .await
        .context("Failed to set up the review pipeline")?;

    let matches = pipeline.retrieve(question).await?;
    info!(matches = matches.len(), top_k = config.settings.top_k, "reviews retrieved");

    if json {
        println!("{}", serde_json::to_string_pretty(&matches)?);
        return Ok(());
    }

    if matches.is_empty() {
        println!("No reviews found.");
        return Ok(());
    }

    for (rank, m) in matches.iter().enumerate() {
        print_match(rank + 1, m);
    }

    Ok(())
}

fn print_match(rank: usize, m: &ProfessorMatch) {
    let score = m
        .score
        .map(|s| format!("{:.3}", s))
        .unwrap_or_else(|| "-".to_string());

    println!("{}. {} ({}, {} stars) score {}", rank, m.id, m.metadata.subject, m.metadata.stars, score);
    println!("   {}", m.metadata.review);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_top_k_override() {
        let cli = Cli::parse_from([
            "profrag",
            "--hf-token",
            "hf_test",
            "search",
            "linear algebra",
            "--top-k",
            "5",
        ]);

        match cli.command {
            Commands::Search { question, top_k, json } => {
                assert_eq!(question, "linear algebra");
                assert_eq!(top_k, Some(5));
                assert!(!json);
            }
            Commands::Ask { .. } => panic!("expected search"),
        }
    }
}
