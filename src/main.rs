use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kkh_chatbot::config::Config;
use kkh_chatbot::embedder::OpenAiEmbedder;
use kkh_chatbot::fluids;
use kkh_chatbot::llm::{Assistant, ChatClient};
use kkh_chatbot::retriever::RetrievalIndex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Nursing guide assistant: answers questions from a fixed knowledge corpus.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the corpus text file
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Override the embedding cache file
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Ask a single question and exit
    #[arg(short, long)]
    question: Option<String>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "kkh_chatbot=debug"
    } else {
        "kkh_chatbot=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(corpus) = args.corpus {
        config.corpus.path = corpus;
    }
    if let Some(cache) = args.cache {
        config.cache.path = cache;
    }

    tracing::info!("Corpus: {:?} (chunk size {})", config.corpus.path, config.corpus.chunk_size);
    tracing::info!("Embedding model: {}", config.embedding.model);
    tracing::info!("Chat model: {}", config.llm.model);

    // A missing corpus, corrupt cache or failed first build stops here.
    let embedder = Arc::new(OpenAiEmbedder::new(&config.embedding)?);
    let index = Arc::new(
        RetrievalIndex::build(&config, embedder)
            .await
            .context("Failed to build retrieval index")?,
    );
    let assistant = Assistant::new(Arc::clone(&index), ChatClient::new(config.llm.clone())?);

    if let Some(question) = args.question {
        println!("{}", assistant.ask(&question).await?);
        return Ok(());
    }

    println!(
        "Ready with {} passages. Ask a question, or /fluids <weight_kg> <scenario> (Ctrl+D to exit)",
        index.len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break; // EOF (Ctrl+D)
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("/fluids") {
            match fluids::parse_command(rest) {
                Ok(plan) => println!("{plan}\n"),
                Err(e) => eprintln!("Error: {e}\n"),
            }
            continue;
        }

        print!("\nThinking...");
        std::io::stdout().flush()?;
        match assistant.ask(line).await {
            Ok(answer) => println!("\r{answer}\n"),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Question failed: {}", e);
                eprintln!("\rSorry, something went wrong: {e}\n");
            }
        }
    }

    Ok(())
}
