//! # deep-search
//!
//! Command-line entry point for the iterative research agent.
//!
//! ## Quick Start
//! ```bash
//! cargo run -- "What changed in the Rust 2024 edition?"
//! ```

// =============================================================================
// IMPORTS
// =============================================================================
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use deep_search::{
    Config, JsonFileSink, OllamaCompletion, ResearchError, ResearchOrchestrator, DEFAULT_MODE,
};

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "deep-search",
    version,
    about = "Iterative web research with a local LLM",
    long_about = r#"
deep-search - research a topic in rounds until the answer is complete.

Each round it will:
  1. Ask the model for new search queries
  2. Search the web and let the model pick the promising results
  3. Read those pages concurrently
  4. Ask the model whether it now knows enough

When the model is satisfied (or the round budget runs out) it writes a final
answer. A JSON snapshot of the run is saved under DEEPSEARCH_DATA_DIR.

PREREQUISITES:
  1. Install Ollama: https://ollama.ai
  2. Pull a model: ollama pull llama3.2
  3. Start Ollama: ollama serve

EXAMPLES:
  deep-search "How do Rust async runtimes schedule tasks?"
  deep-search --max-epochs 2 --deadline-secs 300 "WebAssembly component model"
  SEARCH_API_URL=http://localhost:8080/search deep-search "HTTP/3 adoption"
"#
)]
struct Args {
    /// The research topic or question
    #[arg(value_name = "TOPIC")]
    topic: String,

    /// The Ollama model to use (overrides OLLAMA_MODEL env var)
    #[arg(short = 'm', long = "model", env = "OLLAMA_MODEL")]
    model: Option<String>,

    /// Mode tag recorded in the run snapshot
    #[arg(long = "mode", default_value = DEFAULT_MODE)]
    mode: String,

    /// Maximum number of research rounds (overrides MAX_EPOCHS)
    #[arg(short = 'e', long = "max-epochs")]
    max_epochs: Option<usize>,

    /// Cancel the run after this many seconds
    #[arg(short = 'd', long = "deadline-secs")]
    deadline_secs: Option<u64>,

    /// Enable verbose/debug logging
    #[arg(short = 'v', long = "verbose", default_value = "false")]
    verbose: bool,
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env()?;
    init_logging(args.verbose, &config.log_level)?;

    if let Some(model) = args.model {
        info!(model = %model, "Using model from command line");
        config.model = model;
    }
    if let Some(max_epochs) = args.max_epochs {
        config.max_epochs = max_epochs;
    }
    config.validate()?;

    info!(
        model = %config.model,
        host = %config.ollama_host,
        max_epochs = config.max_epochs,
        search = config.search_api_url.as_deref().unwrap_or("duckduckgo"),
        "Configuration loaded"
    );

    let orchestrator = ResearchOrchestrator::builder(config.clone())
        .completion(Arc::new(OllamaCompletion::new(&config)))
        .sink(Arc::new(JsonFileSink::new(config.data_dir.clone())))
        .build()
        .context("Failed to set up the research pipeline")?;
    let orchestrator = Arc::new(orchestrator);

    let cancel = CancellationToken::new();
    spawn_cancel_on_ctrl_c(Arc::clone(&orchestrator), cancel.clone());
    if let Some(secs) = args.deadline_secs {
        spawn_deadline(
            Arc::clone(&orchestrator),
            cancel.clone(),
            Duration::from_secs(secs),
        );
    }

    match orchestrator.run(&args.topic, &args.mode, cancel).await {
        Ok(report) => {
            println!("\n{}", "=".repeat(60));
            println!("RESEARCH RESULTS ({} rounds)", report.epochs);
            println!("{}\n", "=".repeat(60));
            println!("{}", report.answer);
            println!("\n{}", "=".repeat(60));

            info!(
                answer_kind = ?report.answer_kind,
                stop_reason = ?report.stop_reason,
                "Research completed"
            );
            Ok(())
        }
        Err(ResearchError::Cancelled) => {
            warn!("Research cancelled before an answer was produced");
            eprintln!("\nResearch cancelled.");
            Err(ResearchError::Cancelled.into())
        }
        Err(e) => {
            error!(error = %e, "Research failed");
            eprintln!("\nResearch failed: {}", e);
            if matches!(e, ResearchError::InvalidTopic) {
                eprintln!("\nTip: pass the topic as the first argument, e.g.");
                eprintln!("   deep-search \"history of the B-tree\"");
            }
            Err(e.into())
        }
    }
}

// =============================================================================
// CANCELLATION
// =============================================================================
fn spawn_cancel_on_ctrl_c(orchestrator: Arc<ResearchOrchestrator>, cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling");
            cancel.cancel();
            orchestrator.cancel();
        }
    });
}

fn spawn_deadline(
    orchestrator: Arc<ResearchOrchestrator>,
    cancel: CancellationToken,
    deadline: Duration,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {
                warn!(deadline_secs = deadline.as_secs(), "Deadline reached, cancelling");
                cancel.cancel();
                orchestrator.cancel();
            }
        }
    });
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// Install the global tracing subscriber. `--verbose` wins over `RUST_LOG`.
fn init_logging(verbose: bool, log_level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("Invalid log filter: {}", log_level))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
