//! deep-search: an iterative research agent
//!
//! A run repeats formulate → search → select → fetch → evaluate until the
//! model judges the gathered information sufficient or the epoch budget is
//! spent, then synthesizes a final answer.
//!
//! Every external service sits behind a trait and is injected at build time:
//! - [`CompletionProvider`]: text completion (rig-core + Ollama by default)
//! - [`SearchProvider`]: web search (DuckDuckGo or a JSON search service)
//! - [`PageFetcher`]: page text (plain HTTP + html2text)
//! - [`SnapshotSink`]: where a finished run is recorded
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use deep_search::{Config, OllamaCompletion, ResearchOrchestrator, DEFAULT_MODE};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::from_env()?;
//! let orchestrator = ResearchOrchestrator::builder(config.clone())
//!     .completion(Arc::new(OllamaCompletion::new(&config)))
//!     .build()?;
//! let report = orchestrator
//!     .run("state of WebAssembly GC", DEFAULT_MODE, CancellationToken::new())
//!     .await?;
//! println!("{}", report.answer);
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod llm;
pub mod orchestrator;
pub mod parser;
pub mod persist;
pub mod prompts;
pub mod round;
pub mod search;
pub mod selector;
pub mod topic;

// Re-exports for convenience
pub use config::Config;
pub use error::{
    CompletionError, FetchError, ParseError, PersistError, ResearchError, RoundError, SearchError,
};
pub use fetch::{CrawlResult, CrawlStatus, FetchDispatcher, HttpPageFetcher, PageFetcher};
pub use llm::{CompletionProvider, OllamaCompletion};
pub use orchestrator::{
    AnswerKind, Phase, ResearchOrchestrator, ResearchOrchestratorBuilder, ResearchReport,
    StopReason, DEFAULT_MODE, NO_FINDINGS_ANSWER, SUMMARY_SEPARATOR,
};
pub use parser::{parse_list, parse_url_tokens};
pub use persist::{JsonFileSink, NoopSink, RunSnapshot, SnapshotSink};
pub use round::SearchRound;
pub use search::{DuckDuckGoSearch, HttpSearchApi, SearchHit, SearchProvider, SearchResponse};
pub use selector::{UrlIndex, UrlSelector};
pub use topic::Topic;
