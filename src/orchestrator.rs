//! # Research Orchestrator
//!
//! The epoch loop of a research run:
//!
//! ```text
//! Formulating → Searching → Evaluating ─┬─ continue → Formulating
//!                                       └─ stop ────→ Finalizing → Done
//! ```
//!
//! `Cancelled` is reachable from every phase and skips Finalizing. Epochs are
//! strictly sequential; the only concurrency is the page fan-out inside a
//! [`SearchRound`].

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ResearchError;
use crate::fetch::{CrawlResult, FetchDispatcher, HttpPageFetcher, PageFetcher};
use crate::llm::{CompletionProvider, DEFAULT_TEMPERATURE, FINAL_TEMPERATURE};
use crate::parser::parse_list;
use crate::persist::{NoopSink, RunSnapshot, SnapshotSink};
use crate::prompts::{EvaluateRound, FinalSummary, FormulateQueries};
use crate::round::SearchRound;
use crate::search::{DuckDuckGoSearch, HttpSearchApi, SearchProvider};
use crate::selector::UrlSelector;
use crate::topic::Topic;

/// Mode tag recorded for a standard run.
pub const DEFAULT_MODE: &str = "deep_search";

/// Separator between summaries when the final answer falls back to them.
pub const SUMMARY_SEPARATOR: &str = "\n\n";

/// Answer given when the final synthesis fails and nothing was gathered.
pub const NO_FINDINGS_ANSWER: &str =
    "No usable information was found for this topic. Try rephrasing it or widening its scope.";

/// Affirmative token looked for in the evaluation verdict.
const SUFFICIENT_TOKEN: &str = "yes";

/// Marker that ends the verdict part of an evaluation response.
const SUMMARY_MARKER: &str = "summary";

/// Takes precedence over [`SUMMARY_MARKER`] when both are present.
const ANALYSIS_MARKER: &str = "analysis";

// =============================================================================
// RUN STATE
// =============================================================================
/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Formulating,
    Searching,
    Evaluating,
    Finalizing,
    Done,
    Cancelled,
}

/// Why the epoch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model judged the gathered information sufficient
    Sufficient,
    /// Every epoch ran without a sufficient verdict
    EpochsExhausted,
}

/// How the final answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerKind {
    Synthesized,
    /// The final completion failed; the answer is the joined summaries
    Concatenated,
    /// The final completion failed with nothing gathered; the answer is
    /// [`NO_FINDINGS_ANSWER`]
    NoFindings,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct ResearchReport {
    pub topic: Topic,
    pub mode: String,
    pub answer: String,
    pub answer_kind: AnswerKind,
    pub stop_reason: StopReason,
    /// Epochs actually started, skipped ones included
    pub epochs: usize,
    pub queries: Vec<String>,
    pub summaries: Vec<String>,
    pub crawl_log: Vec<CrawlResult>,
}

impl ResearchReport {
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            topic: self.topic.to_string(),
            queries: self.queries.clone(),
            summaries: self.summaries.clone(),
            answer: self.answer.clone(),
            crawl_log: self.crawl_log.clone(),
            epoch: self.epochs,
            mode: self.mode.clone(),
        }
    }
}

/// Append-only accumulators of one run.
#[derive(Debug, Default)]
struct Accumulators {
    queries: Vec<String>,
    summaries: Vec<String>,
    crawl_log: Vec<CrawlResult>,
}

/// Decide whether an evaluation response says "sufficient".
///
/// The verdict is the text before the `analysis` marker if there is one,
/// otherwise before the `summary` marker; the rest is the model's note on the
/// round.
pub fn is_sufficient(response: &str) -> bool {
    let lowered = response.to_lowercase();
    let cut = lowered
        .find(ANALYSIS_MARKER)
        .or_else(|| lowered.find(SUMMARY_MARKER))
        .unwrap_or(lowered.len());

    let (verdict, note) = lowered.split_at(cut);
    if !note.is_empty() {
        debug!(note = %note.trim(), "Evaluation note");
    }
    verdict.contains(SUFFICIENT_TOKEN)
}

// =============================================================================
// BUILDER
// =============================================================================
/// Assembles a [`ResearchOrchestrator`] from its capabilities.
///
/// Only the completion capability is mandatory. Search defaults to the
/// configured HTTP endpoint or DuckDuckGo, fetching to [`HttpPageFetcher`],
/// and snapshots are discarded unless a sink is given.
pub struct ResearchOrchestratorBuilder {
    config: Config,
    completion: Option<Arc<dyn CompletionProvider>>,
    search: Option<Arc<dyn SearchProvider>>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    sink: Option<Arc<dyn SnapshotSink>>,
}

impl ResearchOrchestratorBuilder {
    pub fn completion(mut self, completion: Arc<dyn CompletionProvider>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<ResearchOrchestrator, ResearchError> {
        self.config
            .validate()
            .map_err(|e| ResearchError::Config(e.to_string()))?;

        let completion = self.completion.ok_or(ResearchError::CompletionUnavailable)?;

        let search = match self.search {
            Some(search) => search,
            None => default_search(&self.config)?,
        };
        let fetcher: Arc<dyn PageFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpPageFetcher::new()),
        };
        let sink: Arc<dyn SnapshotSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(NoopSink),
        };

        let dispatcher = FetchDispatcher::new(
            fetcher,
            self.config.fetch_concurrency,
            self.config.fetch_timeout,
        );
        let round = SearchRound::new(
            search,
            UrlSelector::new(Arc::clone(&completion)),
            dispatcher,
        );

        Ok(ResearchOrchestrator {
            config: self.config,
            completion,
            round,
            sink,
            active: Mutex::new(None),
            phase: Mutex::new(Phase::Idle),
        })
    }
}

fn default_search(config: &Config) -> Result<Arc<dyn SearchProvider>, ResearchError> {
    match &config.search_api_url {
        Some(endpoint) => {
            let api = HttpSearchApi::new(endpoint.as_str())
                .map_err(|e| ResearchError::Config(e.to_string()))?;
            Ok(Arc::new(api))
        }
        None => Ok(Arc::new(DuckDuckGoSearch::new(config.max_search_results))),
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================
/// Drives research runs. Share it behind an `Arc` to cancel from elsewhere.
pub struct ResearchOrchestrator {
    config: Config,
    completion: Arc<dyn CompletionProvider>,
    round: SearchRound,
    sink: Arc<dyn SnapshotSink>,
    /// Token of the run in progress
    active: Mutex<Option<CancellationToken>>,
    phase: Mutex<Phase>,
}

/// Clears the active-run slot when a run ends, however it ends.
struct ActiveRun<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

impl ResearchOrchestrator {
    pub fn builder(config: Config) -> ResearchOrchestratorBuilder {
        ResearchOrchestratorBuilder {
            config,
            completion: None,
            search: None,
            fetcher: None,
            sink: None,
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, phase: Phase) {
        debug!(phase = ?phase, "Entering phase");
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Cancel the run in progress and abort its in-flight completion call.
    ///
    /// Returns `false` when no run is active.
    pub fn cancel(&self) -> bool {
        let active = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        match active {
            Some(token) => {
                token.cancel();
                let aborted = self.completion.cancel_current();
                info!(aborted_completion = aborted, "Research run cancelled");
                true
            }
            None => false,
        }
    }

    fn cancelled(&self, token: &CancellationToken, epoch: usize) -> Option<ResearchError> {
        if token.is_cancelled() {
            self.enter(Phase::Cancelled);
            warn!(epoch, "Research run cancelled");
            Some(ResearchError::Cancelled)
        } else {
            None
        }
    }

    /// Research `topic` until the model is satisfied, the epoch budget is
    /// spent, or `cancel` fires.
    ///
    /// Cancellation yields [`ResearchError::Cancelled`] and no answer. Every
    /// other capability failure degrades instead of failing the run.
    pub async fn run(
        &self,
        topic: &str,
        mode: &str,
        cancel: CancellationToken,
    ) -> Result<ResearchReport, ResearchError> {
        let topic = Topic::new(topic)?;
        let token = cancel.child_token();

        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        let _active = ActiveRun { slot: &self.active };

        let max_epochs = self.config.max_epochs;
        info!(topic = %topic, mode = %mode, max_epochs, "Starting research run");

        let mut acc = Accumulators::default();
        let mut epochs = 0;
        let mut stop_reason = StopReason::EpochsExhausted;

        for epoch in 0..max_epochs {
            if let Some(err) = self.cancelled(&token, epoch) {
                return Err(err);
            }
            epochs = epoch + 1;
            info!(epoch = epochs, max_epochs, "Starting epoch");

            // Formulating
            self.enter(Phase::Formulating);
            let mut batch = self.formulate(topic.as_str(), &acc).await;
            if epoch == 0 {
                batch.push(topic.to_string());
            }
            if batch.is_empty() {
                info!(epoch = epochs, "No new queries, skipping epoch");
                continue;
            }
            acc.queries.extend(batch.iter().cloned());

            // Searching
            if let Some(err) = self.cancelled(&token, epoch) {
                return Err(err);
            }
            self.enter(Phase::Searching);
            let results = match self
                .round
                .run(topic.as_str(), &acc.summaries, &batch, &token)
                .await
            {
                Ok(results) => results,
                Err(e) => {
                    error!(epoch = epochs, error = %e, "Search round failed, skipping epoch");
                    continue;
                }
            };
            if let Some(err) = self.cancelled(&token, epoch) {
                return Err(err);
            }
            if results.is_empty() {
                info!(epoch = epochs, "Round found nothing, skipping epoch");
                continue;
            }

            let earlier = acc.summaries.len();
            acc.summaries
                .extend(results.iter().map(|result| result.content.clone()));
            acc.crawl_log.extend(results);

            // Evaluating
            if let Some(err) = self.cancelled(&token, epoch) {
                return Err(err);
            }
            self.enter(Phase::Evaluating);
            let (previous, new_contents) = acc.summaries.split_at(earlier);
            if self.evaluate(topic.as_str(), previous, new_contents).await {
                info!(epoch = epochs, "Information judged sufficient");
                stop_reason = StopReason::Sufficient;
                break;
            }
        }

        // Finalizing
        if let Some(err) = self.cancelled(&token, epochs) {
            return Err(err);
        }
        self.enter(Phase::Finalizing);
        let (answer, answer_kind) = self.finalize(topic.as_str(), &acc.summaries).await;
        if let Some(err) = self.cancelled(&token, epochs) {
            return Err(err);
        }

        let report = ResearchReport {
            topic,
            mode: mode.to_string(),
            answer,
            answer_kind,
            stop_reason,
            epochs,
            queries: acc.queries,
            summaries: acc.summaries,
            crawl_log: acc.crawl_log,
        };

        if let Err(e) = self
            .sink
            .save(&report.topic.file_stem(), &report.snapshot())
            .await
        {
            error!(error = %e, "Failed to persist run snapshot");
        }

        self.enter(Phase::Done);
        info!(
            epochs = report.epochs,
            queries = report.queries.len(),
            summaries = report.summaries.len(),
            stop_reason = ?report.stop_reason,
            "Research run finished"
        );
        Ok(report)
    }

    /// Ask for new queries. Any failure means "no new queries".
    async fn formulate(&self, topic: &str, acc: &Accumulators) -> Vec<String> {
        let count = self.config.queries_per_epoch;
        let prompt = FormulateQueries {
            topic,
            existing_queries: &acc.queries,
            summaries: &acc.summaries,
            count,
        }
        .render();
        debug!(prompt = %prompt, "Query formulation prompt");

        let response = match self
            .completion
            .infer(&prompt, false, DEFAULT_TEMPERATURE)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Query formulation failed");
                return Vec::new();
            }
        };
        debug!(response = %response, "Query formulation response");

        match parse_list(&response) {
            Ok(queries) => {
                let queries: Vec<String> = queries
                    .into_iter()
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .take(count)
                    .collect();
                info!(count = queries.len(), "Formulated queries");
                queries
            }
            Err(e) => {
                warn!(error = %e, blob = %e.blob, "Could not parse formulated queries");
                Vec::new()
            }
        }
    }

    /// Ask whether the gathered information suffices. Failure means "no".
    async fn evaluate(&self, topic: &str, previous: &[String], new_contents: &[String]) -> bool {
        let prompt = EvaluateRound {
            topic,
            summaries: previous,
            new_contents,
        }
        .render();
        debug!(prompt = %prompt, "Evaluation prompt");

        match self
            .completion
            .infer(&prompt, false, DEFAULT_TEMPERATURE)
            .await
        {
            Ok(response) => {
                debug!(response = %response, "Evaluation response");
                is_sufficient(&response)
            }
            Err(e) => {
                warn!(error = %e, "Evaluation failed, continuing");
                false
            }
        }
    }

    /// Produce the final answer, degrading to the joined summaries.
    async fn finalize(&self, topic: &str, summaries: &[String]) -> (String, AnswerKind) {
        let prompt = FinalSummary { topic, summaries }.render();
        debug!(prompt = %prompt, "Final summary prompt");

        match self
            .completion
            .infer(&prompt, false, FINAL_TEMPERATURE)
            .await
        {
            Ok(answer) => (answer, AnswerKind::Synthesized),
            Err(e) if summaries.is_empty() => {
                warn!(error = %e, "Final synthesis failed with nothing gathered");
                (NO_FINDINGS_ANSWER.to_string(), AnswerKind::NoFindings)
            }
            Err(e) => {
                warn!(error = %e, "Final synthesis failed, returning gathered summaries");
                (summaries.join(SUMMARY_SEPARATOR), AnswerKind::Concatenated)
            }
        }
    }
}
