//! Scripted capability doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use deep_search::{
    CompletionError, CompletionProvider, Config, FetchError, PageFetcher, SearchError, SearchHit,
    SearchProvider, SearchResponse,
};

// =============================================================================
// COMPLETION
// =============================================================================
/// Which of the four model calls a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Formulate,
    Select,
    Evaluate,
    Final,
}

impl CallKind {
    fn of(prompt: &str) -> Self {
        if prompt.contains("planning web searches") {
            CallKind::Formulate
        } else if prompt.contains("selecting which search results") {
            CallKind::Select
        } else if prompt.contains("reviewing research progress") {
            CallKind::Evaluate
        } else {
            CallKind::Final
        }
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    pub prompt: String,
    pub reasoning: bool,
    pub temperature: f32,
}

/// Completion double answering each call kind from a script.
///
/// Replies are picked by per-kind call index; the last reply repeats.
pub struct ScriptedCompletion {
    pub formulate: Vec<String>,
    pub select: String,
    pub verdicts: Vec<String>,
    pub final_answer: Result<String, CompletionError>,
    /// Cancel this token when the evaluation with this index starts
    pub cancel_on_evaluate: Option<(usize, CancellationToken)>,
    /// Block evaluations until `cancel_current` is called
    pub hang_on_evaluate: bool,
    /// Every evaluation call fails
    pub fail_evaluate: bool,
    /// Every URL selection call fails
    pub fail_select: bool,
    pub calls: Mutex<Vec<Call>>,
    pub entered_evaluate: Notify,
    pub abort: Notify,
}

impl Default for ScriptedCompletion {
    fn default() -> Self {
        Self {
            formulate: vec![r#"```json
["rust ownership rules"]
```"#
                .to_string()],
            select: r#"["url_1"]"#.to_string(),
            verdicts: vec!["No\nSummary: still missing details".to_string()],
            final_answer: Ok("FINAL ANSWER".to_string()),
            cancel_on_evaluate: None,
            hang_on_evaluate: false,
            fail_evaluate: false,
            fail_select: false,
            calls: Mutex::new(Vec::new()),
            entered_evaluate: Notify::new(),
            abort: Notify::new(),
        }
    }
}

impl ScriptedCompletion {
    pub fn calls_of(&self, kind: CallKind) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn count_of(&self, kind: CallKind) -> usize {
        self.calls_of(kind).len()
    }
}

fn pick(replies: &[String], index: usize) -> String {
    replies
        .get(index)
        .or_else(|| replies.last())
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn infer(
        &self,
        prompt: &str,
        enable_reasoning: bool,
        temperature: f32,
    ) -> Result<String, CompletionError> {
        let kind = CallKind::of(prompt);
        let index = self.count_of(kind);
        self.calls.lock().unwrap().push(Call {
            kind,
            prompt: prompt.to_string(),
            reasoning: enable_reasoning,
            temperature,
        });

        match kind {
            CallKind::Formulate => Ok(pick(&self.formulate, index)),
            CallKind::Select if self.fail_select => {
                Err(CompletionError::Request("selection model offline".to_string()))
            }
            CallKind::Select => Ok(self.select.clone()),
            CallKind::Evaluate => {
                if let Some((at, token)) = &self.cancel_on_evaluate {
                    if *at == index {
                        token.cancel();
                    }
                }
                if self.hang_on_evaluate {
                    self.entered_evaluate.notify_one();
                    tokio::select! {
                        _ = self.abort.notified() => return Err(CompletionError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                    }
                }
                if self.fail_evaluate {
                    return Err(CompletionError::EmptyResponse);
                }
                Ok(pick(&self.verdicts, index))
            }
            CallKind::Final => self.final_answer.clone(),
        }
    }

    fn cancel_current(&self) -> bool {
        self.abort.notify_one();
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// =============================================================================
// SEARCH
// =============================================================================
/// Returns one hit per query, URL derived from the query text.
#[derive(Default)]
pub struct ScriptedSearch {
    pub empty: bool,
    pub batches: Mutex<Vec<Vec<String>>>,
}

pub fn url_for(query: &str) -> String {
    format!("https://docs.example/{}", query.replace(' ', "-"))
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(&self, queries: &[String]) -> Result<SearchResponse, SearchError> {
        self.batches.lock().unwrap().push(queries.to_vec());
        if self.empty {
            return Ok(SearchResponse::default());
        }

        let hits = queries
            .iter()
            .map(|q| SearchHit {
                site_name: "docs".to_string(),
                summary: format!("all about {}", q),
                title: q.clone(),
                url: url_for(q),
            })
            .collect();
        Ok(SearchResponse {
            hits,
            diagnostic_url: "scripted://search".to_string(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// =============================================================================
// FETCH
// =============================================================================
/// Serves `page text for <url>` for every URL.
#[derive(Default)]
pub struct StaticFetcher {
    pub fetches: AtomicUsize,
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(format!("page text\tfor\n{}", url))
    }
}

pub fn test_config(max_epochs: usize) -> Config {
    Config {
        max_epochs,
        fetch_timeout: Duration::from_secs(5),
        fetch_concurrency: 4,
        ..Config::default()
    }
}

pub struct Harness {
    pub completion: Arc<ScriptedCompletion>,
    pub search: Arc<ScriptedSearch>,
    pub fetcher: Arc<StaticFetcher>,
}

impl Harness {
    pub fn new(completion: ScriptedCompletion) -> Self {
        Self {
            completion: Arc::new(completion),
            search: Arc::new(ScriptedSearch::default()),
            fetcher: Arc::new(StaticFetcher::default()),
        }
    }

    pub fn with_search(mut self, search: ScriptedSearch) -> Self {
        self.search = Arc::new(search);
        self
    }

    pub fn builder(&self, max_epochs: usize) -> deep_search::ResearchOrchestratorBuilder {
        deep_search::ResearchOrchestrator::builder(test_config(max_epochs))
            .completion(self.completion.clone())
            .search(self.search.clone())
            .fetcher(self.fetcher.clone())
    }
}
