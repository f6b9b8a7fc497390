//! One search round: search, select, fetch, clean.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RoundError;
use crate::fetch::{CrawlResult, FetchDispatcher};
use crate::search::SearchProvider;
use crate::selector::UrlSelector;

/// Content some fetchers return for a page with nothing usable on it.
pub const PLACEHOLDER_CONTENT: &str = "NA";

/// Strip newlines and tabs from page text.
pub fn clean_content(content: &str) -> String {
    content.replace(['\n', '\t'], "")
}

/// Runs the search → select → fetch pipeline for a query batch.
#[derive(Clone)]
pub struct SearchRound {
    search: Arc<dyn SearchProvider>,
    selector: UrlSelector,
    dispatcher: FetchDispatcher,
}

impl SearchRound {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        selector: UrlSelector,
        dispatcher: FetchDispatcher,
    ) -> Self {
        Self {
            search,
            selector,
            dispatcher,
        }
    }

    /// Run one round for `queries`.
    ///
    /// Returns the cleaned results worth keeping. An empty list means nothing
    /// useful turned up, which is not an error.
    pub async fn run(
        &self,
        topic: &str,
        summaries: &[String],
        queries: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<CrawlResult>, RoundError> {
        info!(
            backend = self.search.name(),
            queries = queries.len(),
            "Searching"
        );
        let response = self.search.search(queries).await?;
        debug!(diagnostic_url = %response.diagnostic_url, hits = response.hits.len(), "Search finished");

        if response.hits.is_empty() {
            info!("Search returned no hits");
            return Ok(Vec::new());
        }

        let urls = self.selector.select(topic, summaries, &response.hits).await?;

        let fetcher = self.dispatcher.fetcher();
        if let Err(e) = fetcher.init().await {
            warn!(error = %e, "Page fetcher failed to initialize");
        }
        let results = self.dispatcher.dispatch(&urls, cancel).await;
        fetcher.shutdown().await;

        let fetched = results.len();
        let kept: Vec<CrawlResult> = results
            .into_iter()
            .map(|mut result| {
                result.content = clean_content(&result.content);
                result
            })
            .filter(|result| {
                let content = result.content.trim();
                !content.is_empty() && content != PLACEHOLDER_CONTENT
            })
            .collect();

        info!(fetched, kept = kept.len(), "Round finished");
        Ok(kept)
    }
}
