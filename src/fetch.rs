//! Page fetching.
//!
//! [`FetchDispatcher`] fans a list of URLs out to concurrent fetch tasks and
//! always returns exactly one [`CrawlResult`] per URL. Failures, timeouts and
//! cancellation become diagnostic content; nothing here fails the batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;

/// Line width used when rendering HTML to text
const TEXT_WIDTH: usize = 120;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Content of a result whose fetch never started because the run was cancelled.
pub const CANCELLED_CONTENT: &str = "fetch cancelled before the page was loaded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Fetched,
    Failed,
    Cancelled,
}

/// Outcome of fetching one URL: page text, or a human-readable diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlResult {
    pub url: String,
    pub content: String,
    pub status: CrawlStatus,
}

impl CrawlResult {
    pub fn fetched(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: content.into(),
            status: CrawlStatus::Fetched,
        }
    }

    pub fn failed(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            url: url.into(),
            content: format!("fetch failed: {}", reason),
            status: CrawlStatus::Failed,
        }
    }

    pub fn cancelled(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: CANCELLED_CONTENT.to_string(),
            status: CrawlStatus::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == CrawlStatus::Cancelled
    }
}

/// A service that loads a page and returns its visible text.
///
/// One fetcher is shared by every task of a round. `init` and `shutdown`
/// bracket a round; `init` must be idempotent.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn init(&self) -> Result<(), FetchError> {
        Ok(())
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;

    async fn shutdown(&self) {}
}

// =============================================================================
// HTTP FETCHER
// =============================================================================
/// Fetches pages over plain HTTP and converts the HTML to text.
///
/// The underlying client is created lazily and shared; the mutex only guards
/// its creation and teardown; requests themselves run unlocked.
#[derive(Default)]
pub struct HttpPageFetcher {
    client: Mutex<Option<Client>>,
}

impl HttpPageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> Result<Client, FetchError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::NotInitialized(e.to_string()))?;
        info!("HTTP page fetcher initialized");
        *guard = Some(client.clone());
        Ok(client)
    }

    pub async fn is_initialized(&self) -> bool {
        self.client.lock().await.is_some()
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn init(&self) -> Result<(), FetchError> {
        self.client().await.map(|_| ())
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let client = self.client().await?;

        let response = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| classify(e, timeout))?;
        let text = html2text::from_read(&body[..], TEXT_WIDTH)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());

        let text = text.trim();
        if text.is_empty() {
            return Err(FetchError::EmptyContent);
        }
        Ok(text.to_string())
    }

    async fn shutdown(&self) {
        if self.client.lock().await.take().is_some() {
            debug!("HTTP page fetcher shut down");
        }
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Network(e.to_string())
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================
/// Runs one fetch task per URL, at most `concurrency` at a time.
#[derive(Clone)]
pub struct FetchDispatcher {
    fetcher: Arc<dyn PageFetcher>,
    concurrency: usize,
    timeout: Duration,
}

impl FetchDispatcher {
    pub fn new(fetcher: Arc<dyn PageFetcher>, concurrency: usize, timeout: Duration) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    pub fn fetcher(&self) -> &Arc<dyn PageFetcher> {
        &self.fetcher
    }

    /// Fetch every URL, returning one result per input URL.
    ///
    /// Waits for all tasks; a failure never aborts its siblings. Results
    /// already cancelled when their task starts do no network I/O.
    pub async fn dispatch(&self, urls: &[String], cancel: &CancellationToken) -> Vec<CrawlResult> {
        if urls.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(urls.len());

        for url in urls {
            let task = FetchTask {
                url: url.clone(),
                fetcher: Arc::clone(&self.fetcher),
                semaphore: Arc::clone(&semaphore),
                cancel: cancel.clone(),
                timeout: self.timeout,
            };
            handles.push(tokio::spawn(task.run()));
        }

        let joined = join_all(handles).await;

        let results: Vec<CrawlResult> = urls
            .iter()
            .zip(joined)
            .map(|(url, outcome)| match outcome {
                Ok(result) => result,
                Err(e) => {
                    warn!(url = %url, error = %e, "Fetch task aborted");
                    CrawlResult::failed(url, format!("fetch task aborted: {}", e))
                }
            })
            .collect();

        let fetched = results
            .iter()
            .filter(|r| r.status == CrawlStatus::Fetched)
            .count();
        info!(total = results.len(), fetched, "Fetch batch finished");

        results
    }
}

struct FetchTask {
    url: String,
    fetcher: Arc<dyn PageFetcher>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl FetchTask {
    async fn run(self) -> CrawlResult {
        if self.cancel.is_cancelled() {
            return CrawlResult::cancelled(self.url);
        }

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => Some(permit),
        };
        let _permit = match permit {
            None => return CrawlResult::cancelled(self.url),
            Some(Ok(permit)) => permit,
            Some(Err(_)) => return CrawlResult::failed(self.url, "fetch pool closed"),
        };

        debug!(url = %self.url, "Fetching page");

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            outcome = tokio::time::timeout(self.timeout, self.fetcher.fetch(&self.url, self.timeout)) => Some(outcome),
        };
        let Some(outcome) = outcome else {
            return CrawlResult::cancelled(self.url);
        };

        match outcome {
            Ok(Ok(text)) => CrawlResult::fetched(self.url, text),
            Ok(Err(e)) => {
                warn!(url = %self.url, error = %e, "Page fetch failed");
                CrawlResult::failed(self.url, e)
            }
            Err(_) => {
                let e = FetchError::Timeout(self.timeout);
                warn!(url = %self.url, error = %e, "Page fetch timed out");
                CrawlResult::failed(self.url, e)
            }
        }
    }
}
