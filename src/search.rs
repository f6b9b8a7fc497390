//! # Search Module
//!
//! The search capability turns a batch of query strings into ranked
//! [`SearchHit`]s. Two backends are provided:
//! - [`DuckDuckGoSearch`]: scrapes the DuckDuckGo HTML endpoint, no API key
//! - [`HttpSearchApi`]: a JSON search service reached over HTTP POST

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SearchError;

/// Request timeout for both backends
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between DuckDuckGo requests in one batch
const DDG_RATE_LIMIT_PAUSE: Duration = Duration::from_millis(500);

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// =============================================================================
// DATA TYPES
// =============================================================================
/// One ranked result for a query batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub site_name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub title: String,
    pub url: String,
}

/// Hits for a whole query batch. Empty `hits` is a valid answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// Where to look when debugging this search (request URL or trace link)
    pub diagnostic_url: String,
}

/// A web search service.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, queries: &[String]) -> Result<SearchResponse, SearchError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

fn http_client() -> Result<Client, SearchError> {
    Ok(Client::builder()
        .timeout(SEARCH_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()?)
}

// =============================================================================
// DUCKDUCKGO BACKEND
// =============================================================================
static DDG_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
        .expect("valid result title regex")
});

static DDG_SNIPPET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#).expect("valid snippet regex")
});

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

/// Searches DuckDuckGo's HTML endpoint, one request per query.
///
/// Hits from all queries of a batch are merged, keeping the first occurrence
/// of each URL.
#[derive(Debug, Clone)]
pub struct DuckDuckGoSearch {
    /// Maximum results kept per query
    max_results: usize,
    base_url: String,
}

impl DuckDuckGoSearch {
    pub fn new(max_results: usize) -> Self {
        Self {
            max_results,
            base_url: "https://html.duckduckgo.com/html/".to_string(),
        }
    }

    /// Point the backend at another host (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn query_url(&self, query: &str) -> String {
        format!("{}?q={}", self.base_url, urlencoding::encode(query))
    }

    async fn search_one(&self, client: &Client, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let url = self.query_url(query);
        debug!(url = %url, "Fetching search results");

        let response = client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Http(status.as_u16(), body));
        }

        let body = response.text().await?;
        Ok(parse_results_html(&body, self.max_results))
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, queries: &[String]) -> Result<SearchResponse, SearchError> {
        let client = http_client()?;
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        let mut failures = 0;
        let mut last_error = None;

        for (i, query) in queries.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(DDG_RATE_LIMIT_PAUSE).await;
            }

            match self.search_one(&client, query).await {
                Ok(found) => {
                    info!(query = %query, count = found.len(), "Search completed");
                    hits.extend(found.into_iter().filter(|hit| seen.insert(hit.url.clone())));
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "Search query failed");
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        // Only a batch where every query failed is a failure
        if failures > 0 && failures == queries.len() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let diagnostic_url = queries
            .first()
            .map(|q| self.query_url(q))
            .unwrap_or_default();

        Ok(SearchResponse {
            hits,
            diagnostic_url,
        })
    }

    fn name(&self) -> &str {
        "duckduckgo"
    }
}

/// Extract hits from a DuckDuckGo HTML result page.
///
/// Each result block runs from its title link to the next one, so a result
/// without a snippet never borrows its neighbour's.
fn parse_results_html(html: &str, max_results: usize) -> Vec<SearchHit> {
    let titles: Vec<_> = DDG_TITLE.captures_iter(html).collect();

    let mut seen = HashSet::new();
    let mut hits = Vec::new();

    for (i, caps) in titles.iter().enumerate() {
        if hits.len() >= max_results {
            break;
        }

        let Some(url) = resolve_result_href(&caps[1]) else {
            continue;
        };
        if url.contains("duckduckgo.com") || !seen.insert(url.clone()) {
            continue;
        }

        let block_end = titles
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(html.len(), |m| m.start());
        let block = caps
            .get(0)
            .map_or("", |m| &html[m.end()..block_end]);
        let summary = DDG_SNIPPET
            .captures(block)
            .map(|snippet| clean_fragment(&snippet[1]))
            .unwrap_or_default();

        hits.push(SearchHit {
            site_name: extract_domain(&url).unwrap_or_default(),
            summary,
            title: clean_fragment(&caps[2]),
            url,
        });
    }

    hits
}

/// Result links are either direct or wrapped in a `uddg=` redirect.
fn resolve_result_href(href: &str) -> Option<String> {
    let href = decode_entities(href);
    if let Some(start) = href.find("uddg=") {
        let encoded = &href[start + 5..];
        let end = encoded.find('&').unwrap_or(encoded.len());
        let decoded = urlencoding::decode(&encoded[..end]).ok()?.into_owned();
        return decoded.starts_with("http").then_some(decoded);
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("https://{}", rest));
    }
    href.starts_with("http").then_some(href)
}

fn clean_fragment(fragment: &str) -> String {
    let text = HTML_TAG.replace_all(fragment, "");
    decode_entities(text.trim())
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
}

/// Extract the domain name from a URL.
fn extract_domain(url: &str) -> Option<String> {
    url.split("//")
        .nth(1)?
        .split('/')
        .next()
        .map(|s| s.to_string())
}

// =============================================================================
// JSON SEARCH SERVICE BACKEND
// =============================================================================
/// Request body for the JSON search service
#[derive(Debug, Serialize)]
struct SearchApiRequest<'a> {
    queries: &'a [String],
}

/// Response from the JSON search service
#[derive(Debug, Deserialize)]
struct SearchApiResponse {
    msg: String,
    #[serde(default)]
    debug_url: String,
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Search service that accepts a whole query batch in one POST.
pub struct HttpSearchApi {
    endpoint: String,
    client: Client,
}

impl HttpSearchApi {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: endpoint.into(),
            client: http_client()?,
        })
    }
}

#[async_trait]
impl SearchProvider for HttpSearchApi {
    async fn search(&self, queries: &[String]) -> Result<SearchResponse, SearchError> {
        debug!(endpoint = %self.endpoint, count = queries.len(), "Calling search service");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&SearchApiRequest { queries })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Http(status.as_u16(), body));
        }

        let body: SearchApiResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Parse(e.to_string()))?;

        if body.msg != "success" {
            return Err(SearchError::Rejected(body.msg));
        }

        info!(count = body.results.len(), debug_url = %body.debug_url, "Search service answered");

        Ok(SearchResponse {
            hits: body.results,
            diagnostic_url: body.debug_url,
        })
    }

    fn name(&self) -> &str {
        "search-api"
    }
}
