//! URL selection.
//!
//! The model never sees full URLs: each hit of a round is given a short
//! `url_<n>` token, the model answers with tokens, and [`UrlIndex`] maps them
//! back. Selection can narrow the fetch set but never empty it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::CompletionError;
use crate::llm::{CompletionProvider, DEFAULT_TEMPERATURE};
use crate::parser::parse_url_tokens;
use crate::prompts::{SelectUrls, HIT_DELIMITER};
use crate::search::SearchHit;

/// Token for the hit at zero-based `position`.
fn token_for(position: usize) -> String {
    format!("url_{}", position + 1)
}

/// One round's mapping from `url_<n>` tokens to hit URLs.
///
/// Tokens are 1-based and follow hit order. Every round builds a fresh index.
#[derive(Debug, Clone)]
pub struct UrlIndex<'a> {
    hits: &'a [SearchHit],
    by_token: HashMap<String, usize>,
}

impl<'a> UrlIndex<'a> {
    pub fn new(hits: &'a [SearchHit]) -> Self {
        let by_token = (0..hits.len()).map(|i| (token_for(i), i)).collect();
        Self { hits, by_token }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// URL behind `token`, if the token belongs to this round.
    pub fn resolve(&self, token: &str) -> Option<&'a str> {
        self.by_token
            .get(token.trim())
            .map(|&i| self.hits[i].url.as_str())
    }

    /// Every hit URL in rank order.
    pub fn all_urls(&self) -> Vec<String> {
        self.hits.iter().map(|hit| hit.url.clone()).collect()
    }

    /// Human-readable listing of the hits for the selection prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, hit) in self.hits.iter().enumerate() {
            out.push_str(&format!(
                "Summary: {}\nTitle: {}\nLink: {}\n{}\n",
                hit.summary,
                hit.title,
                token_for(i),
                HIT_DELIMITER
            ));
        }
        out
    }
}

/// Asks the completion capability which search hits are worth fetching.
#[derive(Clone)]
pub struct UrlSelector {
    completion: Arc<dyn CompletionProvider>,
}

impl UrlSelector {
    pub fn new(completion: Arc<dyn CompletionProvider>) -> Self {
        Self { completion }
    }

    /// Pick URLs to fetch from `hits`.
    ///
    /// Unknown tokens are dropped. When nothing maps back to a hit, every hit
    /// URL is returned instead. Fails only when the completion call fails.
    pub async fn select(
        &self,
        topic: &str,
        summaries: &[String],
        hits: &[SearchHit],
    ) -> Result<Vec<String>, CompletionError> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let index = UrlIndex::new(hits);
        let rendered = index.render();
        let prompt = SelectUrls {
            topic,
            summaries,
            hits: &rendered,
        }
        .render();
        debug!(prompt = %prompt, "URL selection prompt");

        let response = self
            .completion
            .infer(&prompt, false, DEFAULT_TEMPERATURE)
            .await?;
        debug!(response = %response, "URL selection response");

        let tokens = parse_url_tokens(&response);
        let selected: Vec<String> = tokens
            .iter()
            .filter_map(|token| {
                let url = index.resolve(token);
                if url.is_none() {
                    debug!(token = %token, "Discarding unknown url token");
                }
                url.map(str::to_string)
            })
            .collect();

        if selected.is_empty() {
            warn!(
                hits = index.len(),
                tokens = tokens.len(),
                "No usable URL selection, fetching every hit"
            );
            return Ok(index.all_urls());
        }

        info!(selected = selected.len(), hits = index.len(), "Selected URLs");
        Ok(selected)
    }
}
