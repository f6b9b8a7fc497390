//! Prompt templates for the four model calls of a research run.
//!
//! Each prompt is a record with named fields rendered through `format!` named
//! arguments, so a field can never land in the wrong slot.

use chrono::Utc;

/// Delimiter line between rendered search hits in the selection prompt.
pub const HIT_DELIMITER: &str =
    "==============================================================";

/// Get the current date formatted for prompts
fn current_date() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Render accumulated snippets as a numbered block, or a placeholder line.
fn numbered(items: &[String]) -> String {
    if items.is_empty() {
        return "(none yet)".to_string();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("[{}] {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Asks for up to `count` new search queries.
#[derive(Debug, Clone, Copy)]
pub struct FormulateQueries<'a> {
    pub topic: &'a str,
    pub existing_queries: &'a [String],
    pub summaries: &'a [String],
    pub count: usize,
}

impl FormulateQueries<'_> {
    pub fn render(&self) -> String {
        format!(
            r#"You are planning web searches for a research task. Today's date is {date}.

## Research topic
{topic}

## Queries already searched
{existing}

## Information gathered so far
{summaries}

## Task
Propose at most {count} NEW search queries that would fill the gaps in the
information gathered so far. Do not repeat or paraphrase queries that were
already searched. If nothing is missing, return an empty list.

Answer with a JSON list of strings inside a fenced code block, for example:
```json
["first query", "second query"]
```"#,
            date = current_date(),
            topic = self.topic,
            existing = json_list(self.existing_queries),
            summaries = numbered(self.summaries),
            count = self.count,
        )
    }
}

/// Asks which search hits are worth fetching, referring to them by token.
#[derive(Debug, Clone, Copy)]
pub struct SelectUrls<'a> {
    pub topic: &'a str,
    pub summaries: &'a [String],
    /// Pre-rendered hits, already separated by [`HIT_DELIMITER`]
    pub hits: &'a str,
}

impl SelectUrls<'_> {
    pub fn render(&self) -> String {
        format!(
            r#"You are selecting which search results to read for a research task.

## Research topic
{topic}

## Information gathered so far
{summaries}

## Search results
{hits}

## Task
Pick the results whose pages are likely to contain information about the
topic that is not already covered above. Refer to each result by its link
token (for example url_3), never by its address.

Answer with a JSON list of link tokens only, for example:
["url_1", "url_4"]"#,
            topic = self.topic,
            summaries = numbered(self.summaries),
            hits = self.hits,
        )
    }
}

/// Asks whether the gathered information now answers the topic.
#[derive(Debug, Clone, Copy)]
pub struct EvaluateRound<'a> {
    pub topic: &'a str,
    pub summaries: &'a [String],
    pub new_contents: &'a [String],
}

impl EvaluateRound<'_> {
    pub fn render(&self) -> String {
        format!(
            r#"You are reviewing research progress.

## Research topic
{topic}

## Information gathered in earlier rounds
{summaries}

## Pages read in this round
{contents}

## Task
Decide whether all of the information above is now sufficient to answer the
research topic thoroughly.

Start your answer with a single word, yes or no, on its own line. Then write
"Summary:" followed by a short summary of what this round contributed."#,
            topic = self.topic,
            summaries = numbered(self.summaries),
            contents = numbered(self.new_contents),
        )
    }
}

/// Asks for the final synthesized answer.
#[derive(Debug, Clone, Copy)]
pub struct FinalSummary<'a> {
    pub topic: &'a str,
    pub summaries: &'a [String],
}

impl FinalSummary<'_> {
    pub fn render(&self) -> String {
        format!(
            r#"You are writing the final answer of a research task. Today's date is {date}.

## Research topic
{topic}

## Gathered information
{summaries}

## Task
Write a comprehensive, well-structured answer to the research topic using
only the gathered information. Use clear section headings and paragraphs.
Where sources disagree, say so. Do not describe the research process."#,
            date = current_date(),
            topic = self.topic,
            summaries = numbered(self.summaries),
        )
    }
}
