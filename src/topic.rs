//! Research topic normalization.

use std::fmt;

use crate::error::ResearchError;

/// Characters that cannot appear in a snapshot file name.
const FILE_NAME_RESERVED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Maximum number of characters of the topic used in a snapshot file name.
const FILE_STEM_CHARS: usize = 30;

/// A validated, normalized research topic.
///
/// Surrounding whitespace is trimmed and path separators are replaced with
/// commas, so the topic can be embedded in prompts and file names safely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic(String);

impl Topic {
    pub fn new(raw: &str) -> Result<Self, ResearchError> {
        let normalized = raw.trim().replace(['/', '\\'], ",");
        if normalized.is_empty() {
            return Err(ResearchError::InvalidTopic);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-name-safe prefix of the topic.
    ///
    /// Truncates by character, not byte, so multi-byte topics never split.
    pub fn file_stem(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if FILE_NAME_RESERVED.contains(&c) || c.is_control() {
                    '_'
                } else {
                    c
                }
            })
            .take(FILE_STEM_CHARS)
            .collect()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
