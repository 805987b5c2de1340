//! Per-document summarization.
//!
//! Builds the generation request from extracted text (or from file metadata
//! when no text is available), bounds both the input and the output, and
//! turns backend failures into a fixed placeholder so one bad file never
//! stops a batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::SummarizerConfig;
use crate::generation::{GenerationRequest, TextGenerator};

/// Summary stored when the generation backend fails or returns nothing.
pub const FAILED_SUMMARY_PLACEHOLDER: &str = "Summary unavailable: the document could not be summarized.";

const CONTENT_INSTRUCTIONS: &str = "You summarize documents for a personal knowledge base. \
Write a concise, factual summary of the document below in the document's own language. \
Cover the main topics, decisions, figures and names. Do not add a preamble.";

const METADATA_INSTRUCTIONS: &str = "The text of this document could not be read. \
Based only on the file details below, write one or two sentences describing what the \
document most likely is. Do not invent specific contents.";

/// Facts about a file, used for fallback prompts.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub filename: String,
    pub content_type: String,
    pub modified_time: DateTime<Utc>,
    pub size_bytes: Option<u64>,
}

impl FileMetadata {
    fn describe(&self) -> String {
        let mut out = format!(
            "Filename: {}\nContent type: {}\nLast modified: {}",
            self.filename,
            self.content_type,
            self.modified_time.to_rfc3339()
        );
        if let Some(size) = self.size_bytes {
            out.push_str(&format!("\nSize: {} bytes", size));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryOutcome {
    pub summary: String,
    /// True when generation failed and `summary` is the placeholder.
    pub failed: bool,
    /// True when the prompt was built from metadata rather than text.
    pub from_metadata: bool,
}

pub struct Summarizer {
    generator: Arc<dyn TextGenerator>,
    max_input_chars: usize,
    max_summary_chars: usize,
}

impl Summarizer {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &SummarizerConfig) -> Self {
        Self {
            generator,
            max_input_chars: config.max_input_chars,
            max_summary_chars: config.max_summary_chars,
        }
    }

    pub fn max_summary_chars(&self) -> usize {
        self.max_summary_chars
    }

    pub async fn summarize(&self, text: Option<&str>, meta: &FileMetadata) -> SummaryOutcome {
        let body = text.map(collapse_whitespace).filter(|t| !t.is_empty());
        let from_metadata = body.is_none();

        let request = match body {
            Some(body) => GenerationRequest {
                instructions: CONTENT_INSTRUCTIONS.to_string(),
                subject: meta.filename.clone(),
                content: truncate_chars(&body, self.max_input_chars).to_string(),
                max_output_chars: self.max_summary_chars,
            },
            None => GenerationRequest {
                instructions: METADATA_INSTRUCTIONS.to_string(),
                subject: meta.filename.clone(),
                content: meta.describe(),
                max_output_chars: self.max_summary_chars,
            },
        };

        match self.generator.generate(&request).await {
            Ok(out) => {
                let summary = truncate_chars(out.trim(), self.max_summary_chars)
                    .trim_end()
                    .to_string();
                if summary.is_empty() {
                    warn!(file = %meta.filename, "generator returned an empty summary");
                    return self.placeholder(from_metadata);
                }
                SummaryOutcome {
                    summary,
                    failed: false,
                    from_metadata,
                }
            }
            Err(e) => {
                warn!(file = %meta.filename, error = %e, "summarization failed");
                self.placeholder(from_metadata)
            }
        }
    }

    fn placeholder(&self, from_metadata: bool) -> SummaryOutcome {
        SummaryOutcome {
            summary: truncate_chars(FAILED_SUMMARY_PLACEHOLDER, self.max_summary_chars).to_string(),
            failed: true,
            from_metadata,
        }
    }
}

/// Deterministic prefix of at most `max` characters, cut on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
