//! Question answering over the hosted library: assistant lifecycle, store
//! resolution, run execution (polled and streamed), and request coordination
//! with caching and in-flight deduplication.

pub mod assistant;
pub mod coordinator;
pub mod lang;
pub mod relay;
pub mod run;
pub mod stores;

use serde::{Deserialize, Serialize};

use crate::openai::ApiError;

pub use coordinator::Engine;
pub use lang::Lang;

/// A question put to the library.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Query {
    pub text: String,
    /// Restricts the search to one named library instead of the default one.
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub lang: Lang,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// A finished answer with its resolved source list.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Source>,
}

impl Answer {
    /// The source list as numbered reference lines for terminal display.
    pub fn render_sources(&self) -> String {
        render_sources(&self.sources)
    }
}

/// One cited source. `index` matches the `[n]` markers in the answer text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub index: usize,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

const EXCERPT_MAX_CHARS: usize = 159;

/// Renders sources as numbered reference lines, one per source, excerpts
/// flattened onto the line and clipped.
pub fn render_sources(sources: &[Source]) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    for source in sources {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(out, "[{}] {}", source.index, source.name);
        if let Some(excerpt) = source.excerpt.as_deref() {
            let excerpt = clip(excerpt, EXCERPT_MAX_CHARS);
            if !excerpt.is_empty() {
                let _ = write!(out, " - \"{excerpt}\"");
            }
        }
    }
    out
}

fn clip(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut clipped: String = flat.chars().take(max_chars).collect();
    clipped.push('…');
    clipped
}

/// Incremental events for a streamed answer, in delivery order: zero or more
/// `Delta`s, then `Sources`, `Final`, and `Done`, or a single `Error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerEvent {
    Delta { text: String },
    Sources { sources: Vec<Source> },
    Final { answer: Answer },
    Error { message: String },
    Done,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("assistant could not be prepared: {reason}")]
    Creation { reason: String },

    #[error("search run failed: {reason}")]
    RunFailed { reason: String },

    #[error("search timed out after {waited_secs}s")]
    Timeout { waited_secs: u64 },

    #[error("no library matches topic \"{topic}\"")]
    TopicNotFound { topic: String },

    #[error("the library for topic \"{topic}\" has no documents")]
    TopicEmpty { topic: String },

    #[error("could not reach the search service: {reason}")]
    Transport { reason: String },
}

impl EngineError {
    /// Fixed, reader-facing message for each failure class. Never includes
    /// upstream identifiers or raw error payloads.
    pub fn user_message(&self) -> String {
        match self {
            Self::Creation { .. } => {
                "The librarian is unavailable right now. Please try again in a moment.".to_string()
            }
            Self::RunFailed { .. } => {
                "The search could not be completed. Please try asking again.".to_string()
            }
            Self::Timeout { .. } => {
                "The search took too long and was stopped. A more specific question may help."
                    .to_string()
            }
            Self::TopicNotFound { topic } => {
                format!("No library matches \"{topic}\". Run `catena topics` to list available ones.")
            }
            Self::TopicEmpty { topic } => {
                format!("The \"{topic}\" library has no documents yet. Please pick another topic.")
            }
            Self::Transport { .. } => {
                "The search service could not be reached. Please check your connection and try again."
                    .to_string()
            }
        }
    }
}

impl From<ApiError> for EngineError {
    fn from(err: ApiError) -> Self {
        Self::Transport {
            reason: err.to_string(),
        }
    }
}
