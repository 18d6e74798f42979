//! Success classification of a finished turn.

use regex::{Regex, RegexBuilder};

use crate::orchestration::sync::SyncOutcome;
use crate::qlog_warn;

/// Verdict on one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    Accepted,
    Rejected(String),
}

impl Assessment {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Assessment::Accepted)
    }
}

/// Decides whether a completed turn counts as task success.
pub trait ResponseValidator: Send + Sync {
    fn assess(&self, outcome: &SyncOutcome) -> Assessment;
}

const FAILURE_PHRASES: &[&str] = &[
    "failed to",
    "unable to",
    "could not",
    "couldn't",
    "cannot proceed",
    "blocked by",
    "i can't",
    "incomplete",
    "not complete",
    "not completed",
    "not done",
    "not finished",
    "abandoned",
    "gave up",
    "unsuccessful",
];

const SUCCESS_PHRASES: &[&str] = &[
    "completed",
    "complete",
    "implemented",
    "successfully",
    "files changed",
    "file changed",
    "all tests pass",
    "done",
];

/// A vocabulary entry matched as whole words, case-insensitively.
#[derive(Debug, Clone)]
struct Phrase {
    text: String,
    pattern: Regex,
}

impl Phrase {
    /// Word boundaries are only required where the phrase starts or ends
    /// with a word character, so entries like "✅" still match.
    fn compile(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
        let mut source = regex::escape(text);
        if is_word(text.chars().next()) {
            source.insert_str(0, r"\b");
        }
        if is_word(text.chars().last()) {
            source.push_str(r"\b");
        }
        match RegexBuilder::new(&source).case_insensitive(true).build() {
            Ok(pattern) => Some(Self {
                text: text.to_lowercase(),
                pattern,
            }),
            Err(e) => {
                qlog_warn!("Ignoring validator phrase '{}': {}", text, e);
                None
            }
        }
    }

    fn found_in(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

fn compile_all<S: AsRef<str>>(phrases: &[S]) -> Vec<Phrase> {
    phrases
        .iter()
        .filter_map(|p| Phrase::compile(p.as_ref()))
        .collect()
}

/// Vocabulary and length based validator.
///
/// Rules, first match wins: too short rejects, failure vocabulary rejects,
/// success vocabulary accepts. Otherwise a marker-confirmed completion is
/// accepted and a forced one is rejected.
#[derive(Debug, Clone)]
pub struct KeywordValidator {
    min_chars: usize,
    failure: Vec<Phrase>,
    success: Vec<Phrase>,
}

impl KeywordValidator {
    pub fn new(min_chars: usize) -> Self {
        Self {
            min_chars,
            failure: compile_all(FAILURE_PHRASES),
            success: compile_all(SUCCESS_PHRASES),
        }
    }

    pub fn with_vocabulary(mut self, failure: Vec<String>, success: Vec<String>) -> Self {
        self.failure = compile_all(&failure);
        self.success = compile_all(&success);
        self
    }
}

impl Default for KeywordValidator {
    fn default() -> Self {
        Self::new(40)
    }
}

impl ResponseValidator for KeywordValidator {
    fn assess(&self, outcome: &SyncOutcome) -> Assessment {
        let text = outcome.text.trim();
        let len = text.chars().count();
        if len < self.min_chars {
            return Assessment::Rejected(format!(
                "response too short ({} < {} chars)",
                len, self.min_chars
            ));
        }

        if let Some(phrase) = self.failure.iter().find(|p| p.found_in(text)) {
            return Assessment::Rejected(format!("response reports failure (\"{}\")", phrase.text));
        }
        if self.success.iter().any(|p| p.found_in(text)) {
            return Assessment::Accepted;
        }
        if outcome.is_marked_complete() {
            Assessment::Accepted
        } else {
            Assessment::Rejected("forced completion without success wording".to_string())
        }
    }
}
