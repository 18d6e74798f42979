//! Text markers read off the remote agent's transcript.
//!
//! The agent surface never says "done" explicitly. Instead we look for
//! heuristic markers in what it renders:
//! - **Completion**: a summary only shown after a turn ends (e.g. "3 files changed")
//! - **Generating**: text shown while tokens are still streaming ("Generating", "Thinking...")
//! - **Error**: a failure banner, found by selector only, so no text here
//!
//! ## Example
//!
//! ```
//! use queuepilot::config::MarkerConfig;
//! use queuepilot::remote::markers::{MarkerKind, MarkerSet};
//!
//! let markers = MarkerSet::from_config(&MarkerConfig::default()).unwrap();
//! assert!(markers.matches(MarkerKind::Completion, "Done. 3 files changed"));
//! assert!(markers.matches(MarkerKind::Generating, "Generating..."));
//! assert!(!markers.matches(MarkerKind::Error, "Something went wrong"));
//! ```

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::config::{MarkerConfig, MarkerRule};
use crate::{Error, Result};

/// Kinds of marker the synchronizer asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Completion,
    Generating,
    Error,
}

impl std::fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkerKind::Completion => write!(f, "completion"),
            MarkerKind::Generating => write!(f, "generating"),
            MarkerKind::Error => write!(f, "error"),
        }
    }
}

/// Compiled text patterns for the completion and generating markers.
#[derive(Debug, Clone)]
pub struct MarkerSet {
    completion: Vec<Regex>,
    generating: Vec<Regex>,
}

impl MarkerSet {
    pub fn from_config(config: &MarkerConfig) -> Result<Self> {
        Ok(Self {
            completion: compile(&config.completion)?,
            generating: compile(&config.generating)?,
        })
    }

    fn patterns(&self, kind: MarkerKind) -> &[Regex] {
        match kind {
            MarkerKind::Completion => &self.completion,
            MarkerKind::Generating => &self.generating,
            MarkerKind::Error => &[],
        }
    }

    /// Check whether `text` shows a marker of the given kind.
    pub fn matches(&self, kind: MarkerKind, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }
        self.patterns(kind).iter().any(|re| re.is_match(trimmed))
    }

    /// Extract the first matching line, for logging.
    pub fn matching_line<'a>(&self, kind: MarkerKind, text: &'a str) -> Option<&'a str> {
        text.lines()
            .rev()
            .map(str::trim)
            .find(|line| self.patterns(kind).iter().any(|re| re.is_match(line)))
    }
}

fn compile(rule: &MarkerRule) -> Result<Vec<Regex>> {
    rule.patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| Error::Validation(format!("invalid marker pattern '{}': {}", p, e)))
        })
        .collect()
}
