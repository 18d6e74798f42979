use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::remote::MarkerKind;
use crate::{qlog_debug, qlog_warn, Error, Result};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9222";

/// Selectors for the remote agent surface.
///
/// Transcript selectors are tried in order, most specific first; the first
/// one yielding non-empty text wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Substring of the page URL that identifies the agent surface.
    pub page_url_hint: Option<String>,
    pub input: String,
    pub send_button: Option<String>,
    pub new_chat_button: Option<String>,
    pub stop_button: Option<String>,
    pub transcript: Vec<String>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            page_url_hint: None,
            input: "div[contenteditable='true'], textarea".to_string(),
            send_button: Some("button[aria-label*='Send'], .send-button".to_string()),
            new_chat_button: Some("[aria-label*='New Chat'], .new-chat-button".to_string()),
            stop_button: Some("[aria-label*='Stop'], .stop-button".to_string()),
            transcript: vec![
                ".chat-turn:last-child .assistant-message .markdown-body".to_string(),
                "[data-role='assistant']:last-of-type".to_string(),
                ".assistant-message".to_string(),
            ],
        }
    }
}

/// DOM selectors and text patterns that reveal one kind of marker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerRule {
    pub selectors: Vec<String>,
    /// Case-insensitive regular expressions matched against the transcript.
    pub patterns: Vec<String>,
}

/// Error banners are recognised by selector only.
///
/// By the time an error could be read from the transcript, output has
/// already appeared and errors are no longer consulted, so there are no
/// text patterns for this kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorRule {
    pub selectors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    pub completion: MarkerRule,
    pub generating: MarkerRule,
    pub error: ErrorRule,
}

impl MarkerConfig {
    /// DOM selectors for one marker kind.
    pub fn selectors(&self, kind: MarkerKind) -> &[String] {
        match kind {
            MarkerKind::Completion => &self.completion.selectors,
            MarkerKind::Generating => &self.generating.selectors,
            MarkerKind::Error => &self.error.selectors,
        }
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            completion: MarkerRule {
                selectors: vec![".files-changed".to_string()],
                patterns: vec![r"\b\d+\s+files?\s+changed\b".to_string()],
            },
            generating: MarkerRule {
                selectors: vec![".generating-indicator".to_string()],
                patterns: vec![
                    r"\bgenerating\b".to_string(),
                    r"\bthinking\.\.\.".to_string(),
                    r"\bin progress\b".to_string(),
                ],
            },
            error: ErrorRule {
                selectors: vec![".chat-error".to_string(), "[role='alert']".to_string()],
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// DevTools endpoint of the browser hosting the agent surface.
    pub endpoint: String,
    pub connect_attempts: u32,
    pub connect_backoff_secs: u64,
    pub poll_interval_ms: u64,
    /// Consecutive unchanged polls before completion is forced.
    pub stability_ceiling: u32,
    /// Wall-clock cap on waiting for one response.
    pub task_timeout_secs: u64,
    /// Consecutive rounds with no completion before the run stops.
    pub stall_ceiling: u32,
    pub inter_task_delay_secs: u64,
    pub min_response_chars: usize,
    pub recent_completions: usize,
    /// Start each task in a fresh conversation when the surface allows it.
    pub fresh_conversation: bool,
    pub docs_dir: Option<String>,
    pub progress_file: Option<String>,
    pub surface: SurfaceConfig,
    pub markers: MarkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_attempts: 3,
            connect_backoff_secs: 5,
            poll_interval_ms: 1500,
            stability_ceiling: 10,
            task_timeout_secs: 1800,
            stall_ceiling: 3,
            inter_task_delay_secs: 5,
            min_response_chars: 40,
            recent_completions: 5,
            fresh_conversation: true,
            docs_dir: None,
            progress_file: None,
            surface: SurfaceConfig::default(),
            markers: MarkerConfig::default(),
        }
    }
}

impl Config {
    pub fn app_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".queuepilot"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::app_dir()?.join("config.toml"))
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        qlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            qlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        qlog_debug!(
            "Config loaded: endpoint={}, stability_ceiling={}, stall_ceiling={}",
            config.endpoint,
            config.stability_ceiling,
            config.stall_ceiling
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Validation("poll_interval_ms must be > 0".to_string()));
        }
        if self.connect_attempts == 0 {
            return Err(Error::Validation("connect_attempts must be > 0".to_string()));
        }
        if self.surface.input.trim().is_empty() {
            return Err(Error::Validation("surface.input selector is empty".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_secs(self.connect_backoff_secs)
    }

    pub fn inter_task_delay(&self) -> Duration {
        Duration::from_secs(self.inter_task_delay_secs)
    }

    pub fn docs_dir(&self) -> Option<PathBuf> {
        self.docs_dir.as_deref().map(expand_tilde)
    }

    pub fn progress_file(&self) -> Option<PathBuf> {
        self.progress_file.as_deref().map(expand_tilde)
    }

}

/// Where the progress snapshot goes: `configured`, or `PROGRESS.md` beside
/// the ledger.
///
/// The snapshot never replaces the ledger itself. When both resolve to the
/// same file the snapshot moves to `<ledger stem>.progress.md`.
pub fn progress_path_for(configured: Option<&Path>, ledger: &Path) -> PathBuf {
    let dir = ledger
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let candidate = configured
        .map(Path::to_path_buf)
        .unwrap_or_else(|| dir.join("PROGRESS.md"));
    if !same_file(&candidate, ledger) {
        return candidate;
    }

    let stem = ledger
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ledger".to_string());
    let fallback = dir.join(format!("{}.progress.md", stem));
    qlog_warn!(
        "Progress snapshot {} is the ledger itself, writing {} instead",
        candidate.display(),
        fallback.display()
    );
    fallback
}

/// Compare two paths by the file they name, whether or not it exists yet.
fn same_file(a: &Path, b: &Path) -> bool {
    resolve(a) == resolve(b)
}

fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match (dir.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
