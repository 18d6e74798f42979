//! Response synchronizer: decides when a submitted turn has finished.
//!
//! The remote surface has no explicit "done" signal. Each poll reads the
//! latest transcript, tracks whether it is still growing, and asks the
//! surface about markers in a fixed order:
//!
//! 1. completion marker: the turn is over, return immediately
//! 2. error marker: only honoured while no output has been seen yet
//! 3. generating marker: keep waiting, stability counter held at zero
//!
//! Completion is checked before generating because a rendering UI can keep
//! a stale "generating" indicator after the turn has ended. When no marker
//! ever shows up, the stability ceiling forces completion and the outcome
//! carries `forced = true`.
//!
//! When the surface reuses a conversation, the previous turn is still on
//! screen right after submit. The caller passes that text as the baseline:
//! reads equal to it count as "nothing yet", and completion markers are not
//! consulted until fresh text has appeared.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::remote::{MarkerKind, TranscriptSource};
use crate::util::sleep_or_cancel;
use crate::{qlog_debug, qlog_trace, qlog_warn, Error, Result};

/// States of one synchronized turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Nothing extractable from the transcript yet.
    AwaitingStart,
    /// Transcript grew on the last poll, or the agent says it is generating.
    Growing,
    /// Transcript unchanged since the last growth.
    Stable,
    Complete,
    /// The surface reported an error before producing any output.
    Error,
    /// The wall-clock cap elapsed first.
    Timeout,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::AwaitingStart => write!(f, "awaiting_start"),
            SyncState::Growing => write!(f, "growing"),
            SyncState::Stable => write!(f, "stable"),
            SyncState::Complete => write!(f, "complete"),
            SyncState::Error => write!(f, "error"),
            SyncState::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub poll_interval: Duration,
    /// Unchanged polls tolerated before completion is forced.
    pub stability_ceiling: u32,
    /// Hard cap on the whole wait.
    pub max_wait: Duration,
    /// Consecutive transcript read failures before giving up.
    pub max_read_errors: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            stability_ceiling: 10,
            max_wait: Duration::from_secs(1800),
            max_read_errors: 3,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            stability_ceiling: config.stability_ceiling,
            max_wait: config.task_timeout(),
            ..Default::default()
        }
    }
}

/// Result of waiting on one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Final transcript text. Empty on `Error`.
    pub text: String,
    /// Terminal state reached.
    pub state: SyncState,
    /// Completion came from the stability ceiling, not a marker.
    pub forced: bool,
    pub polls: u32,
    pub elapsed: Duration,
}

impl SyncOutcome {
    /// Completed through a real completion marker.
    pub fn is_marked_complete(&self) -> bool {
        self.state == SyncState::Complete && !self.forced
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Complete,
    Fail,
    KeepWaiting,
}

/// When a marker check is consulted, relative to the turn's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Always,
    /// Only while no fresh transcript text has been observed.
    BeforeOutput,
    /// Not while the transcript still shows the pre-submit baseline.
    AfterBaseline,
}

struct MarkerCheck {
    kind: MarkerKind,
    verdict: Verdict,
    gate: Gate,
}

/// Marker checks in priority order; the first visible marker decides.
const MARKER_CHECKS: [MarkerCheck; 3] = [
    MarkerCheck {
        kind: MarkerKind::Completion,
        verdict: Verdict::Complete,
        gate: Gate::AfterBaseline,
    },
    MarkerCheck {
        kind: MarkerKind::Error,
        verdict: Verdict::Fail,
        gate: Gate::BeforeOutput,
    },
    MarkerCheck {
        kind: MarkerKind::Generating,
        verdict: Verdict::KeepWaiting,
        gate: Gate::Always,
    },
];

/// Growth tracking over successive reads. Lives for one turn only.
#[derive(Debug, Default)]
struct Transcript {
    /// What the surface showed before submit, if anything.
    baseline: Option<String>,
    text: String,
    recorded_len: usize,
    /// Fresh (non-baseline) text has been read at least once.
    observed: bool,
    stable_polls: u32,
}

impl Transcript {
    fn with_baseline(baseline: Option<&str>) -> Self {
        Self {
            baseline: baseline
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string),
            ..Default::default()
        }
    }

    /// The surface may still be showing the previous turn.
    fn on_baseline(&self) -> bool {
        self.baseline.is_some() && !self.observed
    }

    /// Fold one read into the tracker and return the resulting state.
    fn observe(&mut self, latest: Option<String>) -> SyncState {
        let latest = latest
            .filter(|t| !t.trim().is_empty())
            .filter(|t| !(self.on_baseline() && self.baseline.as_deref() == Some(t.trim())));
        let Some(text) = latest else {
            self.stable_polls += 1;
            return self.resting_state();
        };

        let len = text.chars().count();
        self.observed = true;
        self.text = text;
        if len > self.recorded_len {
            self.recorded_len = len;
            self.stable_polls = 0;
            SyncState::Growing
        } else {
            self.stable_polls += 1;
            SyncState::Stable
        }
    }

    /// Agent reports it is still generating: stability starts over.
    fn hold(&mut self) {
        self.stable_polls = 0;
    }

    fn resting_state(&self) -> SyncState {
        if self.observed {
            SyncState::Stable
        } else {
            SyncState::AwaitingStart
        }
    }
}

pub struct ResponseSynchronizer {
    options: SyncOptions,
}

impl ResponseSynchronizer {
    pub fn new(options: SyncOptions) -> Self {
        Self { options }
    }

    /// Poll `source` until the current turn reaches a terminal state.
    ///
    /// `baseline` is the transcript as read just before the instruction was
    /// submitted. `Timeout` and `Error` are reported as outcome states, not
    /// as `Err`. `Err` is returned only on cancellation or when reads keep
    /// failing.
    pub async fn wait_for_completion<S>(
        &self,
        source: &S,
        baseline: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome>
    where
        S: TranscriptSource + ?Sized,
    {
        let start = Instant::now();
        let mut transcript = Transcript::with_baseline(baseline);
        let mut state = SyncState::AwaitingStart;
        let mut read_errors = 0u32;
        let mut polls = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if start.elapsed() >= self.options.max_wait {
                qlog_warn!(
                    "[sync] no terminal state after {:?} ({} polls, last state {})",
                    self.options.max_wait,
                    polls,
                    state
                );
                return Ok(self.finish(transcript.text, SyncState::Timeout, false, polls, start));
            }

            polls += 1;
            match source.read_latest().await {
                Ok(latest) => {
                    read_errors = 0;
                    let next = transcript.observe(latest);
                    if next != state {
                        qlog_trace!("[sync] {} -> {} (poll {})", state, next, polls);
                    }
                    state = next;
                }
                Err(e) => {
                    read_errors += 1;
                    qlog_warn!(
                        "[sync] transcript read failed ({}/{}): {}",
                        read_errors,
                        self.options.max_read_errors,
                        e
                    );
                    if read_errors >= self.options.max_read_errors {
                        return Err(e);
                    }
                    sleep_or_cancel(self.options.poll_interval, cancel).await?;
                    continue;
                }
            }

            match self.check_markers(source, &transcript).await {
                Some(Verdict::Complete) => {
                    qlog_debug!("[sync] completion marker after {} polls", polls);
                    return Ok(self.finish(transcript.text, SyncState::Complete, false, polls, start));
                }
                Some(Verdict::Fail) => {
                    qlog_warn!("[sync] error marker before any output");
                    return Ok(self.finish(String::new(), SyncState::Error, false, polls, start));
                }
                Some(Verdict::KeepWaiting) => {
                    transcript.hold();
                    state = SyncState::Growing;
                }
                None => {}
            }

            if transcript.stable_polls > self.options.stability_ceiling {
                qlog_debug!(
                    "[sync] forcing completion after {} unchanged polls",
                    transcript.stable_polls
                );
                return Ok(self.finish(transcript.text, SyncState::Complete, true, polls, start));
            }

            sleep_or_cancel(self.options.poll_interval, cancel).await?;
        }
    }

    /// Run the ordered marker checks. A failed marker query counts as not
    /// visible.
    async fn check_markers<S>(&self, source: &S, transcript: &Transcript) -> Option<Verdict>
    where
        S: TranscriptSource + ?Sized,
    {
        for check in &MARKER_CHECKS {
            let skip = match check.gate {
                Gate::Always => false,
                Gate::BeforeOutput => transcript.observed,
                Gate::AfterBaseline => transcript.on_baseline(),
            };
            if skip {
                continue;
            }
            match source.has_marker(check.kind).await {
                Ok(true) => return Some(check.verdict),
                Ok(false) => {}
                Err(e) => qlog_debug!("[sync] {} marker query failed: {}", check.kind, e),
            }
        }
        None
    }

    fn finish(
        &self,
        text: String,
        state: SyncState,
        forced: bool,
        polls: u32,
        start: Instant,
    ) -> SyncOutcome {
        SyncOutcome {
            text,
            state,
            forced,
            polls,
            elapsed: start.elapsed(),
        }
    }
}
