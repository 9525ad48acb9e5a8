//! Progress-reporting contract shared by the stages and their engines.
//!
//! A stage hands an [`Arc<dyn ProgressReporter>`] to its engine. The engine
//! announces each named phase with [`ProgressReporter::on_step`] and advances
//! inside the phase with [`ProgressReporter::on_progress`]. The stage wraps
//! the reporter in a [`ReporterScope`] so [`ProgressReporter::finish`] runs
//! exactly once, whether the engine returned `Ok` or an error.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2epub::{ProgressReporter, Step};
//! use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
//!
//! struct LastCount(AtomicU64);
//!
//! impl ProgressReporter for LastCount {
//!     fn on_progress(&self, completed: u64, _total: Option<u64>) {
//!         self.0.store(completed, Ordering::SeqCst);
//!     }
//! }
//!
//! let reporter = Arc::new(LastCount(AtomicU64::new(0)));
//! reporter.on_step(Step::RecognisePages);
//! reporter.on_progress(3, Some(10));
//! assert_eq!(reporter.0.load(Ordering::SeqCst), 3);
//! ```

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Named phase announced by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    RecognisePages,
    ExtractSequence,
    CorrectText,
    CorrectFootnote,
    ExtractMeta,
    CollectContents,
    MappingContents,
    GenerateFootnotes,
    Output,
    RenderEpub,
}

impl Step {
    /// Human-readable label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            Step::RecognisePages => "Recognising pages",
            Step::ExtractSequence => "Extracting text sequence",
            Step::CorrectText => "Correcting text",
            Step::CorrectFootnote => "Correcting footnotes",
            Step::ExtractMeta => "Extracting metadata",
            Step::CollectContents => "Collecting table of contents",
            Step::MappingContents => "Mapping contents to chapters",
            Step::GenerateFootnotes => "Attaching footnotes",
            Step::Output => "Writing output",
            Step::RenderEpub => "Rendering EPUB",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Receives phase changes and progress ticks from an engine.
///
/// Implementations must be `Send + Sync`: engines may report from worker
/// tasks. All methods default to no-ops so callers only override what they
/// need.
pub trait ProgressReporter: Send + Sync {
    /// A new phase starts. Display state from the previous phase is stale.
    fn on_step(&self, step: Step) {
        let _ = step;
    }

    /// Progress inside the current phase.
    ///
    /// `completed` never decreases within a phase. `total` may be `None`
    /// until the engine discovers it.
    fn on_progress(&self, completed: u64, total: Option<u64>) {
        let _ = (completed, total);
    }

    /// The owning stage is done, successfully or not. Release any display.
    fn finish(&self) {}
}

/// Reporter that ignores every event. Used when no reporter is configured.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {}

/// Type stored in the stage configs.
pub type ProgressCallback = Arc<dyn ProgressReporter>;

/// How a display turns `on_progress` calls into a shown position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Show exactly `completed` on every call.
    #[default]
    Absolute,
    /// Advance by the delta since the last seen `completed`.
    Incremental,
}

/// Per-phase display state.
///
/// Owned by the display and reset on every step change, so a delta is never
/// computed against a count from the previous phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseCounter {
    total: Option<u64>,
    shown: u64,
    last_seen: u64,
}

impl PhaseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything about the previous phase.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }

    /// Fold one progress event into the state and return the position to
    /// display. The position never exceeds a known total.
    pub fn apply(&mut self, policy: UpdatePolicy, completed: u64, total: Option<u64>) -> u64 {
        if total.is_some() {
            self.total = total;
        }
        match policy {
            UpdatePolicy::Absolute => {
                self.shown = completed;
            }
            UpdatePolicy::Incremental => {
                let delta = completed.saturating_sub(self.last_seen);
                self.shown = self.shown.saturating_add(delta);
            }
        }
        self.last_seen = self.last_seen.max(completed);
        if let Some(t) = self.total {
            self.shown = self.shown.min(t);
        }
        self.shown
    }
}

/// Calls [`ProgressReporter::finish`] when dropped.
///
/// A stage creates one before delegating, so the display is released on the
/// success path, on `?` early returns and on panics that unwind.
pub struct ReporterScope {
    reporter: ProgressCallback,
}

impl ReporterScope {
    pub fn new(reporter: Option<ProgressCallback>) -> Self {
        Self {
            reporter: reporter.unwrap_or_else(|| Arc::new(NoopReporter)),
        }
    }

    /// Shared handle to pass down to an engine.
    pub fn reporter(&self) -> ProgressCallback {
        Arc::clone(&self.reporter)
    }
}

impl Drop for ReporterScope {
    fn drop(&mut self) {
        self.reporter.finish();
    }
}
