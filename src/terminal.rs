//! Terminal progress display built on [indicatif].
//!
//! Each phase gets its own bar, created on the first progress event of the
//! phase and cleared on the next step change. [`ProgressReporter::finish`]
//! clears whatever is left and ignores progress until the next step, so one
//! reporter can be handed to several stages in turn.

use crate::progress::{PhaseCounter, ProgressReporter, Step, UpdatePolicy};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

#[derive(Default)]
struct Display {
    bar: Option<ProgressBar>,
    counter: PhaseCounter,
    step: Option<Step>,
    closed: bool,
}

/// indicatif-backed [`ProgressReporter`].
pub struct TerminalReporter {
    display: Mutex<Display>,
    policy: UpdatePolicy,
    hidden: bool,
    status_lines: bool,
}

impl TerminalReporter {
    /// Reporter that draws to stderr and prints one status line per phase.
    pub fn new(policy: UpdatePolicy) -> Arc<Self> {
        Arc::new(Self {
            display: Mutex::new(Display::default()),
            policy,
            hidden: false,
            status_lines: true,
        })
    }

    /// Reporter whose bars track state without drawing anything.
    pub fn hidden(policy: UpdatePolicy) -> Arc<Self> {
        Arc::new(Self {
            display: Mutex::new(Display::default()),
            policy,
            hidden: true,
            status_lines: false,
        })
    }

    /// Position and length of the current phase's bar, if one is open.
    pub fn position(&self) -> Option<(u64, Option<u64>)> {
        let display = self.lock();
        display.bar.as_ref().map(|b| (b.position(), b.length()))
    }

    /// The phase most recently announced.
    pub fn current_step(&self) -> Option<Step> {
        self.lock().step
    }

    /// True between [`ProgressReporter::finish`] and the next step.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, Display> {
        self.display.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn new_bar(&self, step: Option<Step>) -> ProgressBar {
        let target = if self.hidden {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };
        let bar = ProgressBar::with_draw_target(None, target);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {pos} done  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix(step.map(|s| s.label()).unwrap_or("Working"));
        if !self.hidden {
            bar.enable_steady_tick(Duration::from_millis(80));
        }
        bar
    }

    fn activate_bar(bar: &ProgressBar, total: u64) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len}  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_length(total);
        bar.set_style(style);
        bar.reset_eta();
    }
}

impl ProgressReporter for TerminalReporter {
    fn on_step(&self, step: Step) {
        let mut display = self.lock();
        display.closed = false;
        if let Some(bar) = display.bar.take() {
            bar.finish_and_clear();
        }
        display.counter.reset();
        display.step = Some(step);
        if self.status_lines {
            println!("{} {}", crate::cli::cyan("◆"), step.label());
        }
    }

    fn on_progress(&self, completed: u64, total: Option<u64>) {
        let mut display = self.lock();
        if display.closed {
            return;
        }
        let shown = display.counter.apply(self.policy, completed, total);
        let known = display.counter.total();
        let step = display.step;
        let bar = match display.bar.take() {
            Some(bar) => bar,
            None => self.new_bar(step),
        };
        if let Some(t) = known {
            if bar.length() != Some(t) {
                Self::activate_bar(&bar, t);
            }
        }
        bar.set_position(shown);
        display.bar = Some(bar);
    }

    fn finish(&self) {
        let mut display = self.lock();
        if display.closed {
            return;
        }
        display.closed = true;
        if let Some(bar) = display.bar.take() {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_is_created_lazily() {
        let r = TerminalReporter::hidden(UpdatePolicy::Absolute);
        r.on_step(Step::RecognisePages);
        assert!(r.position().is_none());
        r.on_progress(1, None);
        assert_eq!(r.position(), Some((1, None)));
    }

    #[test]
    fn unknown_total_becomes_known() {
        let r = TerminalReporter::hidden(UpdatePolicy::Absolute);
        r.on_step(Step::RecognisePages);
        r.on_progress(2, None);
        r.on_progress(3, Some(5));
        assert_eq!(r.position(), Some((3, Some(5))));
        r.on_progress(5, Some(5));
        assert_eq!(r.position(), Some((5, Some(5))));
    }

    #[test]
    fn step_change_drops_stale_bar() {
        let r = TerminalReporter::hidden(UpdatePolicy::Incremental);
        r.on_step(Step::CorrectText);
        r.on_progress(9, Some(9));
        r.on_step(Step::ExtractMeta);
        assert!(r.position().is_none());
        assert_eq!(r.current_step(), Some(Step::ExtractMeta));
        r.on_progress(1, Some(2));
        assert_eq!(r.position(), Some((1, Some(2))));
    }

    #[test]
    fn count_never_exceeds_total() {
        let r = TerminalReporter::hidden(UpdatePolicy::Incremental);
        r.on_step(Step::Output);
        r.on_progress(4, Some(3));
        assert_eq!(r.position(), Some((3, Some(3))));
    }

    #[test]
    fn finish_is_idempotent() {
        let r = TerminalReporter::hidden(UpdatePolicy::Absolute);
        r.on_step(Step::RenderEpub);
        r.on_progress(1, Some(2));
        r.finish();
        assert!(r.is_closed());
        assert!(r.position().is_none());
        r.finish();
        r.on_progress(2, Some(2));
        assert!(r.position().is_none());
    }

    #[test]
    fn next_stage_reopens_after_finish() {
        let r = TerminalReporter::hidden(UpdatePolicy::Absolute);
        r.on_step(Step::RecognisePages);
        r.on_progress(3, Some(3));
        r.finish();

        r.on_step(Step::ExtractSequence);
        assert!(!r.is_closed());
        assert_eq!(r.current_step(), Some(Step::ExtractSequence));
        r.on_progress(1, Some(4));
        assert_eq!(r.position(), Some((1, Some(4))));
        r.finish();
        assert!(r.is_closed());
        assert!(r.position().is_none());
    }
}
