//! Pieces shared by the three stage binaries: common flags, logging setup,
//! colour helpers and clap value enums.

use crate::config::{CorrectionMode, Device, LatexRender, TableRender};
use crate::progress::{ProgressCallback, UpdatePolicy};
use crate::terminal::TerminalReporter;
use serde::Serialize;
use std::io;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

pub fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
pub fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
pub fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
pub fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
pub fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Common flags ─────────────────────────────────────────────────────────────

/// Output and logging flags every stage binary accepts.
#[derive(clap::Args, Debug, Clone)]
pub struct CommonArgs {
    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2EPUB_VERBOSE")]
    pub verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2EPUB_QUIET")]
    pub quiet: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2EPUB_NO_PROGRESS")]
    pub no_progress: bool,

    /// Print the stage result as JSON on stdout.
    #[arg(long, env = "PDF2EPUB_JSON")]
    pub json: bool,

    /// How progress ticks move the bar.
    #[arg(long, env = "PDF2EPUB_PROGRESS_MODE", value_enum, default_value = "absolute")]
    pub progress_mode: ProgressModeArg,
}

impl CommonArgs {
    pub fn show_progress(&self) -> bool {
        !self.quiet && !self.no_progress && !self.json
    }

    /// Human-readable status lines go to stdout unless quiet or JSON.
    pub fn status_lines(&self) -> bool {
        !self.quiet && !self.json
    }

    /// Install the global tracing subscriber on stderr.
    ///
    /// INFO-level library logs are suppressed while the progress bar is
    /// active; `-v` always wins. `RUST_LOG` overrides both.
    pub fn init_logging(&self) {
        let filter = if self.verbose {
            "debug"
        } else if self.quiet || self.show_progress() {
            "error"
        } else {
            "info"
        };

        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
            )
            .with_writer(io::stderr)
            .init();
    }

    /// Terminal reporter when the bar is enabled.
    pub fn reporter(&self) -> Option<ProgressCallback> {
        if self.show_progress() {
            Some(TerminalReporter::new(self.progress_mode.into()) as ProgressCallback)
        } else {
            None
        }
    }

    /// Print the result: pretty JSON with `--json`, otherwise `lines`.
    pub fn print_result<T: Serialize>(
        &self,
        result: &T,
        lines: &[(&str, String)],
    ) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(result)?);
        } else if !self.quiet {
            println!("{} {}", green("✔"), bold("Completed"));
            for (label, value) in lines {
                println!("   {:<14} {}", dim(label), value);
            }
        }
        Ok(())
    }
}

/// Print `Error: …` with the full context chain on stderr.
pub fn report_error(err: &anyhow::Error) {
    eprintln!("{} {err:#}", red("Error:"));
}

// ── Value enums ──────────────────────────────────────────────────────────────

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum ProgressModeArg {
    Absolute,
    Incremental,
}

impl From<ProgressModeArg> for UpdatePolicy {
    fn from(v: ProgressModeArg) -> Self {
        match v {
            ProgressModeArg::Absolute => UpdatePolicy::Absolute,
            ProgressModeArg::Incremental => UpdatePolicy::Incremental,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum DeviceArg {
    Cpu,
    Cuda,
}

impl From<DeviceArg> for Device {
    fn from(v: DeviceArg) -> Self {
        match v {
            DeviceArg::Cpu => Device::Cpu,
            DeviceArg::Cuda => Device::Cuda,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum CorrectionArg {
    #[value(alias = "no")]
    None,
    Once,
    #[value(alias = "detailed")]
    Multiple,
}

impl From<CorrectionArg> for CorrectionMode {
    fn from(v: CorrectionArg) -> Self {
        match v {
            CorrectionArg::None => CorrectionMode::No,
            CorrectionArg::Once => CorrectionMode::Once,
            CorrectionArg::Multiple => CorrectionMode::Multiple,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum TableRenderArg {
    Html,
    Clipping,
}

impl From<TableRenderArg> for TableRender {
    fn from(v: TableRenderArg) -> Self {
        match v {
            TableRenderArg::Html => TableRender::Html,
            TableRenderArg::Clipping => TableRender::Clipping,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum LatexRenderArg {
    #[value(name = "mathml")]
    MathMl,
    Svg,
    Clipping,
}

impl From<LatexRenderArg> for LatexRender {
    fn from(v: LatexRenderArg) -> Self {
        match v {
            LatexRenderArg::MathMl => LatexRender::MathMl,
            LatexRenderArg::Svg => LatexRender::Svg,
            LatexRenderArg::Clipping => LatexRender::Clipping,
        }
    }
}
