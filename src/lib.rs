//! # edgequake-pdf2epub
//!
//! Turn a PDF book into an EPUB in three resumable stages.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ Stage 1  extract   page data + assets         → <work>/ocr, <work>/assets
//!  │
//!  ├─ Stage 2  analyse   sequence → correction → meta → contents
//!  │                     → chapters → footnotes → output
//!  │                                                  → <final>/meta.json,
//!  │                                                    chapters/, index.json
//!  │
//!  └─ Stage 3  package   EPUB archive               → book.epub
//! ```
//!
//! Every stage reads only what the previous one wrote to disk, so a failed
//! run can be resumed from the last completed stage. Each stage delegates
//! the document work to an engine trait ([`PageExtractor`], [`Analyser`],
//! [`EpubRenderer`]); the [`builtin`] engines are used unless a config
//! carries its own.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2epub::{
//!     analyse, extract, package, AnalysisConfig, CorrectionMode, ExtractionConfig, LlmConfig,
//!     PackagingConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     extract("book.pdf", "work", "models", &ExtractionConfig::default()).await?;
//!
//!     let config = AnalysisConfig::builder()
//!         .llm(LlmConfig::from_env()?)
//!         .correction(CorrectionMode::Once)
//!         .threads(4)
//!         .build()?;
//!     analyse("work", "final", &config).await?;
//!
//!     let result = package("final", "book.epub", &PackagingConfig::default()).await?;
//!     eprintln!("{} ({:.2} MB)", result.epub_path.display(), result.size_mb());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the three stage binaries (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2epub = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod builtin;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod output;
pub mod progress;
pub mod stages;
pub mod workspace;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "cli")]
pub mod terminal;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    AnalysisConfig, AnalysisConfigBuilder, AnalysisEnv, CorrectionLevel, CorrectionMode, Device,
    ExtractionConfig, ExtractionConfigBuilder, LatexRender, LlmConfig, PackagingConfig,
    PackagingConfigBuilder, TableRender, WindowTokens,
};
pub use engine::{
    AnalysisContext, Analyser, ChapterOutput, EpubRenderer, ExtractRequest, OutputRequest,
    PageExtractor, RenderRequest, SequenceOutput,
};
pub use error::Pdf2EpubError;
pub use output::{AnalysisResult, ExtractionResult, PackagingResult, StageStatus};
pub use progress::{NoopReporter, ProgressCallback, ProgressReporter, Step, UpdatePolicy};
pub use stages::{analyse, analyse_from_env, extract, package};
