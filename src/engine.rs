//! Engine traits the stages delegate to.
//!
//! A stage never does document work itself. It prepares paths, calls one of
//! these traits and propagates whatever error comes back. The built-in
//! implementations live in [`crate::builtin`]; callers can inject their own
//! through the stage configs.

use crate::config::{CorrectionLevel, Device, LatexRender, TableRender, WindowTokens};
use crate::document::Contents;
use crate::error::Pdf2EpubError;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

// ── Stage 1 ──────────────────────────────────────────────────────────────

/// Paths and settings for one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub pdf_path: PathBuf,
    pub model_dir: PathBuf,
    pub device: Device,
    pub ocr_path: PathBuf,
    pub assets_path: PathBuf,
}

/// Turns a source document into page data under `ocr/` and assets under
/// `assets/`.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        request: &ExtractRequest,
        reporter: ProgressCallback,
    ) -> Result<(), Pdf2EpubError>;
}

// ── Stage 2 ──────────────────────────────────────────────────────────────

/// Settings shared by every analysis sub-step.
#[derive(Clone)]
pub struct AnalysisContext {
    pub reporter: ProgressCallback,
    /// Concurrency hint; scheduling is up to the analyser.
    pub threads: usize,
    pub window: WindowTokens,
}

/// Where the sequence step left its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceOutput {
    /// Body-text sequence.
    pub text: PathBuf,
    /// Footnote sequence, when the document has footnotes.
    pub footnote: Option<PathBuf>,
}

/// Result of chapter generation.
#[derive(Debug, Clone)]
pub struct ChapterOutput {
    pub path: PathBuf,
    /// Contents with entries mapped to chapter ids.
    pub contents: Option<Contents>,
}

/// Inputs of the final assembly step.
#[derive(Debug, Clone)]
pub struct OutputRequest {
    pub contents: Option<Contents>,
    pub output_path: PathBuf,
    pub meta_path: PathBuf,
    pub chapter_path: PathBuf,
    pub assets_path: PathBuf,
}

/// The seven analysis sub-steps. The stage calls them in a fixed order:
///
/// 1. [`extract_sequences`](Analyser::extract_sequences)
/// 2. [`correct`](Analyser::correct), only when correction is enabled
/// 3. [`extract_meta`](Analyser::extract_meta)
/// 4. [`extract_contents`](Analyser::extract_contents)
/// 5. [`generate_chapters`](Analyser::generate_chapters)
/// 6. [`generate_chapters_with_footnotes`](Analyser::generate_chapters_with_footnotes),
///    only when the sequence step produced footnotes
/// 7. [`output`](Analyser::output)
#[async_trait]
pub trait Analyser: Send + Sync {
    fn name(&self) -> &str;

    async fn extract_sequences(
        &self,
        ctx: &AnalysisContext,
        workspace: &Path,
        ocr_path: &Path,
    ) -> Result<SequenceOutput, Pdf2EpubError>;

    /// Returns the corrected sequence, stored under `workspace`.
    async fn correct(
        &self,
        ctx: &AnalysisContext,
        level: CorrectionLevel,
        workspace: &Path,
        sequence: &SequenceOutput,
    ) -> Result<SequenceOutput, Pdf2EpubError>;

    /// Returns the path of the extracted metadata file.
    async fn extract_meta(
        &self,
        ctx: &AnalysisContext,
        workspace: &Path,
        text_path: &Path,
    ) -> Result<PathBuf, Pdf2EpubError>;

    /// `None` when the document has no recognisable table of contents.
    async fn extract_contents(
        &self,
        ctx: &AnalysisContext,
        workspace: &Path,
        text_path: &Path,
    ) -> Result<Option<Contents>, Pdf2EpubError>;

    async fn generate_chapters(
        &self,
        ctx: &AnalysisContext,
        contents: Option<Contents>,
        text_path: &Path,
        workspace: &Path,
    ) -> Result<ChapterOutput, Pdf2EpubError>;

    /// Returns the directory of chapters with footnotes attached.
    async fn generate_chapters_with_footnotes(
        &self,
        ctx: &AnalysisContext,
        chapter_path: &Path,
        footnote_path: &Path,
        workspace: &Path,
    ) -> Result<PathBuf, Pdf2EpubError>;

    async fn output(
        &self,
        ctx: &AnalysisContext,
        request: &OutputRequest,
    ) -> Result<(), Pdf2EpubError>;
}

// ── Stage 3 ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub from_dir: PathBuf,
    pub epub_path: PathBuf,
    pub language: String,
    pub table_render: TableRender,
    pub latex_render: LatexRender,
    /// Whether `index.json` exists and should become the navigation map.
    pub has_index: bool,
}

/// Packages Stage 2's output into a single e-book file.
#[async_trait]
pub trait EpubRenderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(
        &self,
        request: &RenderRequest,
        reporter: ProgressCallback,
    ) -> Result<(), Pdf2EpubError>;
}
