use crate::builtin::LlmAnalyser;
use crate::config::{AnalysisConfig, AnalysisEnv};
use crate::engine::{AnalysisContext, Analyser, ChapterOutput, OutputRequest};
use crate::error::Pdf2EpubError;
use crate::output::{AnalysisResult, StageStatus};
use crate::progress::ReporterScope;
use crate::workspace::{absolute, require_exists, AnalysisLayout};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Stage 2: turn Stage 1's output into `meta.json`, `chapters/` and an
/// optional `index.json` under `final_output_dir`.
///
/// The sub-steps always run in the same order. Correction is skipped when
/// [`crate::CorrectionMode::No`] is configured, and the footnote merge only
/// runs when sequence extraction reported a footnote sequence.
///
/// # Errors
/// - [`Pdf2EpubError::MissingInput`] if `ocr_output_dir/ocr` does not exist.
///   Nothing is created in that case.
/// - Any error raised by the analyser, unchanged. The progress display is
///   released before the error is returned.
pub async fn analyse(
    ocr_output_dir: impl AsRef<Path>,
    final_output_dir: impl AsRef<Path>,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, Pdf2EpubError> {
    let layout = AnalysisLayout::new(absolute(ocr_output_dir)?, absolute(final_output_dir)?);

    require_exists(&layout.input.ocr, "page data directory")?;

    layout.ensure()?;

    let analyser = resolve_analyser(config)?;
    debug!(
        "Analyser: {} (correction={}, window={}, threads={})",
        analyser.name(),
        config.correction,
        config.window_tokens,
        config.threads
    );

    info!("Starting analysis");
    info!("Page data: {}", layout.input.ocr.display());
    info!("Final output: {}", layout.root.display());

    let scope = ReporterScope::new(config.progress.clone());
    let ctx = AnalysisContext {
        reporter: scope.reporter(),
        threads: config.threads,
        window: config.window(),
    };

    // ── 1. Sequence extraction ───────────────────────────────────────────
    let mut sequence = analyser
        .extract_sequences(&ctx, &layout.sequence, &layout.input.ocr)
        .await?;

    // ── 2. Correction ────────────────────────────────────────────────────
    if let Some(level) = config.correction.level() {
        sequence = analyser
            .correct(&ctx, level, &layout.correction, &sequence)
            .await?;
    }

    // ── 3. Metadata ──────────────────────────────────────────────────────
    let meta_path = analyser
        .extract_meta(&ctx, &layout.meta, &sequence.text)
        .await?;

    // ── 4. Table of contents ─────────────────────────────────────────────
    let contents = analyser
        .extract_contents(&ctx, &layout.contents, &sequence.text)
        .await?;

    // ── 5. Chapters ──────────────────────────────────────────────────────
    let ChapterOutput {
        path: mut chapter_path,
        contents,
    } = analyser
        .generate_chapters(&ctx, contents, &sequence.text, &layout.chapter)
        .await?;

    // ── 6. Footnotes ─────────────────────────────────────────────────────
    let footnotes_merged = match &sequence.footnote {
        Some(footnote_path) => {
            chapter_path = analyser
                .generate_chapters_with_footnotes(
                    &ctx,
                    &chapter_path,
                    footnote_path,
                    &layout.reference,
                )
                .await?;
            true
        }
        None => false,
    };

    // ── 7. Output ────────────────────────────────────────────────────────
    let request = OutputRequest {
        contents,
        output_path: layout.root.clone(),
        meta_path: meta_path.clone(),
        chapter_path: chapter_path.clone(),
        assets_path: layout.input.assets.clone(),
    };
    analyser.output(&ctx, &request).await?;
    drop(scope);

    info!("Analysis results saved in {}", layout.root.display());

    Ok(AnalysisResult {
        output_path: layout.root,
        meta_path,
        chapter_path,
        sequence_path: sequence.text,
        footnotes_merged,
        status: StageStatus::Completed,
    })
}

/// Stage 2 driven entirely by `OCR_OUTPUT_DIR`, `FINAL_OUTPUT_DIR`,
/// `CORRECTION_MODE`, `WINDOW_TOKENS`, `THREADS` and `LLM_*`.
pub async fn analyse_from_env(env: &AnalysisEnv) -> Result<AnalysisResult, Pdf2EpubError> {
    analyse(&env.ocr_output_dir, &env.final_output_dir, &env.config).await
}

fn resolve_analyser(config: &AnalysisConfig) -> Result<Arc<dyn Analyser>, Pdf2EpubError> {
    match &config.analyser {
        Some(a) => Ok(Arc::clone(a)),
        None => Ok(Arc::new(LlmAnalyser::from_config(&config.llm)?)),
    }
}
