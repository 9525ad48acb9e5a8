use crate::builtin::EpubWriter;
use crate::config::PackagingConfig;
use crate::engine::{EpubRenderer, RenderRequest};
use crate::error::Pdf2EpubError;
use crate::output::{PackagingResult, StageStatus};
use crate::progress::ReporterScope;
use crate::workspace::{absolute, ensure_dir, PackageInputs};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stage 3: package Stage 2's output into `epub_path`.
///
/// `meta.json` and `chapters/` are required. A missing `index.json` is only
/// a warning; the book is then written without a navigable table of
/// contents. The destination's parent directories are created as needed and
/// an existing file at `epub_path` is replaced.
///
/// # Errors
/// - [`Pdf2EpubError::MissingInput`] if a required input is absent.
/// - Any error raised by the renderer, unchanged.
/// - [`Pdf2EpubError::OutputMissing`] if the renderer returned `Ok` but no
///   file exists at `epub_path`, including when an older file was there
///   before the run.
pub async fn package(
    analysis_dir: impl AsRef<Path>,
    epub_path: impl AsRef<Path>,
    config: &PackagingConfig,
) -> Result<PackagingResult, Pdf2EpubError> {
    let inputs = PackageInputs::new(absolute(analysis_dir)?);
    let epub_path = absolute(epub_path)?;

    inputs.check_required()?;

    let has_index = inputs.has_index();
    if !has_index {
        warn!(
            "{} not found; the EPUB will have no table of contents",
            inputs.index.display()
        );
    }

    if let Some(parent) = epub_path.parent() {
        ensure_dir(parent)?;
    }
    // A leftover book from an earlier run must not pass the output check.
    if epub_path.is_file() {
        debug!("Removing previous output: {}", epub_path.display());
        std::fs::remove_file(&epub_path).map_err(|e| Pdf2EpubError::io(&epub_path, e))?;
    }

    let renderer = resolve_renderer(config);
    debug!(
        "Renderer: {} (language={}, tables={:?}, formulas={:?})",
        renderer.name(),
        config.language,
        config.table_render,
        config.latex_render
    );

    let request = RenderRequest {
        from_dir: inputs.root.clone(),
        epub_path: epub_path.clone(),
        language: config.language.clone(),
        table_render: config.table_render,
        latex_render: config.latex_render,
        has_index,
    };

    info!("Starting EPUB generation: {}", epub_path.display());
    {
        let scope = ReporterScope::new(config.progress.clone());
        renderer.render(&request, scope.reporter()).await?;
    }

    if !epub_path.is_file() {
        return Err(Pdf2EpubError::OutputMissing { path: epub_path });
    }
    let file_size = std::fs::metadata(&epub_path)
        .map_err(|e| Pdf2EpubError::io(&epub_path, e))?
        .len();

    info!(
        "EPUB saved in {} ({:.2} MB)",
        epub_path.display(),
        file_size as f64 / 1024.0 / 1024.0
    );

    Ok(PackagingResult {
        epub_path,
        file_size,
        has_index,
        status: StageStatus::Completed,
    })
}

fn resolve_renderer(config: &PackagingConfig) -> Arc<dyn EpubRenderer> {
    match &config.renderer {
        Some(r) => Arc::clone(r),
        None => Arc::new(EpubWriter::new()),
    }
}
