use crate::builtin::PdfiumExtractor;
use crate::config::ExtractionConfig;
use crate::engine::{ExtractRequest, PageExtractor};
use crate::error::Pdf2EpubError;
use crate::output::{ExtractionResult, StageStatus};
use crate::progress::ReporterScope;
use crate::workspace::{absolute, require_exists, ExtractionLayout};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Stage 1: extract page data and assets from `pdf_path` into `output_dir`.
///
/// Writes `output_dir/ocr/` and `output_dir/assets/`. Running it twice on the
/// same output directory is fine; existing directories are reused.
///
/// # Errors
/// - [`Pdf2EpubError::MissingInput`] if the document or the model directory
///   does not exist. Nothing is created in that case.
/// - Any error raised by the extractor, unchanged.
pub async fn extract(
    pdf_path: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    model_dir: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionResult, Pdf2EpubError> {
    let pdf_path = absolute(pdf_path)?;
    let model_dir = absolute(model_dir)?;
    let layout = ExtractionLayout::new(absolute(output_dir)?);

    require_exists(&pdf_path, "source document")?;
    require_exists(&model_dir, "model directory")?;

    layout.ensure()?;

    let extractor = resolve_extractor(config);
    debug!("Extractor: {} on {}", extractor.name(), config.device);

    let request = ExtractRequest {
        pdf_path,
        model_dir,
        device: config.device,
        ocr_path: layout.ocr.clone(),
        assets_path: layout.assets.clone(),
    };

    info!("Starting extraction: {}", request.pdf_path.display());
    {
        let scope = ReporterScope::new(config.progress.clone());
        extractor.extract(&request, scope.reporter()).await?;
    }
    info!("Page data saved in {}", layout.ocr.display());
    info!("Assets saved in {}", layout.assets.display());

    Ok(ExtractionResult {
        ocr_path: layout.ocr,
        assets_path: layout.assets,
        status: StageStatus::Completed,
    })
}

fn resolve_extractor(config: &ExtractionConfig) -> Arc<dyn PageExtractor> {
    match &config.extractor {
        Some(e) => Arc::clone(e),
        None => Arc::new(PdfiumExtractor::new()),
    }
}
