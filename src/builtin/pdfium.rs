//! Built-in [`PageExtractor`] over pdfium's text layer.
//!
//! pdfium keeps thread-local state and must not run on async worker
//! threads, so the whole document is processed inside `spawn_blocking`.
//! Each page becomes one `ocr/page_NNNN.json` holding its paragraphs and
//! embedded images; images are saved as PNG under `assets/`.
//!
//! This engine reads born-digital PDFs. Scanned pages have no text layer
//! and come out as image-only pages; plug in a layout/OCR engine through
//! [`crate::ExtractionConfig`] for those.

use super::text::split_paragraphs;
use crate::config::Device;
use crate::document::{page_file_name, write_json, Block, OcrPage};
use crate::engine::{ExtractRequest, PageExtractor};
use crate::error::Pdf2EpubError;
use crate::progress::{ProgressCallback, Step};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Environment variable naming a pdfium library file or its directory.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumExtractor;

impl PdfiumExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PageExtractor for PdfiumExtractor {
    fn name(&self) -> &str {
        "pdfium"
    }

    async fn extract(
        &self,
        request: &ExtractRequest,
        reporter: ProgressCallback,
    ) -> Result<(), Pdf2EpubError> {
        check_magic(&request.pdf_path)?;
        if request.device == Device::Cuda {
            warn!("The pdfium extractor runs on the CPU; ignoring device=cuda");
        }

        let request = request.clone();
        tokio::task::spawn_blocking(move || extract_blocking(&request, &reporter))
            .await
            .map_err(|e| Pdf2EpubError::Internal(format!("Extraction task panicked: {}", e)))?
    }
}

/// Reject files that do not start with `%PDF` before pdfium sees them.
fn check_magic(path: &Path) -> Result<(), Pdf2EpubError> {
    let mut file = std::fs::File::open(path).map_err(|e| Pdf2EpubError::io(path, e))?;
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
        return Err(Pdf2EpubError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("not a PDF file (starts with {:02x?})", magic),
        });
    }
    Ok(())
}

/// Bind pdfium from the model directory, then `PDFIUM_LIB_PATH`, then the
/// system library search path.
fn bind(model_dir: &Path) -> Result<Pdfium, Pdf2EpubError> {
    let mut candidates = vec![Pdfium::pdfium_platform_library_name_at_path(model_dir)];
    if let Ok(configured) = std::env::var(PDFIUM_LIB_PATH_ENV) {
        let configured = Path::new(&configured);
        candidates.push(if configured.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(configured)
        } else {
            configured.to_path_buf()
        });
    }

    for candidate in candidates.iter().filter(|c| c.is_file()) {
        match Pdfium::bind_to_library(candidate) {
            Ok(bindings) => {
                debug!("pdfium bound from {}", candidate.display());
                return Ok(Pdfium::new(bindings));
            }
            Err(e) => warn!("Could not bind pdfium at {}: {:?}", candidate.display(), e),
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| {
            Pdf2EpubError::PdfiumBindingFailed(format!(
                "{:?} (set {} or place the library in the model directory)",
                e, PDFIUM_LIB_PATH_ENV
            ))
        })
}

fn extract_blocking(
    request: &ExtractRequest,
    reporter: &ProgressCallback,
) -> Result<(), Pdf2EpubError> {
    let pdfium = bind(&request.model_dir)?;
    let document = pdfium
        .load_pdf_from_file(&request.pdf_path, None)
        .map_err(|e| Pdf2EpubError::CorruptPdf {
            path: request.pdf_path.clone(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total = pages.len() as u64;
    info!("PDF loaded: {} pages", total);

    reporter.on_step(Step::RecognisePages);
    reporter.on_progress(0, Some(total));

    for (index, page) in pages.iter().enumerate() {
        let failed = |detail: String| Pdf2EpubError::ExtractionFailed {
            page: index + 1,
            detail,
        };

        let text = page.text().map_err(|e| failed(format!("{:?}", e)))?;
        let mut blocks: Vec<Block> = split_paragraphs(&text.all())
            .into_iter()
            .map(Block::text)
            .collect();

        let mut images = 0usize;
        for object in page.objects().iter() {
            let Some(image_object) = object.as_image_object() else {
                continue;
            };
            let image = match image_object.get_raw_image() {
                Ok(image) => image,
                Err(e) => {
                    warn!("Page {}: skipping unreadable image: {:?}", index + 1, e);
                    continue;
                }
            };
            let asset = format!("page_{:04}_{}.png", index, images);
            let asset_path = request.assets_path.join(&asset);
            image
                .save_with_format(&asset_path, image::ImageFormat::Png)
                .map_err(|e| failed(format!("saving {}: {}", asset_path.display(), e)))?;
            blocks.push(Block::Image { asset });
            images += 1;
        }

        let page_data = OcrPage {
            page_index: index,
            width: page.width().value,
            height: page.height().value,
            blocks,
        };
        write_json(&request.ocr_path.join(page_file_name(index)), &page_data)?;
        debug!(
            "Page {}: {} blocks ({} images)",
            index + 1,
            page_data.blocks.len(),
            images
        );
        reporter.on_progress(index as u64 + 1, Some(total));
    }

    Ok(())
}
