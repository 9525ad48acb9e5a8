//! Error type for the edgequake-pdf2epub library.
//!
//! Every stage is all-or-nothing, so a single fatal error type is enough.
//! The variants fall into three groups that callers may want to tell apart:
//!
//! * **Missing input** ([`Pdf2EpubError::MissingInput`]): a required file or
//!   directory is absent before the stage starts. Nothing has been written.
//! * **Delegate failure**: any error raised by the extraction, analysis or
//!   rendering engine. Stages never catch or translate these; they reach the
//!   caller exactly as the engine produced them.
//! * **Silent failure** ([`Pdf2EpubError::OutputMissing`]): the renderer
//!   returned `Ok` but the declared output file is not on disk.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2epub library.
#[derive(Debug, Error)]
pub enum Pdf2EpubError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A required input file or directory does not exist.
    #[error("Required {what} not found: '{path}'")]
    MissingInput { what: &'static str, path: PathBuf },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The renderer reported success but wrote nothing at the destination.
    #[error("EPUB file was not produced: '{path}'\nThe renderer returned without error but the file is missing.")]
    OutputMissing { path: PathBuf },

    /// Could not create a directory or read/write a workspace file.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── PDF / extraction errors ───────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Place libpdfium in the model directory, set PDFIUM_LIB_PATH=/path/to/libpdfium,\n\
or install pdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    /// The extractor failed on a specific page.
    #[error("Extraction failed for page {page}: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The LLM endpoint returned an error after all retries.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The LLM answered, but not in a shape the analyser can use.
    #[error("Unusable LLM response during {step}: {detail}")]
    LlmResponseInvalid { step: &'static str, detail: String },

    // ── Packaging errors ──────────────────────────────────────────────────
    /// The EPUB writer failed while assembling the archive.
    #[error("Failed to write EPUB '{path}': {detail}")]
    EpubWriteFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation, config-file parsing or environment parsing failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2EpubError {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Pdf2EpubError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors raised before a stage did any work.
    pub fn is_missing_input(&self) -> bool {
        matches!(self, Pdf2EpubError::MissingInput { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_display() {
        let e = Pdf2EpubError::MissingInput {
            what: "metadata file",
            path: PathBuf::from("/tmp/out/meta.json"),
        };
        let msg = e.to_string();
        assert!(msg.contains("metadata file"), "got: {msg}");
        assert!(msg.contains("meta.json"), "got: {msg}");
        assert!(e.is_missing_input());
    }

    #[test]
    fn output_missing_is_distinct() {
        let e = Pdf2EpubError::OutputMissing {
            path: PathBuf::from("book.epub"),
        };
        assert!(!e.is_missing_input());
        assert!(e.to_string().contains("book.epub"));
    }

    #[test]
    fn io_keeps_source() {
        let e = Pdf2EpubError::io(
            "/nope",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(std::error::Error::source(&e).is_some());
        assert!(e.to_string().contains("/nope"));
    }

    #[test]
    fn llm_response_invalid_display() {
        let e = Pdf2EpubError::LlmResponseInvalid {
            step: "metadata extraction",
            detail: "empty reply".into(),
        };
        assert!(e.to_string().contains("metadata extraction"));
    }
}
