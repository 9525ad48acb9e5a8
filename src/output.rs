//! Result records returned by the three stages.
//!
//! All of them serialise to the JSON printed by `--json`.

use serde::Serialize;
use std::path::PathBuf;

/// Terminal state of a stage. A stage that fails returns an error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
}

/// Stage 1 result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub ocr_path: PathBuf,
    pub assets_path: PathBuf,
    pub status: StageStatus,
}

/// Stage 2 result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub output_path: PathBuf,
    pub meta_path: PathBuf,
    /// Chapter directory handed to the output step.
    pub chapter_path: PathBuf,
    /// Text sequence the later sub-steps read.
    pub sequence_path: PathBuf,
    pub footnotes_merged: bool,
    pub status: StageStatus,
}

/// Stage 3 result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackagingResult {
    pub epub_path: PathBuf,
    /// Size in bytes.
    pub file_size: u64,
    pub has_index: bool,
    pub status: StageStatus,
}

impl PackagingResult {
    pub fn size_mb(&self) -> f64 {
        self.file_size as f64 / 1024.0 / 1024.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serialises_lowercase() {
        let r = ExtractionResult {
            ocr_path: "/w/ocr".into(),
            assets_path: "/w/assets".into(),
            status: StageStatus::Completed,
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["ocr_path"], "/w/ocr");
    }

    #[test]
    fn size_in_mb() {
        let r = PackagingResult {
            epub_path: "b.epub".into(),
            file_size: 3 * 1024 * 1024 / 2,
            has_index: false,
            status: StageStatus::Completed,
        };
        assert!((r.size_mb() - 1.5).abs() < 1e-9);
    }
}
