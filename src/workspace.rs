//! Directory convention shared by the three stages.
//!
//! ```text
//! <stage-1 output>/
//!   ocr/            one JSON file per recognised page
//!   assets/         images clipped from the pages
//!
//! <stage-2 output>/
//!   temp/
//!     sequence/     sequence extraction workspace (output/text, output/footnote)
//!     correction/   correction workspace
//!     meta/         metadata extraction workspace
//!     contents/     table-of-contents workspace
//!     chapter/      chapter generation workspace
//!     reference/    footnote merge workspace
//!   meta.json
//!   chapters/
//!   index.json      optional
//!   assets/
//! ```
//!
//! The names are the only contract between stages; nothing beyond existence
//! is validated here.

use crate::error::Pdf2EpubError;
use std::path::{Path, PathBuf};

pub const OCR_DIR: &str = "ocr";
pub const ASSETS_DIR: &str = "assets";
pub const TEMP_DIR: &str = "temp";
pub const SEQUENCE_DIR: &str = "sequence";
pub const CORRECTION_DIR: &str = "correction";
pub const META_DIR: &str = "meta";
pub const CONTENTS_DIR: &str = "contents";
pub const CHAPTER_DIR: &str = "chapter";
pub const REFERENCE_DIR: &str = "reference";
pub const META_FILE: &str = "meta.json";
pub const CHAPTERS_DIR: &str = "chapters";
pub const INDEX_FILE: &str = "index.json";

/// Resolve `path` against the current directory without touching the disk.
pub fn absolute(path: impl AsRef<Path>) -> Result<PathBuf, Pdf2EpubError> {
    let path = path.as_ref();
    std::path::absolute(path).map_err(|e| Pdf2EpubError::io(path, e))
}

/// Create `path` and its parents. Existing directories are fine.
pub fn ensure_dir(path: &Path) -> Result<(), Pdf2EpubError> {
    std::fs::create_dir_all(path).map_err(|e| Pdf2EpubError::io(path, e))
}

/// Fail with [`Pdf2EpubError::MissingInput`] unless `path` exists.
pub fn require_exists(path: &Path, what: &'static str) -> Result<(), Pdf2EpubError> {
    if path.exists() {
        Ok(())
    } else {
        Err(Pdf2EpubError::MissingInput {
            what,
            path: path.to_path_buf(),
        })
    }
}

/// Stage 1 output layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionLayout {
    pub root: PathBuf,
    pub ocr: PathBuf,
    pub assets: PathBuf,
}

impl ExtractionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            ocr: root.join(OCR_DIR),
            assets: root.join(ASSETS_DIR),
            root,
        }
    }

    pub fn ensure(&self) -> Result<(), Pdf2EpubError> {
        ensure_dir(&self.ocr)?;
        ensure_dir(&self.assets)
    }
}

/// Stage 2 layout: Stage 1's output on the input side, the temp workspace
/// and the final directory on the output side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisLayout {
    pub input: ExtractionLayout,
    pub root: PathBuf,
    pub temp: PathBuf,
    pub sequence: PathBuf,
    pub correction: PathBuf,
    pub meta: PathBuf,
    pub contents: PathBuf,
    pub chapter: PathBuf,
    pub reference: PathBuf,
}

impl AnalysisLayout {
    pub fn new(ocr_output_dir: impl Into<PathBuf>, final_output_dir: impl Into<PathBuf>) -> Self {
        let root = final_output_dir.into();
        let temp = root.join(TEMP_DIR);
        Self {
            input: ExtractionLayout::new(ocr_output_dir),
            sequence: temp.join(SEQUENCE_DIR),
            correction: temp.join(CORRECTION_DIR),
            meta: temp.join(META_DIR),
            contents: temp.join(CONTENTS_DIR),
            chapter: temp.join(CHAPTER_DIR),
            reference: temp.join(REFERENCE_DIR),
            temp,
            root,
        }
    }

    /// Create the temp workspace and the final directory.
    pub fn ensure(&self) -> Result<(), Pdf2EpubError> {
        for dir in [
            &self.temp,
            &self.sequence,
            &self.correction,
            &self.meta,
            &self.contents,
            &self.chapter,
            &self.reference,
            &self.root,
        ] {
            ensure_dir(dir)?;
        }
        Ok(())
    }
}

/// The files Stage 3 reads from Stage 2's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInputs {
    pub root: PathBuf,
    pub meta: PathBuf,
    pub chapters: PathBuf,
    pub index: PathBuf,
    pub assets: PathBuf,
}

impl PackageInputs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            meta: root.join(META_FILE),
            chapters: root.join(CHAPTERS_DIR),
            index: root.join(INDEX_FILE),
            assets: root.join(ASSETS_DIR),
            root,
        }
    }

    /// `meta.json` and `chapters/` must both exist.
    pub fn check_required(&self) -> Result<(), Pdf2EpubError> {
        require_exists(&self.meta, "metadata file")?;
        require_exists(&self.chapters, "chapters directory")
    }

    pub fn has_index(&self) -> bool {
        self.index.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_layout_names() {
        let l = ExtractionLayout::new("/w");
        assert_eq!(l.ocr, PathBuf::from("/w/ocr"));
        assert_eq!(l.assets, PathBuf::from("/w/assets"));
    }

    #[test]
    fn analysis_layout_names() {
        let l = AnalysisLayout::new("/in", "/out");
        assert_eq!(l.input.ocr, PathBuf::from("/in/ocr"));
        assert_eq!(l.temp, PathBuf::from("/out/temp"));
        assert_eq!(l.sequence, PathBuf::from("/out/temp/sequence"));
        assert_eq!(l.correction, PathBuf::from("/out/temp/correction"));
        assert_eq!(l.contents, PathBuf::from("/out/temp/contents"));
        assert_eq!(l.chapter, PathBuf::from("/out/temp/chapter"));
        assert_eq!(l.reference, PathBuf::from("/out/temp/reference"));
    }

    #[test]
    fn ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let l = AnalysisLayout::new(dir.path().join("in"), dir.path().join("out"));
        l.ensure().unwrap();
        l.ensure().unwrap();
        assert!(l.reference.is_dir());
        assert!(!l.input.ocr.exists());
    }

    #[test]
    fn package_inputs_check() {
        let dir = tempfile::tempdir().unwrap();
        let p = PackageInputs::new(dir.path());
        let err = p.check_required().unwrap_err();
        assert!(err.is_missing_input());
        assert!(err.to_string().contains("meta.json"));

        std::fs::write(&p.meta, "{}").unwrap();
        let err = p.check_required().unwrap_err();
        assert!(err.to_string().contains("chapters"));

        std::fs::create_dir(&p.chapters).unwrap();
        p.check_required().unwrap();
        assert!(!p.has_index());
        std::fs::write(&p.index, "{}").unwrap();
        assert!(p.has_index());
    }

    #[test]
    fn absolute_does_not_require_existence() {
        let p = absolute("definitely/not/here").unwrap();
        assert!(p.is_absolute());
        assert!(p.ends_with("definitely/not/here"));
    }
}
