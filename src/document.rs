//! On-disk document model exchanged between the built-in engines.
//!
//! Every file is JSON written with [`write_json`]. Custom engines are free to
//! use other formats inside `ocr/` and `temp/`, but Stage 3's built-in writer
//! expects `meta.json`, `chapters/*.json` and `index.json` in these shapes.

use crate::error::Pdf2EpubError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One unit of page content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Text {
        text: String,
    },
    /// A figure; `asset` is a file name under `assets/`.
    Image {
        asset: String,
    },
    Table {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        html: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        asset: Option<String>,
    },
    Formula {
        latex: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        asset: Option<String>,
    },
}

impl Block {
    pub fn text(s: impl Into<String>) -> Self {
        Block::Text { text: s.into() }
    }

    /// Text content, if this is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Block::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Asset file referenced by this block, if any.
    pub fn asset(&self) -> Option<&str> {
        match self {
            Block::Image { asset } => Some(asset),
            Block::Table { asset, .. } | Block::Formula { asset, .. } => asset.as_deref(),
            Block::Text { .. } => None,
        }
    }
}

/// A recognised page, as written to `ocr/page_NNNN.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    /// 0-based page index.
    pub page_index: usize,
    pub width: f32,
    pub height: f32,
    pub blocks: Vec<Block>,
}

/// A block placed in reading order, tagged with its source page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub page_index: usize,
    pub block: Block,
}

/// Body paragraphs of one page after sequence extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencePage {
    pub page_index: usize,
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Footnote {
    pub page_index: usize,
    /// The mark as printed, e.g. `1` or `*`.
    pub mark: String,
    pub text: String,
}

/// Footnotes peeled off one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootnotePage {
    pub page_index: usize,
    pub footnotes: Vec<Footnote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: usize,
    #[serde(default)]
    pub title: Option<String>,
    pub paragraphs: Vec<Paragraph>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub footnotes: Vec<Footnote>,
}

/// Table of contents, written to `index.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contents {
    pub entries: Vec<TocEntry>,
}

impl Contents {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    pub title: String,
    /// Chapter id this entry points at, once mapped.
    #[serde(default)]
    pub chapter: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TocEntry>,
}

/// Book metadata, written to `meta.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookMeta {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub isbn: Option<String>,
    pub description: Option<String>,
}

// ── File helpers ─────────────────────────────────────────────────────────

pub fn page_file_name(page_index: usize) -> String {
    format!("page_{page_index:04}.json")
}

pub fn chapter_file_name(id: usize) -> String {
    format!("chapter_{id:04}.json")
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Pdf2EpubError> {
    let raw = std::fs::read(path).map_err(|e| Pdf2EpubError::io(path, e))?;
    serde_json::from_slice(&raw).map_err(|e| {
        Pdf2EpubError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })
}

/// Write `value` as pretty JSON. The file is replaced atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Pdf2EpubError> {
    let parent = path
        .parent()
        .ok_or_else(|| Pdf2EpubError::Internal(format!("no parent for {}", path.display())))?;
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| Pdf2EpubError::Internal(format!("serialise {}: {e}", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| Pdf2EpubError::io(parent, e))?;
    tmp.write_all(&json).map_err(|e| Pdf2EpubError::io(path, e))?;
    tmp.persist(path).map_err(|e| Pdf2EpubError::io(path, e.error))?;
    Ok(())
}

/// `*.json` files directly under `dir`, sorted by name.
pub fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>, Pdf2EpubError> {
    let entries = std::fs::read_dir(dir).map_err(|e| Pdf2EpubError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Pdf2EpubError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_json_shape() {
        let b = Block::Formula {
            latex: "E=mc^2".into(),
            asset: None,
        };
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["kind"], "formula");
        assert_eq!(json["latex"], "E=mc^2");
        assert!(json.get("asset").is_none());

        let parsed: Block = serde_json::from_str(r#"{"kind":"image","asset":"p1_0.png"}"#).unwrap();
        assert_eq!(parsed.asset(), Some("p1_0.png"));
    }

    #[test]
    fn meta_tolerates_missing_fields() {
        let m: BookMeta = serde_json::from_str(r#"{"title":"Book"}"#).unwrap();
        assert_eq!(m.title.as_deref(), Some("Book"));
        assert!(m.authors.is_empty());
    }

    #[test]
    fn write_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let page = SequencePage {
            page_index: 2,
            paragraphs: vec![Paragraph {
                page_index: 2,
                block: Block::text("hello"),
            }],
        };
        write_json(&dir.path().join(page_file_name(2)), &page).unwrap();
        write_json(&dir.path().join(page_file_name(0)), &page).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = list_json_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("page_0000.json"));
        let back: SequencePage = read_json(&files[1]).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn read_json_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[").unwrap();
        let err = read_json::<Contents>(&path).unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }
}
