//! Built-in [`EpubRenderer`]: writes an EPUB 2 package with an optional NCX
//! navigation map.
//!
//! Archive layout:
//!
//! ```text
//! mimetype                       (first entry, stored)
//! META-INF/container.xml
//! OEBPS/content.opf
//! OEBPS/toc.ncx                  (only when index.json exists)
//! OEBPS/style.css
//! OEBPS/text/chapter_NNNN.xhtml
//! OEBPS/assets/...
//! ```
//!
//! The archive is assembled in a temporary file beside the destination and
//! moved into place only once complete.

use crate::config::{LatexRender, TableRender};
use crate::document::{list_json_files, read_json, BookMeta, Block, Chapter, Contents, TocEntry};
use crate::engine::{EpubRenderer, RenderRequest};
use crate::error::Pdf2EpubError;
use crate::progress::{ProgressCallback, Step};
use crate::workspace::{ASSETS_DIR, CHAPTERS_DIR, INDEX_FILE, META_FILE};
use async_trait::async_trait;
use quick_xml::escape::escape;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const STYLESHEET: &str = "\
body { margin: 0 5%; line-height: 1.6; }
h1 { text-align: center; margin: 1.5em 0; }
p { text-indent: 2em; margin: 0.4em 0; }
div.figure, div.table, div.formula { text-align: center; margin: 1em 0; }
div.figure img, div.table img, div.formula img { max-width: 100%; }
table { border-collapse: collapse; margin: 0 auto; }
td, th { border: 1px solid #888; padding: 0.2em 0.5em; }
div.footnotes { font-size: 0.85em; }
div.footnotes p { text-indent: 0; }
";

#[derive(Debug, Default, Clone, Copy)]
pub struct EpubWriter;

impl EpubWriter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EpubRenderer for EpubWriter {
    fn name(&self) -> &str {
        "epub2"
    }

    async fn render(
        &self,
        request: &RenderRequest,
        reporter: ProgressCallback,
    ) -> Result<(), Pdf2EpubError> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || write_epub(&request, &reporter))
            .await
            .map_err(|e| Pdf2EpubError::Internal(format!("EPUB task panicked: {}", e)))?
    }
}

/// An asset file and its path inside `assets/`, with `/` separators.
struct Asset {
    source: PathBuf,
    name: String,
}

fn write_epub(request: &RenderRequest, reporter: &ProgressCallback) -> Result<(), Pdf2EpubError> {
    reporter.on_step(Step::RenderEpub);

    let meta: BookMeta = read_json(&request.from_dir.join(META_FILE))?;
    let chapters: Vec<Chapter> = list_json_files(&request.from_dir.join(CHAPTERS_DIR))?
        .iter()
        .map(|f| read_json(f))
        .collect::<Result<_, _>>()?;
    let contents: Option<Contents> = if request.has_index {
        Some(read_json(&request.from_dir.join(INDEX_FILE))?)
    } else {
        None
    };
    let mut assets = Vec::new();
    let assets_dir = request.from_dir.join(ASSETS_DIR);
    if assets_dir.is_dir() {
        collect_assets(&assets_dir, "", &mut assets)?;
    }

    let total = (chapters.len() + assets.len() + 1) as u64;
    let mut done = 0u64;
    reporter.on_progress(0, Some(total));

    let failed = |detail: String| Pdf2EpubError::EpubWriteFailed {
        path: request.epub_path.clone(),
        detail,
    };

    let parent = request
        .epub_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| Pdf2EpubError::io(parent, e))?;

    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut add = |name: &str,
                       bytes: &[u8],
                       options: SimpleFileOptions|
         -> Result<(), Pdf2EpubError> {
            zip.start_file(name, options)
                .map_err(|e| failed(format!("{}: {}", name, e)))?;
            zip.write_all(bytes)
                .map_err(|e| failed(format!("{}: {}", name, e)))
        };

        add("mimetype", b"application/epub+zip", stored)?;
        add("META-INF/container.xml", container_xml().as_bytes(), deflated)?;

        let uid = format!("urn:uuid:{}", uuid::Uuid::new_v4());
        add(
            "OEBPS/content.opf",
            opf(&meta, &request.language, &uid, &chapters, &assets, contents.is_some()).as_bytes(),
            deflated,
        )?;
        if let Some(contents) = &contents {
            add("OEBPS/toc.ncx", ncx(&meta, &uid, contents).as_bytes(), deflated)?;
        }
        add("OEBPS/style.css", STYLESHEET.as_bytes(), deflated)?;

        for chapter in &chapters {
            let page = chapter_xhtml(
                chapter,
                &request.language,
                request.table_render,
                request.latex_render,
            );
            add(&format!("OEBPS/{}", chapter_href(chapter.id)), page.as_bytes(), deflated)?;
            done += 1;
            reporter.on_progress(done, Some(total));
        }

        for asset in &assets {
            let bytes =
                std::fs::read(&asset.source).map_err(|e| Pdf2EpubError::io(&asset.source, e))?;
            let options = if is_precompressed(&asset.name) {
                stored
            } else {
                deflated
            };
            add(&format!("OEBPS/assets/{}", asset.name), &bytes, options)?;
            done += 1;
            reporter.on_progress(done, Some(total));
        }

        zip.finish().map_err(|e| failed(e.to_string()))?;
    }

    tmp.persist(&request.epub_path)
        .map_err(|e| failed(e.error.to_string()))?;
    reporter.on_progress(total, Some(total));

    info!(
        "EPUB written: {} chapters, {} assets, navigation: {}",
        chapters.len(),
        assets.len(),
        contents.is_some()
    );
    Ok(())
}

fn collect_assets(dir: &Path, prefix: &str, out: &mut Vec<Asset>) -> Result<(), Pdf2EpubError> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| Pdf2EpubError::io(dir, e))?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        let name = format!("{}{}", prefix, entry.file_name().to_string_lossy());
        if path.is_dir() {
            collect_assets(&path, &format!("{}/", name), out)?;
        } else {
            out.push(Asset { source: path, name });
        }
    }
    Ok(())
}

fn chapter_href(id: usize) -> String {
    format!("text/chapter_{:04}.xhtml", id)
}

fn media_type(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn is_precompressed(name: &str) -> bool {
    matches!(
        media_type(name),
        "image/png" | "image/jpeg" | "image/gif" | "image/webp"
    )
}

// ── Package documents ────────────────────────────────────────────────────

fn container_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    .to_string()
}

fn book_title(meta: &BookMeta) -> &str {
    meta.title.as_deref().unwrap_or("Untitled")
}

fn opf(
    meta: &BookMeta,
    language: &str,
    uid: &str,
    chapters: &[Chapter],
    assets: &[Asset],
    with_ncx: bool,
) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"2.0\">\n",
    );

    xml.push_str(
        "  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\" xmlns:opf=\"http://www.idpf.org/2007/opf\">\n",
    );
    xml.push_str(&format!("    <dc:title>{}</dc:title>\n", escape(book_title(meta))));
    xml.push_str(&format!("    <dc:language>{}</dc:language>\n", escape(language)));
    xml.push_str(&format!("    <dc:identifier id=\"bookid\">{}</dc:identifier>\n", uid));
    for author in &meta.authors {
        xml.push_str(&format!(
            "    <dc:creator opf:role=\"aut\">{}</dc:creator>\n",
            escape(author.as_str())
        ));
    }
    if let Some(publisher) = &meta.publisher {
        xml.push_str(&format!("    <dc:publisher>{}</dc:publisher>\n", escape(publisher.as_str())));
    }
    if let Some(isbn) = &meta.isbn {
        xml.push_str(&format!(
            "    <dc:identifier opf:scheme=\"ISBN\">{}</dc:identifier>\n",
            escape(isbn.as_str())
        ));
    }
    if let Some(description) = &meta.description {
        xml.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            escape(description.as_str())
        ));
    }
    xml.push_str("  </metadata>\n");

    xml.push_str("  <manifest>\n");
    if with_ncx {
        xml.push_str(
            "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
        );
    }
    xml.push_str("    <item id=\"style\" href=\"style.css\" media-type=\"text/css\"/>\n");
    for chapter in chapters {
        xml.push_str(&format!(
            "    <item id=\"chapter_{:04}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            chapter.id,
            chapter_href(chapter.id)
        ));
    }
    for (i, asset) in assets.iter().enumerate() {
        xml.push_str(&format!(
            "    <item id=\"asset_{}\" href=\"assets/{}\" media-type=\"{}\"/>\n",
            i,
            escape(asset.name.as_str()),
            media_type(&asset.name)
        ));
    }
    xml.push_str("  </manifest>\n");

    if with_ncx {
        xml.push_str("  <spine toc=\"ncx\">\n");
    } else {
        xml.push_str("  <spine>\n");
    }
    for chapter in chapters {
        xml.push_str(&format!("    <itemref idref=\"chapter_{:04}\"/>\n", chapter.id));
    }
    xml.push_str("  </spine>\n</package>\n");
    xml
}

fn ncx(meta: &BookMeta, uid: &str, contents: &Contents) -> String {
    let mut nav = String::new();
    let mut play_order = 1u32;
    for entry in &contents.entries {
        nav_point(&mut nav, entry, &mut play_order, 2);
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
    <meta name="dtb:depth" content="{depth}"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle><text>{title}</text></docTitle>
  <navMap>
{nav}  </navMap>
</ncx>
"#,
        uid = uid,
        depth = depth(&contents.entries),
        title = escape(book_title(meta)),
        nav = nav,
    )
}

fn depth(entries: &[TocEntry]) -> usize {
    entries
        .iter()
        .map(|e| 1 + depth(&e.children))
        .max()
        .unwrap_or(0)
}

/// Entries without a chapter are skipped; their children move up a level.
fn nav_point(out: &mut String, entry: &TocEntry, play_order: &mut u32, indent: usize) {
    let Some(chapter) = entry.chapter else {
        for child in &entry.children {
            nav_point(out, child, play_order, indent);
        }
        return;
    };
    let pad = " ".repeat(indent * 2);
    out.push_str(&format!(
        "{pad}<navPoint id=\"navPoint-{po}\" playOrder=\"{po}\">\n\
         {pad}  <navLabel><text>{title}</text></navLabel>\n\
         {pad}  <content src=\"{src}\"/>\n",
        pad = pad,
        po = play_order,
        title = escape(entry.title.as_str()),
        src = chapter_href(chapter),
    ));
    *play_order += 1;
    for child in &entry.children {
        nav_point(out, child, play_order, indent + 1);
    }
    out.push_str(&format!("{pad}</navPoint>\n"));
}

// ── Chapter pages ────────────────────────────────────────────────────────

fn chapter_xhtml(
    chapter: &Chapter,
    language: &str,
    tables: TableRender,
    formulas: LatexRender,
) -> String {
    let title = chapter
        .title
        .clone()
        .unwrap_or_else(|| format!("Chapter {}", chapter.id + 1));
    let lang = escape(language);

    let mut body = String::new();
    if let Some(heading) = &chapter.title {
        body.push_str(&format!("<h1>{}</h1>\n", escape(heading.as_str())));
    }
    for paragraph in &chapter.paragraphs {
        body.push_str(&render_block(&paragraph.block, tables, formulas));
    }
    if !chapter.footnotes.is_empty() {
        body.push_str("<hr/>\n<div class=\"footnotes\">\n");
        for (i, note) in chapter.footnotes.iter().enumerate() {
            body.push_str(&format!(
                "<p id=\"fn-{}\"><sup>{}</sup> {}</p>\n",
                i + 1,
                escape(note.mark.as_str()),
                escape(note.text.as_str())
            ));
        }
        body.push_str("</div>\n");
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{lang}">
<head>
<title>{title}</title>
<link rel="stylesheet" type="text/css" href="../style.css"/>
</head>
<body>
{body}</body>
</html>
"#,
        lang = lang,
        title = escape(title.as_str()),
        body = body,
    )
}

fn image_div(class: &str, asset: &str) -> String {
    format!(
        "<div class=\"{}\"><img src=\"../assets/{}\" alt=\"\"/></div>\n",
        class,
        escape(asset)
    )
}

fn mathml(latex: &str) -> String {
    let latex = escape(latex);
    format!(
        "<div class=\"formula\"><math xmlns=\"http://www.w3.org/1998/Math/MathML\" display=\"block\">\
         <semantics><mtext>{latex}</mtext>\
         <annotation encoding=\"application/x-tex\">{latex}</annotation></semantics></math></div>\n"
    )
}

fn render_block(block: &Block, tables: TableRender, formulas: LatexRender) -> String {
    match block {
        Block::Text { text } => {
            let text = text.trim();
            if text.is_empty() {
                String::new()
            } else {
                format!("<p>{}</p>\n", escape(text))
            }
        }
        Block::Image { asset } => image_div("figure", asset),
        Block::Table { html, asset } => match (tables, html, asset) {
            (TableRender::Clipping, _, Some(asset)) | (TableRender::Html, None, Some(asset)) => {
                image_div("table", asset)
            }
            (_, Some(html), _) => format!("<div class=\"table\">{}</div>\n", html),
            (_, None, None) => {
                debug!("Skipping table block with neither markup nor image");
                String::new()
            }
        },
        Block::Formula { latex, asset } => match (formulas, asset) {
            (LatexRender::Svg | LatexRender::Clipping, Some(asset)) => image_div("formula", asset),
            _ => mathml(latex),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{write_json, Footnote, Paragraph};
    use crate::progress::NoopReporter;
    use std::io::Read;
    use std::sync::Arc;

    fn chapter(id: usize, title: Option<&str>, blocks: Vec<Block>) -> Chapter {
        Chapter {
            id,
            title: title.map(str::to_string),
            paragraphs: blocks
                .into_iter()
                .map(|block| Paragraph {
                    page_index: 0,
                    block,
                })
                .collect(),
            footnotes: Vec::new(),
        }
    }

    fn book_dir(with_index: bool) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_json(
            &root.join(META_FILE),
            &BookMeta {
                title: Some("Tom & Jerry".into()),
                authors: vec!["A. Author".into()],
                ..Default::default()
            },
        )
        .unwrap();
        std::fs::create_dir_all(root.join(CHAPTERS_DIR)).unwrap();
        let mut one = chapter(0, Some("One"), vec![Block::text("Hello <world>"), Block::Image {
            asset: "fig.png".into(),
        }]);
        one.footnotes.push(Footnote {
            page_index: 0,
            mark: "1".into(),
            text: "A note.".into(),
        });
        write_json(&root.join(CHAPTERS_DIR).join("chapter_0000.json"), &one).unwrap();
        write_json(
            &root.join(CHAPTERS_DIR).join("chapter_0001.json"),
            &chapter(1, Some("Two"), vec![Block::text("Bye")]),
        )
        .unwrap();
        std::fs::create_dir_all(root.join(ASSETS_DIR)).unwrap();
        std::fs::write(root.join(ASSETS_DIR).join("fig.png"), b"\x89PNG").unwrap();
        if with_index {
            write_json(
                &root.join(INDEX_FILE),
                &Contents {
                    entries: vec![TocEntry {
                        title: "One".into(),
                        chapter: Some(0),
                        children: vec![TocEntry {
                            title: "Two".into(),
                            chapter: Some(1),
                            children: vec![],
                        }],
                    }],
                },
            )
            .unwrap();
        }
        dir
    }

    fn request(dir: &Path, has_index: bool) -> RenderRequest {
        RenderRequest {
            from_dir: dir.to_path_buf(),
            epub_path: dir.join("out").join("book.epub"),
            language: "en".into(),
            table_render: TableRender::Html,
            latex_render: LatexRender::MathMl,
            has_index,
        }
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn writes_archive_with_navigation() {
        let dir = book_dir(true);
        let req = request(dir.path(), true);
        std::fs::create_dir_all(req.epub_path.parent().unwrap()).unwrap();
        EpubWriter::new()
            .render(&req, Arc::new(NoopReporter))
            .await
            .unwrap();

        let names = entry_names(&req.epub_path);
        assert_eq!(names[0], "mimetype");
        assert!(names.contains(&"OEBPS/toc.ncx".to_string()));
        assert!(names.contains(&"OEBPS/text/chapter_0001.xhtml".to_string()));
        assert!(names.contains(&"OEBPS/assets/fig.png".to_string()));

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&req.epub_path).unwrap()).unwrap();
        let mimetype = archive.by_index(0).unwrap();
        assert_eq!(mimetype.compression(), CompressionMethod::Stored);
        drop(mimetype);
        let mut opf = String::new();
        archive
            .by_name("OEBPS/content.opf")
            .unwrap()
            .read_to_string(&mut opf)
            .unwrap();
        assert!(opf.contains("<dc:title>Tom &amp; Jerry</dc:title>"));
        assert!(opf.contains("<spine toc=\"ncx\">"));
    }

    #[tokio::test]
    async fn omits_ncx_without_index() {
        let dir = book_dir(false);
        let req = request(dir.path(), false);
        std::fs::create_dir_all(req.epub_path.parent().unwrap()).unwrap();
        EpubWriter::new()
            .render(&req, Arc::new(NoopReporter))
            .await
            .unwrap();
        let names = entry_names(&req.epub_path);
        assert!(!names.iter().any(|n| n.ends_with("toc.ncx")));
    }

    #[test]
    fn chapter_page_escapes_and_lists_footnotes() {
        let mut c = chapter(0, Some("A < B"), vec![Block::text("x & y")]);
        c.footnotes.push(Footnote {
            page_index: 0,
            mark: "*".into(),
            text: "note".into(),
        });
        let page = chapter_xhtml(&c, "zh", TableRender::Html, LatexRender::MathMl);
        assert!(page.contains("<h1>A &lt; B</h1>"));
        assert!(page.contains("<p>x &amp; y</p>"));
        assert!(page.contains("class=\"footnotes\""));
        assert!(page.contains("xml:lang=\"zh\""));
    }

    #[test]
    fn table_and_formula_modes() {
        let table = Block::Table {
            html: Some("<table><tr><td>1</td></tr></table>".into()),
            asset: Some("t.png".into()),
        };
        assert!(render_block(&table, TableRender::Html, LatexRender::MathMl).contains("<table>"));
        assert!(render_block(&table, TableRender::Clipping, LatexRender::MathMl).contains("t.png"));

        let bare = Block::Table {
            html: Some("<table/>".into()),
            asset: None,
        };
        assert!(render_block(&bare, TableRender::Clipping, LatexRender::MathMl).contains("<table/>"));

        let formula = Block::Formula {
            latex: "a<b".into(),
            asset: Some("f.png".into()),
        };
        let mathml = render_block(&formula, TableRender::Html, LatexRender::MathMl);
        assert!(mathml.contains("application/x-tex"));
        assert!(mathml.contains("a&lt;b"));
        assert!(render_block(&formula, TableRender::Html, LatexRender::Svg).contains("f.png"));

        let no_image = Block::Formula {
            latex: "x".into(),
            asset: None,
        };
        assert!(render_block(&no_image, TableRender::Html, LatexRender::Clipping).contains("<math"));
    }

    #[test]
    fn ncx_nests_children_and_skips_unmapped() {
        let contents = Contents {
            entries: vec![TocEntry {
                title: "Part".into(),
                chapter: None,
                children: vec![TocEntry {
                    title: "Inner".into(),
                    chapter: Some(2),
                    children: vec![],
                }],
            }],
        };
        let doc = ncx(&BookMeta::default(), "urn:uuid:x", &contents);
        assert!(!doc.contains("Part"));
        assert!(doc.contains("text/chapter_0002.xhtml"));
        assert!(doc.contains("playOrder=\"1\""));
    }

    #[test]
    fn media_types() {
        assert_eq!(media_type("a.PNG"), "image/png");
        assert_eq!(media_type("b.jpeg"), "image/jpeg");
        assert!(is_precompressed("c.jpg"));
        assert!(!is_precompressed("d.svg"));
    }
}
