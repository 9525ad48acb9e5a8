//! Built-in [`Analyser`]: deterministic structuring plus model-backed
//! correction and metadata.
//!
//! Sequence extraction, contents detection, chapter splitting and the
//! footnote merge are plain text rules from [`super::text`]. Only the
//! correction passes and the metadata step talk to the [`ChatClient`].

use super::chat::{ChatClient, ChatMessage, OpenAiCompatibleClient};
use super::prompts::{
    meta_request, numbered_paragraphs, parse_numbered_reply, CORRECTION_SYSTEM_PROMPT,
    META_SYSTEM_PROMPT,
};
use super::text::{
    heading_level, json_object, pack_by_tokens, parse_footnote, split_by_tokens, strip_fences,
    TokenCounter,
};
use crate::config::{CorrectionLevel, LlmConfig};
use crate::document::{
    chapter_file_name, list_json_files, page_file_name, read_json, write_json, BookMeta, Block,
    Chapter, Contents, Footnote, FootnotePage, OcrPage, Paragraph, SequencePage, TocEntry,
};
use crate::engine::{AnalysisContext, Analyser, ChapterOutput, OutputRequest, SequenceOutput};
use crate::error::Pdf2EpubError;
use crate::progress::Step;
use crate::workspace::{ensure_dir, ASSETS_DIR, CHAPTERS_DIR, INDEX_FILE, META_FILE};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const OUTPUT_DIR: &str = "output";
const TEXT_DIR: &str = "text";
const FOOTNOTE_DIR: &str = "footnote";
const CONTENTS_FILE: &str = "contents.json";
const MAX_FALLBACK_TITLE_CHARS: usize = 120;

/// Analyser backed by a chat-completion model.
pub struct LlmAnalyser {
    client: Arc<dyn ChatClient>,
    tokens: TokenCounter,
}

impl LlmAnalyser {
    /// Upper bound on passes for [`CorrectionLevel::Multiple`].
    pub const MAX_CORRECTION_PASSES: usize = 3;

    /// Analyser budgeting requests with the character estimate.
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self {
            client,
            tokens: TokenCounter::Estimate,
        }
    }

    /// Analyser talking to the endpoint described by `config`, budgeting
    /// requests with its `token_encoding`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, Pdf2EpubError> {
        let client = OpenAiCompatibleClient::from_config(config)?;
        let tokens = TokenCounter::for_encoding(&config.token_encoding)?;
        Ok(Self::new(Arc::new(client)).with_token_counter(tokens))
    }

    pub fn with_token_counter(mut self, tokens: TokenCounter) -> Self {
        self.tokens = tokens;
        self
    }

    /// Correct `texts` in place of their originals, splitting paragraphs
    /// longer than the verify budget and rejoining them afterwards.
    async fn correct_texts(
        &self,
        ctx: &AnalysisContext,
        step: Step,
        texts: Vec<String>,
        passes: usize,
    ) -> Result<Vec<String>, Pdf2EpubError> {
        let mut owners = Vec::new();
        let mut pieces = Vec::new();
        for (k, text) in texts.iter().enumerate() {
            let max = ctx.window.max_verify_paragraph_tokens;
            for piece in split_by_tokens(text, max, &self.tokens) {
                owners.push(k);
                pieces.push(piece);
            }
        }

        for pass in 0..passes {
            ctx.reporter.on_step(step);
            let (next, changed) = self.correction_pass(ctx, &pieces).await?;
            pieces = next;
            debug!("Correction pass {} changed text: {}", pass + 1, changed);
            if !changed {
                break;
            }
        }

        let mut out = vec![String::new(); texts.len()];
        for (owner, piece) in owners.into_iter().zip(pieces) {
            out[owner].push_str(&piece);
        }
        Ok(out)
    }

    /// One pass over all pieces, `ctx.threads` requests at a time.
    async fn correction_pass(
        &self,
        ctx: &AnalysisContext,
        pieces: &[String],
    ) -> Result<(Vec<String>, bool), Pdf2EpubError> {
        let targets: Vec<usize> = (0..pieces.len())
            .filter(|&i| !pieces[i].trim().is_empty())
            .collect();
        let costs: Vec<usize> = targets.iter().map(|&i| self.tokens.count(&pieces[i])).collect();
        let batches = pack_by_tokens(&costs, ctx.window.max_request_data_tokens);
        let total = batches.len() as u64;
        ctx.reporter.on_progress(0, Some(total));

        let mut results = stream::iter(batches.into_iter().map(|range| {
            let indices = targets[range].to_vec();
            let batch: Vec<String> = indices.iter().map(|&i| pieces[i].clone()).collect();
            async move {
                let corrected = self.correct_batch(&batch).await;
                (indices, corrected)
            }
        }))
        .buffer_unordered(ctx.threads.max(1));

        let mut next = pieces.to_vec();
        let mut changed = false;
        let mut done = 0u64;
        while let Some((indices, corrected)) = results.next().await {
            for (i, new) in indices.into_iter().zip(corrected?) {
                let original = &pieces[i];
                let new = new.trim();
                if new.is_empty() {
                    continue;
                }
                let tail = &original[original.trim_end().len()..];
                let replaced = format!("{new}{tail}");
                if replaced != *original {
                    changed = true;
                    next[i] = replaced;
                }
            }
            done += 1;
            ctx.reporter.on_progress(done, Some(total));
        }
        Ok((next, changed))
    }

    async fn correct_batch(&self, batch: &[String]) -> Result<Vec<String>, Pdf2EpubError> {
        let messages = [
            ChatMessage::system(CORRECTION_SYSTEM_PROMPT),
            ChatMessage::user(numbered_paragraphs(batch)),
        ];
        let reply = self.client.complete(&messages).await?;
        match parse_numbered_reply(&strip_fences(&reply), batch.len()) {
            Some(corrected) => Ok(corrected),
            None => {
                warn!(
                    "Correction reply did not contain {} numbered paragraphs; keeping the original text",
                    batch.len()
                );
                Ok(batch.to_vec())
            }
        }
    }
}

#[async_trait]
impl Analyser for LlmAnalyser {
    fn name(&self) -> &str {
        "llm"
    }

    async fn extract_sequences(
        &self,
        ctx: &AnalysisContext,
        workspace: &Path,
        ocr_path: &Path,
    ) -> Result<SequenceOutput, Pdf2EpubError> {
        ctx.reporter.on_step(Step::ExtractSequence);
        let files = list_json_files(ocr_path)?;
        let total = files.len() as u64;

        let out = workspace.join(OUTPUT_DIR);
        reset_dir(&out)?;
        let text_dir = out.join(TEXT_DIR);
        let footnote_dir = out.join(FOOTNOTE_DIR);
        ensure_dir(&text_dir)?;

        let mut any_footnotes = false;
        ctx.reporter.on_progress(0, Some(total));
        for (i, file) in files.iter().enumerate() {
            let page: OcrPage = read_json(file)?;
            let (paragraphs, footnotes) = split_page(&page);
            write_json(
                &text_dir.join(page_file_name(page.page_index)),
                &SequencePage {
                    page_index: page.page_index,
                    paragraphs,
                },
            )?;
            if !footnotes.is_empty() {
                if !any_footnotes {
                    ensure_dir(&footnote_dir)?;
                    any_footnotes = true;
                }
                write_json(
                    &footnote_dir.join(page_file_name(page.page_index)),
                    &FootnotePage {
                        page_index: page.page_index,
                        footnotes,
                    },
                )?;
            }
            ctx.reporter.on_progress(i as u64 + 1, Some(total));
        }

        info!(
            "Sequence extracted from {} pages (footnotes: {})",
            total, any_footnotes
        );
        Ok(SequenceOutput {
            text: text_dir,
            footnote: any_footnotes.then_some(footnote_dir),
        })
    }

    async fn correct(
        &self,
        ctx: &AnalysisContext,
        level: CorrectionLevel,
        workspace: &Path,
        sequence: &SequenceOutput,
    ) -> Result<SequenceOutput, Pdf2EpubError> {
        let passes = match level {
            CorrectionLevel::Single => 1,
            CorrectionLevel::Multiple => Self::MAX_CORRECTION_PASSES,
        };
        let out = workspace.join(OUTPUT_DIR);
        reset_dir(&out)?;

        // ── Body text ────────────────────────────────────────────────────
        let mut pages: Vec<SequencePage> = read_all(&sequence.text)?;
        let mut slots = Vec::new();
        let mut texts = Vec::new();
        for (i, page) in pages.iter().enumerate() {
            for (j, para) in page.paragraphs.iter().enumerate() {
                if let Block::Text { text } = &para.block {
                    slots.push((i, j));
                    texts.push(text.clone());
                }
            }
        }
        let corrected = self
            .correct_texts(ctx, Step::CorrectText, texts, passes)
            .await?;
        for ((i, j), text) in slots.into_iter().zip(corrected) {
            pages[i].paragraphs[j].block = Block::Text { text };
        }
        let text_dir = out.join(TEXT_DIR);
        ensure_dir(&text_dir)?;
        for page in &pages {
            write_json(&text_dir.join(page_file_name(page.page_index)), page)?;
        }

        // ── Footnotes ────────────────────────────────────────────────────
        let footnote = match &sequence.footnote {
            Some(footnote_path) => {
                let mut pages: Vec<FootnotePage> = read_all(footnote_path)?;
                let texts: Vec<String> = pages
                    .iter()
                    .flat_map(|p| p.footnotes.iter().map(|f| f.text.clone()))
                    .collect();
                let mut corrected = self
                    .correct_texts(ctx, Step::CorrectFootnote, texts, passes)
                    .await?
                    .into_iter();
                for page in &mut pages {
                    for note in &mut page.footnotes {
                        if let Some(text) = corrected.next() {
                            note.text = text;
                        }
                    }
                }
                let dir = out.join(FOOTNOTE_DIR);
                ensure_dir(&dir)?;
                for page in &pages {
                    write_json(&dir.join(page_file_name(page.page_index)), page)?;
                }
                Some(dir)
            }
            None => None,
        };

        Ok(SequenceOutput {
            text: text_dir,
            footnote,
        })
    }

    async fn extract_meta(
        &self,
        ctx: &AnalysisContext,
        workspace: &Path,
        text_path: &Path,
    ) -> Result<PathBuf, Pdf2EpubError> {
        ctx.reporter.on_step(Step::ExtractMeta);
        ctx.reporter.on_progress(0, Some(1));

        let pages: Vec<SequencePage> = read_all(text_path)?;
        let texts: Vec<&str> = pages
            .iter()
            .flat_map(|p| p.paragraphs.iter())
            .filter_map(|p| p.block.as_text())
            .collect();

        let budget = ctx.window.max_request_data_tokens;
        let mut opening = String::new();
        let mut used = 0;
        for text in &texts {
            let cost = self.tokens.count(text);
            if used > 0 && used + cost > budget {
                break;
            }
            opening.push_str(text);
            opening.push('\n');
            used += cost;
        }

        let mut meta = if opening.trim().is_empty() {
            BookMeta::default()
        } else {
            let messages = [
                ChatMessage::system(META_SYSTEM_PROMPT),
                ChatMessage::user(meta_request(opening.trim_end())),
            ];
            let reply = self.client.complete(&messages).await?;
            parse_meta(&reply).unwrap_or_else(|| {
                warn!("Metadata reply was not a JSON object; falling back to the first paragraph");
                BookMeta::default()
            })
        };

        if meta.title.is_none() {
            meta.title = texts
                .iter()
                .map(|t| t.trim())
                .find(|t| !t.is_empty())
                .map(|t| t.chars().take(MAX_FALLBACK_TITLE_CHARS).collect());
        }

        ensure_dir(workspace)?;
        let path = workspace.join(META_FILE);
        write_json(&path, &meta)?;
        ctx.reporter.on_progress(1, Some(1));
        debug!("Metadata: {:?}", meta.title);
        Ok(path)
    }

    async fn extract_contents(
        &self,
        ctx: &AnalysisContext,
        workspace: &Path,
        text_path: &Path,
    ) -> Result<Option<Contents>, Pdf2EpubError> {
        ctx.reporter.on_step(Step::CollectContents);
        let pages: Vec<SequencePage> = read_all(text_path)?;
        let total = pages.len() as u64;

        let mut entries: Vec<TocEntry> = Vec::new();
        let mut last_top_is_chapter = false;
        for (i, page) in pages.iter().enumerate() {
            for text in page.paragraphs.iter().filter_map(|p| p.block.as_text()) {
                let Some(level) = heading_level(text) else {
                    continue;
                };
                let entry = TocEntry {
                    title: text.trim().to_string(),
                    chapter: None,
                    children: Vec::new(),
                };
                if level == 1 {
                    entries.push(entry);
                    last_top_is_chapter = true;
                } else if let Some(parent) = entries.last_mut().filter(|_| last_top_is_chapter) {
                    parent.children.push(entry);
                } else {
                    entries.push(entry);
                }
            }
            ctx.reporter.on_progress(i as u64 + 1, Some(total));
        }

        if entries.is_empty() {
            info!("No table of contents detected");
            return Ok(None);
        }
        let contents = Contents { entries };
        ensure_dir(workspace)?;
        write_json(&workspace.join(CONTENTS_FILE), &contents)?;
        Ok(Some(contents))
    }

    async fn generate_chapters(
        &self,
        ctx: &AnalysisContext,
        contents: Option<Contents>,
        text_path: &Path,
        workspace: &Path,
    ) -> Result<ChapterOutput, Pdf2EpubError> {
        ctx.reporter.on_step(Step::MappingContents);
        let pages: Vec<SequencePage> = read_all(text_path)?;
        let split_at_headings = contents.is_some();

        let mut chapters: Vec<Chapter> = Vec::new();
        let mut heading_ids = Vec::new();
        let mut current = empty_chapter(0, None);
        for para in pages.into_iter().flat_map(|p| p.paragraphs) {
            if split_at_headings {
                if let Some(text) = para.block.as_text() {
                    if heading_level(text).is_some() {
                        let title = text.trim().to_string();
                        if !current.paragraphs.is_empty() || current.title.is_some() {
                            chapters.push(current);
                        }
                        heading_ids.push(chapters.len());
                        current = empty_chapter(chapters.len(), Some(title));
                        continue;
                    }
                }
            }
            current.paragraphs.push(para);
        }
        if !current.paragraphs.is_empty() || current.title.is_some() || chapters.is_empty() {
            chapters.push(current);
        }

        let contents = contents.map(|mut c| {
            let mut ids = heading_ids.into_iter();
            assign_chapters(&mut c.entries, &mut ids);
            c
        });

        let out = workspace.join(OUTPUT_DIR);
        reset_dir(&out)?;
        let total = chapters.len() as u64;
        for (i, chapter) in chapters.iter().enumerate() {
            write_json(&out.join(chapter_file_name(chapter.id)), chapter)?;
            ctx.reporter.on_progress(i as u64 + 1, Some(total));
        }
        info!("Generated {} chapters", total);

        Ok(ChapterOutput {
            path: out,
            contents,
        })
    }

    async fn generate_chapters_with_footnotes(
        &self,
        ctx: &AnalysisContext,
        chapter_path: &Path,
        footnote_path: &Path,
        workspace: &Path,
    ) -> Result<PathBuf, Pdf2EpubError> {
        ctx.reporter.on_step(Step::GenerateFootnotes);
        let mut notes: BTreeMap<usize, Vec<Footnote>> = BTreeMap::new();
        for page in read_all::<FootnotePage>(footnote_path)? {
            notes.entry(page.page_index).or_default().extend(page.footnotes);
        }
        let mut chapters: Vec<Chapter> = read_all(chapter_path)?;

        for chapter in &mut chapters {
            let pages: BTreeSet<usize> = chapter.paragraphs.iter().map(|p| p.page_index).collect();
            for page in pages {
                if let Some(found) = notes.remove(&page) {
                    chapter.footnotes.extend(found);
                }
            }
        }

        // Pages with footnotes but no body text go to the closest chapter before them.
        for (page, found) in notes {
            let target = chapters
                .iter()
                .rposition(|c| c.paragraphs.iter().any(|p| p.page_index <= page))
                .unwrap_or(0);
            match chapters.get_mut(target) {
                Some(chapter) => chapter.footnotes.extend(found),
                None => warn!("Dropping {} footnotes from page {}: no chapters", found.len(), page + 1),
            }
        }

        let out = workspace.join(OUTPUT_DIR);
        reset_dir(&out)?;
        let total = chapters.len() as u64;
        for (i, chapter) in chapters.iter().enumerate() {
            write_json(&out.join(chapter_file_name(chapter.id)), chapter)?;
            ctx.reporter.on_progress(i as u64 + 1, Some(total));
        }
        Ok(out)
    }

    async fn output(
        &self,
        ctx: &AnalysisContext,
        request: &OutputRequest,
    ) -> Result<(), Pdf2EpubError> {
        ctx.reporter.on_step(Step::Output);
        let chapter_files = list_json_files(&request.chapter_path)?;
        let total = chapter_files.len() as u64 + 2;
        let mut done = 0u64;
        ensure_dir(&request.output_path)?;

        // meta.json
        let meta: BookMeta = read_json(&request.meta_path)?;
        write_json(&request.output_path.join(META_FILE), &meta)?;
        done += 1;
        ctx.reporter.on_progress(done, Some(total));

        // chapters/
        let chapters_dir = request.output_path.join(CHAPTERS_DIR);
        reset_dir(&chapters_dir)?;
        for file in &chapter_files {
            let chapter: Chapter = read_json(file)?;
            write_json(&chapters_dir.join(chapter_file_name(chapter.id)), &chapter)?;
            done += 1;
            ctx.reporter.on_progress(done, Some(total));
        }

        // index.json
        let index_path = request.output_path.join(INDEX_FILE);
        match request.contents.as_ref().filter(|c| !c.is_empty()) {
            Some(contents) => write_json(&index_path, contents)?,
            None if index_path.exists() => {
                std::fs::remove_file(&index_path).map_err(|e| Pdf2EpubError::io(&index_path, e))?
            }
            None => {}
        }

        // assets/
        let assets_out = request.output_path.join(ASSETS_DIR);
        if request.assets_path.is_dir() && !same_dir(&request.assets_path, &assets_out) {
            reset_dir(&assets_out)?;
            let copied = copy_dir(&request.assets_path, &assets_out)?;
            debug!("Copied {} assets", copied);
        }
        done += 1;
        ctx.reporter.on_progress(done, Some(total));
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn empty_chapter(id: usize, title: Option<String>) -> Chapter {
    Chapter {
        id,
        title,
        paragraphs: Vec::new(),
        footnotes: Vec::new(),
    }
}

/// Separate body paragraphs from the run of footnotes at the bottom of a page.
fn split_page(page: &OcrPage) -> (Vec<Paragraph>, Vec<Footnote>) {
    let mut body: Vec<Paragraph> = page
        .blocks
        .iter()
        .filter(|b| b.as_text().is_none_or(|t| !t.trim().is_empty()))
        .map(|b| Paragraph {
            page_index: page.page_index,
            block: b.clone(),
        })
        .collect();

    // Trailing notes sit below figures too, so non-text blocks are stepped over.
    let mut footnotes = Vec::new();
    let mut i = body.len();
    while i > 0 {
        i -= 1;
        let Some(last) = body[i].block.as_text() else {
            continue;
        };
        if body.len() == 1 || heading_level(last).is_some() {
            break;
        }
        let Some((mark, text)) = parse_footnote(last) else {
            break;
        };
        footnotes.push(Footnote {
            page_index: page.page_index,
            mark,
            text,
        });
        body.remove(i);
    }
    footnotes.reverse();
    (body, footnotes)
}

/// Give every entry, in document order, the chapter its heading opened.
fn assign_chapters(entries: &mut [TocEntry], ids: &mut impl Iterator<Item = usize>) {
    for entry in entries {
        entry.chapter = ids.next();
        assign_chapters(&mut entry.children, ids);
    }
}

fn parse_meta(reply: &str) -> Option<BookMeta> {
    let cleaned = strip_fences(reply);
    let mut meta: BookMeta = serde_json::from_str(json_object(&cleaned)?).ok()?;
    let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
    if blank(&meta.title) {
        meta.title = None;
    }
    if blank(&meta.publisher) {
        meta.publisher = None;
    }
    if blank(&meta.isbn) {
        meta.isbn = None;
    }
    if blank(&meta.description) {
        meta.description = None;
    }
    meta.authors.retain(|a| !a.trim().is_empty());
    Some(meta)
}

fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, Pdf2EpubError> {
    list_json_files(dir)?.iter().map(|f| read_json(f)).collect()
}

fn reset_dir(path: &Path) -> Result<(), Pdf2EpubError> {
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(|e| Pdf2EpubError::io(path, e))?;
    }
    ensure_dir(path)
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn copy_dir(from: &Path, to: &Path) -> Result<usize, Pdf2EpubError> {
    let mut copied = 0;
    for entry in std::fs::read_dir(from).map_err(|e| Pdf2EpubError::io(from, e))? {
        let entry = entry.map_err(|e| Pdf2EpubError::io(from, e))?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        if src.is_dir() {
            ensure_dir(&dst)?;
            copied += copy_dir(&src, &dst)?;
        } else {
            std::fs::copy(&src, &dst).map_err(|e| Pdf2EpubError::io(&src, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowTokens;
    use crate::progress::NoopReporter;
    use std::sync::Mutex;

    /// Replies with a canned answer and records every request.
    struct ScriptedClient {
        replies: Mutex<Vec<String>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedClient {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, Pdf2EpubError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| Pdf2EpubError::LlmApiError {
                    message: "script exhausted".into(),
                })
        }
    }

    fn ctx() -> AnalysisContext {
        AnalysisContext {
            reporter: Arc::new(NoopReporter),
            threads: 2,
            window: WindowTokens::from_window(2000),
        }
    }

    fn write_ocr(dir: &Path, pages: &[&[&str]]) {
        std::fs::create_dir_all(dir).unwrap();
        for (i, texts) in pages.iter().enumerate() {
            let page = OcrPage {
                page_index: i,
                width: 595.0,
                height: 842.0,
                blocks: texts.iter().map(|t| Block::text(*t)).collect(),
            };
            write_json(&dir.join(page_file_name(i)), &page).unwrap();
        }
    }

    #[test]
    fn split_page_peels_trailing_footnotes() {
        let page = OcrPage {
            page_index: 3,
            width: 1.0,
            height: 1.0,
            blocks: vec![
                Block::text("Body text with a mark[1]."),
                Block::text("[1] The note."),
                Block::text("[2] Another note."),
            ],
        };
        let (body, notes) = split_page(&page);
        assert_eq!(body.len(), 1);
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].mark, "1");
        assert_eq!(notes[1].text, "Another note.");
    }

    #[test]
    fn split_page_peels_footnotes_past_figures() {
        let page = OcrPage {
            page_index: 5,
            width: 1.0,
            height: 1.0,
            blocks: vec![
                Block::text("See the figure[1]."),
                Block::text("[1] Drawn from life."),
                Block::Image {
                    asset: "page_0005_0.png".into(),
                },
            ],
        };
        let (body, notes) = split_page(&page);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text, "Drawn from life.");
        assert_eq!(body.len(), 2);
        assert!(body[1].block.as_text().is_none());
    }

    #[test]
    fn split_page_keeps_lone_paragraph() {
        let page = OcrPage {
            page_index: 0,
            width: 1.0,
            height: 1.0,
            blocks: vec![Block::text("[1] Looks like a note")],
        };
        let (body, notes) = split_page(&page);
        assert_eq!(body.len(), 1);
        assert!(notes.is_empty());
    }

    #[test]
    fn parse_meta_variants() {
        let m = parse_meta("```json\n{\"title\": \"Book\", \"authors\": [\"A\", \" \"], \"isbn\": \"\"}\n```")
            .unwrap();
        assert_eq!(m.title.as_deref(), Some("Book"));
        assert_eq!(m.authors, vec!["A".to_string()]);
        assert!(m.isbn.is_none());
        assert!(parse_meta("I cannot help").is_none());
    }

    #[test]
    fn from_config_rejects_unknown_token_encoding() {
        let config = LlmConfig {
            token_encoding: "made_up".into(),
            ..LlmConfig::default()
        };
        let err = LlmAnalyser::from_config(&config).err().unwrap();
        assert!(matches!(err, Pdf2EpubError::InvalidConfig(_)), "got {err:?}");
        assert!(LlmAnalyser::from_config(&LlmConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn sequence_without_footnotes_reports_none() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = dir.path().join("ocr");
        write_ocr(&ocr, &[&["Just text."], &["More text."]]);
        let analyser = LlmAnalyser::new(ScriptedClient::new(&[]));
        let out = analyser
            .extract_sequences(&ctx(), &dir.path().join("seq"), &ocr)
            .await
            .unwrap();
        assert!(out.footnote.is_none());
        assert_eq!(list_json_files(&out.text).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sequence_with_footnotes_reports_location() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = dir.path().join("ocr");
        write_ocr(&ocr, &[&["Body.", "[1] A note."], &["More."]]);
        let analyser = LlmAnalyser::new(ScriptedClient::new(&[]));
        let out = analyser
            .extract_sequences(&ctx(), &dir.path().join("seq"), &ocr)
            .await
            .unwrap();
        let footnote = out.footnote.expect("footnote dir");
        assert_eq!(list_json_files(&footnote).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn correction_applies_reply() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = dir.path().join("ocr");
        write_ocr(&ocr, &[&["Teh cat.", "A dgo."]]);
        let client = ScriptedClient::new(&["[1] The cat.\n[2] A dog."]);
        let analyser = LlmAnalyser::new(client.clone());
        let seq = analyser
            .extract_sequences(&ctx(), &dir.path().join("seq"), &ocr)
            .await
            .unwrap();
        let corrected = analyser
            .correct(&ctx(), CorrectionLevel::Single, &dir.path().join("cor"), &seq)
            .await
            .unwrap();
        assert_ne!(corrected.text, seq.text);
        let pages: Vec<SequencePage> = read_all(&corrected.text).unwrap();
        let texts: Vec<_> = pages[0].paragraphs.iter().filter_map(|p| p.block.as_text()).collect();
        assert_eq!(texts, vec!["The cat.", "A dog."]);
        assert_eq!(client.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn multiple_passes_stop_when_stable() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = dir.path().join("ocr");
        write_ocr(&ocr, &[&["Teh cat."]]);
        let client = ScriptedClient::new(&["[1] The cat.", "[1] The cat."]);
        let analyser = LlmAnalyser::new(client.clone());
        let seq = analyser
            .extract_sequences(&ctx(), &dir.path().join("seq"), &ocr)
            .await
            .unwrap();
        analyser
            .correct(&ctx(), CorrectionLevel::Multiple, &dir.path().join("cor"), &seq)
            .await
            .unwrap();
        assert_eq!(client.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn garbled_correction_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = dir.path().join("ocr");
        write_ocr(&ocr, &[&["Keep me."]]);
        let analyser = LlmAnalyser::new(ScriptedClient::new(&["Sorry, no."]));
        let seq = analyser
            .extract_sequences(&ctx(), &dir.path().join("seq"), &ocr)
            .await
            .unwrap();
        let corrected = analyser
            .correct(&ctx(), CorrectionLevel::Single, &dir.path().join("cor"), &seq)
            .await
            .unwrap();
        let pages: Vec<SequencePage> = read_all(&corrected.text).unwrap();
        assert_eq!(pages[0].paragraphs[0].block.as_text(), Some("Keep me."));
    }

    #[tokio::test]
    async fn meta_falls_back_to_first_paragraph() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = dir.path().join("ocr");
        write_ocr(&ocr, &[&["The Great Book", "Some text."]]);
        let analyser = LlmAnalyser::new(ScriptedClient::new(&["not json"]));
        let seq = analyser
            .extract_sequences(&ctx(), &dir.path().join("seq"), &ocr)
            .await
            .unwrap();
        let path = analyser
            .extract_meta(&ctx(), &dir.path().join("meta"), &seq.text)
            .await
            .unwrap();
        let meta: BookMeta = read_json(&path).unwrap();
        assert_eq!(meta.title.as_deref(), Some("The Great Book"));
    }

    #[tokio::test]
    async fn chapters_follow_headings_and_map_contents() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = dir.path().join("ocr");
        write_ocr(
            &ocr,
            &[
                &["Opening words."],
                &["Chapter 1", "First body.", "1.1 Detail", "Detail body."],
                &["Chapter 2", "Second body."],
            ],
        );
        let analyser = LlmAnalyser::new(ScriptedClient::new(&[]));
        let seq = analyser
            .extract_sequences(&ctx(), &dir.path().join("seq"), &ocr)
            .await
            .unwrap();
        let contents = analyser
            .extract_contents(&ctx(), &dir.path().join("contents"), &seq.text)
            .await
            .unwrap()
            .expect("contents");
        assert_eq!(contents.entries.len(), 2);
        assert_eq!(contents.entries[0].children.len(), 1);

        let out = analyser
            .generate_chapters(&ctx(), Some(contents), &seq.text, &dir.path().join("chap"))
            .await
            .unwrap();
        let chapters: Vec<Chapter> = read_all(&out.path).unwrap();
        assert_eq!(chapters.len(), 4);
        assert_eq!(chapters[0].title, None);
        assert_eq!(chapters[1].title.as_deref(), Some("Chapter 1"));

        let mapped = out.contents.unwrap();
        assert_eq!(mapped.entries[0].chapter, Some(1));
        assert_eq!(mapped.entries[0].children[0].chapter, Some(2));
        assert_eq!(mapped.entries[1].chapter, Some(3));
    }

    #[tokio::test]
    async fn footnotes_attach_to_chapter_by_page() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = dir.path().join("ocr");
        write_ocr(
            &ocr,
            &[&["Chapter 1", "Body[1].", "[1] Note one."], &["Chapter 2", "Body."]],
        );
        let analyser = LlmAnalyser::new(ScriptedClient::new(&[]));
        let c = ctx();
        let seq = analyser
            .extract_sequences(&c, &dir.path().join("seq"), &ocr)
            .await
            .unwrap();
        let contents = analyser
            .extract_contents(&c, &dir.path().join("contents"), &seq.text)
            .await
            .unwrap();
        let chapters = analyser
            .generate_chapters(&c, contents, &seq.text, &dir.path().join("chap"))
            .await
            .unwrap();
        let merged = analyser
            .generate_chapters_with_footnotes(
                &c,
                &chapters.path,
                seq.footnote.as_deref().unwrap(),
                &dir.path().join("ref"),
            )
            .await
            .unwrap();
        let chapters: Vec<Chapter> = read_all(&merged).unwrap();
        assert_eq!(chapters[0].footnotes.len(), 1);
        assert!(chapters[1].footnotes.is_empty());
    }

    #[tokio::test]
    async fn output_writes_final_layout_and_drops_stale_index() {
        let dir = tempfile::tempdir().unwrap();
        let chap = dir.path().join("chap");
        std::fs::create_dir_all(&chap).unwrap();
        write_json(&chap.join(chapter_file_name(0)), &empty_chapter(0, Some("One".into()))).unwrap();
        let meta_path = dir.path().join("meta.json");
        write_json(&meta_path, &BookMeta::default()).unwrap();
        let assets = dir.path().join("assets_in");
        std::fs::create_dir_all(&assets).unwrap();
        std::fs::write(assets.join("p0_0.png"), b"png").unwrap();

        let final_dir = dir.path().join("final");
        std::fs::create_dir_all(&final_dir).unwrap();
        std::fs::write(final_dir.join(INDEX_FILE), "{}").unwrap();

        let analyser = LlmAnalyser::new(ScriptedClient::new(&[]));
        analyser
            .output(
                &ctx(),
                &OutputRequest {
                    contents: None,
                    output_path: final_dir.clone(),
                    meta_path,
                    chapter_path: chap,
                    assets_path: assets,
                },
            )
            .await
            .unwrap();

        assert!(final_dir.join(META_FILE).is_file());
        assert_eq!(list_json_files(&final_dir.join(CHAPTERS_DIR)).unwrap().len(), 1);
        assert!(!final_dir.join(INDEX_FILE).exists());
        assert!(final_dir.join(ASSETS_DIR).join("p0_0.png").is_file());
    }
}
