//! Deterministic text rules used by the built-in engine.
//!
//! Nothing here calls a model. Paragraph splitting, footnote peeling and
//! heading detection are regex/string heuristics tuned for the text layer
//! pdfium returns. Token counts come from [`TokenCounter`]: the model's BPE
//! encoding when one is configured, a character estimate otherwise.

use crate::error::Pdf2EpubError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

// ── Normalisation ────────────────────────────────────────────────────────────

pub fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

static RE_INVISIBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{200B}\u{200C}\u{200D}\u{FEFF}\u{00AD}\u{2060}]").unwrap());

/// Strip zero-width characters, BOMs and soft hyphens.
pub fn remove_invisible_chars(input: &str) -> String {
    RE_INVISIBLE.replace_all(input, "").to_string()
}

// ── Token estimate ───────────────────────────────────────────────────────────

/// CJK Unified Ideographs (U+4E00–U+9FFF).
#[inline]
pub fn is_cjk(c: char) -> bool {
    ('\u{4E00}'..='\u{9FFF}').contains(&c)
}

/// Rough token count: one per CJK ideograph, one per four other characters.
pub fn estimate_tokens(text: &str) -> usize {
    let (cjk, other) = text.chars().fold((0usize, 0usize), |(c, o), ch| {
        if is_cjk(ch) {
            (c + 1, o)
        } else {
            (c, o + 1)
        }
    });
    cjk + other.div_ceil(4)
}

/// Counts tokens for request budgeting.
#[derive(Clone, Default)]
pub enum TokenCounter {
    /// [`estimate_tokens`].
    #[default]
    Estimate,
    /// Exact counts from a BPE encoding.
    Bpe(Arc<CoreBPE>),
}

impl TokenCounter {
    /// Counter for a tiktoken encoding name such as `o200k_base`.
    pub fn for_encoding(name: &str) -> Result<Self, Pdf2EpubError> {
        let bpe = match name.trim() {
            "o200k_base" => tiktoken_rs::o200k_base(),
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "p50k_edit" => tiktoken_rs::p50k_edit(),
            "r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
            other => {
                return Err(Pdf2EpubError::InvalidConfig(format!(
                    "unknown token encoding '{other}' \
                     (expected o200k_base, cl100k_base, p50k_base, p50k_edit or r50k_base)"
                )))
            }
        }
        .map_err(|e| Pdf2EpubError::InvalidConfig(format!("token encoding '{name}': {e}")))?;
        Ok(Self::Bpe(Arc::new(bpe)))
    }

    pub fn count(&self, text: &str) -> usize {
        match self {
            Self::Estimate => estimate_tokens(text),
            Self::Bpe(bpe) => bpe.encode_ordinary(text).len(),
        }
    }
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Estimate => f.write_str("Estimate"),
            Self::Bpe(_) => f.write_str("Bpe"),
        }
    }
}

/// Group consecutive items into ranges whose summed cost stays within
/// `budget`. An item larger than the budget gets a range of its own.
pub fn pack_by_tokens(costs: &[usize], budget: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (i, &cost) in costs.iter().enumerate() {
        if i > start && used + cost > budget {
            ranges.push(start..i);
            start = i;
            used = 0;
        }
        used += cost;
    }
    if start < costs.len() {
        ranges.push(start..costs.len());
    }
    ranges
}

const TERMINALS: &[char] = &['.', '!', '?', '。', '！', '？', '…', ';', '；'];
const CLOSERS: &[char] = &['"', '\'', '”', '’', '」', '』', ')', '）'];

fn ends_sentence(s: &str) -> bool {
    let trimmed = s.trim_end().trim_end_matches(CLOSERS);
    trimmed.ends_with(TERMINALS)
}

/// Split `text` into pieces of at most `max_tokens` each, preferring
/// sentence boundaries. Concatenating the pieces gives back `text`.
pub fn split_by_tokens(text: &str, max_tokens: usize, counter: &TokenCounter) -> Vec<String> {
    let max_tokens = max_tokens.max(1);
    if counter.count(text) <= max_tokens {
        return vec![text.to_string()];
    }

    let mut sentences: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if TERMINALS.contains(&c) {
            while let Some(&next) = chars.peek() {
                if CLOSERS.contains(&next) || next.is_whitespace() {
                    current.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }

    let mut pieces = Vec::new();
    let mut piece = String::new();
    for sentence in sentences {
        let cost = counter.count(&sentence);
        if cost > max_tokens {
            if !piece.is_empty() {
                pieces.push(std::mem::take(&mut piece));
            }
            pieces.extend(match counter {
                TokenCounter::Estimate => hard_split(&sentence, max_tokens),
                TokenCounter::Bpe(_) => hard_split_counted(&sentence, max_tokens, counter),
            });
            continue;
        }
        if !piece.is_empty() && counter.count(&piece) + cost > max_tokens {
            pieces.push(std::mem::take(&mut piece));
        }
        piece.push_str(&sentence);
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

fn hard_split(text: &str, max_tokens: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    let (mut cjk, mut other) = (0usize, 0usize);
    for c in text.chars() {
        let (next_cjk, next_other) = if is_cjk(c) { (cjk + 1, other) } else { (cjk, other + 1) };
        if !piece.is_empty() && next_cjk + next_other.div_ceil(4) > max_tokens {
            pieces.push(std::mem::take(&mut piece));
            cjk = 0;
            other = 0;
        }
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
        piece.push(c);
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

// Per-character counts never undercount the joined piece under BPE.
fn hard_split_counted(text: &str, max_tokens: usize, counter: &TokenCounter) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    let mut used = 0;
    let mut buf = [0u8; 4];
    for c in text.chars() {
        let cost = counter.count(c.encode_utf8(&mut buf));
        if !piece.is_empty() && used + cost > max_tokens {
            pieces.push(std::mem::take(&mut piece));
            used = 0;
        }
        used += cost;
        piece.push(c);
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

// ── Paragraphs ───────────────────────────────────────────────────────────────

static RE_PAGE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-–—\s]*(\d{1,4}|[ivxlcIVXLC]{1,6})[-–—\s]*$").unwrap());

/// Append `line` to `buf`, repairing hyphenation and spacing.
fn join_line(buf: &mut String, line: &str) {
    if buf.is_empty() {
        buf.push_str(line);
        return;
    }
    let prev = buf.chars().last();
    let next = line.chars().next();
    if prev == Some('-') && next.is_some_and(|c| c.is_lowercase()) {
        buf.pop();
    } else if !(prev.is_some_and(is_cjk) || next.is_some_and(is_cjk)) {
        buf.push(' ');
    }
    buf.push_str(line);
}

/// Split a page's raw text layer into paragraphs.
///
/// Blank lines always end a paragraph. A line that ends a sentence and is
/// visibly shorter than the page's longest line also ends one. Headings
/// stand alone and bare page numbers are dropped.
pub fn split_paragraphs(page_text: &str) -> Vec<String> {
    let text = remove_invisible_chars(&normalise_line_endings(page_text));
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let widest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);

    let mut paragraphs = Vec::new();
    let mut buf = String::new();
    for line in lines {
        if line.is_empty() {
            if !buf.is_empty() {
                paragraphs.push(std::mem::take(&mut buf));
            }
            continue;
        }
        if RE_PAGE_NUMBER.is_match(line) {
            continue;
        }
        if buf.is_empty() && heading_level(line).is_some() {
            paragraphs.push(line.to_string());
            continue;
        }
        join_line(&mut buf, line);
        let short = line.chars().count() * 5 < widest * 4;
        if ends_sentence(line) && short {
            paragraphs.push(std::mem::take(&mut buf));
        }
    }
    if !buf.is_empty() {
        paragraphs.push(buf);
    }
    paragraphs
}

// ── Footnotes ────────────────────────────────────────────────────────────────

static RE_FOOTNOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(?:\[(\d{1,3})\]|(\d{1,3})\)|([①-⑳])|(\*{1,3}|†|‡))\s*(\S.*)$").unwrap()
});

/// Split a footnote paragraph into `(mark, text)`.
pub fn parse_footnote(paragraph: &str) -> Option<(String, String)> {
    let caps = RE_FOOTNOTE.captures(paragraph.trim())?;
    let mark = (1..=4).find_map(|i| caps.get(i))?.as_str().to_string();
    let text = caps.get(5)?.as_str().trim().to_string();
    Some((mark, text))
}

// ── Headings ─────────────────────────────────────────────────────────────────

// Latin keyword headings must stand alone or be followed by a separator or a
// capitalised title word, so body sentences starting with the keyword stay
// body text.
static RE_HEADING_1: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:第[一二三四五六七八九十百千零〇两\d]+[章卷部篇]|序言|前言|引言|后记|尾声|附录|(?:(?i:chapter|part|book)\s+(?i:[\divxlc]+|one|two|three|four|five|six|seven|eight|nine|ten)|(?i:preface|introduction|prologue|epilogue|afterword|appendix))(?:\s*$|\s*[:.\-–—]\s*\S|\s+[\p{Lu}\d]))",
    )
    .unwrap()
});

static RE_HEADING_2: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:第[一二三四五六七八九十百千零〇两\d]+节|\d{1,2}\.\d{1,2}\s+\S)").unwrap());

const MAX_HEADING_CHARS: usize = 60;

/// Heading level (1 or 2) of a paragraph, or `None` for body text.
pub fn heading_level(paragraph: &str) -> Option<u8> {
    let p = paragraph.trim();
    if p.is_empty() || p.chars().count() > MAX_HEADING_CHARS {
        return None;
    }
    if ends_sentence(p) {
        return None;
    }
    if RE_HEADING_1.is_match(p) {
        Some(1)
    } else if RE_HEADING_2.is_match(p) {
        Some(2)
    } else {
        None
    }
}

// ── Model replies ────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```\s*$").unwrap());

/// Drop a ```lang … ``` wrapper the model added despite instructions.
pub fn strip_fences(reply: &str) -> String {
    let trimmed = reply.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

/// The outermost `{ … }` span of a reply, if any.
pub fn json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}
