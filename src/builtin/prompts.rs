//! Prompts used by [`super::LlmAnalyser`].
//!
//! Every prompt lives here so the analyser code only deals with batching,
//! retries and parsing, and so tests can inspect the prompts without a model.

use once_cell::sync::Lazy;
use regex::Regex;

/// System prompt for the correction passes.
pub const CORRECTION_SYSTEM_PROMPT: &str = r#"You proofread text extracted from a scanned or digital book.

You receive numbered paragraphs in the form:
[1] paragraph text
[2] paragraph text

Rules:
1. Fix character recognition errors, broken words and wrong punctuation only.
2. Do NOT rephrase, translate, summarise, merge or split paragraphs.
3. Keep the language and writing system of the original.
4. Return EVERY paragraph, in order, with the same [n] number in front.
5. If a paragraph needs no change, return it unchanged.
6. Output only the numbered paragraphs. No commentary."#;

/// System prompt for metadata extraction.
pub const META_SYSTEM_PROMPT: &str = r#"You read the opening pages of a book and extract its bibliographic metadata.

Answer with ONE JSON object and nothing else:
{"title": string|null, "authors": [string], "publisher": string|null, "isbn": string|null, "description": string|null}

Use null or [] for anything the text does not state. Do not invent values.
"description" is one or two sentences describing the book, in the book's language."#;

/// Render paragraphs as the numbered list the correction prompt expects.
pub fn numbered_paragraphs(paragraphs: &[String]) -> String {
    paragraphs
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] {}", i + 1, p.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\[(\d+)\]\s?").unwrap());

/// Parse a numbered reply back into `expected` paragraphs.
///
/// Returns `None` unless exactly the numbers `1..=expected` appear in order.
pub fn parse_numbered_reply(reply: &str, expected: usize) -> Option<Vec<String>> {
    let marks: Vec<_> = RE_NUMBER.captures_iter(reply).collect();
    if marks.len() != expected {
        return None;
    }
    let mut out = Vec::with_capacity(expected);
    for (i, caps) in marks.iter().enumerate() {
        let n: usize = caps[1].parse().ok()?;
        if n != i + 1 {
            return None;
        }
        let start = caps.get(0)?.end();
        let end = marks
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(reply.len());
        out.push(reply[start..end].trim().to_string());
    }
    Some(out)
}

/// User message for metadata extraction.
pub fn meta_request(opening: &str) -> String {
    format!("Opening pages:\n\n\"\"\"\n{opening}\n\"\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_round_trip() {
        let paras = vec!["alpha".to_string(), " beta ".to_string()];
        let req = numbered_paragraphs(&paras);
        assert_eq!(req, "[1] alpha\n[2] beta");
        assert_eq!(
            parse_numbered_reply("[1] Alpha\n[2] Beta.\n", 2),
            Some(vec!["Alpha".to_string(), "Beta.".to_string()])
        );
    }

    #[test]
    fn numbered_reply_rejects_mismatch() {
        assert_eq!(parse_numbered_reply("[1] only one", 2), None);
        assert_eq!(parse_numbered_reply("[2] b\n[1] a", 2), None);
        assert_eq!(parse_numbered_reply("no numbers", 1), None);
    }

    #[test]
    fn prompts_mention_format() {
        assert!(CORRECTION_SYSTEM_PROMPT.contains("[n]"));
        assert!(META_SYSTEM_PROMPT.contains("\"authors\""));
        assert!(meta_request("text").contains("text"));
    }
}
