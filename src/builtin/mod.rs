//! Engines used when a stage config carries no delegate of its own.
//!
//! | Stage | Engine | Backend |
//! |-------|--------|---------|
//! | 1 | [`PdfiumExtractor`] | pdfium text layer and embedded images |
//! | 2 | [`LlmAnalyser`] | text rules plus an OpenAI-compatible chat endpoint |
//! | 3 | [`EpubWriter`] | EPUB 2 archive via `zip` |

pub mod analyser;
pub mod chat;
pub mod epub;
pub mod pdfium;
pub mod prompts;
pub mod text;

pub use analyser::LlmAnalyser;
pub use chat::{ChatClient, ChatMessage, OpenAiCompatibleClient};
pub use epub::EpubWriter;
pub use pdfium::PdfiumExtractor;
pub use text::TokenCounter;
