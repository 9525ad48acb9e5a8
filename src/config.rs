//! Configuration types for the three pipeline stages.
//!
//! Each stage has its own config struct built through a builder, the same
//! way [`AnalysisConfig::builder()`] validates its knobs once on `build()`
//! instead of at every use site. A config may also carry an injected engine
//! (`Arc<dyn …>`) and a progress reporter; when no engine is injected the
//! stage falls back to the built-in one from [`crate::builtin`].
//!
//! Stage 2 additionally has an environment-driven form, [`AnalysisEnv`],
//! which assembles the whole invocation from `OCR_OUTPUT_DIR`,
//! `FINAL_OUTPUT_DIR`, `CORRECTION_MODE`, `WINDOW_TOKENS`, `THREADS` and the
//! `LLM_*` variables.

use crate::engine::{Analyser, EpubRenderer, PageExtractor};
use crate::error::Pdf2EpubError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

// ── Defaults ─────────────────────────────────────────────────────────────

/// Default chat endpoint (OpenAI-compatible).
pub const DEFAULT_LLM_URL: &str = "https://api.deepseek.com";
/// Default chat model.
pub const DEFAULT_LLM_MODEL: &str = "deepseek-chat";
/// Default tokenizer encoding name.
pub const DEFAULT_TOKEN_ENCODING: &str = "o200k_base";
/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
/// Default nucleus-sampling parameter.
pub const DEFAULT_TOP_P: f32 = 0.8;
/// Default request window, in tokens.
pub const DEFAULT_WINDOW_TOKENS: usize = 2000;
/// Upper bound for a single paragraph sent for verification, in tokens.
pub const DEFAULT_VERIFY_PARAGRAPH_TOKENS: usize = 512;
/// Smallest request window the analyser accepts.
pub const MIN_WINDOW_TOKENS: usize = 64;

// ── LLM configuration ────────────────────────────────────────────────────

/// Language-model settings handed verbatim to the analysis engine.
///
/// Deserialises from the JSON file given to `pdf2epub-analyse --llm-config`:
///
/// ```json
/// {
///   "key": "sk-...",
///   "url": "https://api.deepseek.com",
///   "model": "deepseek-chat",
///   "token_encoding": "o200k_base",
///   "temperature": 0.3,
///   "top_p": 0.8
/// }
/// ```
///
/// Missing fields take the defaults above.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API credential. `None` for endpoints that need no key.
    pub key: Option<String>,
    /// Base URL of the OpenAI-compatible endpoint.
    pub url: String,
    /// Model identifier.
    pub model: String,
    /// tiktoken encoding (`o200k_base`, `cl100k_base`, ...) the built-in
    /// analyser counts request tokens with.
    pub token_encoding: String,
    /// Sampling temperature (0.0–2.0).
    pub temperature: f32,
    /// Nucleus-sampling parameter (0.0–1.0).
    pub top_p: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            key: None,
            url: DEFAULT_LLM_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            token_encoding: DEFAULT_TOKEN_ENCODING.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("url", &self.url)
            .field("model", &self.model)
            .field("token_encoding", &self.token_encoding)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .finish()
    }
}

impl LlmConfig {
    /// Read and parse a JSON model-configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Pdf2EpubError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Pdf2EpubError::MissingInput {
                what: "model configuration file",
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|e| Pdf2EpubError::io(path, e))?;
        let config: LlmConfig = serde_json::from_str(&raw).map_err(|e| {
            Pdf2EpubError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Assemble the config from the process environment (`LLM_*` variables).
    pub fn from_env() -> Result<Self, Pdf2EpubError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Assemble the config from `LLM_KEY`, `LLM_URL`, `LLM_MODEL`,
    /// `LLM_TOKEN_ENCODING`, `LLM_TEMPERATURE` and `LLM_TOP_P` as returned by
    /// `lookup`. Unset or empty variables take the defaults.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, Pdf2EpubError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let config = Self {
            key: get("LLM_KEY"),
            url: get("LLM_URL").unwrap_or_else(|| DEFAULT_LLM_URL.to_string()),
            model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            token_encoding: get("LLM_TOKEN_ENCODING")
                .unwrap_or_else(|| DEFAULT_TOKEN_ENCODING.to_string()),
            temperature: parse_var(&get, "LLM_TEMPERATURE", DEFAULT_TEMPERATURE)?,
            top_p: parse_var(&get, "LLM_TOP_P", DEFAULT_TOP_P)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), Pdf2EpubError> {
        if self.url.trim().is_empty() {
            return Err(Pdf2EpubError::InvalidConfig("LLM url must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(Pdf2EpubError::InvalidConfig("LLM model must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Pdf2EpubError::InvalidConfig(format!(
                "temperature must be 0.0–2.0, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(Pdf2EpubError::InvalidConfig(format!(
                "top_p must be 0.0–1.0, got {}",
                self.top_p
            )));
        }
        Ok(())
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_var<T, G>(get: &G, name: &str, default: T) -> Result<T, Pdf2EpubError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            Pdf2EpubError::InvalidConfig(format!("{name}={raw:?} is not valid: {e}"))
        }),
        None => Ok(default),
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Execution device for the extraction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Software-only execution. (default)
    #[default]
    Cpu,
    /// Accelerated execution.
    Cuda,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = Pdf2EpubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(Pdf2EpubError::InvalidConfig(format!(
                "unknown device '{other}' (expected cpu or cuda)"
            ))),
        }
    }
}

/// How many text-correction passes the analysis stage requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionMode {
    /// Skip correction entirely. (default)
    #[default]
    No,
    /// One correction pass.
    Once,
    /// Repeated passes until the text stops changing.
    Multiple,
}

/// Correction depth handed to the engine; only exists when correction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionLevel {
    Single,
    Multiple,
}

impl CorrectionMode {
    /// The level to request, or `None` when the correction step is skipped.
    pub fn level(&self) -> Option<CorrectionLevel> {
        match self {
            CorrectionMode::No => None,
            CorrectionMode::Once => Some(CorrectionLevel::Single),
            CorrectionMode::Multiple => Some(CorrectionLevel::Multiple),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionMode::No => "NO",
            CorrectionMode::Once => "ONCE",
            CorrectionMode::Multiple => "MULTIPLE",
        }
    }
}

impl fmt::Display for CorrectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrectionMode {
    type Err = Pdf2EpubError;

    /// Accepts both CLI spellings (`none`, `once`, `multiple`) and the
    /// environment spellings (`NO`, `ONCE`, `MULTIPLE`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no" | "none" => Ok(CorrectionMode::No),
            "once" | "single" => Ok(CorrectionMode::Once),
            "multiple" | "multi" | "detailed" => Ok(CorrectionMode::Multiple),
            other => Err(Pdf2EpubError::InvalidConfig(format!(
                "unknown correction mode '{other}' (expected no, once or multiple)"
            ))),
        }
    }
}

/// How tables are rendered into the EPUB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableRender {
    /// Inline HTML `<table>` markup. (default)
    #[default]
    Html,
    /// The table's clipped image from the source page.
    Clipping,
}

/// How mathematical notation is rendered into the EPUB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatexRender {
    /// MathML markup. (default)
    #[default]
    MathMl,
    /// Vector image.
    Svg,
    /// The formula's clipped image from the source page.
    Clipping,
}

// ── Window budget ────────────────────────────────────────────────────────

/// Token budgets derived from the single `--window-tokens` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowTokens {
    /// Maximum data tokens in one LLM request.
    pub max_request_data_tokens: usize,
    /// Maximum tokens of a single paragraph; longer ones are split.
    pub max_verify_paragraph_tokens: usize,
}

impl WindowTokens {
    pub fn from_window(window_tokens: usize) -> Self {
        Self {
            max_request_data_tokens: window_tokens,
            max_verify_paragraph_tokens: DEFAULT_VERIFY_PARAGRAPH_TOKENS.min(window_tokens),
        }
    }
}

impl Default for WindowTokens {
    fn default() -> Self {
        Self::from_window(DEFAULT_WINDOW_TOKENS)
    }
}

// ── Stage 1 ──────────────────────────────────────────────────────────────

/// Configuration for the extraction stage.
#[derive(Clone, Default)]
pub struct ExtractionConfig {
    /// Device the extractor runs on. Default: [`Device::Cpu`].
    pub device: Device,
    /// Pre-constructed extractor. Default: built-in pdfium extractor.
    pub extractor: Option<Arc<dyn PageExtractor>>,
    /// Progress reporter. Default: none.
    pub progress: Option<ProgressCallback>,
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("device", &self.device)
            .field("extractor", &self.extractor.as_ref().map(|e| e.name().to_string()))
            .field("progress", &self.progress.as_ref().map(|_| "<dyn ProgressReporter>"))
            .finish()
    }
}

impl ExtractionConfig {
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn device(mut self, device: Device) -> Self {
        self.config.device = device;
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn PageExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn progress(mut self, progress: ProgressCallback) -> Self {
        self.config.progress = Some(progress);
        self
    }

    pub fn build(self) -> Result<ExtractionConfig, Pdf2EpubError> {
        Ok(self.config)
    }
}

// ── Stage 2 ──────────────────────────────────────────────────────────────

/// Configuration for the analysis stage.
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Language-model settings, passed verbatim to the engine.
    pub llm: LlmConfig,
    /// Correction passes. Default: [`CorrectionMode::No`].
    pub correction: CorrectionMode,
    /// Request window in tokens. Default: 2000.
    pub window_tokens: usize,
    /// Worker-count hint for the engine. Default: 1.
    ///
    /// Scheduling belongs to the engine; the stage only forwards the number.
    pub threads: usize,
    /// Pre-constructed analyser. Default: built-in [`crate::builtin::LlmAnalyser`].
    pub analyser: Option<Arc<dyn Analyser>>,
    /// Progress reporter. Default: none.
    pub progress: Option<ProgressCallback>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            correction: CorrectionMode::default(),
            window_tokens: DEFAULT_WINDOW_TOKENS,
            threads: 1,
            analyser: None,
            progress: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("llm", &self.llm)
            .field("correction", &self.correction)
            .field("window_tokens", &self.window_tokens)
            .field("threads", &self.threads)
            .field("analyser", &self.analyser.as_ref().map(|a| a.name().to_string()))
            .field("progress", &self.progress.as_ref().map(|_| "<dyn ProgressReporter>"))
            .finish()
    }
}

impl AnalysisConfig {
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// Token budgets derived from `window_tokens`.
    pub fn window(&self) -> WindowTokens {
        WindowTokens::from_window(self.window_tokens)
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn llm(mut self, llm: LlmConfig) -> Self {
        self.config.llm = llm;
        self
    }

    pub fn correction(mut self, mode: CorrectionMode) -> Self {
        self.config.correction = mode;
        self
    }

    pub fn window_tokens(mut self, n: usize) -> Self {
        self.config.window_tokens = n;
        self
    }

    pub fn threads(mut self, n: usize) -> Self {
        self.config.threads = n;
        self
    }

    pub fn analyser(mut self, analyser: Arc<dyn Analyser>) -> Self {
        self.config.analyser = Some(analyser);
        self
    }

    pub fn progress(mut self, progress: ProgressCallback) -> Self {
        self.config.progress = Some(progress);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, Pdf2EpubError> {
        let c = &self.config;
        if c.threads == 0 {
            return Err(Pdf2EpubError::InvalidConfig("threads must be ≥ 1".into()));
        }
        if c.window_tokens < MIN_WINDOW_TOKENS {
            return Err(Pdf2EpubError::InvalidConfig(format!(
                "window must be ≥ {MIN_WINDOW_TOKENS} tokens, got {}",
                c.window_tokens
            )));
        }
        c.llm.validate()?;
        Ok(self.config)
    }
}

/// The environment-driven form of a Stage 2 invocation.
#[derive(Debug, Clone)]
pub struct AnalysisEnv {
    pub ocr_output_dir: PathBuf,
    pub final_output_dir: PathBuf,
    pub config: AnalysisConfig,
}

impl AnalysisEnv {
    /// Number of threads when `THREADS` is unset.
    pub const DEFAULT_THREADS: usize = 4;

    pub fn from_env() -> Result<Self, Pdf2EpubError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Read `OCR_OUTPUT_DIR` and `FINAL_OUTPUT_DIR` (both required),
    /// `CORRECTION_MODE`, `WINDOW_TOKENS`, `THREADS` and the `LLM_*`
    /// variables through `lookup`.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, Pdf2EpubError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let (Some(ocr_output_dir), Some(final_output_dir)) =
            (get("OCR_OUTPUT_DIR"), get("FINAL_OUTPUT_DIR"))
        else {
            return Err(Pdf2EpubError::InvalidConfig(
                "OCR_OUTPUT_DIR and FINAL_OUTPUT_DIR must both be set".into(),
            ));
        };

        let correction = match get("CORRECTION_MODE") {
            Some(raw) => raw.parse::<CorrectionMode>()?,
            None => CorrectionMode::No,
        };
        let window_tokens = parse_var(&get, "WINDOW_TOKENS", DEFAULT_WINDOW_TOKENS)?;
        let threads = parse_var(&get, "THREADS", Self::DEFAULT_THREADS)?;
        let llm = LlmConfig::from_env_with(&get)?;

        let config = AnalysisConfig::builder()
            .llm(llm)
            .correction(correction)
            .window_tokens(window_tokens)
            .threads(threads)
            .build()?;

        Ok(Self {
            ocr_output_dir: PathBuf::from(ocr_output_dir),
            final_output_dir: PathBuf::from(final_output_dir),
            config,
        })
    }
}

// ── Stage 3 ──────────────────────────────────────────────────────────────

/// Configuration for the packaging stage.
#[derive(Clone)]
pub struct PackagingConfig {
    /// Language tag written into the package. Default: "zh".
    pub language: String,
    /// Table rendering. Default: [`TableRender::Html`].
    pub table_render: TableRender,
    /// Formula rendering. Default: [`LatexRender::MathMl`].
    pub latex_render: LatexRender,
    /// Pre-constructed renderer. Default: built-in [`crate::builtin::EpubWriter`].
    pub renderer: Option<Arc<dyn EpubRenderer>>,
    /// Progress reporter. Default: none.
    pub progress: Option<ProgressCallback>,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            language: "zh".to_string(),
            table_render: TableRender::default(),
            latex_render: LatexRender::default(),
            renderer: None,
            progress: None,
        }
    }
}

impl fmt::Debug for PackagingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackagingConfig")
            .field("language", &self.language)
            .field("table_render", &self.table_render)
            .field("latex_render", &self.latex_render)
            .field("renderer", &self.renderer.as_ref().map(|r| r.name().to_string()))
            .field("progress", &self.progress.as_ref().map(|_| "<dyn ProgressReporter>"))
            .finish()
    }
}

impl PackagingConfig {
    pub fn builder() -> PackagingConfigBuilder {
        PackagingConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PackagingConfig`].
#[derive(Debug)]
pub struct PackagingConfigBuilder {
    config: PackagingConfig,
}

impl PackagingConfigBuilder {
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = language.into();
        self
    }

    pub fn table_render(mut self, mode: TableRender) -> Self {
        self.config.table_render = mode;
        self
    }

    pub fn latex_render(mut self, mode: LatexRender) -> Self {
        self.config.latex_render = mode;
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn EpubRenderer>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    pub fn progress(mut self, progress: ProgressCallback) -> Self {
        self.config.progress = Some(progress);
        self
    }

    pub fn build(self) -> Result<PackagingConfig, Pdf2EpubError> {
        if self.config.language.trim().is_empty() {
            return Err(Pdf2EpubError::InvalidConfig(
                "language tag must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn llm_defaults() {
        let c = LlmConfig::default();
        assert_eq!(c.url, "https://api.deepseek.com");
        assert_eq!(c.model, "deepseek-chat");
        assert_eq!(c.token_encoding, "o200k_base");
        assert_eq!(c.temperature, 0.3);
        assert_eq!(c.top_p, 0.8);
        assert!(c.key.is_none());
    }

    #[test]
    fn llm_debug_redacts_key() {
        let c = LlmConfig {
            key: Some("sk-secret".into()),
            ..LlmConfig::default()
        };
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn llm_from_json_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm.json");
        std::fs::write(&path, r#"{"key": "k", "model": "m", "temperature": 0.5}"#).unwrap();
        let c = LlmConfig::from_json_file(&path).unwrap();
        assert_eq!(c.key.as_deref(), Some("k"));
        assert_eq!(c.model, "m");
        assert_eq!(c.temperature, 0.5);
        assert_eq!(c.url, DEFAULT_LLM_URL);
    }

    #[test]
    fn llm_from_json_file_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = LlmConfig::from_json_file(dir.path().join("nope.json")).unwrap_err();
        assert!(missing.is_missing_input());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        let err = LlmConfig::from_json_file(&bad).unwrap_err();
        assert!(matches!(err, Pdf2EpubError::InvalidConfig(_)));
    }

    #[test]
    fn llm_from_env_defaults_and_overrides() {
        let c = LlmConfig::from_env_with(lookup(&[])).unwrap();
        assert_eq!(c, LlmConfig::default());

        let c = LlmConfig::from_env_with(lookup(&[
            ("LLM_KEY", "abc"),
            ("LLM_URL", "http://localhost:8000/v1"),
            ("LLM_TEMPERATURE", "0.1"),
            ("LLM_TOP_P", ""),
        ]))
        .unwrap();
        assert_eq!(c.key.as_deref(), Some("abc"));
        assert_eq!(c.url, "http://localhost:8000/v1");
        assert_eq!(c.temperature, 0.1);
        assert_eq!(c.top_p, DEFAULT_TOP_P);
    }

    #[test]
    fn llm_from_env_rejects_garbage() {
        let err = LlmConfig::from_env_with(lookup(&[("LLM_TEMPERATURE", "hot")])).unwrap_err();
        assert!(err.to_string().contains("LLM_TEMPERATURE"));
        let err = LlmConfig::from_env_with(lookup(&[("LLM_TOP_P", "1.5")])).unwrap_err();
        assert!(err.to_string().contains("top_p"));
    }

    #[test]
    fn correction_mode_parsing() {
        assert_eq!("NO".parse::<CorrectionMode>().unwrap(), CorrectionMode::No);
        assert_eq!("none".parse::<CorrectionMode>().unwrap(), CorrectionMode::No);
        assert_eq!("ONCE".parse::<CorrectionMode>().unwrap(), CorrectionMode::Once);
        assert_eq!("Detailed".parse::<CorrectionMode>().unwrap(), CorrectionMode::Multiple);
        assert!("twice".parse::<CorrectionMode>().is_err());
        assert_eq!(CorrectionMode::No.level(), None);
        assert_eq!(CorrectionMode::Once.level(), Some(CorrectionLevel::Single));
    }

    #[test]
    fn device_parsing() {
        assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("cuda".parse::<Device>().unwrap(), Device::Cuda);
        assert!("tpu".parse::<Device>().is_err());
    }

    #[test]
    fn window_tokens_derivation() {
        let w = WindowTokens::from_window(2000);
        assert_eq!(w.max_request_data_tokens, 2000);
        assert_eq!(w.max_verify_paragraph_tokens, 512);
        let small = WindowTokens::from_window(100);
        assert_eq!(small.max_verify_paragraph_tokens, 100);
    }

    #[test]
    fn analysis_builder_validation() {
        assert!(AnalysisConfig::builder().threads(0).build().is_err());
        assert!(AnalysisConfig::builder().window_tokens(10).build().is_err());
        let c = AnalysisConfig::builder()
            .threads(3)
            .window_tokens(4000)
            .correction(CorrectionMode::Once)
            .build()
            .unwrap();
        assert_eq!(c.threads, 3);
        assert_eq!(c.window().max_request_data_tokens, 4000);
    }

    #[test]
    fn analysis_env_requires_dirs() {
        let err = AnalysisEnv::from_env_with(lookup(&[("OCR_OUTPUT_DIR", "/a")])).unwrap_err();
        assert!(err.to_string().contains("FINAL_OUTPUT_DIR"));
    }

    #[test]
    fn analysis_env_defaults() {
        let env = AnalysisEnv::from_env_with(lookup(&[
            ("OCR_OUTPUT_DIR", "/work/ocr"),
            ("FINAL_OUTPUT_DIR", "/work/final"),
        ]))
        .unwrap();
        assert_eq!(env.ocr_output_dir, PathBuf::from("/work/ocr"));
        assert_eq!(env.config.correction, CorrectionMode::No);
        assert_eq!(env.config.window_tokens, 2000);
        assert_eq!(env.config.threads, AnalysisEnv::DEFAULT_THREADS);
        assert_eq!(env.config.llm.model, DEFAULT_LLM_MODEL);
    }

    #[test]
    fn analysis_env_overrides() {
        let env = AnalysisEnv::from_env_with(lookup(&[
            ("OCR_OUTPUT_DIR", "/in"),
            ("FINAL_OUTPUT_DIR", "/out"),
            ("CORRECTION_MODE", "ONCE"),
            ("WINDOW_TOKENS", "3000"),
            ("THREADS", "2"),
            ("LLM_MODEL", "other-model"),
        ]))
        .unwrap();
        assert_eq!(env.config.correction, CorrectionMode::Once);
        assert_eq!(env.config.window_tokens, 3000);
        assert_eq!(env.config.threads, 2);
        assert_eq!(env.config.llm.model, "other-model");

        let err = AnalysisEnv::from_env_with(lookup(&[
            ("OCR_OUTPUT_DIR", "/in"),
            ("FINAL_OUTPUT_DIR", "/out"),
            ("THREADS", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("THREADS"));
    }

    #[test]
    fn packaging_defaults_and_validation() {
        let c = PackagingConfig::default();
        assert_eq!(c.language, "zh");
        assert_eq!(c.table_render, TableRender::Html);
        assert_eq!(c.latex_render, LatexRender::MathMl);
        assert!(PackagingConfig::builder().language("  ").build().is_err());
    }
}
