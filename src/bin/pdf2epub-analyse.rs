//! Stage 2 binary: turn page data into metadata, chapters and contents.
//!
//! Run with no arguments and `OCR_OUTPUT_DIR` set to take every setting
//! from the environment (`FINAL_OUTPUT_DIR`, `CORRECTION_MODE`,
//! `WINDOW_TOKENS`, `THREADS`, `LLM_*`).

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2epub::cli::{report_error, CommonArgs, CorrectionArg};
use edgequake_pdf2epub::config::DEFAULT_WINDOW_TOKENS;
use edgequake_pdf2epub::{analyse, AnalysisConfig, AnalysisEnv, LlmConfig};
use std::path::PathBuf;

const AFTER_HELP: &str = r#"LLM CONFIG FILE:
  {"key": "...", "url": "https://api.deepseek.com", "model": "deepseek-chat",
   "token_encoding": "o200k_base", "temperature": 0.3, "top_p": 0.8}

ENVIRONMENT FORM:
  Run with no arguments and OCR_OUTPUT_DIR set to read FINAL_OUTPUT_DIR,
  CORRECTION_MODE, WINDOW_TOKENS, THREADS and the LLM_KEY, LLM_URL,
  LLM_MODEL, LLM_TOKEN_ENCODING, LLM_TEMPERATURE and LLM_TOP_P variables
  instead of a config file.
"#;

/// Analyse extracted pages into a structured book (stage 2 of 3).
#[derive(Parser, Debug)]
#[command(
    name = "pdf2epub-analyse",
    version,
    about = "Analyse extracted pages into a structured book (stage 2 of 3)",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Stage 1 output directory (contains `ocr/` and `assets/`).
    #[arg(env = "OCR_OUTPUT_DIR")]
    ocr_output_dir: PathBuf,

    /// Directory receiving meta.json, chapters/ and index.json.
    #[arg(env = "FINAL_OUTPUT_DIR")]
    final_output_dir: PathBuf,

    /// JSON file with the language-model settings.
    #[arg(long, value_name = "JSON")]
    llm_config: PathBuf,

    /// Correction passes over the extracted text.
    #[arg(long, value_enum, default_value = "none")]
    correction: CorrectionArg,

    /// Request window in tokens.
    #[arg(long, default_value_t = DEFAULT_WINDOW_TOKENS)]
    window_tokens: usize,

    /// Concurrent model requests.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    #[command(flatten)]
    common: CommonArgs,
}

/// Environment form: only the shared flags, read from `PDF2EPUB_*`.
#[derive(Parser, Debug)]
struct EnvCli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() {
    if std::env::args_os().len() == 1 && std::env::var_os("OCR_OUTPUT_DIR").is_some() {
        let common = EnvCli::parse().common;
        common.init_logging();
        if let Err(err) = run_from_env(&common).await {
            report_error(&err);
            std::process::exit(1);
        }
        return;
    }

    let cli = Cli::parse();
    cli.common.init_logging();
    if let Err(err) = run(&cli).await {
        report_error(&err);
        std::process::exit(1);
    }
}

async fn run_from_env(common: &CommonArgs) -> Result<()> {
    let mut env = AnalysisEnv::from_env().context("Invalid analysis environment")?;
    env.config.progress = common.reporter();

    if common.status_lines() {
        println!("Analysing {}", env.ocr_output_dir.display());
    }
    let result = edgequake_pdf2epub::analyse_from_env(&env)
        .await
        .context("Analysis failed")?;
    print(common, &result)
}

async fn run(cli: &Cli) -> Result<()> {
    let llm = LlmConfig::from_json_file(&cli.llm_config)
        .with_context(|| format!("Failed to read LLM config {}", cli.llm_config.display()))?;

    let mut builder = AnalysisConfig::builder()
        .llm(llm)
        .correction(cli.correction.into())
        .window_tokens(cli.window_tokens)
        .threads(cli.threads);
    if let Some(reporter) = cli.common.reporter() {
        builder = builder.progress(reporter);
    }
    let config = builder.build().context("Invalid analysis settings")?;

    if cli.common.status_lines() {
        println!("Analysing {}", cli.ocr_output_dir.display());
    }
    let result = analyse(&cli.ocr_output_dir, &cli.final_output_dir, &config)
        .await
        .with_context(|| format!("Analysis failed for {}", cli.ocr_output_dir.display()))?;
    print(&cli.common, &result)
}

fn print(common: &CommonArgs, result: &edgequake_pdf2epub::AnalysisResult) -> Result<()> {
    common.print_result(
        result,
        &[
            ("output", result.output_path.display().to_string()),
            ("meta", result.meta_path.display().to_string()),
            ("chapters", result.chapter_path.display().to_string()),
            ("footnotes", result.footnotes_merged.to_string()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_form_requires_llm_config() {
        let err = Cli::try_parse_from(["pdf2epub-analyse", "work", "final"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let cli = Cli::try_parse_from([
            "pdf2epub-analyse",
            "work",
            "final",
            "--llm-config",
            "llm.json",
            "--correction",
            "once",
        ])
        .unwrap();
        assert_eq!(cli.llm_config, PathBuf::from("llm.json"));
        assert_eq!(cli.threads, 1);
    }
}
