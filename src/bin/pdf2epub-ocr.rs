//! Stage 1 binary: extract page data and assets from a PDF.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2epub::cli::{report_error, CommonArgs, DeviceArg};
use edgequake_pdf2epub::{extract, ExtractionConfig};
use std::path::PathBuf;

/// Extract page data and embedded assets from a PDF (stage 1 of 3).
#[derive(Parser, Debug)]
#[command(
    name = "pdf2epub-ocr",
    version,
    about = "Extract page data and assets from a PDF (stage 1 of 3)",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto
)]
struct Cli {
    /// Source PDF file.
    pdf_path: PathBuf,

    /// Directory receiving `ocr/` and `assets/`.
    output_dir: PathBuf,

    /// Directory holding the extraction engine's model files.
    model_dir: PathBuf,

    /// Execution device for the extraction engine.
    #[arg(long, env = "PDF2EPUB_DEVICE", value_enum, default_value = "cpu")]
    device: DeviceArg,

    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cli.common.init_logging();
    if let Err(err) = run(&cli).await {
        report_error(&err);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let mut builder = ExtractionConfig::builder().device(cli.device.into());
    if let Some(reporter) = cli.common.reporter() {
        builder = builder.progress(reporter);
    }
    let config = builder.build().context("Invalid extraction settings")?;

    if cli.common.status_lines() {
        println!("Extracting {}", cli.pdf_path.display());
    }

    let result = extract(&cli.pdf_path, &cli.output_dir, &cli.model_dir, &config)
        .await
        .with_context(|| format!("Extraction failed for {}", cli.pdf_path.display()))?;

    cli.common.print_result(
        &result,
        &[
            ("page data", result.ocr_path.display().to_string()),
            ("assets", result.assets_path.display().to_string()),
        ],
    )
}
