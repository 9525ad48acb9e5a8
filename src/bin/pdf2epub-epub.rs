//! Stage 3 binary: package analysis output into an EPUB.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2epub::cli::{dim, report_error, CommonArgs, LatexRenderArg, TableRenderArg};
use edgequake_pdf2epub::{package, PackagingConfig};
use std::path::PathBuf;

/// Package analysis output into an EPUB file (stage 3 of 3).
#[derive(Parser, Debug)]
#[command(
    name = "pdf2epub-epub",
    version,
    about = "Package analysis output into an EPUB (stage 3 of 3)",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto
)]
struct Cli {
    /// Stage 2 output directory (meta.json, chapters/, index.json).
    from_dir: PathBuf,

    /// Destination EPUB file. Parent directories are created.
    epub_path: PathBuf,

    /// Language tag written into the book.
    #[arg(long, env = "PDF2EPUB_LANGUAGE", default_value = "zh")]
    language: String,

    /// How tables are rendered.
    #[arg(long, env = "PDF2EPUB_TABLE_RENDER", value_enum, default_value = "html")]
    table_render: TableRenderArg,

    /// How formulas are rendered.
    #[arg(long, env = "PDF2EPUB_LATEX_RENDER", value_enum, default_value = "mathml")]
    latex_render: LatexRenderArg,

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
    let mut builder = PackagingConfig::builder()
        .language(&cli.language)
        .table_render(cli.table_render.into())
        .latex_render(cli.latex_render.into());
    if let Some(reporter) = cli.common.reporter() {
        builder = builder.progress(reporter);
    }
    let config = builder.build().context("Invalid packaging settings")?;

    if cli.common.status_lines() {
        println!("Packaging {}", cli.from_dir.display());
    }

    let result = package(&cli.from_dir, &cli.epub_path, &config)
        .await
        .with_context(|| format!("Packaging failed for {}", cli.epub_path.display()))?;

    if !result.has_index && cli.common.status_lines() {
        println!(
            "{}",
            dim("index.json not found: the book has no table of contents")
        );
    }

    cli.common.print_result(
        &result,
        &[
            ("epub", result.epub_path.display().to_string()),
            ("size", format!("{:.2} MB", result.size_mb())),
            ("contents", result.has_index.to_string()),
        ],
    )
}
