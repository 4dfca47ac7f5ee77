//! CLI binary for edgequake-tex2md.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ParserConfig`, parses one or more source trees and prints the result.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_tex2md::assets::rasterize_figures;
use edgequake_tex2md::{
    number_units, parse_many, render_markdown, ArticleMetadata, ParseOutput, ParseProgressCallback,
    ParseStage, ParseStats, ParserConfig, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over all source trees; the message follows whichever document
/// last changed stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:30.green/238}] {pos}/{len}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Parsing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

fn short_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

impl ParseProgressCallback for CliProgressCallback {
    fn on_stage(&self, dir: &Path, stage: ParseStage) {
        self.bar.set_message(format!("{}: {stage}", short_name(dir)));
    }

    fn on_parse_complete(&self, dir: &Path, unit_count: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            dir.display(),
            dim(&format!("{unit_count} units"))
        ));
        self.bar.inc(1);
    }

    fn on_parse_error(&self, dir: &Path, error: &str) {
        self.bar
            .println(format!("  {} {}  {}", red("✗"), dir.display(), red(error)));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parse an extracted arXiv source tree (stdout)
  tex2md paper/source

  # Write Markdown to a file, with title and abstract units
  tex2md paper/source -o paper.md --title "Attention Is All You Need" --summary "$(cat abstract.txt)"

  # Structured output: every unit with its kind and order
  tex2md --json paper/source > units.json

  # Re-parse after editing sources (ignore the cached flattened file)
  tex2md --no-cache paper/source

  # Several trees, two at a time, concatenated in argument order
  tex2md -c 2 part1/ part2/ part3/

ENVIRONMENT VARIABLES:
  TEX2MD_PANDOC  Path to the pandoc binary (otherwise found on PATH)
  RUST_LOG       Log filter, overrides -v / -q

SIDE ARTIFACTS:
  Unless --no-artifacts is given, each source directory receives
  __main_full__.tex (the flattened source, reused on the next run) and
  __main_full__.md (the rendered Markdown).
"#;

/// Parse LaTeX article source trees into Markdown content units.
#[derive(Parser, Debug)]
#[command(
    name = "tex2md",
    version,
    about = "Parse LaTeX article source trees into ordered Markdown content units",
    long_about = "Flatten a LaTeX source tree, convert its prose with pandoc and rebuild \
figures, tables, numbered equations, cross-references and citations around it. \
The result is an ordered list of typed units (headings, paragraphs, figures, …).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Source directories, each holding one article's .tex files.
    #[arg(required = true)]
    dirs: Vec<PathBuf>,

    /// Write Markdown (or JSON) to this file instead of stdout.
    #[arg(short, long, env = "TEX2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Output the units, warnings and stats as JSON.
    #[arg(long, env = "TEX2MD_JSON")]
    json: bool,

    /// Article title; emitted as the leading title unit.
    #[arg(long)]
    title: Option<String>,

    /// Article abstract; emitted after the title.
    #[arg(long)]
    summary: Option<String>,

    /// Path to the pandoc binary.
    #[arg(long)]
    pandoc: Option<PathBuf>,

    /// Ignore a previously flattened source file.
    #[arg(long, env = "TEX2MD_NO_CACHE")]
    no_cache: bool,

    /// Do not write side artifacts into the source directories.
    #[arg(long, env = "TEX2MD_NO_ARTIFACTS")]
    no_artifacts: bool,

    /// Keep content before the first numbered section.
    #[arg(long)]
    keep_front_matter: bool,

    /// Convert bitmap figures to PNG and point the units at them.
    #[arg(long)]
    rasterize_figures: bool,

    /// Number of source trees parsed at once.
    #[arg(short, long, env = "TEX2MD_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Disable the progress bar.
    #[arg(long, env = "TEX2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TEX2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TEX2MD_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar provides the feedback while it is shown; keep the library quiet.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress = show_progress.then(|| CliProgressCallback::new(cli.dirs.len()));
    let config = build_config(
        &cli,
        progress.clone().map(|cb| cb as Arc<dyn ParseProgressCallback>),
    )?;

    // ── Parse ────────────────────────────────────────────────────────────
    let start = Instant::now();
    let results = parse_many(cli.dirs.clone(), &config)
        .await
        .context("Could not start parsing")?;
    if let Some(ref cb) = progress {
        cb.bar.finish_and_clear();
    }

    let mut outputs = Vec::with_capacity(results.len());
    let mut failed = 0;
    for (dir, result) in cli.dirs.iter().zip(results) {
        match result {
            Ok(mut output) => {
                if cli.rasterize_figures {
                    let warnings = rasterize_figures(&mut output.units, dir);
                    output.warnings.extend(warnings);
                }
                outputs.push(output);
            }
            Err(e) => {
                failed += 1;
                if progress.is_none() {
                    eprintln!("{} {}: {e}", red("✗"), dir.display());
                }
            }
        }
    }

    let combined = merge(outputs, metadata(&cli));
    write_output(&cli, &combined)?;

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet && !cli.json {
        eprintln!(
            "{} {} units from {} source trees  {}",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&combined.units.len().to_string()),
            cli.dirs.len() - failed,
            dim(&format!("{}ms", start.elapsed().as_millis())),
        );
        for warning in &combined.warnings {
            eprintln!("   {} {warning}", dim("warning:"));
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} source trees failed", cli.dirs.len());
    }
    Ok(())
}

/// Map CLI args to `ParserConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ParserConfig> {
    let mut builder = ParserConfig::builder()
        .use_flatten_cache(!cli.no_cache)
        .write_artifacts(!cli.no_artifacts)
        .trim_front_matter(!cli.keep_front_matter)
        .concurrency(cli.concurrency);
    if let Some(ref pandoc) = cli.pandoc {
        builder = builder.pandoc_path(pandoc);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn metadata(cli: &Cli) -> Option<ArticleMetadata> {
    if cli.title.is_none() && cli.summary.is_none() {
        return None;
    }
    Some(ArticleMetadata {
        title: cli.title.clone().unwrap_or_default(),
        summary: cli.summary.clone().unwrap_or_default(),
        ..Default::default()
    })
}

/// Concatenate per-tree outputs in argument order into one document.
fn merge(outputs: Vec<ParseOutput>, metadata: Option<ArticleMetadata>) -> ParseOutput {
    let single = outputs.len() == 1;
    let mut combined = ParseOutput {
        units: metadata.map(|m| m.front_units()).unwrap_or_default(),
        warnings: Vec::new(),
        stats: ParseStats::default(),
        flattened_path: None,
        markdown_path: None,
    };
    for output in outputs {
        if single {
            combined.flattened_path = output.flattened_path;
            combined.markdown_path = output.markdown_path;
        }
        combined.units.extend(output.units);
        combined.warnings.extend(output.warnings);
        let s = &mut combined.stats;
        s.source_files += output.stats.source_files;
        s.flattened_bytes += output.stats.flattened_bytes;
        s.citations += output.stats.citations;
        s.labels += output.stats.labels;
        s.blocks += output.stats.blocks;
        s.duration_ms += output.stats.duration_ms;
    }
    number_units(&mut combined.units);
    combined.stats.units = combined.units.len();
    combined
}

fn write_output(cli: &Cli, output: &ParseOutput) -> Result<()> {
    let mut text = if cli.json {
        serde_json::to_string_pretty(output).context("Failed to serialise output")?
    } else {
        render_markdown(&output.units, false)
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }

    match cli.output {
        Some(ref path) => std::fs::write(path, text)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => io::stdout()
            .lock()
            .write_all(text.as_bytes())
            .context("Failed to write to stdout"),
    }
}
