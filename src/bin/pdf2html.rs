//! CLI binary for pdf2html-agentic.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, renders progress, and turns run outcomes into exit
//! codes: 0 when every page passed, 2 when some pages ended best-effort,
//! 1 for fatal errors.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf2html_agentic::{
    check, convert, ConversionConfig, ConversionProgressCallback, PageSelection, TextDirection,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar across pages, with per-iteration
/// score updates in the message slot and a log line per finished page.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Refining {total_pages} page(s)…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_iteration(&self, page_num: usize, iteration: u32, score: Option<u8>) {
        match score {
            Some(score) => self
                .bar
                .set_message(format!("page {page_num} · iter {iteration} · score {score}")),
            None => self
                .bar
                .set_message(format!("page {page_num} · iter {iteration} · failed")),
        }
    }

    fn on_page_complete(
        &self,
        page_num: usize,
        total: usize,
        success: bool,
        final_score: u8,
        iterations_run: u32,
    ) {
        let tick = if success { green("✓") } else { cyan("⚠") };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  score {:>3}  {}",
            tick,
            page_num,
            total,
            final_score,
            dim(&format!("{iterations_run} iteration(s)")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, passed: usize) {
        self.bar.finish_and_clear();
        let failed = total_pages.saturating_sub(passed);
        if failed == 0 {
            eprintln!(
                "{} {} page(s) reached the fidelity target",
                green("✔"),
                bold(&passed.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} page(s) reached the target  ({} best-effort)",
                cyan("⚠"),
                bold(&passed.to_string()),
                total_pages,
                failed,
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a whole document
  pdf2html convert paper.pdf

  # First three pages, higher fidelity bar, more attempts
  pdf2html convert --pages 1-3 --target 90 --max-retries 8 paper.pdf

  # Right-to-left document with an explicit language
  pdf2html convert --direction rtl --language Arabic report.pdf

  # Convert from URL into a chosen directory
  pdf2html convert https://arxiv.org/pdf/1706.03762 --output ./runs

  # Two independent judges (second one from another provider)
  PDF2HTML_JUDGE_PROVIDER=anthropic pdf2html convert paper.pdf

  # Validate credentials and the headless browser
  pdf2html check

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY            OpenAI API key (generator + judge A)
  ANTHROPIC_API_KEY         Anthropic API key
  GEMINI_API_KEY            Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER    Override generator provider
  EDGEQUAKE_MODEL           Override generator model ID
  PDF2HTML_JUDGE_PROVIDER   Second judge provider (enables cross-model judging)
  PDF2HTML_JUDGE_MODEL      Second judge model ID
  PDF2HTML_TARGET           Fidelity target (same as --target)
  PDF2HTML_MAX_RETRIES      Iteration budget (same as --max-retries)
  PDF2HTML_DPI              Rasterisation DPI (same as --dpi)
  PDF2HTML_OUTPUT           Output directory (same as --output)

OUTPUT LAYOUT (per document):
  <output>/<document>/
    document_analysis.json    inferred document profile
    custom_prompt.md          generator prompt addendum
    page_NNN.png              rasterised source page
    page_NNN/
      iteration_KK.html       generator output per step
      rendered_KK.png         browser raster per step
      feedback_KK.json        judge feedback per step
      final.html              chosen artifact

EXIT CODES:
  0  all pages reached the fidelity target
  2  some pages ended best-effort (budget exhausted)
  1  fatal error (bad input, missing credentials, no browser)
"#;

/// Convert PDF pages to faithful HTML using Vision LLMs and a judge/refine loop.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2html",
    version,
    about = "Convert PDF pages to faithful HTML using Vision LLMs and a judge/refine loop",
    long_about = "Convert PDF documents (local files or URLs) into per-page, self-contained HTML \
whose rendered appearance closely matches the original pages. Each page is refined iteratively: \
generated HTML is rendered in headless Chrome, compared against the page image by vision judges, \
and regenerated from their feedback until a fidelity target is met.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a PDF into per-page HTML documents.
    Convert(ConvertArgs),
    /// Validate model credentials and the headless browser. Exit 0|1.
    Check,
    /// Print the version line.
    Version,
}

#[derive(clap::Args, Debug)]
struct ConvertArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Page selection: all, 5, 3-15, or 1,3,5,7 (1-based).
    #[arg(long, env = "PDF2HTML_PAGES", default_value = "all")]
    pages: String,

    /// Composite fidelity score a page must reach (0–100).
    #[arg(long, env = "PDF2HTML_TARGET", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    target: u8,

    /// Maximum generate→render→judge iterations per page.
    #[arg(long, env = "PDF2HTML_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// Output directory root; the document gets its own subdirectory.
    #[arg(short, long, env = "PDF2HTML_OUTPUT", default_value = "output")]
    output: PathBuf,

    /// Primary-language override fed to the analyzer (e.g. Arabic).
    #[arg(long, env = "PDF2HTML_LANGUAGE")]
    language: Option<String>,

    /// Text-direction override: rtl or ltr.
    #[arg(long, env = "PDF2HTML_DIRECTION", value_enum)]
    direction: Option<DirectionArg>,

    /// Rasterisation DPI (72–600).
    #[arg(long, env = "PDF2HTML_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Generator model ID (e.g. gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Generator provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Second judge provider; enables cross-model judging.
    #[arg(long, env = "PDF2HTML_JUDGE_PROVIDER")]
    judge_provider: Option<String>,

    /// Second judge model ID.
    #[arg(long, env = "PDF2HTML_JUDGE_MODEL")]
    judge_model: Option<String>,

    /// Weight of judge A in combined scores (judge B gets the rest).
    #[arg(long, env = "PDF2HTML_JUDGE_WEIGHT_A", default_value_t = 0.5)]
    judge_weight_a: f32,

    /// Disable the equation specialist.
    #[arg(long, env = "PDF2HTML_NO_SPECIALIST")]
    no_specialist: bool,

    /// Disable the verification gate.
    #[arg(long, env = "PDF2HTML_NO_VERIFICATION")]
    no_verification: bool,

    /// Re-process pages that already have a final.html.
    #[arg(long)]
    force: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2HTML_PASSWORD")]
    password: Option<String>,

    /// Disable the progress bar.
    #[arg(long, env = "PDF2HTML_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2HTML_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2HTML_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DirectionArg {
    Rtl,
    Ltr,
}

impl From<DirectionArg> for TextDirection {
    fn from(v: DirectionArg) -> Self {
        match v {
            DirectionArg::Rtl => TextDirection::Rtl,
            DirectionArg::Ltr => TextDirection::Ltr,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Convert(args) => match run_convert(args).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("{} {:#}", red("✘"), e);
                ExitCode::from(1)
            }
        },
        Command::Check => run_check().await,
        Command::Version => {
            println!("pdf2html {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
    }
}

async fn run_convert(args: ConvertArgs) -> Result<ExitCode> {
    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !args.quiet && !args.no_progress;
    let filter = if args.verbose {
        "debug"
    } else if args.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let config = build_config(&args, show_progress)?;

    let output = convert(&args.input, &config)
        .await
        .context("Conversion failed")?;

    if !args.quiet {
        eprintln!(
            "   {}  {}/{} pages passed  avg {:.1} iterations  {}ms  →  {}",
            dim("summary"),
            output.stats.passed_pages,
            output.stats.total_pages,
            output.stats.average_iterations,
            output.stats.total_duration_ms,
            bold(&output.document_dir.display().to_string()),
        );
    }

    if output.stats.best_effort_pages > 0 {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run_check() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")))
        .with_writer(io::stderr)
        .init();

    let config = ConversionConfig::default();
    let report = check(&config).await;

    match &report.generator {
        Ok(name) => println!("{} generator provider: {}", green("✓"), name),
        Err(e) => println!("{} generator provider: {}", red("✗"), e),
    }
    match &report.judge {
        Ok(Some(name)) => println!("{} second judge: {}", green("✓"), name),
        Ok(None) => println!("{} second judge: not configured (single-judge mode)", dim("·")),
        Err(e) => println!("{} second judge: {}", red("✗"), e),
    }
    match &report.browser {
        Ok(()) => println!("{} headless Chrome: launched", green("✓")),
        Err(e) => println!("{} headless Chrome: {}", red("✗"), e),
    }

    if report.all_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

/// Map CLI args to `ConversionConfig`.
fn build_config(args: &ConvertArgs, show_progress: bool) -> Result<ConversionConfig> {
    let pages = parse_pages(&args.pages)?;

    let mut builder = ConversionConfig::builder()
        .dpi(args.dpi)
        .target_score(args.target)
        .max_retries(args.max_retries)
        .pages(pages)
        .output_dir(args.output.clone())
        .force(args.force)
        .judge_weight_a(args.judge_weight_a)
        .equation_specialist(!args.no_specialist)
        .verification_gate(!args.no_verification);

    if let Some(ref language) = args.language {
        builder = builder.language_override(language.clone());
    }
    if let Some(direction) = args.direction {
        builder = builder.direction_override(direction.into());
    }
    if let Some(ref model) = args.model {
        builder = builder.generator_model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.generator_provider_name(provider.clone());
    }
    if let Some(ref judge) = args.judge_provider {
        builder = builder.judge_provider_name(judge.clone());
    }
    if let Some(ref judge_model) = args.judge_model {
        builder = builder.judge_model(judge_model.clone());
    }
    if let Some(ref password) = args.password {
        builder = builder.password(password.clone());
    }
    if show_progress {
        builder = builder.progress_callback(CliProgressCallback::new());
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start.trim().parse().context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .context(format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        for &p in &pages {
            if p < 1 {
                anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
            }
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pages_variants() {
        assert_eq!(parse_pages("all").unwrap(), PageSelection::All);
        assert_eq!(parse_pages("5").unwrap(), PageSelection::Single(5));
        assert_eq!(parse_pages("3-15").unwrap(), PageSelection::Range(3, 15));
        assert_eq!(
            parse_pages("1,3,5").unwrap(),
            PageSelection::Set(vec![1, 3, 5])
        );
    }

    #[test]
    fn parse_pages_rejects_bad_input() {
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("9-2").is_err());
        assert!(parse_pages("x").is_err());
        assert!(parse_pages("1,zero").is_err());
    }
}
