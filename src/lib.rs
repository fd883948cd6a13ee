//! # pdf2html-agentic
//!
//! Convert PDF pages into faithful, self-contained HTML documents using
//! Vision Language Models (VLMs) and an iterative judge/refine loop.
//!
//! ## Why this crate?
//!
//! One-shot "PDF page → markup" conversion plateaus quickly: the model gets
//! the text right but drifts on columns, math, and typography, and nothing
//! ever tells it so. This crate closes the loop — each page's HTML is
//! rendered in headless Chrome, vision judges score the raster against the
//! original page image, and the generator refines its output from structured
//! feedback until a fidelity target is met or the retry budget runs out.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Ingest   rasterise pages + extract figures via pdfium (spawn_blocking)
//!  ├─ 3. Analyze  one vision call → document profile → prompt addendum
//!  └─ 4. Per page, until target or budget:
//!        generate HTML → render (headless Chrome + MathJax wait)
//!        → judge A ∥ judge B → specialist cap → verification gate
//!        → accept / refine                      (every step persisted)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2html_agentic::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ConversionConfig::default();
//!     let output = convert("document.pdf", &config).await?;
//!     for page in &output.pages {
//!         println!(
//!             "page {}: score {} after {} iteration(s) → {}",
//!             page.page_index + 1,
//!             page.final_score,
//!             page.iterations_run,
//!             page.final_html_path.display()
//!         );
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2html` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdf2html-agentic = { version = "0.3", default-features = false }
//! ```
//!
//! ## Cost model
//!
//! Each iteration is one generator call plus one to four judge calls, so a
//! page that converges in two iterations costs roughly 6–10 vision requests.
//! Tune `target_score` and `max_retries` to trade fidelity against spend;
//! disabling the second judge and the specialist halves the judging bill.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analysis;
pub mod config;
pub mod convert;
pub mod error;
pub mod feedback;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analysis::{
    build_prompt_addendum, DocumentAnalysis, EquationComplexity, FontClass, LayoutType,
    TextDirection,
};
pub use config::{ConversionConfig, ConversionConfigBuilder, PageSelection};
pub use convert::{check, convert, convert_sync, CheckReport};
pub use error::{ConvertError, IterationError};
pub use feedback::{JudgeFeedback, Verdict};
pub use output::{ConversionOutput, ConversionStats, IterationRecord, PageResult};
pub use progress::ConversionProgressCallback;
