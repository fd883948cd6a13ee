//! Output types: per-page results, per-iteration records, run statistics,
//! and the naming scheme of the persisted artifact tree.
//!
//! Everything the loop produces lands on disk before it advances:
//!
//! ```text
//! <output>/<document>/
//!   document_analysis.json        inferred document profile
//!   custom_prompt.md              generator prompt addendum
//!   page_NNN.png                  rasterized source page
//!   page_NNN/
//!     iteration_KK.html           generator output per step
//!     rendered_KK.png             renderer output per step
//!     feedback_KK.json            judge feedback per step
//!     final.html                  chosen artifact
//! ```
//!
//! Page numbers in file names are 1-based (matching the `--pages` surface);
//! `page_index` fields stay 0-based. The naming helpers here are the single
//! source of truth for both the writers in the loop and the idempotence check
//! that reconstructs results from an existing tree.

use crate::error::IterationError;
use crate::feedback::JudgeFeedback;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Artifacts of one generate→render→judge step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number.
    pub iteration: u32,
    /// Persisted generator output; absent when the generator failed.
    pub html_path: Option<PathBuf>,
    /// Persisted browser raster; absent when the render step failed.
    pub rendered_path: Option<PathBuf>,
    /// Judge feedback (zero-scored for failed stages). Always persisted.
    pub feedback: JudgeFeedback,
    /// The stage failure, if any, that zeroed this iteration.
    pub error: Option<IterationError>,
}

/// Terminal record for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 0-based page index.
    pub page_index: usize,
    /// True when an iteration met the target (and passed the gate, if enabled).
    pub success: bool,
    /// Composite score of the promoted iteration.
    pub final_score: u8,
    /// Number of iterations executed (≤ `max_retries`).
    pub iterations_run: u32,
    /// Path of the promoted `final.html`.
    pub final_html_path: PathBuf,
    /// Every iteration, in order.
    pub iterations: Vec<IterationRecord>,
}

/// Whole-run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Pages selected for conversion.
    pub total_pages: usize,
    /// Pages that met the target.
    pub passed_pages: usize,
    /// Pages that exhausted their budget (best iteration promoted anyway).
    pub best_effort_pages: usize,
    /// Mean iterations per page.
    pub average_iterations: f64,
    /// Wall-clock duration of the whole run.
    pub total_duration_ms: u64,
}

/// Result of converting a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Per-page results in page order.
    pub pages: Vec<PageResult>,
    /// The document profile the generator was conditioned on.
    pub analysis: crate::analysis::DocumentAnalysis,
    /// Run statistics.
    pub stats: ConversionStats,
    /// Root of the persisted artifact tree for this document.
    pub document_dir: PathBuf,
}

// ── Artifact naming ──────────────────────────────────────────────────────

/// `page_NNN.png` — the rasterized source page (1-based page number).
pub fn page_image_name(page_index: usize) -> String {
    format!("page_{:03}.png", page_index + 1)
}

/// `page_NNN/` — the per-page artifact directory (1-based page number).
pub fn page_dir(document_dir: &Path, page_index: usize) -> PathBuf {
    document_dir.join(format!("page_{:03}", page_index + 1))
}

/// `iteration_KK.html` (1-based iteration number).
pub fn iteration_html_name(iteration: u32) -> String {
    format!("iteration_{:02}.html", iteration)
}

/// `rendered_KK.png` (1-based iteration number).
pub fn rendered_image_name(iteration: u32) -> String {
    format!("rendered_{:02}.png", iteration)
}

/// `feedback_KK.json` (1-based iteration number).
pub fn feedback_name(iteration: u32) -> String {
    format!("feedback_{:02}.json", iteration)
}

/// `final.html` — the promoted artifact.
pub const FINAL_HTML: &str = "final.html";

/// `document_analysis.json` — the persisted document profile.
pub const ANALYSIS_FILE: &str = "document_analysis.json";

/// `custom_prompt.md` — the persisted prompt addendum.
pub const ADDENDUM_FILE: &str = "custom_prompt.md";
