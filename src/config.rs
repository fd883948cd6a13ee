//! Configuration types for PDF-to-HTML conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across tasks, serialise them for logging, and
//! diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::analysis::TextDirection;
use crate::error::ConvertError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Configuration for a PDF-to-HTML conversion run.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2html_agentic::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .dpi(300)
///     .target_score(85)
///     .max_retries(5)
///     .generator_model("gpt-4.1")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–600. Default: 300.
    ///
    /// The refinement loop compares the browser raster against this image, so
    /// it needs more pixel density than a transcription pipeline would. 300 DPI
    /// keeps sub-pixel typography (superscripts, thin rules, small math) visible
    /// to the judges without exceeding typical API upload limits.
    pub dpi: u32,

    /// Composite fidelity score a page must reach to be accepted. Range: 0–100. Default: 85.
    pub target_score: u8,

    /// Maximum generate→render→judge iterations per page. Default: 5.
    ///
    /// With `max_retries = 1` every page gets exactly one iteration and its
    /// output is promoted regardless of score.
    pub max_retries: u32,

    /// Browser viewport width in CSS pixels. Default: 1200.
    pub viewport_width: u32,

    /// Browser viewport height in CSS pixels. Default: 1600.
    pub viewport_height: u32,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Output directory root; the document gets `<output>/<stem>/`. Default: `./output`.
    pub output_dir: PathBuf,

    /// Re-process pages whose directory already contains a `final.html`. Default: false.
    pub force: bool,

    /// Explicit primary-language override fed to the analyzer. Wins over the model.
    pub language_override: Option<String>,

    /// Explicit text-direction override fed to the analyzer. Wins over the model.
    pub direction_override: Option<TextDirection>,

    /// How many sampled pages the analyzer may send in its single call. Default: 3.
    pub analysis_sample_pages: usize,

    // ── Providers ─────────────────────────────────────────────────────────

    /// Generator model identifier, e.g. "gpt-4.1". If None, uses provider default.
    pub generator_model: Option<String>,

    /// Generator provider name (e.g. "openai", "anthropic").
    /// If None along with `generator_provider`, auto-detects from the environment.
    pub generator_provider_name: Option<String>,

    /// Pre-constructed generator provider. Takes precedence over the name.
    pub generator_provider: Option<Arc<dyn LLMProvider>>,

    /// Second judge provider name. None disables cross-model judging: judge A
    /// (the generator's provider) scores alone and the weighted combination is
    /// the identity.
    pub judge_provider_name: Option<String>,

    /// Second judge model identifier.
    pub judge_model: Option<String>,

    /// Pre-constructed second judge provider. Takes precedence over the name.
    pub judge_provider: Option<Arc<dyn LLMProvider>>,

    /// Weight of judge A in the combined subscores; judge B gets `1 - weight_a`.
    /// Range: 0.0–1.0. Default: 0.5.
    pub judge_weight_a: f32,

    /// Run the equation specialist when the analyzer flags equations. Default: true.
    pub equation_specialist: bool,

    /// Run the verification gate on iterations that meet the target. Default: true.
    pub verification_gate: bool,

    // ── Model call shape ──────────────────────────────────────────────────

    /// Sampling temperature for every model call. Default: 0.1.
    ///
    /// Low temperature keeps the generator faithful to what it sees on the
    /// page and keeps judge scores stable across retries.
    pub temperature: f32,

    /// Maximum tokens the generator may produce per page. Default: 16384.
    ///
    /// A dense page of HTML with inline CSS routinely exceeds 8 000 output
    /// tokens; truncating mid-document produces unparseable markup that wastes
    /// an entire iteration.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient model API failure. Default: 3.
    ///
    /// Transient 5xx/timeout errors are retried with exponential backoff
    /// *before* the iteration is charged against the page budget.
    pub max_api_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    // ── Renderer bounds ───────────────────────────────────────────────────

    /// Upper bound on browser navigation, in seconds. Default: 20.
    pub render_nav_timeout_secs: u64,

    /// Upper bound on the MathJax readiness wait, in seconds. Default: 15.
    ///
    /// The probe awaits `MathJax.startup.promise`; if the global never appears
    /// (page without math, CDN unreachable) the renderer falls through after
    /// this bound rather than blocking forever.
    pub mathjax_timeout_secs: u64,

    // ── Misc ──────────────────────────────────────────────────────────────

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Cooperative cancellation flag, checked at iteration boundaries.
    ///
    /// Setting it completes the in-flight render/judge cycle, persists partial
    /// state, and stops before the next iteration.
    pub cancel: Option<Arc<AtomicBool>>,

    /// Progress callback for per-page / per-iteration events.
    pub progress_callback: Option<Arc<dyn crate::progress::ConversionProgressCallback>>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            target_score: 85,
            max_retries: 5,
            viewport_width: 1200,
            viewport_height: 1600,
            pages: PageSelection::default(),
            output_dir: PathBuf::from("output"),
            force: false,
            language_override: None,
            direction_override: None,
            analysis_sample_pages: 3,
            generator_model: None,
            generator_provider_name: None,
            generator_provider: None,
            judge_provider_name: None,
            judge_model: None,
            judge_provider: None,
            judge_weight_a: 0.5,
            equation_specialist: true,
            verification_gate: true,
            temperature: 0.1,
            max_tokens: 16384,
            max_api_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            render_nav_timeout_secs: 20,
            mathjax_timeout_secs: 15,
            password: None,
            download_timeout_secs: 120,
            cancel: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("dpi", &self.dpi)
            .field("target_score", &self.target_score)
            .field("max_retries", &self.max_retries)
            .field("viewport_width", &self.viewport_width)
            .field("viewport_height", &self.viewport_height)
            .field("pages", &self.pages)
            .field("output_dir", &self.output_dir)
            .field("force", &self.force)
            .field("generator_model", &self.generator_model)
            .field("generator_provider_name", &self.generator_provider_name)
            .field(
                "generator_provider",
                &self.generator_provider.as_ref().map(|_| "<dyn LLMProvider>"),
            )
            .field("judge_provider_name", &self.judge_provider_name)
            .field("judge_model", &self.judge_model)
            .field("judge_weight_a", &self.judge_weight_a)
            .field("equation_specialist", &self.equation_specialist)
            .field("verification_gate", &self.verification_gate)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn target_score(mut self, score: u8) -> Self {
        self.config.target_score = score.min(100);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.max(1);
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.viewport_width = width.max(320);
        self.config.viewport_height = height.max(320);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn force(mut self, v: bool) -> Self {
        self.config.force = v;
        self
    }

    pub fn language_override(mut self, lang: impl Into<String>) -> Self {
        self.config.language_override = Some(lang.into());
        self
    }

    pub fn direction_override(mut self, dir: TextDirection) -> Self {
        self.config.direction_override = Some(dir);
        self
    }

    pub fn analysis_sample_pages(mut self, n: usize) -> Self {
        self.config.analysis_sample_pages = n.clamp(1, 8);
        self
    }

    pub fn generator_model(mut self, model: impl Into<String>) -> Self {
        self.config.generator_model = Some(model.into());
        self
    }

    pub fn generator_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.generator_provider_name = Some(name.into());
        self
    }

    pub fn generator_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.generator_provider = Some(provider);
        self
    }

    pub fn judge_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.judge_provider_name = Some(name.into());
        self
    }

    pub fn judge_model(mut self, model: impl Into<String>) -> Self {
        self.config.judge_model = Some(model.into());
        self
    }

    pub fn judge_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.judge_provider = Some(provider);
        self
    }

    pub fn judge_weight_a(mut self, w: f32) -> Self {
        self.config.judge_weight_a = w.clamp(0.0, 1.0);
        self
    }

    pub fn equation_specialist(mut self, v: bool) -> Self {
        self.config.equation_specialist = v;
        self
    }

    pub fn verification_gate(mut self, v: bool) -> Self {
        self.config.verification_gate = v;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_api_retries(mut self, n: u32) -> Self {
        self.config.max_api_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn render_nav_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_nav_timeout_secs = secs;
        self
    }

    pub fn mathjax_timeout_secs(mut self, secs: u64) -> Self {
        self.config.mathjax_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.config.cancel = Some(flag);
        self
    }

    pub fn progress_callback(
        mut self,
        cb: Arc<dyn crate::progress::ConversionProgressCallback>,
    ) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConvertError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(ConvertError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.max_retries == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_retries must be ≥ 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.judge_weight_a) {
            return Err(ConvertError::InvalidConfig(format!(
                "judge_weight_a must be within 0.0–1.0, got {}",
                c.judge_weight_a
            )));
        }
        Ok(self.config)
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages of the PDF to convert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_are_valid() {
        let config = ConversionConfig::builder().build().unwrap();
        assert_eq!(config.dpi, 300);
        assert_eq!(config.target_score, 85);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.judge_weight_a, 0.5);
        assert!(config.equation_specialist);
        assert!(config.verification_gate);
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let config = ConversionConfig::builder()
            .dpi(10_000)
            .target_score(250)
            .max_retries(0)
            .judge_weight_a(3.0)
            .build()
            .unwrap();
        assert_eq!(config.dpi, 600);
        assert_eq!(config.target_score, 100);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.judge_weight_a, 1.0);
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(5), vec![0, 1, 2, 3, 4]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 4).to_indices(5), vec![1, 2, 3]);
        assert_eq!(
            PageSelection::Set(vec![1, 3, 5]).to_indices(5),
            vec![0, 2, 4]
        );
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3]).to_indices(5),
            vec![0, 2] // deduplicated and sorted
        );
    }
}
