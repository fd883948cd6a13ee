//! Document-level conversion entry points.
//!
//! [`convert`] drives the whole run: resolve the input, build providers and
//! the renderer, ingest pages, analyze the document once, then execute the
//! per-page refinement machine strictly in page order. Pages are deliberately
//! **not** processed concurrently — each page's iterations must be fully
//! persisted before the next page begins, and the browser is a serialized
//! resource anyway. The only concurrency in the system lives inside
//! [`crate::pipeline::multi_judge`], where the two cross-model judge calls
//! are independent network waits.

use crate::analysis::build_prompt_addendum;
use crate::config::ConversionConfig;
use crate::error::ConvertError;
use crate::output::{page_dir, page_image_name, ConversionOutput, ConversionStats, PageResult};
use crate::pipeline::multi_judge::MultiJudge;
use crate::pipeline::refine_loop::{self, PageContext};
use crate::pipeline::render::HtmlRenderer;
use crate::pipeline::{analyze, ingest, input};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert a PDF file or URL into per-page HTML documents.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input_str` — Local file path or HTTP/HTTPS URL to a PDF
/// * `config` — Conversion configuration
///
/// # Returns
/// `Ok(ConversionOutput)` on success, even when some pages ended best-effort
/// (check `output.stats.best_effort_pages`).
///
/// # Errors
/// Returns `Err(ConvertError)` only for fatal errors:
/// - File not found / permission denied / not a valid PDF
/// - Requested pages out of range
/// - No model provider configured
/// - Headless Chrome unavailable
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ConvertError> {
    let total_start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting conversion: {}", input_str);

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let pdf_path = resolved.path().to_path_buf();

    // ── Step 2: Providers and renderer ───────────────────────────────────
    let generator = resolve_generator_provider(config)?;
    let judge_b = resolve_judge_provider(config)?;
    if judge_b.is_some() {
        info!("Cross-model judging enabled");
    } else {
        debug!("No second judge configured; single-judge scoring");
    }
    let renderer = HtmlRenderer::launch(config)?;

    // ── Step 3: Validate page selection ──────────────────────────────────
    let total_pages = ingest::page_count(&pdf_path, config.password.as_deref()).await?;
    info!("PDF has {} pages", total_pages);

    let page_indices = config.pages.to_indices(total_pages);
    if page_indices.is_empty() {
        return Err(ConvertError::PageOutOfRange {
            page: 0,
            total: total_pages,
        });
    }
    debug!("Selected {} pages for conversion", page_indices.len());

    // ── Step 4: Output directory ─────────────────────────────────────────
    let document_dir = config.output_dir.join(resolved.document_stem());
    tokio::fs::create_dir_all(&document_dir)
        .await
        .map_err(|e| ConvertError::OutputWriteFailed {
            path: document_dir.clone(),
            source: e,
        })?;

    // ── Step 5: Ingest pages ─────────────────────────────────────────────
    let assets =
        ingest::load_page_assets(&pdf_path, config.dpi, config.password.as_deref(), &page_indices)
            .await?;
    for page in &assets {
        let path = document_dir.join(page_image_name(page.page_index));
        // Identical bytes on a re-run; skip the write so an idempotent pass
        // leaves the tree untouched.
        if config.force || !path.exists() {
            tokio::fs::write(&path, &page.page_png)
                .await
                .map_err(|e| ConvertError::OutputWriteFailed { path, source: e })?;
        }
    }

    // ── Step 6: Analyze once, persist profile + addendum ─────────────────
    // A persisted profile from an earlier run is reused (unless forced):
    // re-running the analyzer would spend a model call to produce a possibly
    // different profile and break re-run idempotence.
    let analysis = match load_persisted_analysis(&document_dir, config).await {
        Some(analysis) => {
            info!("Reusing persisted document analysis");
            analysis
        }
        None => {
            let analysis = analyze::analyze_document(&generator, &assets, config).await;
            let addendum = build_prompt_addendum(&analysis);
            analyze::persist_analysis(&document_dir, &analysis, &addendum).await?;
            analysis
        }
    };
    let addendum = build_prompt_addendum(&analysis);

    // ── Step 7: Per-page refinement, strictly in order ───────────────────
    let multi_judge = MultiJudge::new(Arc::clone(&generator), judge_b, config);
    let ctx = PageContext {
        generator: &generator,
        multi_judge: &multi_judge,
        renderer: &renderer,
        analysis: &analysis,
        addendum: &addendum,
        config,
    };

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(assets.len());
    }

    let mut pages: Vec<PageResult> = Vec::with_capacity(assets.len());
    for page in &assets {
        let page_num = page.page_index + 1;
        let this_page_dir = page_dir(&document_dir, page.page_index);
        tokio::fs::create_dir_all(&this_page_dir)
            .await
            .map_err(|e| ConvertError::OutputWriteFailed {
                path: this_page_dir.clone(),
                source: e,
            })?;

        // Idempotence: a completed page directory is a no-op unless forced.
        if !config.force {
            if let Some(existing) = refine_loop::reconstruct_page_result(
                &this_page_dir,
                page.page_index,
                config.target_score,
            )
            .await
            {
                info!(
                    "page {}: final.html already present (score {}); skipping — use force to redo",
                    page_num, existing.final_score
                );
                pages.push(existing);
                continue;
            }
        }

        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(page_num, assets.len());
        }

        let result = refine_loop::run_page(&ctx, page, &this_page_dir).await?;

        info!(
            "page {}: {} after {} iteration(s), score {}",
            page_num,
            if result.success { "passed" } else { "best-effort" },
            result.iterations_run,
            result.final_score
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_complete(
                page_num,
                assets.len(),
                result.success,
                result.final_score,
                result.iterations_run,
            );
        }

        pages.push(result);
    }

    // ── Step 8: Summary ──────────────────────────────────────────────────
    let passed = pages.iter().filter(|p| p.success).count();
    let best_effort = pages.len() - passed;
    let average_iterations = if pages.is_empty() {
        0.0
    } else {
        pages.iter().map(|p| p.iterations_run as f64).sum::<f64>() / pages.len() as f64
    };

    let stats = ConversionStats {
        total_pages: pages.len(),
        passed_pages: passed,
        best_effort_pages: best_effort,
        average_iterations,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Conversion complete: {}/{} pages passed, avg {:.1} iterations, {}ms",
        passed,
        pages.len(),
        average_iterations,
        stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(pages.len(), passed);
    }

    Ok(ConversionOutput {
        pages,
        analysis,
        stats,
        document_dir,
    })
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ConvertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConvertError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

// ── Environment check ────────────────────────────────────────────────────

/// What `check` validated, one field per dependency.
#[derive(Debug)]
pub struct CheckReport {
    /// Description of the resolved generator provider, or the failure.
    pub generator: Result<String, String>,
    /// Description of the second judge, `Ok(None)` when not configured.
    pub judge: Result<Option<String>, String>,
    /// Headless Chrome launch probe result.
    pub browser: Result<(), String>,
}

impl CheckReport {
    /// True when everything required for a conversion is available.
    pub fn all_ok(&self) -> bool {
        self.generator.is_ok() && self.judge.is_ok() && self.browser.is_ok()
    }
}

/// Validate credentials and renderer dependencies without converting anything.
pub async fn check(config: &ConversionConfig) -> CheckReport {
    let generator_label = config
        .generator_provider_name
        .clone()
        .unwrap_or_else(|| "auto-detected".to_string());
    let generator = resolve_generator_provider(config)
        .map(|_| generator_label)
        .map_err(|e| format!("{}", e));

    let judge_label = config
        .judge_provider_name
        .clone()
        .or_else(|| std::env::var("PDF2HTML_JUDGE_PROVIDER").ok().filter(|s| !s.is_empty()));
    let judge = resolve_judge_provider(config)
        .map(|opt| opt.map(|_| judge_label.unwrap_or_else(|| "configured".to_string())))
        .map_err(|e| format!("{}", e));

    let browser = HtmlRenderer::launch(config)
        .map(|_| ())
        .map_err(|e| format!("{}", e));

    CheckReport {
        generator,
        judge,
        browser,
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Load a previously persisted document analysis, if one exists and parses.
async fn load_persisted_analysis(
    document_dir: &Path,
    config: &ConversionConfig,
) -> Option<crate::analysis::DocumentAnalysis> {
    // Fresh overrides must not be shadowed by a stale profile.
    if config.force || config.language_override.is_some() || config.direction_override.is_some() {
        return None;
    }
    let path = document_dir.join(crate::output::ANALYSIS_FILE);
    let json = tokio::fs::read_to_string(&path).await.ok()?;
    match serde_json::from_str::<crate::analysis::DocumentAnalysis>(&json) {
        Ok(analysis) => Some(analysis.normalise()),
        Err(e) => {
            warn!("Persisted analysis at {} unreadable ({}); re-analyzing", path.display(), e);
            None
        }
    }
}

/// Return the best default vision model for a named provider.
///
/// Pixel-faithful HTML generation needs a stronger model than plain
/// transcription, so cloud providers default to the large tier; local
/// providers default to the most universally available vision model.
fn default_vision_model_for_provider(provider_name: &str) -> &'static str {
    match provider_name {
        "mistral" | "mistral-ai" | "mistralai" => "pixtral-12b-2409",
        "ollama" | "lmstudio" | "lm-studio" | "lm_studio" => "llava",
        _ => "gpt-4.1",
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ConvertError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ConvertError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the generator provider, from most-specific to least-specific.
///
/// The four-level fallback chain lets library users and CLI users each set
/// exactly as much or as little as they need:
///
/// 1. **Pre-built provider** (`config.generator_provider`) — used as-is;
///    useful in tests or when the caller needs custom middleware.
/// 2. **Named provider + model** (`config.generator_provider_name`) — reads
///    the corresponding API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`) —
///    honoured before auto-detection so an execution-environment choice wins
///    even when multiple API keys are present.
/// 4. **Full auto-detection** (`ProviderFactory::from_env`) — scans known API
///    key variables and picks the first available provider, preferring OpenAI
///    when its key is set.
fn resolve_generator_provider(
    config: &ConversionConfig,
) -> Result<Arc<dyn LLMProvider>, ConvertError> {
    if let Some(ref provider) = config.generator_provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.generator_provider_name {
        let model = config
            .generator_model
            .as_deref()
            .unwrap_or_else(|| default_vision_model_for_provider(name));
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    // Prefer OpenAI explicitly when its key is present, so users with several
    // provider keys get a deterministic default.
    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.generator_model.as_deref().unwrap_or("gpt-4.1");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ConvertError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                 Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                 Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Resolve the optional second judge.
///
/// Absence is not an error: without a second provider the weighted
/// combination degenerates to judge A alone.
fn resolve_judge_provider(
    config: &ConversionConfig,
) -> Result<Option<Arc<dyn LLMProvider>>, ConvertError> {
    if let Some(ref provider) = config.judge_provider {
        return Ok(Some(Arc::clone(provider)));
    }

    let name = match config.judge_provider_name {
        Some(ref name) => name.clone(),
        None => match std::env::var("PDF2HTML_JUDGE_PROVIDER") {
            Ok(name) if !name.is_empty() => name,
            _ => return Ok(None),
        },
    };

    let model = config
        .judge_model
        .clone()
        .or_else(|| std::env::var("PDF2HTML_JUDGE_MODEL").ok().filter(|m| !m.is_empty()))
        .unwrap_or_else(|| default_vision_model_for_provider(&name).to_string());

    match create_vision_provider(&name, &model) {
        Ok(provider) => Ok(Some(provider)),
        Err(e) => {
            warn!("Second judge '{}' unavailable: {}", name, e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_vision_model_mistral_variants() {
        for name in &["mistral", "mistral-ai", "mistralai"] {
            assert_eq!(
                default_vision_model_for_provider(name),
                "pixtral-12b-2409",
                "provider '{}' should default to pixtral-12b-2409",
                name
            );
        }
    }

    #[test]
    fn test_default_vision_model_cloud_providers() {
        for name in &["openai", "anthropic", "gemini", "azure", "unknown"] {
            assert_eq!(
                default_vision_model_for_provider(name),
                "gpt-4.1",
                "provider '{}' should default to gpt-4.1",
                name
            );
        }
    }

    #[test]
    fn test_default_vision_model_local_providers() {
        for name in &["ollama", "lmstudio", "lm-studio", "lm_studio"] {
            assert_eq!(
                default_vision_model_for_provider(name),
                "llava",
                "provider '{}' should default to llava (vision-capable local model)",
                name
            );
        }
    }
}
