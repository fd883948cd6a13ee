//! Document analysis: one vision call per document shaping every generator
//! prompt after it.
//!
//! The analyzer never sees the whole document — a small page sample is enough
//! to classify language, direction, layout, and equation complexity, and it
//! keeps the pre-analysis cost independent of document length. Everything
//! model-dependent is confined to [`analyze_document`]; turning the analysis
//! into prompt text is the pure [`crate::analysis::build_prompt_addendum`].

use crate::analysis::{DocumentAnalysis, TextDirection};
use crate::config::ConversionConfig;
use crate::error::ConvertError;
use crate::feedback::extract_json_object;
use crate::pipeline::ingest::PageAssets;
use crate::pipeline::llm::chat_with_retry;
use crate::prompts::ANALYSIS_SYSTEM_PROMPT;
use edgequake_llm::{ChatMessage, ImageData, LLMProvider};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Pick up to `k` representative pages: first, middle, last.
///
/// Returns indices into `assets`, deduplicated and in order.
pub fn sample_indices(page_count: usize, k: usize) -> Vec<usize> {
    if page_count == 0 || k == 0 {
        return Vec::new();
    }
    let mut picks = vec![0];
    if k >= 3 && page_count > 2 {
        picks.push(page_count / 2);
    }
    if k >= 2 && page_count > 1 {
        picks.push(page_count - 1);
    }
    picks.sort_unstable();
    picks.dedup();
    picks.truncate(k);
    picks
}

/// Infer the document profile from a sample of page images.
///
/// Makes exactly one model call. A reply that cannot be parsed degrades to
/// the conservative default profile with `confidence_degraded = true` — the
/// loop proceeds either way. User overrides are applied last and always win.
pub async fn analyze_document(
    provider: &Arc<dyn LLMProvider>,
    assets: &[PageAssets],
    config: &ConversionConfig,
) -> DocumentAnalysis {
    let picks = sample_indices(assets.len(), config.analysis_sample_pages);
    let images: Vec<ImageData> = picks
        .iter()
        .map(|&i| ImageData::new(assets[i].page_b64.clone(), "image/png").with_detail("high"))
        .collect();

    let messages = vec![
        ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
        ChatMessage::user_with_images(
            format!("Analyze these {} sample pages from one document.", images.len()),
            images,
        ),
    ];

    let analysis = match chat_with_retry(provider, &messages, config, "analyze").await {
        Ok(reply) => parse_analysis_reply(&reply),
        Err(e) => {
            warn!("Document analysis call failed ({}); using defaults", e);
            degraded_default()
        }
    };

    let analysis = apply_overrides(analysis, config);
    info!(
        "Document profile: {} / {:?} / {:?}, equations: {:?}",
        analysis.primary_language,
        analysis.text_direction,
        analysis.layout_type,
        analysis.equation_complexity
    );
    analysis
}

/// Parse the analyzer reply, falling back to the degraded default.
pub fn parse_analysis_reply(reply: &str) -> DocumentAnalysis {
    let Some(value) = extract_json_object(reply) else {
        warn!("Analysis reply contained no JSON object; using defaults");
        return degraded_default();
    };
    match serde_json::from_value::<DocumentAnalysis>(value) {
        Ok(analysis) => analysis.normalise(),
        Err(e) => {
            warn!("Analysis reply did not match the expected shape ({}); using defaults", e);
            degraded_default()
        }
    }
}

/// The conservative fallback profile.
fn degraded_default() -> DocumentAnalysis {
    DocumentAnalysis {
        confidence_degraded: true,
        ..Default::default()
    }
}

/// Explicit user overrides win over whatever the model inferred.
fn apply_overrides(mut analysis: DocumentAnalysis, config: &ConversionConfig) -> DocumentAnalysis {
    if let Some(ref language) = config.language_override {
        analysis.primary_language = language.clone();
    }
    if let Some(direction) = config.direction_override {
        analysis.text_direction = direction;
        if direction != TextDirection::Auto {
            analysis.mixed_directions = false;
        }
    }
    analysis.normalise()
}

/// Persist `document_analysis.json` and `custom_prompt.md` to the document
/// output directory.
pub async fn persist_analysis(
    document_dir: &Path,
    analysis: &DocumentAnalysis,
    addendum: &str,
) -> Result<(), ConvertError> {
    let analysis_path = document_dir.join(crate::output::ANALYSIS_FILE);
    let json = serde_json::to_string_pretty(analysis)
        .map_err(|e| ConvertError::Internal(format!("analysis serialise: {}", e)))?;
    tokio::fs::write(&analysis_path, json)
        .await
        .map_err(|e| ConvertError::OutputWriteFailed {
            path: analysis_path,
            source: e,
        })?;

    let addendum_path = document_dir.join(crate::output::ADDENDUM_FILE);
    tokio::fs::write(&addendum_path, addendum)
        .await
        .map_err(|e| ConvertError::OutputWriteFailed {
            path: addendum_path,
            source: e,
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{EquationComplexity, LayoutType};

    #[test]
    fn sample_indices_cover_first_middle_last() {
        assert_eq!(sample_indices(10, 3), vec![0, 5, 9]);
        assert_eq!(sample_indices(2, 3), vec![0, 1]);
        assert_eq!(sample_indices(1, 3), vec![0]);
        assert_eq!(sample_indices(0, 3), Vec::<usize>::new());
        assert_eq!(sample_indices(10, 1), vec![0]);
    }

    #[test]
    fn parse_analysis_reply_happy_path() {
        let reply = r#"{
            "primary_language": "Arabic",
            "text_direction": "rtl",
            "mixed_directions": true,
            "has_equations": true,
            "equation_complexity": "complex",
            "has_tables": true,
            "has_figures": false,
            "has_code_blocks": false,
            "layout_type": "multi-column",
            "column_count": 2,
            "has_headers": true,
            "has_footers": true,
            "has_footnotes": false,
            "font_classes": ["serif"],
            "has_bold": true,
            "has_italic": false,
            "has_underline": false,
            "document_type": "academic"
        }"#;
        let analysis = parse_analysis_reply(reply);
        assert_eq!(analysis.primary_language, "Arabic");
        assert_eq!(analysis.text_direction, TextDirection::Rtl);
        assert_eq!(analysis.equation_complexity, EquationComplexity::Complex);
        assert_eq!(analysis.layout_type, LayoutType::MultiColumn);
        assert!(!analysis.confidence_degraded);
    }

    #[test]
    fn parse_analysis_reply_garbage_degrades() {
        let analysis = parse_analysis_reply("I could not determine the document structure.");
        assert!(analysis.confidence_degraded);
        assert_eq!(analysis.text_direction, TextDirection::Ltr);
        assert_eq!(analysis.layout_type, LayoutType::SingleColumn);
        assert!(!analysis.has_equations);
    }

    #[test]
    fn overrides_win_over_model_output() {
        let config = ConversionConfig::builder()
            .language_override("Hebrew")
            .direction_override(TextDirection::Rtl)
            .build()
            .unwrap();
        let model_says = DocumentAnalysis {
            primary_language: "English".into(),
            text_direction: TextDirection::Ltr,
            mixed_directions: true,
            ..Default::default()
        };
        let analysis = apply_overrides(model_says, &config);
        assert_eq!(analysis.primary_language, "Hebrew");
        assert_eq!(analysis.text_direction, TextDirection::Rtl);
        assert!(!analysis.mixed_directions);
    }
}
