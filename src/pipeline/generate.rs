//! HTML generation: initial synthesis and feedback-driven refinement.
//!
//! Both operations wrap one vision call and the same deterministic
//! post-processing. The post-processing is **not** model-driven on purpose:
//! prompts say "no fences" and "placeholders only", but models disobey often
//! enough that correctness cannot depend on obedience. Each pass is a pure
//! `&str → String` function with no shared state, independently testable.

use crate::config::ConversionConfig;
use crate::error::IterationError;
use crate::feedback::JudgeFeedback;
use crate::pipeline::ingest::{Figure, PageAssets};
use crate::pipeline::llm::chat_with_retry;
use crate::prompts;
use edgequake_llm::{ChatMessage, ImageData, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Produce the first HTML rendition of a page.
pub async fn generate_initial(
    provider: &Arc<dyn LLMProvider>,
    assets: &PageAssets,
    addendum: &str,
    config: &ConversionConfig,
    iteration: u32,
) -> Result<String, IterationError> {
    let messages = vec![
        ChatMessage::system(prompts::GENERATE_SYSTEM_PROMPT),
        ChatMessage::user_with_images(
            prompts::initial_user_text(addendum, &assets.figures),
            vec![page_image(assets)],
        ),
    ];
    run_generation(provider, messages, assets, config, iteration, "generate").await
}

/// Produce a revised HTML rendition from judge feedback.
pub async fn refine(
    provider: &Arc<dyn LLMProvider>,
    previous_html: &str,
    assets: &PageAssets,
    feedback: &JudgeFeedback,
    addendum: &str,
    config: &ConversionConfig,
    iteration: u32,
) -> Result<String, IterationError> {
    let messages = vec![
        ChatMessage::system(prompts::REFINE_SYSTEM_PROMPT),
        ChatMessage::user_with_images(
            prompts::refine_user_text(previous_html, feedback, addendum, &assets.figures),
            vec![page_image(assets)],
        ),
    ];
    run_generation(provider, messages, assets, config, iteration, "refine").await
}

async fn run_generation(
    provider: &Arc<dyn LLMProvider>,
    messages: Vec<ChatMessage>,
    assets: &PageAssets,
    config: &ConversionConfig,
    iteration: u32,
    label: &str,
) -> Result<String, IterationError> {
    let label = format!("page {} {} #{}", assets.page_index + 1, label, iteration);
    let reply = chat_with_retry(provider, &messages, config, &label)
        .await
        .map_err(|detail| IterationError::Generator { iteration, detail })?;

    let html = strip_code_fences(&reply);
    if !html.contains('<') {
        return Err(IterationError::Generator {
            iteration,
            detail: format!(
                "reply contains no markup ({} chars): {:?}…",
                html.len(),
                html.chars().take(60).collect::<String>()
            ),
        });
    }

    Ok(inject_figures(&html, &assets.figures))
}

fn page_image(assets: &PageAssets) -> ImageData {
    ImageData::new(assets.page_b64.clone(), "image/png").with_detail("high")
}

// ── Post-processing ──────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:html)?\s*\n(.*?)\n?```\s*$").unwrap());

/// Strip a single pair of outer code fences, if the model wrapped its reply
/// despite the prompt. Inner fences (e.g. in transcribed code listings) stay
/// untouched because only the outermost pair is matched.
pub fn strip_code_fences(reply: &str) -> String {
    let trimmed = reply.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].to_string()
    } else {
        trimmed.to_string()
    }
}

static RE_FIGURE_IMG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<img\b[^>]*\bdata-figure-index\s*=\s*["'](\d+)["'][^>]*>"#).unwrap()
});

static RE_SRC_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bsrc\s*=\s*(?:"[^"]*"|'[^']*')"#).unwrap());

/// Substitute each `<img data-figure-index="N">` placeholder's `src` with the
/// matching figure's data URI.
///
/// An index the ingestor never exposed keeps a visible placeholder `alt`
/// instead of a broken (or hallucinated) `src`.
pub fn inject_figures(html: &str, figures: &[Figure]) -> String {
    if figures.is_empty() && !html.contains("data-figure-index") {
        return html.to_string();
    }

    RE_FIGURE_IMG
        .replace_all(html, |caps: &regex::Captures<'_>| {
            let tag = &caps[0];
            let index: usize = match caps[1].parse() {
                Ok(n) => n,
                Err(_) => return tag.to_string(),
            };
            match figures.iter().find(|f| f.index == index) {
                Some(figure) => set_img_src(tag, &figure.data_uri),
                None => {
                    warn!("Generator referenced unknown figure index {}", index);
                    set_img_alt_missing(tag, index)
                }
            }
        })
        .to_string()
}

/// Rewrite (or insert) the `src` attribute of an `<img>` tag.
fn set_img_src(tag: &str, uri: &str) -> String {
    let replacement = format!("src=\"{}\"", uri);
    if RE_SRC_ATTR.is_match(tag) {
        RE_SRC_ATTR.replace(tag, replacement.as_str()).to_string()
    } else {
        // No src at all: add one right after "<img".
        debug!("Figure placeholder had no src attribute; inserting one");
        tag.replacen("<img", &format!("<img {}", replacement), 1)
    }
}

/// Mark a placeholder whose index has no backing figure.
fn set_img_alt_missing(tag: &str, index: usize) -> String {
    let stripped = RE_SRC_ATTR.replace(tag, "").to_string();
    stripped.replacen(
        "<img",
        &format!("<img alt=\"[missing figure {}]\"", index),
        1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn figure(index: usize) -> Figure {
        Figure {
            index,
            bbox: [0.0, 0.0, 100.0, 100.0],
            image_bytes: vec![1, 2, 3],
            mime_type: "image/png".into(),
            data_uri: format!("data:image/png;base64,FIG{}", index),
        }
    }

    #[test]
    fn strips_plain_and_html_fences() {
        assert_eq!(
            strip_code_fences("```html\n<html></html>\n```"),
            "<html></html>"
        );
        assert_eq!(strip_code_fences("```\n<p>hi</p>\n```"), "<p>hi</p>");
        assert_eq!(strip_code_fences("  <html></html>  "), "<html></html>");
    }

    #[test]
    fn leaves_inner_fences_alone() {
        let html = "<pre>```python\nprint(1)\n```</pre>";
        assert_eq!(strip_code_fences(html), html);
    }

    #[test]
    fn injects_data_uri_into_placeholder() {
        let html = r#"<img data-figure-index="0" alt="Figure 0" src="placeholder.png">"#;
        let out = inject_figures(html, &[figure(0)]);
        assert!(out.contains(r#"src="data:image/png;base64,FIG0""#));
        assert!(!out.contains("placeholder.png"));
    }

    #[test]
    fn injects_src_when_placeholder_has_none() {
        let html = r#"<div><img data-figure-index="1" alt="Figure 1"></div>"#;
        let out = inject_figures(html, &[figure(0), figure(1)]);
        assert!(out.contains(r#"src="data:image/png;base64,FIG1""#));
    }

    #[test]
    fn round_trip_covers_every_exposed_index() {
        let figures = vec![figure(0), figure(1), figure(2)];
        let html = r#"
            <img data-figure-index="0">
            <img data-figure-index="1">
            <img data-figure-index="2">
        "#;
        let out = inject_figures(html, &figures);
        for f in &figures {
            assert!(
                out.contains(&format!(r#"src="{}""#, f.data_uri)),
                "figure {} not injected",
                f.index
            );
        }
    }

    #[test]
    fn unknown_index_gets_visible_placeholder() {
        let html = r#"<img data-figure-index="7" src="x.png">"#;
        let out = inject_figures(html, &[figure(0)]);
        assert!(out.contains("[missing figure 7]"));
        assert!(!out.contains("x.png"));
    }

    #[test]
    fn no_figures_no_placeholders_is_a_noop() {
        let html = "<html><body><p>text only</p></body></html>";
        assert_eq!(inject_figures(html, &[]), html);
    }
}
