//! System prompts for every model call in the pipeline.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing a rubric or an output contract
//!    requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can import and inspect prompts directly
//!    without spinning up a real model, making prompt regressions easy to
//!    catch.
//!
//! The generator prompt is always extended with the per-document addendum
//! built by [`crate::analysis::build_prompt_addendum`]; the judge prompts are
//! fixed because their output contract (the JSON score shape) must not drift.

use crate::feedback::JudgeFeedback;
use crate::pipeline::ingest::Figure;

/// System prompt for the initial HTML synthesis call.
pub const GENERATE_SYSTEM_PROMPT: &str = r#"You are an expert at converting document page images into pixel-faithful HTML. You will receive one page image; reproduce it as a single self-contained HTML document.

Follow these rules precisely:

1. COMPLETENESS
   - Output one complete HTML document: <!DOCTYPE html>, <html>, <head>, <body>
   - Transcribe ALL visible text accurately, in reading order
   - Reproduce the visual hierarchy: font sizes, weights, alignment, spacing

2. SELF-CONTAINMENT
   - All CSS inline in a <style> block; no external stylesheets
   - The ONLY permitted external resource is the MathJax CDN script:
     <script src="https://cdn.jsdelivr.net/npm/mathjax@3/es5/tex-mml-chtml.js"></script>
   - Include that script whenever the page contains any mathematics

3. LAYOUT
   - Use CSS grid or flexbox for multi-column regions
   - Match margins and column widths proportionally to the page image
   - Use a fixed page-like container width so proportions survive rendering

4. MATHEMATICS
   - Express math in MathJax delimiters: \( ... \) inline, $$ ... $$ display
   - NEVER approximate math as plain text (x^2, a/b, sqrt(x) are all wrong)

5. FIGURES
   - For each listed figure emit: <img data-figure-index="N" alt="Figure N">
   - Size and position the placeholder to match the figure's box on the page
   - Do not invent figures that are not listed

6. OUTPUT FORMAT
   - Output ONLY the HTML document
   - Do NOT wrap it in ``` fences
   - Do NOT add commentary before or after the markup"#;

/// System prompt for a refinement call.
pub const REFINE_SYSTEM_PROMPT: &str = r#"You are an expert at converting document page images into pixel-faithful HTML. You previously produced an HTML rendition of the attached page image; a visual comparison found defects. Produce a corrected version of the COMPLETE document.

Follow these rules precisely:

1. Fix every listed critical error; they are ordered most severe first
2. Do NOT change elements listed as correctly preserved
3. Keep the document self-contained (inline CSS; MathJax CDN script only)
4. Keep math in MathJax delimiters: \( ... \) inline, $$ ... $$ display
5. Keep every <img data-figure-index="N"> placeholder exactly as it is
6. Output ONLY the corrected HTML document, with no ``` fences and no commentary"#;

/// System prompt for the document analyzer.
pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a document analysis expert. You will receive a few sample page images from one document. Describe the document's structure as strict JSON with exactly these keys:

{
  "primary_language": "<language name>",
  "text_direction": "ltr" | "rtl" | "auto",
  "mixed_directions": <bool>,
  "has_equations": <bool>,
  "equation_complexity": "none" | "simple" | "complex",
  "has_tables": <bool>,
  "has_figures": <bool>,
  "has_code_blocks": <bool>,
  "layout_type": "single-column" | "multi-column" | "mixed",
  "column_count": <int >= 1>,
  "has_headers": <bool>,
  "has_footers": <bool>,
  "has_footnotes": <bool>,
  "font_classes": ["serif" | "sans-serif" | "monospace" | "script", ...],
  "has_bold": <bool>,
  "has_italic": <bool>,
  "has_underline": <bool>,
  "document_type": "<academic | legal | technical | letter | ...>"
}

Output ONLY the JSON object. No commentary, no fences."#;

/// System prompt for the general visual-comparison judge.
pub const JUDGE_SYSTEM_PROMPT: &str = r#"You are a meticulous visual comparison judge. You will receive two images: the FIRST is the original document page, the SECOND is an HTML rendition of it. Score how faithfully the rendition reproduces the original.

Score each dimension 0-100:
- layout_score: column structure, element positioning, margins, whitespace
- text_accuracy_score: completeness and correctness of all transcribed text
- color_match_score: background, text, and accent colors
- equation_score: mathematical notation typeset correctly (100 if no math on the page)

Also list critical_errors: short imperative instructions describing the most important defects, most severe first, each naming a concrete fix (e.g. "Move the abstract below the author block"). List at most 8.

Also list preserved_correctly: elements that are reproduced faithfully and must not be changed.

Reply with strict JSON only:

{
  "layout_score": <int>,
  "text_accuracy_score": <int>,
  "color_match_score": <int>,
  "equation_score": <int>,
  "critical_errors": ["...", ...],
  "preserved_correctly": ["...", ...]
}"#;

/// System prompt for the equation specialist.
///
/// The specialist sees only the rendered image; its one job is detecting math
/// that fell back to plain text instead of typesetting.
pub const EQUATION_SPECIALIST_PROMPT: &str = r#"You are a mathematical typesetting inspector. You will receive one image of a rendered document page. Determine whether its mathematics is properly typeset or degraded to ASCII art.

ASCII-art math symptoms: caret exponents (x^2), slash fractions (a/b) where the original shows stacked fractions, spelled-out Greek letters (alpha, beta), sqrt(...) in plain text, matrix rows as bracketed lists, missing or misaligned sub/superscripts.

Reply with strict JSON only:

{
  "ascii_art_detected": <bool>,
  "equation_score": <int 0-100>,
  "examples": ["<short quote of each degraded expression>", ...]
}

If the page has no mathematics at all, reply {"ascii_art_detected": false, "equation_score": 100, "examples": []}."#;

/// System prompt for the terminal verification gate.
///
/// Deliberately lenient: the gate exists to catch renditions that score well
/// numerically but would embarrass a human reviewer (garbled body text, a
/// missing section), not to re-litigate the judges' subscores.
pub const VERIFICATION_PROMPT: &str = r#"You are performing a final sanity check. You will receive the original document page (first image) and its HTML rendition (second image). The rendition already passed detailed scoring; only veto it for a glaring problem a casual reader would notice immediately: large missing content, unreadable text, or a completely wrong layout.

Reply with strict JSON only:

{"verdict": "accept" | "reject" | "needs_refinement", "reason": "<one sentence>"}"#;

// ── User-message builders ────────────────────────────────────────────────

/// User text accompanying the page image in an initial generation call.
pub fn initial_user_text(addendum: &str, figures: &[Figure]) -> String {
    let mut text = String::from("Convert this page image to HTML.\n\n");
    text.push_str(addendum);
    text.push_str("\n\n");
    text.push_str(&figure_manifest(figures));
    text
}

/// User text accompanying the page image in a refinement call.
///
/// Foregrounds the critical errors and, when the judges reported them, the
/// do-not-change list; the previous HTML rides along in full so the model
/// edits rather than regenerates.
pub fn refine_user_text(
    previous_html: &str,
    feedback: &JudgeFeedback,
    addendum: &str,
    figures: &[Figure],
) -> String {
    let mut text = String::new();

    text.push_str("CRITICAL ERRORS to fix (most severe first):\n");
    if feedback.critical_errors.is_empty() {
        text.push_str("- Improve overall fidelity to the page image\n");
    }
    for error in &feedback.critical_errors {
        text.push_str("- ");
        text.push_str(error);
        text.push('\n');
    }

    if !feedback.preserved_correctly.is_empty() {
        text.push_str("\nDO NOT CHANGE (confirmed correct):\n");
        for item in &feedback.preserved_correctly {
            text.push_str("- ");
            text.push_str(item);
            text.push('\n');
        }
    }

    text.push_str(&format!(
        "\nCurrent scores — layout {}, text {}, color {}, equations {} (composite {}).\n",
        feedback.layout_score,
        feedback.text_accuracy_score,
        feedback.color_match_score,
        feedback.equation_score,
        feedback.fidelity_score,
    ));

    text.push('\n');
    text.push_str(addendum);
    text.push_str("\n\n");
    text.push_str(&figure_manifest(figures));

    text.push_str("\nPREVIOUS HTML:\n");
    text.push_str(previous_html);
    text
}

/// User text for the judge call; the two images follow in the same message.
pub fn judge_user_text() -> String {
    "First image: original page. Second image: HTML rendition. Compare and score.".to_string()
}

/// Textual manifest of the page's figures, for the generator.
///
/// The figures themselves are visible inside the page image; the manifest
/// pins down the indices and boxes the placeholders must use.
fn figure_manifest(figures: &[Figure]) -> String {
    if figures.is_empty() {
        return "FIGURES: none on this page; emit no data-figure-index placeholders.".to_string();
    }
    let mut manifest = format!("FIGURES: {} on this page:\n", figures.len());
    for figure in figures {
        let [x0, y0, x1, y1] = figure.bbox;
        manifest.push_str(&format!(
            "- index {}: box ({:.0},{:.0})-({:.0},{:.0}) px, approx {:.0}x{:.0} px\n",
            figure.index,
            x0,
            y0,
            x1,
            y1,
            x1 - x0,
            y1 - y0,
        ));
    }
    manifest
}
