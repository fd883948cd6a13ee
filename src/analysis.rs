//! Document profile inferred by the analyzer, and the prompt addendum
//! derived from it.
//!
//! The analyzer runs **once per document** (a single vision call over a small
//! page sample) and everything downstream consumes the result as plain data:
//! [`DocumentAnalysis`] is serialised to `document_analysis.json`, and
//! [`build_prompt_addendum`] turns it into the text block that conditions
//! every generator call. The builder is a pure function — same analysis in,
//! same addendum out — so prompt-shaping is testable without a model.

use serde::{Deserialize, Serialize};

/// Dominant text direction of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    /// Left-to-right (default, conservative fallback).
    #[default]
    Ltr,
    /// Right-to-left (Arabic, Hebrew, …).
    Rtl,
    /// Mixed or undetermined; the generator decides per element.
    Auto,
}

impl TextDirection {
    /// The value to put in an HTML `dir` attribute.
    pub fn as_attr(&self) -> &'static str {
        match self {
            TextDirection::Ltr => "ltr",
            TextDirection::Rtl => "rtl",
            TextDirection::Auto => "auto",
        }
    }
}

/// How demanding the document's mathematics is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquationComplexity {
    #[default]
    None,
    /// Inline symbols, simple super/subscripts.
    Simple,
    /// Display equations, fractions, matrices, multi-line derivations.
    Complex,
}

/// Column structure of the page body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutType {
    #[default]
    SingleColumn,
    MultiColumn,
    /// Some regions single-column (title, abstract), some multi-column.
    Mixed,
}

/// Broad font families observed in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FontClass {
    Serif,
    SansSerif,
    Monospace,
    Script,
}

impl FontClass {
    /// A CSS font stack suitable for this class.
    fn css_stack(&self) -> &'static str {
        match self {
            FontClass::Serif => "Georgia, 'Times New Roman', serif",
            FontClass::SansSerif => "'Helvetica Neue', Arial, sans-serif",
            FontClass::Monospace => "'Courier New', Consolas, monospace",
            FontClass::Script => "'Brush Script MT', cursive",
        }
    }
}

/// Structured profile of a document, produced once by the analyzer.
///
/// Parsed from the model's JSON reply; any missing field takes the
/// conservative default so a half-parseable reply still yields a usable
/// profile (with `confidence_degraded` set by the analyzer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentAnalysis {
    // ── Language and direction ────────────────────────────────────────────
    pub primary_language: String,
    pub text_direction: TextDirection,
    pub mixed_directions: bool,

    // ── Content flags ─────────────────────────────────────────────────────
    pub has_equations: bool,
    pub equation_complexity: EquationComplexity,
    pub has_tables: bool,
    pub has_figures: bool,
    pub has_code_blocks: bool,

    // ── Layout ────────────────────────────────────────────────────────────
    pub layout_type: LayoutType,
    pub column_count: u32,
    pub has_headers: bool,
    pub has_footers: bool,
    pub has_footnotes: bool,

    // ── Typography ────────────────────────────────────────────────────────
    pub font_classes: Vec<FontClass>,
    pub has_bold: bool,
    pub has_italic: bool,
    pub has_underline: bool,

    /// Free-form tag: academic, legal, technical, letter, …
    pub document_type: String,

    /// True when the model reply could not be parsed and defaults were used.
    #[serde(skip_deserializing)]
    pub confidence_degraded: bool,
}

impl Default for DocumentAnalysis {
    fn default() -> Self {
        Self {
            primary_language: "English".to_string(),
            text_direction: TextDirection::Ltr,
            mixed_directions: false,
            has_equations: false,
            equation_complexity: EquationComplexity::None,
            has_tables: false,
            has_figures: false,
            has_code_blocks: false,
            layout_type: LayoutType::SingleColumn,
            column_count: 1,
            has_headers: false,
            has_footers: false,
            has_footnotes: false,
            font_classes: vec![FontClass::Serif],
            has_bold: false,
            has_italic: false,
            has_underline: false,
            document_type: "general".to_string(),
            confidence_degraded: false,
        }
    }
}

impl DocumentAnalysis {
    /// Restore internal consistency after parsing or overrides.
    ///
    /// Enforces: equation complexity implies the equations flag, and a
    /// multi-column layout reports at least two columns.
    pub fn normalise(mut self) -> Self {
        if self.equation_complexity != EquationComplexity::None {
            self.has_equations = true;
        }
        if !self.has_equations {
            self.equation_complexity = EquationComplexity::None;
        }
        self.column_count = self.column_count.max(1);
        if self.layout_type == LayoutType::MultiColumn && self.column_count < 2 {
            self.column_count = 2;
        }
        if self.font_classes.is_empty() {
            self.font_classes.push(FontClass::Serif);
        }
        self
    }
}

// ── Prompt addendum ──────────────────────────────────────────────────────

/// Build the generator prompt addendum from a document analysis.
///
/// The addendum is data, not code: each section is emitted from the analysis
/// table above, so new document traits extend this function rather than
/// scattering branches through the generator.
pub fn build_prompt_addendum(analysis: &DocumentAnalysis) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!(
        "DOCUMENT PROFILE: {} document, primary language {}.",
        analysis.document_type, analysis.primary_language
    ));

    // Direction and language attributes
    let dir = analysis.text_direction.as_attr();
    let mut dir_rules = format!(
        "DIRECTION: set dir=\"{dir}\" and lang=\"{}\" on the <html> element.",
        language_tag(&analysis.primary_language)
    );
    if analysis.mixed_directions {
        dir_rules.push_str(
            " The document mixes directions: wrap embedded opposite-direction runs \
             in elements with their own dir attribute.",
        );
    }
    sections.push(dir_rules);

    // Column grid
    match analysis.layout_type {
        LayoutType::SingleColumn => {
            sections.push("LAYOUT: single column; use normal block flow.".to_string());
        }
        LayoutType::MultiColumn => {
            sections.push(format!(
                "LAYOUT: {} columns; use CSS grid \
                 (grid-template-columns: repeat({}, 1fr); column-gap ≈ 2em) \
                 and keep the reading order column by column.",
                analysis.column_count, analysis.column_count
            ));
        }
        LayoutType::Mixed => {
            sections.push(format!(
                "LAYOUT: mixed; full-width regions (title, abstract, figures) in normal flow, \
                 body text in a {}-column CSS grid.",
                analysis.column_count.max(2)
            ));
        }
    }

    // Typography
    let stacks: Vec<&str> = analysis.font_classes.iter().map(FontClass::css_stack).collect();
    sections.push(format!(
        "TYPOGRAPHY: font stacks in use: {}. Apply the first stack to body text.",
        stacks.join(" | ")
    ));
    let mut emphasis = Vec::new();
    if analysis.has_bold {
        emphasis.push("bold");
    }
    if analysis.has_italic {
        emphasis.push("italic");
    }
    if analysis.has_underline {
        emphasis.push("underline");
    }
    if !emphasis.is_empty() {
        sections.push(format!(
            "EMPHASIS: reproduce {} styling exactly where the page shows it.",
            emphasis.join(", ")
        ));
    }

    // Mathematics
    if analysis.has_equations {
        let detail = match analysis.equation_complexity {
            EquationComplexity::Complex => {
                "Display mathematics is complex (fractions, matrices, multi-line derivations): \
                 every equation MUST use MathJax delimiters — \\( ... \\) inline and $$ ... $$ \
                 for display blocks. Never approximate math with plain text like x^2 or a/b."
            }
            _ => {
                "Mathematical notation appears: use MathJax delimiters — \\( ... \\) inline \
                 and $$ ... $$ for display blocks — instead of plain-text approximations."
            }
        };
        sections.push(format!("MATHEMATICS: {detail}"));
    }

    // Structural extras
    let mut extras = Vec::new();
    if analysis.has_tables {
        extras.push("tables (use real <table> markup with borders matching the page)");
    }
    if analysis.has_code_blocks {
        extras.push("code blocks (use <pre><code> with a monospace stack)");
    }
    if analysis.has_headers {
        extras.push("a running page header");
    }
    if analysis.has_footers {
        extras.push("a running page footer");
    }
    if analysis.has_footnotes {
        extras.push("footnotes (smaller font, separated by a rule)");
    }
    if !extras.is_empty() {
        sections.push(format!("ALSO PRESENT: {}.", extras.join(", ")));
    }

    sections.join("\n\n")
}

/// Best-effort BCP-47-ish tag for a free-form language label.
///
/// The analyzer reports languages as labels ("English", "Arabic"); the HTML
/// lang attribute wants a tag. Unknown labels pass through lowercased, which
/// browsers tolerate.
fn language_tag(label: &str) -> String {
    match label.to_ascii_lowercase().as_str() {
        "english" => "en".into(),
        "arabic" => "ar".into(),
        "hebrew" => "he".into(),
        "french" => "fr".into(),
        "german" => "de".into(),
        "spanish" => "es".into(),
        "chinese" | "mandarin" => "zh".into(),
        "japanese" => "ja".into(),
        "korean" => "ko".into(),
        "russian" => "ru".into(),
        "portuguese" => "pt".into(),
        "italian" => "it".into(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise_enforces_equation_invariant() {
        let a = DocumentAnalysis {
            has_equations: false,
            equation_complexity: EquationComplexity::Complex,
            ..Default::default()
        }
        .normalise();
        assert!(a.has_equations, "complexity != none must imply has_equations");

        let b = DocumentAnalysis {
            has_equations: false,
            equation_complexity: EquationComplexity::None,
            ..Default::default()
        }
        .normalise();
        assert!(!b.has_equations);
        assert_eq!(b.equation_complexity, EquationComplexity::None);
    }

    #[test]
    fn normalise_fixes_column_count() {
        let a = DocumentAnalysis {
            layout_type: LayoutType::MultiColumn,
            column_count: 0,
            ..Default::default()
        }
        .normalise();
        assert_eq!(a.column_count, 2);
    }

    #[test]
    fn addendum_is_deterministic() {
        let analysis = DocumentAnalysis {
            has_equations: true,
            equation_complexity: EquationComplexity::Complex,
            ..Default::default()
        }
        .normalise();
        assert_eq!(
            build_prompt_addendum(&analysis),
            build_prompt_addendum(&analysis)
        );
    }

    #[test]
    fn addendum_encodes_rtl_direction() {
        let analysis = DocumentAnalysis {
            primary_language: "Arabic".into(),
            text_direction: TextDirection::Rtl,
            ..Default::default()
        };
        let addendum = build_prompt_addendum(&analysis);
        assert!(addendum.contains("dir=\"rtl\""));
        assert!(addendum.contains("lang=\"ar\""));
    }

    #[test]
    fn addendum_demands_mathjax_for_complex_equations() {
        let analysis = DocumentAnalysis {
            has_equations: true,
            equation_complexity: EquationComplexity::Complex,
            ..Default::default()
        };
        let addendum = build_prompt_addendum(&analysis);
        assert!(addendum.contains("$$"));
        assert!(addendum.contains("\\("));
        assert!(addendum.contains("Never approximate"));
    }

    #[test]
    fn addendum_describes_column_grid() {
        let analysis = DocumentAnalysis {
            layout_type: LayoutType::MultiColumn,
            column_count: 2,
            ..Default::default()
        };
        let addendum = build_prompt_addendum(&analysis);
        assert!(addendum.contains("repeat(2, 1fr)"));
    }

    #[test]
    fn analysis_round_trips_through_json() {
        let analysis = DocumentAnalysis {
            primary_language: "Hebrew".into(),
            text_direction: TextDirection::Rtl,
            layout_type: LayoutType::Mixed,
            font_classes: vec![FontClass::Serif, FontClass::Monospace],
            ..Default::default()
        };
        let json = serde_json::to_string(&analysis).unwrap();
        assert!(json.contains("\"rtl\""));
        assert!(json.contains("\"mixed\""));
        let back: DocumentAnalysis = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text_direction, TextDirection::Rtl);
        assert_eq!(back.layout_type, LayoutType::Mixed);
    }

    #[test]
    fn partial_json_takes_defaults() {
        // Extra keys ignored, missing keys defaulted.
        let back: DocumentAnalysis = serde_json::from_str(
            r#"{"primary_language": "French", "has_tables": true, "unknown_key": 1}"#,
        )
        .unwrap();
        assert_eq!(back.primary_language, "French");
        assert!(back.has_tables);
        assert_eq!(back.text_direction, TextDirection::Ltr);
        assert_eq!(back.column_count, 1);
    }
}
