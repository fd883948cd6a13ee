//! Judge feedback: the value object exchanged between judges, the
//! multi-judge combiner, the refinement loop, and the generator.
//!
//! Judge models reply with JSON of a fixed shape (five integer scores plus a
//! list of critical errors). Replies are parsed **leniently** — extra keys are
//! ignored, missing numeric keys default to 0, scores are clamped to 0–100 —
//! because a judge that rambles around its JSON is still more useful than no
//! judge at all. The composite score is never trusted from the model; it is
//! recomputed locally from the subscores so every persisted feedback obeys the
//! same law.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Weight of the text-accuracy subscore in the composite.
pub const WEIGHT_TEXT: f64 = 0.50;
/// Weight of the layout subscore in the composite.
pub const WEIGHT_LAYOUT: f64 = 0.30;
/// Weight of the equation subscore in the composite.
pub const WEIGHT_EQUATION: f64 = 0.15;
/// Weight of the color-match subscore in the composite.
pub const WEIGHT_COLOR: f64 = 0.05;

/// Ceiling applied to the equation subscore when the specialist detects
/// ASCII-art mathematics in the rendered page.
pub const EQUATION_CAP: u8 = 40;

/// Structured feedback from one judge pass (or the combination of several).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeFeedback {
    /// Composite fidelity estimate, 0–100. Always recomputed locally.
    pub fidelity_score: u8,
    pub layout_score: u8,
    pub text_accuracy_score: u8,
    pub color_match_score: u8,
    pub equation_score: u8,

    /// Short imperative defect descriptions, most severe first.
    pub critical_errors: Vec<String>,

    /// Elements the judge confirms as correct; the generator is told not to
    /// touch these during refinement. Empty when the judge does not report it.
    #[serde(default)]
    pub preserved_correctly: Vec<String>,

    /// Set when two cross-model judges disagreed by more than the consensus
    /// threshold. Warning only; does not affect loop termination.
    #[serde(default)]
    pub judges_disagree: bool,

    /// Set when the verification gate vetoed an otherwise passing iteration.
    #[serde(default)]
    pub verification_failed: bool,

    /// Set when the equation specialist capped the equation subscore.
    #[serde(default)]
    pub equation_capped: bool,

    /// Original model reply, retained for diagnostics.
    #[serde(default)]
    pub raw_response: String,
}

impl JudgeFeedback {
    /// Composite score law: `round(0.50·text + 0.30·layout + 0.15·equation + 0.05·color)`.
    pub fn composite(text: u8, layout: u8, equation: u8, color: u8) -> u8 {
        let score = WEIGHT_TEXT * f64::from(text)
            + WEIGHT_LAYOUT * f64::from(layout)
            + WEIGHT_EQUATION * f64::from(equation)
            + WEIGHT_COLOR * f64::from(color);
        score.round().clamp(0.0, 100.0) as u8
    }

    /// Recompute `fidelity_score` from the current subscores.
    pub fn recompute_composite(&mut self) {
        self.fidelity_score = Self::composite(
            self.text_accuracy_score,
            self.layout_score,
            self.equation_score,
            self.color_match_score,
        );
    }

    /// A zero-score feedback carrying a single critical error.
    ///
    /// Used for unparseable judge replies and failed render/generate stages so
    /// every iteration persists a feedback record.
    pub fn zero(reason: impl Into<String>, raw_response: impl Into<String>) -> Self {
        Self {
            fidelity_score: 0,
            layout_score: 0,
            text_accuracy_score: 0,
            color_match_score: 0,
            equation_score: 0,
            critical_errors: vec![reason.into()],
            preserved_correctly: Vec::new(),
            judges_disagree: false,
            verification_failed: false,
            equation_capped: false,
            raw_response: raw_response.into(),
        }
    }

    /// Parse a judge model reply into feedback.
    ///
    /// Accepts the reply as-is, inside code fences, or embedded in prose:
    /// the first top-level `{ ... }` object wins. Missing numeric keys
    /// default to 0; extra keys are ignored; the composite is recomputed.
    /// Returns `None` when no JSON object can be recovered at all.
    pub fn parse_reply(reply: &str) -> Option<Self> {
        let value = extract_json_object(reply)?;

        let score = |key: &str| -> u8 {
            value
                .get(key)
                .and_then(score_value)
                .unwrap_or(0)
        };

        let strings = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str())
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut feedback = Self {
            fidelity_score: 0,
            layout_score: score("layout_score"),
            text_accuracy_score: score("text_accuracy_score"),
            color_match_score: score("color_match_score"),
            equation_score: score("equation_score"),
            critical_errors: strings("critical_errors"),
            preserved_correctly: strings("preserved_correctly"),
            judges_disagree: false,
            verification_failed: false,
            equation_capped: false,
            raw_response: reply.to_string(),
        };
        feedback.recompute_composite();
        Some(feedback)
    }

    /// Weighted combination of two independent judge feedbacks.
    ///
    /// Each subscore becomes `round(w_a·a + w_b·b)` with `w_b = 1 − w_a`;
    /// critical errors are unioned with near-duplicate suppression; the
    /// disagreement flag is set when the two composites differ by more than
    /// the consensus threshold (15 points).
    pub fn combine(a: &Self, b: &Self, weight_a: f32) -> Self {
        let w_a = f64::from(weight_a.clamp(0.0, 1.0));
        let w_b = 1.0 - w_a;
        let mix = |x: u8, y: u8| -> u8 {
            (w_a * f64::from(x) + w_b * f64::from(y))
                .round()
                .clamp(0.0, 100.0) as u8
        };

        let mut critical_errors = a.critical_errors.clone();
        let mut seen: Vec<String> = critical_errors.iter().map(|e| normalise_error(e)).collect();
        for error in &b.critical_errors {
            let key = normalise_error(error);
            if !seen.contains(&key) {
                seen.push(key);
                critical_errors.push(error.clone());
            }
        }

        let mut preserved = a.preserved_correctly.clone();
        for item in &b.preserved_correctly {
            if !preserved.contains(item) {
                preserved.push(item.clone());
            }
        }

        let disagree = a.fidelity_score.abs_diff(b.fidelity_score) > 15;

        let mut combined = Self {
            fidelity_score: 0,
            layout_score: mix(a.layout_score, b.layout_score),
            text_accuracy_score: mix(a.text_accuracy_score, b.text_accuracy_score),
            color_match_score: mix(a.color_match_score, b.color_match_score),
            equation_score: mix(a.equation_score, b.equation_score),
            critical_errors,
            preserved_correctly: preserved,
            judges_disagree: disagree,
            verification_failed: false,
            equation_capped: false,
            raw_response: format!("A: {}\n---\nB: {}", a.raw_response, b.raw_response),
        };
        combined.recompute_composite();
        combined
    }

    /// Cap the equation subscore at [`EQUATION_CAP`] and recompute the
    /// composite. No-op when the score is already at or below the cap.
    pub fn cap_equation_score(&mut self) {
        if self.equation_score > EQUATION_CAP {
            self.equation_score = EQUATION_CAP;
        }
        self.equation_capped = true;
        self.recompute_composite();
    }
}

/// Verdict of the terminal verification gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Reject,
    NeedsRefinement,
}

impl Verdict {
    /// Parse a gate reply. Unknown or unparseable verdicts count as accept:
    /// the gate is a lenient veto, and a malformed veto must not strand an
    /// otherwise passing page.
    pub fn parse_reply(reply: &str) -> Self {
        let Some(value) = extract_json_object(reply) else {
            return Verdict::Accept;
        };
        match value.get("verdict").and_then(|v| v.as_str()) {
            Some("reject") => Verdict::Reject,
            Some("needs_refinement") => Verdict::NeedsRefinement,
            _ => Verdict::Accept,
        }
    }
}

// ── Reply plumbing ───────────────────────────────────────────────────────

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

/// Pull the first JSON object out of a model reply.
///
/// Tries, in order: the whole trimmed reply, a fenced ```json block, and the
/// outermost brace-delimited substring.
pub(crate) fn extract_json_object(reply: &str) -> Option<serde_json::Value> {
    let trimmed = reply.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    if let Some(caps) = RE_JSON_FENCE.captures(trimmed) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&caps[1]) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(&trimmed[start..=end])
        .ok()
        .filter(|v| v.is_object())
}

/// Clamp a JSON number (or numeric string — some models quote their scores)
/// into 0–100.
fn score_value(value: &serde_json::Value) -> Option<u8> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(n.round().clamp(0.0, 100.0) as u8)
}

/// Normalisation key for deduplicating critical errors across judges:
/// lowercase, collapsed whitespace, trailing punctuation stripped.
fn normalise_error(error: &str) -> String {
    error
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '!', ';'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_law_matches_weights() {
        // 0.50·90 + 0.30·80 + 0.15·70 + 0.05·60 = 82.5 → 83
        assert_eq!(JudgeFeedback::composite(90, 80, 70, 60), 83);
        assert_eq!(JudgeFeedback::composite(100, 100, 100, 100), 100);
        assert_eq!(JudgeFeedback::composite(0, 0, 0, 0), 0);
    }

    #[test]
    fn parse_reply_recomputes_composite() {
        let reply = r#"{
            "fidelity_score": 99,
            "layout_score": 80,
            "text_accuracy_score": 90,
            "color_match_score": 60,
            "equation_score": 70,
            "critical_errors": ["Fix the title font size"]
        }"#;
        let fb = JudgeFeedback::parse_reply(reply).unwrap();
        // The model's own 99 is ignored.
        assert_eq!(fb.fidelity_score, JudgeFeedback::composite(90, 80, 70, 60));
        assert_eq!(fb.critical_errors, vec!["Fix the title font size"]);
    }

    #[test]
    fn parse_reply_defaults_missing_keys_to_zero() {
        let fb = JudgeFeedback::parse_reply(r#"{"layout_score": 50, "extra": "ignored"}"#).unwrap();
        assert_eq!(fb.layout_score, 50);
        assert_eq!(fb.text_accuracy_score, 0);
        assert_eq!(fb.equation_score, 0);
        assert!(fb.critical_errors.is_empty());
    }

    #[test]
    fn parse_reply_handles_fences_and_prose() {
        let reply = "Here is my assessment:\n```json\n{\"layout_score\": 75, \"text_accuracy_score\": 85, \"color_match_score\": 90, \"equation_score\": 100, \"critical_errors\": []}\n```\nHope that helps!";
        let fb = JudgeFeedback::parse_reply(reply).unwrap();
        assert_eq!(fb.layout_score, 75);
        assert_eq!(fb.fidelity_score, JudgeFeedback::composite(85, 75, 100, 90));
    }

    #[test]
    fn parse_reply_accepts_quoted_scores() {
        let fb = JudgeFeedback::parse_reply(r#"{"text_accuracy_score": "88"}"#).unwrap();
        assert_eq!(fb.text_accuracy_score, 88);
    }

    #[test]
    fn parse_reply_rejects_garbage() {
        assert!(JudgeFeedback::parse_reply("I cannot compare these images.").is_none());
        assert!(JudgeFeedback::parse_reply("").is_none());
    }

    #[test]
    fn combine_weights_subscores() {
        let a = JudgeFeedback::parse_reply(
            r#"{"layout_score": 80, "text_accuracy_score": 90, "color_match_score": 100, "equation_score": 60, "critical_errors": ["Fix header"]}"#,
        )
        .unwrap();
        let b = JudgeFeedback::parse_reply(
            r#"{"layout_score": 60, "text_accuracy_score": 70, "color_match_score": 80, "equation_score": 40, "critical_errors": ["fix header.", "Align the table"]}"#,
        )
        .unwrap();
        let combined = JudgeFeedback::combine(&a, &b, 0.5);
        assert_eq!(combined.layout_score, 70);
        assert_eq!(combined.text_accuracy_score, 80);
        assert_eq!(combined.color_match_score, 90);
        assert_eq!(combined.equation_score, 50);
        // "fix header." deduplicates against "Fix header" after normalisation.
        assert_eq!(
            combined.critical_errors,
            vec!["Fix header", "Align the table"]
        );
    }

    #[test]
    fn combine_flags_disagreement_beyond_threshold() {
        let a = JudgeFeedback::parse_reply(
            r#"{"layout_score": 90, "text_accuracy_score": 90, "color_match_score": 90, "equation_score": 90}"#,
        )
        .unwrap();
        let b = JudgeFeedback::parse_reply(
            r#"{"layout_score": 60, "text_accuracy_score": 60, "color_match_score": 60, "equation_score": 60}"#,
        )
        .unwrap();
        assert!(a.fidelity_score.abs_diff(b.fidelity_score) > 15);
        assert!(JudgeFeedback::combine(&a, &b, 0.5).judges_disagree);

        let c = JudgeFeedback::parse_reply(
            r#"{"layout_score": 85, "text_accuracy_score": 85, "color_match_score": 85, "equation_score": 85}"#,
        )
        .unwrap();
        assert!(!JudgeFeedback::combine(&a, &c, 0.5).judges_disagree);
    }

    #[test]
    fn combine_with_full_weight_a_is_identity_on_scores() {
        let a = JudgeFeedback::parse_reply(
            r#"{"layout_score": 81, "text_accuracy_score": 92, "color_match_score": 73, "equation_score": 64}"#,
        )
        .unwrap();
        let b = JudgeFeedback::zero("ignored", "");
        let combined = JudgeFeedback::combine(&a, &b, 1.0);
        assert_eq!(combined.layout_score, a.layout_score);
        assert_eq!(combined.text_accuracy_score, a.text_accuracy_score);
        assert_eq!(combined.fidelity_score, a.fidelity_score);
    }

    #[test]
    fn equation_cap_lowers_score_and_recomputes() {
        let mut fb = JudgeFeedback::parse_reply(
            r#"{"layout_score": 90, "text_accuracy_score": 90, "color_match_score": 90, "equation_score": 95}"#,
        )
        .unwrap();
        let before = fb.fidelity_score;
        fb.cap_equation_score();
        assert_eq!(fb.equation_score, EQUATION_CAP);
        assert!(fb.equation_capped);
        assert!(fb.fidelity_score < before);
        assert_eq!(
            fb.fidelity_score,
            JudgeFeedback::composite(90, 90, EQUATION_CAP, 90)
        );
    }

    #[test]
    fn equation_cap_does_not_raise_low_scores() {
        let mut fb = JudgeFeedback::zero("render failed", "");
        fb.equation_score = 10;
        fb.cap_equation_score();
        assert_eq!(fb.equation_score, 10);
    }

    #[test]
    fn zero_feedback_carries_reason() {
        let fb = JudgeFeedback::zero("judge reply was not JSON", "raw");
        assert_eq!(fb.fidelity_score, 0);
        assert_eq!(fb.critical_errors.len(), 1);
        assert_eq!(fb.raw_response, "raw");
    }

    #[test]
    fn verdict_parsing_is_lenient() {
        assert_eq!(Verdict::parse_reply(r#"{"verdict": "accept"}"#), Verdict::Accept);
        assert_eq!(Verdict::parse_reply(r#"{"verdict": "reject"}"#), Verdict::Reject);
        assert_eq!(
            Verdict::parse_reply(r#"{"verdict": "needs_refinement"}"#),
            Verdict::NeedsRefinement
        );
        // Malformed replies count as accept.
        assert_eq!(Verdict::parse_reply("looks fine to me"), Verdict::Accept);
        assert_eq!(Verdict::parse_reply(r#"{"verdict": "maybe"}"#), Verdict::Accept);
    }

    #[test]
    fn feedback_round_trips_through_json() {
        let fb = JudgeFeedback::parse_reply(
            r#"{"layout_score": 80, "text_accuracy_score": 90, "color_match_score": 70, "equation_score": 60, "critical_errors": ["x"]}"#,
        )
        .unwrap();
        let json = serde_json::to_string(&fb).unwrap();
        let back: JudgeFeedback = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fidelity_score, fb.fidelity_score);
        assert_eq!(back.critical_errors, fb.critical_errors);
    }
}
