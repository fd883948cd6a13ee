//! Multi-judge orchestration: cross-model scoring, the equation specialist,
//! and the terminal verification gate.
//!
//! Composition order matters and is fixed:
//!
//! 1. judges A and B score the same pair concurrently (network-bound,
//!    independent — each is a pure function of its arguments);
//! 2. their feedbacks merge by weighted subscores;
//! 3. the equation specialist may *cap* the combined equation score — it is a
//!    transformation over the merged feedback, never a third peer vote;
//! 4. the verification gate runs only when the combined composite already
//!    meets the target, and can only veto.
//!
//! Every sub-operation can be disabled by configuration; a disabled stage is
//! the identity.

use crate::analysis::DocumentAnalysis;
use crate::config::ConversionConfig;
use crate::feedback::{JudgeFeedback, Verdict};
use crate::pipeline::judge::run_judge;
use crate::pipeline::llm::chat_with_retry;
use crate::prompts::{EQUATION_SPECIALIST_PROMPT, VERIFICATION_PROMPT};
use edgequake_llm::{ChatMessage, ImageData, LLMProvider};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The judge ensemble for one conversion run.
pub struct MultiJudge {
    /// Judge A; also runs the specialist and the gate.
    judge_a: Arc<dyn LLMProvider>,
    /// Judge B; absent when no second credential/provider is configured.
    judge_b: Option<Arc<dyn LLMProvider>>,
    weight_a: f32,
    equation_specialist: bool,
    verification_gate: bool,
    target_score: u8,
}

impl MultiJudge {
    pub fn new(
        judge_a: Arc<dyn LLMProvider>,
        judge_b: Option<Arc<dyn LLMProvider>>,
        config: &ConversionConfig,
    ) -> Self {
        Self {
            judge_a,
            judge_b,
            weight_a: config.judge_weight_a,
            equation_specialist: config.equation_specialist,
            verification_gate: config.verification_gate,
            target_score: config.target_score,
        }
    }

    /// Score a rendered page against the original and fold in the specialist
    /// and verification layers.
    pub async fn evaluate(
        &self,
        original_b64: &str,
        rendered_b64: &str,
        analysis: &DocumentAnalysis,
        config: &ConversionConfig,
        page_num: usize,
        iteration: u32,
    ) -> JudgeFeedback {
        // ── 1+2: cross-model scoring and weighted combination ─────────────
        let mut feedback = match &self.judge_b {
            Some(judge_b) => {
                let label_a = format!("page {} judge A #{}", page_num, iteration);
                let label_b = format!("page {} judge B #{}", page_num, iteration);
                let (a, b) = futures::join!(
                    run_judge(&self.judge_a, original_b64, rendered_b64, config, &label_a),
                    run_judge(judge_b, original_b64, rendered_b64, config, &label_b),
                );
                if a.fidelity_score.abs_diff(b.fidelity_score) > 15 {
                    warn!(
                        "page {} #{}: judges disagree ({} vs {})",
                        page_num, iteration, a.fidelity_score, b.fidelity_score
                    );
                }
                JudgeFeedback::combine(&a, &b, self.weight_a)
            }
            None => {
                let label = format!("page {} judge #{}", page_num, iteration);
                run_judge(&self.judge_a, original_b64, rendered_b64, config, &label).await
            }
        };

        // ── 3: equation specialist ─────────────────────────────────────────
        if self.equation_specialist && analysis.has_equations {
            if self
                .detect_ascii_math(rendered_b64, config, page_num, iteration)
                .await
            {
                info!(
                    "page {} #{}: ASCII-art math detected; equation score capped",
                    page_num, iteration
                );
                feedback
                    .critical_errors
                    .push("Replace plain-text math with MathJax-typeset equations".to_string());
                feedback.cap_equation_score();
            }
        }

        // ── 4: verification gate ───────────────────────────────────────────
        if self.verification_gate && feedback.fidelity_score >= self.target_score {
            let verdict = self
                .verify(original_b64, rendered_b64, config, page_num, iteration)
                .await;
            if verdict != Verdict::Accept {
                info!(
                    "page {} #{}: verification gate returned {:?}; continuing",
                    page_num, iteration, verdict
                );
                feedback.verification_failed = true;
            }
        }

        feedback
    }

    /// Ask the specialist whether the rendered page contains ASCII-art math.
    ///
    /// Conservative on failure: an unreachable or incoherent specialist never
    /// caps anything.
    async fn detect_ascii_math(
        &self,
        rendered_b64: &str,
        config: &ConversionConfig,
        page_num: usize,
        iteration: u32,
    ) -> bool {
        let messages = vec![
            ChatMessage::system(EQUATION_SPECIALIST_PROMPT),
            ChatMessage::user_with_images(
                "Inspect the mathematics on this rendered page.",
                vec![ImageData::new(rendered_b64.to_string(), "image/png").with_detail("high")],
            ),
        ];
        let label = format!("page {} equation specialist #{}", page_num, iteration);

        let reply = match chat_with_retry(&self.judge_a, &messages, config, &label).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("{}: specialist call failed ({}); no cap applied", label, e);
                return false;
            }
        };

        match crate::feedback::extract_json_object(&reply) {
            Some(value) => {
                let detected = value
                    .get("ascii_art_detected")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if detected {
                    if let Some(examples) = value.get("examples").and_then(|v| v.as_array()) {
                        debug!("{}: degraded expressions: {:?}", label, examples);
                    }
                }
                detected
            }
            None => {
                warn!("{}: specialist reply was not JSON; no cap applied", label);
                false
            }
        }
    }

    /// Run the lenient terminal check on an otherwise passing iteration.
    async fn verify(
        &self,
        original_b64: &str,
        rendered_b64: &str,
        config: &ConversionConfig,
        page_num: usize,
        iteration: u32,
    ) -> Verdict {
        let messages = vec![
            ChatMessage::system(VERIFICATION_PROMPT),
            ChatMessage::user_with_images(
                "First image: original page. Second image: HTML rendition.",
                vec![
                    ImageData::new(original_b64.to_string(), "image/png").with_detail("high"),
                    ImageData::new(rendered_b64.to_string(), "image/png").with_detail("high"),
                ],
            ),
        ];
        let label = format!("page {} verification #{}", page_num, iteration);

        match chat_with_retry(&self.judge_a, &messages, config, &label).await {
            Ok(reply) => Verdict::parse_reply(&reply),
            Err(e) => {
                // The gate is a lenient veto; an unreachable gate accepts.
                warn!("{}: verification call failed ({}); accepting", label, e);
                Verdict::Accept
            }
        }
    }
}
