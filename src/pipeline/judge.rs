//! Single-judge visual comparison: one model, two images, one feedback.
//!
//! A judge never raises to the loop. Transient API failures burn the shared
//! retry budget in [`crate::pipeline::llm`]; whatever is left after that —
//! an exhausted retry budget or an unparseable reply — becomes a zero-score
//! feedback whose critical error names the problem. The loop then treats the
//! iteration like any other low-scoring one.

use crate::config::ConversionConfig;
use crate::feedback::JudgeFeedback;
use crate::pipeline::llm::chat_with_retry;
use crate::prompts::{judge_user_text, JUDGE_SYSTEM_PROMPT};
use edgequake_llm::{ChatMessage, ImageData, LLMProvider};
use std::sync::Arc;
use tracing::warn;

/// Compare the original page raster against a rendered HTML raster.
///
/// `original_b64` and `rendered_b64` are base64 PNG payloads. The returned
/// feedback has its composite recomputed locally and `critical_errors` taken
/// verbatim from the model.
pub async fn run_judge(
    provider: &Arc<dyn LLMProvider>,
    original_b64: &str,
    rendered_b64: &str,
    config: &ConversionConfig,
    label: &str,
) -> JudgeFeedback {
    let messages = vec![
        ChatMessage::system(JUDGE_SYSTEM_PROMPT),
        ChatMessage::user_with_images(
            judge_user_text(),
            vec![
                ImageData::new(original_b64.to_string(), "image/png").with_detail("high"),
                ImageData::new(rendered_b64.to_string(), "image/png").with_detail("high"),
            ],
        ),
    ];

    let reply = match chat_with_retry(provider, &messages, config, label).await {
        Ok(reply) => reply,
        Err(detail) => {
            warn!("{}: judge call failed — {}", label, detail);
            return JudgeFeedback::zero(format!("Judge call failed: {}", detail), "");
        }
    };

    match JudgeFeedback::parse_reply(&reply) {
        Some(feedback) => feedback,
        None => {
            warn!("{}: judge reply was not parseable JSON", label);
            JudgeFeedback::zero("Judge reply was not parseable JSON", reply)
        }
    }
}
