//! The per-page refinement state machine.
//!
//! ```text
//!   START → GENERATE → RENDER → JUDGE → DECIDE
//!                                        ├── accept → COMMIT → END
//!                                        └── refine → GENERATE (N+1)
//!
//!   Any stage may fail → RECORD_FAILURE → DECIDE
//! ```
//!
//! The cycle is an explicit loop with persisted iteration records, not mutual
//! recursion between generator and judge: every iteration writes its
//! artifacts (`iteration_KK.html`, `rendered_KK.png`, `feedback_KK.json`)
//! before the next one starts, so a crashed or cancelled run leaves a
//! readable trail and an idempotent re-run can pick up the result.
//!
//! Failed stages still persist a zero-score feedback naming the failure; they
//! count against the budget like any other low-scoring iteration. A page that
//! exhausts its budget is a best-effort *result*: the highest-scoring
//! iteration (ties → latest) is promoted to `final.html` with
//! `success = false`.

use crate::analysis::DocumentAnalysis;
use crate::config::ConversionConfig;
use crate::error::ConvertError;
#[cfg(test)]
use crate::error::IterationError;
use crate::feedback::JudgeFeedback;
use crate::output::{
    feedback_name, iteration_html_name, rendered_image_name, IterationRecord, PageResult,
    FINAL_HTML,
};
use crate::pipeline::generate;
use crate::pipeline::ingest::PageAssets;
use crate::pipeline::multi_judge::MultiJudge;
use crate::pipeline::render::HtmlRenderer;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::LLMProvider;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything one page's state machine needs, borrowed from the document run.
pub struct PageContext<'a> {
    pub generator: &'a Arc<dyn LLMProvider>,
    pub multi_judge: &'a MultiJudge,
    pub renderer: &'a HtmlRenderer,
    pub analysis: &'a DocumentAnalysis,
    pub addendum: &'a str,
    pub config: &'a ConversionConfig,
}

/// What the loop does after an iteration's feedback is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Accept,
    Refine,
    Exhausted,
}

/// Run the state machine for one page. `page_dir` must already exist.
pub async fn run_page(
    ctx: &PageContext<'_>,
    assets: &PageAssets,
    page_dir: &Path,
) -> Result<PageResult, ConvertError> {
    let page_num = assets.page_index + 1;
    let max_retries = ctx.config.max_retries;
    let mut iterations: Vec<IterationRecord> = Vec::new();
    // The iteration DECIDE accepted, if any; COMMIT promotes exactly this one.
    let mut accepted: Option<u32> = None;
    // The last successfully judged (html, feedback) pair; refinement always
    // builds on this, falling back to a fresh generation when none exists.
    let mut last_good: Option<(String, JudgeFeedback)> = None;

    for iteration in 1..=max_retries {
        if cancelled(ctx.config) {
            info!("page {}: cancellation requested; stopping after iteration {}", page_num, iteration - 1);
            break;
        }

        let record = run_iteration(ctx, assets, page_dir, iteration, last_good.as_ref()).await?;

        if let Some(ref cb) = ctx.config.progress_callback {
            let score = record
                .error
                .is_none()
                .then_some(record.feedback.fidelity_score);
            cb.on_iteration(page_num, iteration, score);
        }

        if record.error.is_none() {
            if let Some(ref html_path) = record.html_path {
                let html = tokio::fs::read_to_string(html_path).await.map_err(|e| {
                    ConvertError::Internal(format!("re-read iteration html: {}", e))
                })?;
                last_good = Some((html, record.feedback.clone()));
            }
        }

        let decision = decide(&record, ctx.config.target_score, iteration, max_retries);
        iterations.push(record);

        match decision {
            Decision::Accept => {
                accepted = Some(iteration);
                break;
            }
            Decision::Refine => continue,
            Decision::Exhausted => break,
        }
    }

    finalize_page(assets.page_index, page_dir, iterations, accepted).await
}

/// One GENERATE → RENDER → JUDGE pass, with every artifact persisted before
/// returning.
async fn run_iteration(
    ctx: &PageContext<'_>,
    assets: &PageAssets,
    page_dir: &Path,
    iteration: u32,
    last_good: Option<&(String, JudgeFeedback)>,
) -> Result<IterationRecord, ConvertError> {
    let page_num = assets.page_index + 1;

    // ── GENERATE ──────────────────────────────────────────────────────────
    let html = match last_good {
        Some((prior_html, prior_feedback)) => {
            generate::refine(
                ctx.generator,
                prior_html,
                assets,
                prior_feedback,
                ctx.addendum,
                ctx.config,
                iteration,
            )
            .await
        }
        None => {
            generate::generate_initial(ctx.generator, assets, ctx.addendum, ctx.config, iteration)
                .await
        }
    };

    let html = match html {
        Ok(html) => html,
        Err(error) => {
            warn!("page {} #{}: {}", page_num, iteration, error);
            let feedback = JudgeFeedback::zero(format!("{}", error), "");
            persist_feedback(page_dir, iteration, &feedback).await?;
            return Ok(IterationRecord {
                iteration,
                html_path: None,
                rendered_path: None,
                feedback,
                error: Some(error),
            });
        }
    };

    let html_path = page_dir.join(iteration_html_name(iteration));
    write_artifact(&html_path, html.as_bytes()).await?;

    // ── RENDER ────────────────────────────────────────────────────────────
    let rendered_path = page_dir.join(rendered_image_name(iteration));
    if let Err(error) = ctx.renderer.render_html(&html, &rendered_path, iteration).await {
        warn!("page {} #{}: {}", page_num, iteration, error);
        let feedback = JudgeFeedback::zero(format!("{}", error), "");
        persist_feedback(page_dir, iteration, &feedback).await?;
        return Ok(IterationRecord {
            iteration,
            html_path: Some(html_path),
            rendered_path: None,
            feedback,
            error: Some(error),
        });
    }

    let rendered_png = tokio::fs::read(&rendered_path)
        .await
        .map_err(|e| ConvertError::Internal(format!("re-read raster: {}", e)))?;
    let rendered_b64 = STANDARD.encode(&rendered_png);

    // ── JUDGE ─────────────────────────────────────────────────────────────
    let feedback = ctx
        .multi_judge
        .evaluate(
            &assets.page_b64,
            &rendered_b64,
            ctx.analysis,
            ctx.config,
            page_num,
            iteration,
        )
        .await;

    persist_feedback(page_dir, iteration, &feedback).await?;

    debug!(
        "page {} #{}: composite {} (layout {}, text {}, eq {}, color {})",
        page_num,
        iteration,
        feedback.fidelity_score,
        feedback.layout_score,
        feedback.text_accuracy_score,
        feedback.equation_score,
        feedback.color_match_score,
    );

    Ok(IterationRecord {
        iteration,
        html_path: Some(html_path),
        rendered_path: Some(rendered_path),
        feedback,
        error: None,
    })
}

/// The DECIDE state, as a pure function of the freshest record.
fn decide(record: &IterationRecord, target: u8, iteration: u32, max_retries: u32) -> Decision {
    let passes = record.error.is_none()
        && record.html_path.is_some()
        && record.feedback.fidelity_score >= target
        && !record.feedback.verification_failed;

    if passes {
        Decision::Accept
    } else if iteration < max_retries {
        Decision::Refine
    } else {
        Decision::Exhausted
    }
}

/// Pick the fallback iteration for an exhausted budget: highest composite;
/// ties → latest. Iterations that produced no HTML can never be promoted.
///
/// Only the exhaustion path uses this — an accepted iteration is promoted by
/// its own number, never out-scored by an earlier (possibly gate-rejected)
/// record.
fn best_iteration(iterations: &[IterationRecord]) -> Option<&IterationRecord> {
    iterations
        .iter()
        .filter(|record| record.html_path.is_some())
        .max_by_key(|record| (record.feedback.fidelity_score, record.iteration))
}

/// COMMIT + summarise: copy the chosen iteration to `final.html` and build
/// the terminal record.
///
/// `accepted` is the iteration number DECIDE accepted, when it did; that
/// iteration is promoted with `success = true`. Without an acceptance the
/// page is best-effort: the highest-scoring iteration is promoted with
/// `success = false`.
async fn finalize_page(
    page_index: usize,
    page_dir: &Path,
    iterations: Vec<IterationRecord>,
    accepted: Option<u32>,
) -> Result<PageResult, ConvertError> {
    let final_path = page_dir.join(FINAL_HTML);
    let iterations_run = iterations.len() as u32;

    let promoted = match accepted {
        Some(n) => iterations.iter().find(|record| record.iteration == n),
        None => best_iteration(&iterations),
    };

    let (success, final_score) = match promoted {
        Some(record) => {
            let source = record
                .html_path
                .as_ref()
                .expect("promoted iterations always carry html");
            tokio::fs::copy(source, &final_path)
                .await
                .map_err(|e| ConvertError::OutputWriteFailed {
                    path: final_path.clone(),
                    source: e,
                })?;
            (accepted.is_some(), record.feedback.fidelity_score)
        }
        None => {
            warn!(
                "page {}: no iteration produced HTML; nothing to promote",
                page_index + 1
            );
            (false, 0)
        }
    };

    Ok(PageResult {
        page_index,
        success,
        final_score,
        iterations_run,
        final_html_path: final_path,
        iterations,
    })
}

/// Rebuild a [`PageResult`] from an existing page directory.
///
/// Used by the idempotence check: a page whose `final.html` already exists is
/// not re-processed (unless forced), but its result still contributes to the
/// run summary.
pub async fn reconstruct_page_result(
    page_dir: &Path,
    page_index: usize,
    target: u8,
) -> Option<PageResult> {
    let final_path = page_dir.join(FINAL_HTML);
    if !final_path.exists() {
        return None;
    }

    let mut iterations = Vec::new();
    for iteration in 1u32.. {
        let feedback_path = page_dir.join(feedback_name(iteration));
        if !feedback_path.exists() {
            break;
        }
        let feedback = match tokio::fs::read_to_string(&feedback_path).await {
            Ok(json) => serde_json::from_str::<JudgeFeedback>(&json).ok()?,
            Err(_) => return None,
        };
        let html_path = existing(page_dir.join(iteration_html_name(iteration)));
        let rendered_path = existing(page_dir.join(rendered_image_name(iteration)));
        iterations.push(IterationRecord {
            iteration,
            html_path,
            rendered_path,
            feedback,
            error: None,
        });
    }

    // Mirror the live run's COMMIT: the loop stops at the first acceptance,
    // so the accepted iteration — when one exists — is the *last* record that
    // clears the target with the gate's blessing. Anything else was a
    // best-effort promotion.
    let accepted = iterations.iter().rev().find(|record| {
        record.html_path.is_some()
            && record.feedback.fidelity_score >= target
            && !record.feedback.verification_failed
    });
    let (success, final_score) = match accepted {
        Some(record) => (true, record.feedback.fidelity_score),
        None => (false, best_iteration(&iterations)?.feedback.fidelity_score),
    };
    let iterations_run = iterations.len() as u32;

    Some(PageResult {
        page_index,
        success,
        final_score,
        iterations_run,
        final_html_path: final_path,
        iterations,
    })
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then_some(path)
}

fn cancelled(config: &ConversionConfig) -> bool {
    config
        .cancel
        .as_ref()
        .map(|flag| flag.load(Ordering::Relaxed))
        .unwrap_or(false)
}

async fn persist_feedback(
    page_dir: &Path,
    iteration: u32,
    feedback: &JudgeFeedback,
) -> Result<(), ConvertError> {
    let path = page_dir.join(feedback_name(iteration));
    let json = serde_json::to_string_pretty(feedback)
        .map_err(|e| ConvertError::Internal(format!("feedback serialise: {}", e)))?;
    write_artifact(&path, json.as_bytes()).await
}

async fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), ConvertError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| ConvertError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(iteration: u32, score: u8, has_html: bool, failed: bool) -> IterationRecord {
        let mut feedback = JudgeFeedback::zero("synthetic", "");
        feedback.fidelity_score = score;
        feedback.critical_errors.clear();
        IterationRecord {
            iteration,
            html_path: has_html.then(|| PathBuf::from(format!("iteration_{:02}.html", iteration))),
            rendered_path: has_html.then(|| PathBuf::from(format!("rendered_{:02}.png", iteration))),
            feedback,
            error: failed.then(|| IterationError::Render {
                iteration,
                detail: "synthetic".into(),
            }),
        }
    }

    #[test]
    fn decide_accepts_at_target() {
        let r = record(1, 85, true, false);
        assert_eq!(decide(&r, 85, 1, 5), Decision::Accept);
    }

    #[test]
    fn decide_refines_below_target_with_budget() {
        let r = record(1, 80, true, false);
        assert_eq!(decide(&r, 85, 1, 5), Decision::Refine);
    }

    #[test]
    fn decide_exhausts_at_budget() {
        let r = record(5, 80, true, false);
        assert_eq!(decide(&r, 85, 5, 5), Decision::Exhausted);
    }

    #[test]
    fn decide_target_zero_accepts_first_real_iteration() {
        let r = record(1, 0, true, false);
        assert_eq!(decide(&r, 0, 1, 5), Decision::Accept);
    }

    #[test]
    fn decide_target_zero_does_not_accept_failed_iteration() {
        // A render failure has a zero score but nothing judged; it must not
        // be "accepted", only retried or exhausted.
        let r = record(1, 0, true, true);
        assert_eq!(decide(&r, 0, 1, 5), Decision::Refine);
        assert_eq!(decide(&r, 0, 1, 1), Decision::Exhausted);
    }

    #[test]
    fn decide_max_retries_one_is_single_iteration() {
        let r = record(1, 10, true, false);
        assert_eq!(decide(&r, 85, 1, 1), Decision::Exhausted);
    }

    #[test]
    fn decide_gate_veto_blocks_accept() {
        let mut r = record(1, 90, true, false);
        r.feedback.verification_failed = true;
        assert_eq!(decide(&r, 85, 1, 5), Decision::Refine);
    }

    #[test]
    fn best_iteration_prefers_highest_score() {
        let records = vec![
            record(1, 70, true, false),
            record(2, 82, true, false),
            record(3, 78, true, false),
        ];
        assert_eq!(best_iteration(&records).unwrap().iteration, 2);
    }

    #[test]
    fn best_iteration_breaks_ties_latest() {
        let records = vec![
            record(1, 80, true, false),
            record(2, 80, true, false),
            record(3, 75, true, false),
        ];
        assert_eq!(best_iteration(&records).unwrap().iteration, 2);
    }

    #[test]
    fn best_iteration_skips_html_less_records() {
        let records = vec![
            record(1, 0, false, true), // generator failure: nothing to promote
            record(2, 40, true, false),
        ];
        assert_eq!(best_iteration(&records).unwrap().iteration, 2);
    }

    #[test]
    fn best_iteration_none_when_nothing_generated() {
        let records = vec![record(1, 0, false, true), record(2, 0, false, true)];
        assert!(best_iteration(&records).is_none());
    }

    #[tokio::test]
    async fn finalize_promotes_the_accepted_iteration() {
        // A gate-vetoed 90 must not out-score the gate-blessed 86 that
        // actually ended the loop.
        let dir = tempfile::tempdir().unwrap();
        let page_dir = dir.path();

        let html_1 = page_dir.join(iteration_html_name(1));
        let html_2 = page_dir.join(iteration_html_name(2));
        std::fs::write(&html_1, "<html>vetoed</html>").unwrap();
        std::fs::write(&html_2, "<html>accepted</html>").unwrap();

        let mut first = record(1, 90, true, false);
        first.html_path = Some(html_1);
        first.feedback.verification_failed = true;
        let mut second = record(2, 86, true, false);
        second.html_path = Some(html_2.clone());

        let result = finalize_page(0, page_dir, vec![first, second], Some(2))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.final_score, 86);
        assert_eq!(result.iterations_run, 2);
        let final_bytes = std::fs::read(page_dir.join(FINAL_HTML)).unwrap();
        assert_eq!(final_bytes, std::fs::read(&html_2).unwrap());
    }

    #[tokio::test]
    async fn finalize_exhaustion_promotes_best_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let page_dir = dir.path();

        let html_1 = page_dir.join(iteration_html_name(1));
        let html_2 = page_dir.join(iteration_html_name(2));
        std::fs::write(&html_1, "<html>first</html>").unwrap();
        std::fs::write(&html_2, "<html>second</html>").unwrap();

        let mut first = record(1, 60, true, false);
        first.html_path = Some(html_1);
        let mut second = record(2, 80, true, false);
        second.html_path = Some(html_2.clone());

        let result = finalize_page(0, page_dir, vec![first, second], None)
            .await
            .unwrap();

        assert!(!result.success, "an exhausted budget is best-effort");
        assert_eq!(result.final_score, 80);
        assert_eq!(result.iterations_run, 2);
        let final_bytes = std::fs::read(page_dir.join(FINAL_HTML)).unwrap();
        assert_eq!(final_bytes, std::fs::read(&html_2).unwrap());
    }

    #[tokio::test]
    async fn finalize_best_effort_when_under_target() {
        let dir = tempfile::tempdir().unwrap();
        let page_dir = dir.path();
        let html_1 = page_dir.join(iteration_html_name(1));
        std::fs::write(&html_1, "<html></html>").unwrap();

        let mut only = record(1, 50, true, false);
        only.html_path = Some(html_1);

        let result = finalize_page(3, page_dir, vec![only], None).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.final_score, 50);
        assert!(page_dir.join(FINAL_HTML).exists());
    }

    #[tokio::test]
    async fn reconstruct_reads_back_persisted_page() {
        let dir = tempfile::tempdir().unwrap();
        let page_dir = dir.path();

        for (iteration, score) in [(1u32, 70u8), (2, 88)] {
            let mut feedback = JudgeFeedback::zero("x", "");
            feedback.fidelity_score = score;
            feedback.critical_errors.clear();
            std::fs::write(
                page_dir.join(feedback_name(iteration)),
                serde_json::to_string(&feedback).unwrap(),
            )
            .unwrap();
            std::fs::write(page_dir.join(iteration_html_name(iteration)), "<html></html>").unwrap();
        }
        std::fs::write(page_dir.join(FINAL_HTML), "<html></html>").unwrap();

        let result = reconstruct_page_result(page_dir, 0, 85).await.unwrap();
        assert!(result.success);
        assert_eq!(result.final_score, 88);
        assert_eq!(result.iterations_run, 2);
    }

    #[tokio::test]
    async fn reconstruct_reports_the_accepted_iteration_not_the_vetoed_best() {
        let dir = tempfile::tempdir().unwrap();
        let page_dir = dir.path();

        // Iteration 1 scored higher but was gate-vetoed; iteration 2 accepted.
        for (iteration, score, vetoed) in [(1u32, 90u8, true), (2, 86, false)] {
            let mut feedback = JudgeFeedback::zero("x", "");
            feedback.fidelity_score = score;
            feedback.verification_failed = vetoed;
            feedback.critical_errors.clear();
            std::fs::write(
                page_dir.join(feedback_name(iteration)),
                serde_json::to_string(&feedback).unwrap(),
            )
            .unwrap();
            std::fs::write(page_dir.join(iteration_html_name(iteration)), "<html></html>").unwrap();
        }
        std::fs::write(page_dir.join(FINAL_HTML), "<html></html>").unwrap();

        let result = reconstruct_page_result(page_dir, 0, 85).await.unwrap();
        assert!(result.success);
        assert_eq!(result.final_score, 86, "the vetoed 90 must not win");
    }

    #[tokio::test]
    async fn reconstruct_returns_none_without_final_html() {
        let dir = tempfile::tempdir().unwrap();
        assert!(reconstruct_page_result(dir.path(), 0, 85).await.is_none());
    }
}
