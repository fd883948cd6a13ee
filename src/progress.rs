//! Progress-callback trait for per-page and per-iteration events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! real-time events as the loop works through pages and iterations.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a broadcast channel, a WebSocket, a database record, or a
//! terminal progress bar — without the library knowing anything about how the
//! host application communicates. The trait is `Send + Sync` so the same
//! callback also survives being shared across blocking tasks.

/// Called by the refinement loop as it processes pages and iterations.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Pages are processed strictly in order, but
/// implementations should still protect shared mutable state — the renderer
/// and judges run on other tasks.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before any page is processed.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a page's state machine starts.
    ///
    /// `page_num` is 1-indexed.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called after each iteration's judge pass.
    ///
    /// `score` is the combined composite for the iteration, or `None` when the
    /// iteration failed before judging.
    fn on_iteration(&self, page_num: usize, iteration: u32, score: Option<u8>) {
        let _ = (page_num, iteration, score);
    }

    /// Called when a page finishes (accepted or best-effort).
    fn on_page_complete(
        &self,
        page_num: usize,
        total_pages: usize,
        success: bool,
        final_score: u8,
        iterations_run: u32,
    ) {
        let _ = (page_num, total_pages, success, final_score, iterations_run);
    }

    /// Called once after the last page.
    fn on_conversion_complete(&self, total_pages: usize, passed: usize) {
        let _ = (total_pages, passed);
    }
}
