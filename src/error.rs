//! Error types for the pdf2html-agentic library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConvertError`] — **Fatal**: the conversion cannot proceed at all
//!   (bad input file, page out of range, provider not configured, no browser).
//!   Returned as `Err(ConvertError)` from the top-level `convert*` functions.
//!
//! * [`IterationError`] — **Non-fatal**: one generate→render→judge iteration
//!   failed (unparseable generator output, browser timeout). Recorded inside
//!   [`crate::output::IterationRecord`] and counted against the page's retry
//!   budget; the loop decides whether to continue. Judge glitches never become
//!   errors at all — they degrade to zero-score feedback (see below).
//!
//! The separation keeps the refinement loop honest: a page that burns its whole
//! budget on failed iterations is a best-effort *result*, not an error.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2html-agentic library.
///
/// Iteration-level failures use [`IterationError`] and are stored in
/// [`crate::output::IterationRecord`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────

    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Model errors ──────────────────────────────────────────────────────

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Renderer errors ───────────────────────────────────────────────────

    /// Headless Chrome could not be located or launched at all.
    ///
    /// Per-render navigation/wait timeouts are [`IterationError::Render`];
    /// this variant means no rendering can happen for the whole run.
    #[error("Failed to launch headless Chrome: {0}\nInstall Chrome or Chromium and ensure it is discoverable.")]
    BrowserUnavailable(String),

    // ── I/O errors ────────────────────────────────────────────────────────

    /// Could not create or write an output artifact.
    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single refinement iteration.
///
/// Stored alongside [`crate::output::IterationRecord`] when a stage fails.
/// Each variant counts against the page's retry budget; none of them abort
/// the page, let alone the document.
///
/// Two failure classes deliberately have no variant here:
///
/// * **Judge failures** — a judge that cannot answer (or answers garbage)
///   becomes a zero-score [`crate::feedback::JudgeFeedback`] naming the
///   problem; the loop treats the iteration like any other low-scoring one.
/// * **Transient provider errors** — network blips, 429/5xx, and per-call
///   timeouts are retried with bounded backoff inside
///   [`crate::pipeline::llm::chat_with_retry`] before any stage sees them;
///   whatever survives the retries surfaces through the stage's own variant.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum IterationError {
    /// The generator model returned no parseable HTML.
    #[error("Iteration {iteration}: generator returned no parseable HTML: {detail}")]
    Generator { iteration: u32, detail: String },

    /// Browser navigation or a readiness wait exceeded its bound.
    #[error("Iteration {iteration}: render failed: {detail}")]
    Render { iteration: u32, detail: String },
}
