//! Input resolution: normalise a user-supplied path or URL to a local PDF
//! and decide what the document's artifact tree will be called.
//!
//! ## Why download to a temp file?
//!
//! pdfium requires a file-system path — it cannot stream from a byte buffer.
//! Downloading to a `TempDir` gives us a path pdfium can open while ensuring
//! cleanup happens automatically when `ResolvedInput` is dropped, even if
//! the process panics. We validate the PDF magic bytes (`%PDF`) before
//! returning so callers get a meaningful error rather than a pdfium crash.
//!
//! ## Why name the document here?
//!
//! Every persisted artifact lands under `<output>/<document-stem>/`, and that
//! stem must exist before any page is processed — iteration files, the
//! analysis profile, and idempotent re-runs all key off it. Deriving it at
//! resolution time (from the file name, or for URLs from Content-Disposition
//! / the URL path) keeps "what is this document called" in one place, and
//! lets the stem be sanitised once instead of wherever paths are built.

use crate::error::ConvertError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// The resolved input: a local PDF path plus the document stem that names its
/// artifact tree. For URL inputs the backing `TempDir` is held alive until
/// the conversion is done with the file.
pub struct ResolvedInput {
    path: PathBuf,
    stem: String,
    _temp_dir: Option<TempDir>,
}

impl ResolvedInput {
    /// Path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory stem for the document under the output root; every persisted
    /// artifact lands in `<output>/<stem>/`.
    pub fn document_stem(&self) -> &str {
        &self.stem
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local PDF file path.
///
/// If the input is a URL, download it to a temporary directory.
/// If the input is a local file, validate it exists and is readable.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, ConvertError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Resolve a local file path, validating existence and PDF magic bytes.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, ConvertError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(ConvertError::FileNotFound { path });
    }

    // Check read permission by attempting to open
    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() {
                validate_magic(magic, &path)?;
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ConvertError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(ConvertError::FileNotFound { path });
        }
    }

    let stem = document_stem_from_filename(
        path.file_name().map(|n| n.to_string_lossy().to_string()).as_deref(),
    );

    debug!("Resolved local PDF: {} (document '{}')", path.display(), stem);
    Ok(ResolvedInput {
        path,
        stem,
        _temp_dir: None,
    })
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, ConvertError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ConvertError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ConvertError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    // Many servers mislabel PDFs, so this is advisory only; the magic-byte
    // check below is what actually gates the bytes.
    if let Some(content_type) = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        if !content_type.contains("pdf") && !content_type.contains("octet-stream") {
            warn!("'{}' served Content-Type '{}'; expecting a PDF anyway", url, content_type);
        }
    }

    // Content-Disposition wins over the URL path: repositories commonly serve
    // `/download?id=123` with the real name in the header.
    let filename = filename_from_content_disposition(&response)
        .or_else(|| filename_from_url(url))
        .unwrap_or_else(|| "downloaded.pdf".to_string());
    let stem = document_stem_from_filename(Some(&filename));

    let temp_dir = TempDir::new().map_err(|e| ConvertError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    // Verify PDF magic bytes before writing anything
    if bytes.len() >= 4 {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        validate_magic(magic, &file_path)?;
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| ConvertError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {} (document '{}')", file_path.display(), stem);

    Ok(ResolvedInput {
        path: file_path,
        stem,
        _temp_dir: Some(temp_dir),
    })
}

fn validate_magic(magic: [u8; 4], path: &Path) -> Result<(), ConvertError> {
    if &magic != b"%PDF" {
        return Err(ConvertError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Pull a filename out of a `Content-Disposition: attachment; filename=...`
/// header, tolerating optional quotes.
fn filename_from_content_disposition(response: &reqwest::Response) -> Option<String> {
    let header = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    let raw = header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))?;
    let name = raw.trim_matches('"').trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Extract a reasonable filename from the URL path.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    (!last.is_empty() && last.contains('.')).then(|| last.to_string())
}

/// Turn a filename into the document stem naming the artifact tree.
///
/// The stem becomes a directory component, so everything a filesystem might
/// choke on (separators, control characters) is replaced and the `.pdf`
/// extension dropped. An unusable name falls back to `document`.
fn document_stem_from_filename(filename: Option<&str>) -> String {
    let stem = filename
        .map(|name| name.trim_end_matches(".pdf").trim_end_matches(".PDF"))
        .unwrap_or("")
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect::<String>()
        .trim()
        .trim_matches('.')
        .to_string();

    if stem.is_empty() {
        "document".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://example.com/papers/paper.pdf").as_deref(),
            Some("paper.pdf")
        );
        assert_eq!(filename_from_url("https://example.com/"), None);
        assert_eq!(filename_from_url("https://example.com/download"), None);
    }

    #[test]
    fn test_document_stem_strips_extension_and_sanitises() {
        assert_eq!(document_stem_from_filename(Some("paper.pdf")), "paper");
        assert_eq!(document_stem_from_filename(Some("archive.tar.pdf")), "archive.tar");
        assert_eq!(
            document_stem_from_filename(Some("weird: name?.pdf")),
            "weird_ name_"
        );
        assert_eq!(document_stem_from_filename(Some(".pdf")), "document");
        assert_eq!(document_stem_from_filename(None), "document");
    }

    #[tokio::test]
    async fn test_resolve_local_missing_file() {
        let result = resolve_input("/definitely/not/a/real/file.pdf", 5).await;
        assert!(matches!(result, Err(ConvertError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_resolve_local_rejects_non_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"not a pdf at all").unwrap();
        let result = resolve_input(path.to_str().unwrap(), 5).await;
        assert!(matches!(result, Err(ConvertError::NotAPdf { .. })));
    }

    #[tokio::test]
    async fn test_resolve_local_names_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarterly report.pdf");
        std::fs::write(&path, b"%PDF-1.7\n").unwrap();
        let resolved = resolve_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.document_stem(), "quarterly report");
        assert_eq!(resolved.path(), path.as_path());
    }
}
