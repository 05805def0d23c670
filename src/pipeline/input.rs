//! Input stage: accept one PDF submission and reject anything else before
//! the cascade runs.
//!
//! Checks, in order: declared MIME type, size limit, `%PDF` magic bytes.
//! Page count is checked later, once pdfium has opened the document.
//!
//! [`resolve_input`] additionally turns a local path or an HTTP(S) URL into
//! a [`Submission`] for the CLI and `analyze_file`. Everything stays in
//! memory: pdfium loads from a byte slice, so no temp file is needed.

use crate::error::NutritionError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// The only accepted media type.
pub const PDF_MIME: &str = "application/pdf";

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct Submission {
    pub bytes: Vec<u8>,
    /// Declared MIME type; `None` when the source did not say.
    pub mime: Option<String>,
}

impl Submission {
    pub fn new(bytes: Vec<u8>, mime: Option<String>) -> Self {
        Self { bytes, mime }
    }

    pub fn pdf(bytes: Vec<u8>) -> Self {
        Self::new(bytes, Some(PDF_MIME.to_string()))
    }
}

/// Validate a submission's declared type, size and magic bytes.
pub fn validate_submission(submission: &Submission, max_bytes: usize) -> Result<(), NutritionError> {
    if let Some(mime) = &submission.mime {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if essence != PDF_MIME {
            return Err(NutritionError::UnsupportedMediaType { mime: mime.clone() });
        }
    }
    validate_pdf_bytes(&submission.bytes, max_bytes)
}

/// Size and magic-byte checks on raw bytes.
pub fn validate_pdf_bytes(bytes: &[u8], max_bytes: usize) -> Result<(), NutritionError> {
    if bytes.len() > max_bytes {
        return Err(NutritionError::FileTooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(NutritionError::NotAPdf {
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read a local file or download a URL into a [`Submission`].
///
/// The MIME type comes from the `Content-Type` header for URLs and from the
/// file extension for paths. Size is enforced while reading so an oversized
/// download is refused without buffering all of it.
pub async fn resolve_input(
    input: &str,
    timeout_secs: u64,
    max_bytes: usize,
) -> Result<Submission, NutritionError> {
    if is_url(input) {
        download_url(input, timeout_secs, max_bytes).await
    } else {
        read_local(input, max_bytes).await
    }
}

async fn read_local(path_str: &str, max_bytes: usize) -> Result<Submission, NutritionError> {
    if path_str.trim().is_empty() {
        return Err(NutritionError::InvalidInput {
            input: path_str.to_string(),
        });
    }
    let path = PathBuf::from(path_str);

    let meta = match tokio::fs::metadata(&path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(NutritionError::PermissionDenied { path });
        }
        Err(_) => return Err(NutritionError::FileNotFound { path }),
    };
    if !meta.is_file() {
        return Err(NutritionError::InvalidInput {
            input: path_str.to_string(),
        });
    }
    if meta.len() > max_bytes as u64 {
        return Err(NutritionError::FileTooLarge {
            size: meta.len() as usize,
            limit: max_bytes,
        });
    }

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => NutritionError::PermissionDenied { path: path.clone() },
        _ => NutritionError::FileNotFound { path: path.clone() },
    })?;

    let mime = mime_guess::from_path(&path).first().map(|m| m.essence_str().to_string());
    debug!("Read local file {} ({} bytes, {:?})", path.display(), bytes.len(), mime);
    Ok(Submission::new(bytes, mime))
}

async fn download_url(url: &str, timeout_secs: u64, max_bytes: usize) -> Result<Submission, NutritionError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| NutritionError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let map_reqwest = |e: reqwest::Error| {
        if e.is_timeout() {
            NutritionError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let mut response = client.get(url).send().await.map_err(map_reqwest)?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .filter(|s| s != "application/octet-stream")
        .or_else(|| mime_guess::from_path(url_path(url)).first().map(|m| m.essence_str().to_string()));

    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(map_reqwest)? {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(NutritionError::FileTooLarge {
                size: bytes.len() + chunk.len(),
                limit: max_bytes,
            });
        }
        bytes.extend_from_slice(&chunk);
    }

    info!("Downloaded {} bytes", bytes.len());
    Ok(Submission::new(bytes, mime))
}

/// Path component of a URL, for extension-based MIME guessing.
fn url_path(url: &str) -> String {
    reqwest::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default()
}
