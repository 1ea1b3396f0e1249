//! Error types for the mistral-ocr-pipeline library.
//!
//! Every pipeline stage either completes or fails outright, so there is a
//! single fatal error type, [`OcrPipelineError`]. Nothing is retried and no
//! partial result is salvaged: the first error ends the run.
//!
//! The one place failures are *not* propagated is Markdown and image
//! derivation inside [`crate::pipeline::persist`], which runs after the raw
//! JSON is on disk and only logs.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the mistral-ocr-pipeline library.
#[derive(Debug, Error)]
pub enum OcrPipelineError {
    // ── Configuration / input errors ──────────────────────────────────────
    /// A required setting is missing or invalid (credential, URL, limits).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Document reference errors ─────────────────────────────────────────
    /// The file-upload call failed or returned a non-success status.
    #[error("Upload failed: {detail}")]
    Upload {
        status: Option<u16>,
        detail: String,
    },

    /// No signed URL could be obtained for an uploaded file.
    #[error("Signed URL retrieval failed: {detail}")]
    UrlRetrieval {
        status: Option<u16>,
        detail: String,
    },

    /// The PDF could not be inlined as a base64 data URL.
    #[error("Inline encoding failed for '{filename}': {detail}")]
    Encoding { filename: String, detail: String },

    // ── Remote call errors ────────────────────────────────────────────────
    /// A provider answered with a non-success HTTP status.
    #[error("{service} API error ({status}): {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The OCR call did not finish within the configured timeout.
    #[error("OCR call timed out after {elapsed_ms}ms\nIncrease --ocr-timeout or use a smaller document.")]
    Timeout { elapsed_ms: u64 },

    /// The request never produced an HTTP response (DNS, TLS, connection reset).
    #[error("{service} request failed: {detail}")]
    Transport {
        service: &'static str,
        detail: String,
    },

    /// The provider answered 2xx but the body lacks the fields we need.
    #[error("Unexpected {service} response: {detail}")]
    InvalidResponse {
        service: &'static str,
        detail: String,
    },

    // ── Analysis stage errors ─────────────────────────────────────────────
    /// An analysis input file does not exist.
    #[error("Analysis input not found: '{path}'\nRun the OCR stage first to produce it.")]
    MissingInput { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not read an input file that is known to exist.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OcrPipelineError {
    /// Stable short name of the error kind, used in operator reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_)
            | Self::FileNotFound { .. }
            | Self::PermissionDenied { .. }
            | Self::NotAPdf { .. } => "ConfigurationError",
            Self::Upload { .. } => "UploadError",
            Self::UrlRetrieval { .. } => "UrlRetrievalError",
            Self::Encoding { .. } => "EncodingError",
            Self::Api { .. } => "ApiError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Transport { .. } => "TransportError",
            Self::InvalidResponse { .. } => "InvalidResponseError",
            Self::MissingInput { .. } => "MissingInputError",
            Self::OutputWriteFailed { .. } | Self::ReadFailed { .. } => "IoError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// HTTP status attached to the error, if the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Upload { status, .. } | Self::UrlRetrieval { status, .. } => *status,
            _ => None,
        }
    }
}
