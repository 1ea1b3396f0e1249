//! Document references: make a local PDF reachable by the OCR provider.
//!
//! The OCR endpoint only accepts a `document_url`, so the bytes we hold
//! locally have to become a URL first. Three strategies exist:
//!
//! - **Upload** — `POST /files` (multipart, `purpose=ocr`), then
//!   `GET /files/{id}/url?expiry=<hours>` for a time-limited signed URL.
//!   The URL can be saved and reused until it expires.
//! - **Inline** — base64-encode the whole file into a
//!   `data:application/pdf;base64,` URL. No extra round trips, but the
//!   request body grows by a third of the PDF size and the whole file sits
//!   in memory twice. Oversized inputs are refused, never truncated.
//! - **Reuse** — pass a signed URL from an earlier upload through unchanged.
//!
//! Falling back from `Reuse` to `Upload` when no URL is available is the
//! orchestrator's decision, not this module's.

use crate::config::{PipelineConfig, ReferenceStrategy};
use crate::error::OcrPipelineError;
use crate::pipeline::input::PdfSource;
use crate::transport::{error_body, ApiClient};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info};

/// Prefix of every inline document URL.
pub const PDF_DATA_URL_PREFIX: &str = "data:application/pdf;base64,";

/// A value the OCR provider can dereference to fetch the PDF.
#[derive(Clone, PartialEq, Eq)]
pub enum DocumentReference {
    /// Signed URL issued for a file uploaded during this run.
    UploadedUrl {
        url: String,
        file_id: String,
        expiry_hours: u32,
    },
    /// The whole PDF as a base64 data URL.
    InlineDataUrl { data_url: String },
    /// A signed URL supplied by the caller.
    ReusedUrl { url: String },
}

impl DocumentReference {
    /// The string sent as `document.document_url`.
    pub fn as_url(&self) -> &str {
        match self {
            DocumentReference::UploadedUrl { url, .. } => url,
            DocumentReference::InlineDataUrl { data_url } => data_url,
            DocumentReference::ReusedUrl { url } => url,
        }
    }

    /// The base64 payload of an inline reference.
    pub fn inline_payload(&self) -> Option<&str> {
        match self {
            DocumentReference::InlineDataUrl { data_url } => data_url.strip_prefix(PDF_DATA_URL_PREFIX),
            _ => None,
        }
    }

    /// The signed URL of an upload, for echoing to the operator.
    pub fn signed_url(&self) -> Option<(&str, u32)> {
        match self {
            DocumentReference::UploadedUrl {
                url, expiry_hours, ..
            } => Some((url, *expiry_hours)),
            _ => None,
        }
    }
}

impl fmt::Debug for DocumentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentReference::UploadedUrl {
                file_id,
                expiry_hours,
                ..
            } => f
                .debug_struct("UploadedUrl")
                .field("file_id", file_id)
                .field("expiry_hours", expiry_hours)
                .finish_non_exhaustive(),
            DocumentReference::InlineDataUrl { data_url } => f
                .debug_struct("InlineDataUrl")
                .field("len", &data_url.len())
                .finish(),
            DocumentReference::ReusedUrl { .. } => f.debug_struct("ReusedUrl").finish_non_exhaustive(),
        }
    }
}

/// Produce a document reference with the given strategy.
///
/// `prior_url` is only read by [`ReferenceStrategy::Reuse`].
pub async fn obtain(
    api: &ApiClient,
    pdf: &PdfSource,
    strategy: ReferenceStrategy,
    prior_url: Option<&str>,
    config: &PipelineConfig,
) -> Result<DocumentReference, OcrPipelineError> {
    match strategy {
        ReferenceStrategy::Upload => upload(api, pdf, config.signed_url_expiry_hours).await,
        ReferenceStrategy::Inline => inline(pdf, config.max_inline_bytes),
        ReferenceStrategy::Reuse => reuse(prior_url.unwrap_or_default()),
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(default)]
    url: Option<String>,
}

/// Upload the PDF and fetch a signed URL for it.
pub async fn upload(
    api: &ApiClient,
    pdf: &PdfSource,
    expiry_hours: u32,
) -> Result<DocumentReference, OcrPipelineError> {
    info!("Uploading {} ({} bytes) for OCR", pdf.filename(), pdf.len());

    let part = reqwest::multipart::Part::bytes(pdf.bytes().to_vec())
        .file_name(pdf.filename().to_string())
        .mime_str("application/pdf")
        .map_err(|e| OcrPipelineError::Internal(format!("multipart mime: {e}")))?;
    let form = reqwest::multipart::Form::new()
        .text("purpose", "ocr")
        .part("file", part);

    let response = api
        .http()
        .post(api.url("/files"))
        .bearer_auth(api.api_key())
        .multipart(form)
        .send()
        .await
        .map_err(|e| OcrPipelineError::Upload {
            status: None,
            detail: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = error_body(response).await;
        return Err(OcrPipelineError::Upload {
            status: Some(status.as_u16()),
            detail: format!("HTTP {status}: {body}"),
        });
    }

    let uploaded: UploadResponse = response
        .json()
        .await
        .map_err(|e| OcrPipelineError::Upload {
            status: Some(status.as_u16()),
            detail: format!("unreadable upload response: {e}"),
        })?;

    let file_id = uploaded
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| OcrPipelineError::UrlRetrieval {
            status: None,
            detail: "upload response carried no file id".into(),
        })?;
    debug!("Uploaded file id: {}", file_id);

    let url = signed_url(api, &file_id, expiry_hours).await?;
    info!("Signed URL issued (valid {}h)", expiry_hours);

    Ok(DocumentReference::UploadedUrl {
        url,
        file_id,
        expiry_hours,
    })
}

/// Fetch a time-limited signed URL for an uploaded file.
pub async fn signed_url(
    api: &ApiClient,
    file_id: &str,
    expiry_hours: u32,
) -> Result<String, OcrPipelineError> {
    let response = api
        .http()
        .get(api.url(&format!("/files/{file_id}/url")))
        .query(&[("expiry", expiry_hours)])
        .bearer_auth(api.api_key())
        .send()
        .await
        .map_err(|e| OcrPipelineError::UrlRetrieval {
            status: None,
            detail: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = error_body(response).await;
        return Err(OcrPipelineError::UrlRetrieval {
            status: Some(status.as_u16()),
            detail: format!("HTTP {status}: {body}"),
        });
    }

    let parsed: SignedUrlResponse = response
        .json()
        .await
        .map_err(|e| OcrPipelineError::UrlRetrieval {
            status: Some(status.as_u16()),
            detail: format!("unreadable signed-URL response: {e}"),
        })?;

    parsed
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| OcrPipelineError::UrlRetrieval {
            status: Some(status.as_u16()),
            detail: format!("no signed URL returned for file '{file_id}'"),
        })
}

/// Encode the PDF as a base64 data URL.
pub fn inline(pdf: &PdfSource, max_bytes: usize) -> Result<DocumentReference, OcrPipelineError> {
    if pdf.is_empty() {
        return Err(OcrPipelineError::Encoding {
            filename: pdf.filename().to_string(),
            detail: "file is empty".into(),
        });
    }
    if pdf.len() > max_bytes {
        return Err(OcrPipelineError::Encoding {
            filename: pdf.filename().to_string(),
            detail: format!(
                "{} bytes exceeds the inline limit of {} bytes; use the upload strategy",
                pdf.len(),
                max_bytes
            ),
        });
    }

    let encoded_len = base64::encoded_len(pdf.len(), true).ok_or_else(|| OcrPipelineError::Encoding {
        filename: pdf.filename().to_string(),
        detail: "encoded size overflows usize".into(),
    })?;

    let mut data_url = String::new();
    data_url
        .try_reserve_exact(PDF_DATA_URL_PREFIX.len() + encoded_len)
        .map_err(|e| OcrPipelineError::Encoding {
            filename: pdf.filename().to_string(),
            detail: format!("cannot allocate {encoded_len} bytes: {e}"),
        })?;
    data_url.push_str(PDF_DATA_URL_PREFIX);
    STANDARD.encode_string(pdf.bytes(), &mut data_url);

    debug!("Inlined {} → {} bytes base64", pdf.filename(), encoded_len);
    Ok(DocumentReference::InlineDataUrl { data_url })
}

/// Accept a previously issued signed URL verbatim.
pub fn reuse(prior_url: &str) -> Result<DocumentReference, OcrPipelineError> {
    if prior_url.trim().is_empty() {
        return Err(OcrPipelineError::Configuration(
            "no signed URL provided for the reuse strategy".into(),
        ));
    }
    Ok(DocumentReference::ReusedUrl {
        url: prior_url.to_string(),
    })
}
