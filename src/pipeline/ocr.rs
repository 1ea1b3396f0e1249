//! OCR invocation: one POST to `/ocr`, no retries.
//!
//! The per-request timeout set here is the only timeout in the system.
//! When it fires the call is abandoned and the run fails; nothing partial
//! is kept and nothing is retried.

use crate::config::PipelineConfig;
use crate::error::OcrPipelineError;
use crate::output::OcrResult;
use crate::pipeline::reference::DocumentReference;
use crate::transport::{error_body, ApiClient};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: DocumentUrl<'a>,
    include_image_base64: bool,
}

#[derive(Debug, Serialize)]
struct DocumentUrl<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    document_url: &'a str,
}

/// Build the OCR request body for a reference.
pub fn request_body(
    reference: &DocumentReference,
    model: &str,
    include_image_base64: bool,
) -> serde_json::Value {
    // Serialising a struct of strings and a bool cannot fail.
    serde_json::to_value(build_request(reference, model, include_image_base64)).unwrap_or_default()
}

fn build_request<'a>(
    reference: &'a DocumentReference,
    model: &'a str,
    include_image_base64: bool,
) -> OcrRequest<'a> {
    OcrRequest {
        model,
        document: DocumentUrl {
            kind: "document_url",
            document_url: reference.as_url(),
        },
        include_image_base64,
    }
}

/// Send the reference to the OCR endpoint and decode the response.
pub async fn process(
    api: &ApiClient,
    reference: &DocumentReference,
    config: &PipelineConfig,
) -> Result<OcrResult, OcrPipelineError> {
    process_with(
        api,
        reference,
        &config.ocr_model,
        config.include_image_base64,
        config.ocr_timeout,
    )
    .await
}

/// [`process`] with explicit parameters.
pub async fn process_with(
    api: &ApiClient,
    reference: &DocumentReference,
    model: &str,
    include_image_base64: bool,
    timeout: Duration,
) -> Result<OcrResult, OcrPipelineError> {
    let start = Instant::now();
    info!("Running OCR with model {}", model);

    let body = build_request(reference, model, include_image_base64);

    let response = api
        .http()
        .post(api.url("/ocr"))
        .bearer_auth(api.api_key())
        .timeout(timeout)
        .json(&body)
        .send()
        .await
        .map_err(|e| classify(e, start))?;

    let status = response.status();
    if !status.is_success() {
        let body = error_body(response).await;
        return Err(OcrPipelineError::Api {
            service: "OCR",
            status: status.as_u16(),
            body,
        });
    }

    // The timeout covers the body download too.
    let text = response.text().await.map_err(|e| classify(e, start))?;
    let raw: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| OcrPipelineError::InvalidResponse {
            service: "OCR",
            detail: format!("body is not JSON: {e}"),
        })?;

    debug!("OCR response: {} bytes in {:?}", text.len(), start.elapsed());
    OcrResult::from_value(raw)
}

fn classify(e: reqwest::Error, start: Instant) -> OcrPipelineError {
    if e.is_timeout() {
        OcrPipelineError::Timeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    } else {
        OcrPipelineError::Transport {
            service: "OCR",
            detail: e.to_string(),
        }
    }
}
