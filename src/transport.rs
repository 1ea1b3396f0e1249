//! HTTP transport: one `reqwest::Client` per run, with an injected trust policy.
//!
//! An extra root certificate (e.g. a TLS-inspecting proxy CA) is added here,
//! once, when the client is built. Every stage shares the resulting client.

use crate::error::OcrPipelineError;
use std::path::PathBuf;
use tracing::debug;

/// Which certificates the HTTP client trusts.
#[derive(Debug, Clone, Default)]
pub enum TrustPolicy {
    /// The built-in web PKI roots. (default)
    #[default]
    System,
    /// Built-in roots plus one PEM-encoded root certificate (e.g. a corporate proxy CA).
    ExtraRootCertificate(PathBuf),
}

/// Build the HTTP client shared by every call of a run.
///
/// No client-wide timeout is set: the OCR call applies its own per-request
/// timeout, and the other calls run until the provider answers.
pub fn build_client(trust: &TrustPolicy) -> Result<reqwest::Client, OcrPipelineError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));

    if let TrustPolicy::ExtraRootCertificate(ref path) = trust {
        let pem = std::fs::read(path).map_err(|e| {
            OcrPipelineError::Configuration(format!(
                "Cannot read root certificate '{}': {e}",
                path.display()
            ))
        })?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
            OcrPipelineError::Configuration(format!(
                "Invalid PEM root certificate '{}': {e}",
                path.display()
            ))
        })?;
        debug!("Trusting extra root certificate: {}", path.display());
        builder = builder.add_root_certificate(cert);
    }

    builder
        .build()
        .map_err(|e| OcrPipelineError::Internal(format!("Failed to build HTTP client: {e}")))
}

/// Authenticated handle on the OCR provider's REST API.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Absolute URL for an endpoint path such as `/files`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Read a response body for an error report, never failing.
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"))
}
