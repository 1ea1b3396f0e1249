//! Result types: the OCR response, written artifacts, analysis output.
//!
//! [`OcrResult`] keeps the provider's JSON untouched so it can be persisted
//! verbatim, and decodes only the few fields the pipeline reads. Unknown
//! fields are ignored, so provider-side additions never break a run.

use crate::error::OcrPipelineError;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// OCR provider response: raw JSON plus a partial typed view.
#[derive(Debug, Clone)]
pub struct OcrResult {
    raw: serde_json::Value,
}

impl OcrResult {
    /// Wrap a response body. Fails only if the body is not a JSON object.
    pub fn from_value(raw: serde_json::Value) -> Result<Self, OcrPipelineError> {
        if !raw.is_object() {
            return Err(OcrPipelineError::InvalidResponse {
                service: "OCR",
                detail: format!("expected a JSON object, got {}", json_kind(&raw)),
            });
        }
        Ok(Self { raw })
    }

    /// The response exactly as received.
    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    /// Decode `pages[]` in source order.
    ///
    /// A missing `pages` field is an empty list; a `pages` field that is not
    /// an array is an error, which callers treat as best-effort. Entries that
    /// are not objects are skipped one by one.
    pub fn pages(&self) -> Result<Vec<OcrPage>, serde_json::Error> {
        let entries = match self.raw.get("pages") {
            None | Some(serde_json::Value::Null) => return Ok(Vec::new()),
            Some(v) => Vec::<serde_json::Value>::deserialize(v)?,
        };
        Ok(entries
            .iter()
            .enumerate()
            .filter_map(|(pos, entry)| match OcrPage::deserialize(entry) {
                Ok(page) => Some(page),
                Err(e) => {
                    warn!("Skipping OCR page entry {}: {}", pos, e);
                    None
                }
            })
            .collect())
    }

    /// The flat `text` field some response shapes carry instead of `pages`.
    pub fn text(&self) -> Option<&str> {
        self.raw.get("text").and_then(|t| t.as_str())
    }

    /// Model that produced the result, when reported.
    pub fn model(&self) -> Option<&str> {
        self.raw.get("model").and_then(|m| m.as_str())
    }

    /// `usage_info.pages_processed`, when reported.
    pub fn pages_processed(&self) -> Option<u64> {
        self.raw
            .get("usage_info")
            .and_then(|u| u.get("pages_processed"))
            .and_then(|p| p.as_u64())
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// One page of an OCR result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OcrPage {
    /// 0-indexed page number, when reported.
    #[serde(default, deserialize_with = "usize_or_none")]
    pub index: Option<usize>,

    /// Page text as Markdown. `None` unless the field is a string.
    #[serde(default, deserialize_with = "string_or_none")]
    pub markdown: Option<String>,

    /// Images embedded in the page.
    #[serde(default, deserialize_with = "list_or_empty")]
    pub images: Vec<OcrImage>,
}

/// An image embedded in an OCR page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OcrImage {
    /// Provider-assigned identifier, typically a filename such as `img-0.jpeg`.
    #[serde(default, deserialize_with = "string_or_none")]
    pub id: Option<String>,

    /// Base64 payload, possibly wrapped in a `data:` URL.
    #[serde(default, deserialize_with = "string_or_none")]
    pub image_base64: Option<String>,
}

fn string_or_none<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(de)?;
    Ok(match v {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    })
}

fn usize_or_none<'de, D>(de: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(de)?;
    Ok(v.as_u64().and_then(|n| usize::try_from(n).ok()))
}

fn list_or_empty<'de, D>(de: D) -> Result<Vec<OcrImage>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(de)?;
    match v {
        serde_json::Value::Array(_) => Vec::<OcrImage>::deserialize(v).map_err(serde::de::Error::custom),
        _ => Ok(Vec::new()),
    }
}

/// First characters of a flat `text` field, for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPreview {
    /// Up to [`crate::pipeline::persist::PREVIEW_CHARS`] characters.
    pub preview: String,
    /// Character count of the whole field.
    pub total_chars: usize,
    /// True when the field is longer than the preview.
    pub truncated: bool,
}

/// What the persistence stage wrote.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedArtifacts {
    /// `<output_dir>/ocr_output.json`, always written.
    pub json_path: PathBuf,
    /// `<output_dir>/ocr_output.md`, when at least one page had Markdown.
    pub markdown_path: Option<PathBuf>,
    /// Decoded page images, when image saving is enabled.
    pub image_paths: Vec<PathBuf>,
    /// Preview of a flat `text` field, when present.
    pub text_preview: Option<TextPreview>,
    /// Number of pages in the response.
    pub page_count: usize,
}

/// Token counters reported by the chat provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// The analysis stage's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// `<output_dir>/openai_analysis_output.json`.
    pub output_path: PathBuf,
    /// Parsed reply, or the reply as a JSON string when it was not valid JSON.
    pub result: serde_json::Value,
    /// Whether the reply parsed as JSON.
    pub is_valid_json: bool,
    /// Token counters, when the provider reported them.
    pub usage: Option<TokenUsage>,
}

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// Signed URL issued by an upload this run, reusable until it expires.
    pub signed_url: Option<String>,
    /// Artifacts written by the OCR stage. `None` for analysis-only runs.
    pub artifacts: Option<SavedArtifacts>,
    /// Analysis result, when the stage ran.
    pub analysis: Option<AnalysisOutput>,
    /// Wall-clock duration of the run.
    pub total_duration_ms: u64,
}
