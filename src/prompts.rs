//! Prompts for the analysis stage.
//!
//! The template JSON is advisory: nothing validates the model's reply
//! against it, so the wording here is the only thing steering the shape of
//! the output. Callers cannot override the system prompt; they shape the
//! result through the template file instead.

/// Fixed system message framing the assistant for structured extraction.
pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are a precise document-analysis assistant. \
You read OCR output of PDF documents and return structured data as a single valid JSON object. \
Never add commentary, explanations, or Markdown outside the JSON.";

/// Build the user message embedding the raw OCR JSON and the template JSON verbatim.
pub fn build_analysis_prompt(ocr_json: &str, template_json: &str) -> String {
    format!(
        "Below is the OCR output of a PDF document, as JSON produced by the OCR service.\n\
Extract the information it contains and return it as JSON following exactly the structure \
of the sample template further down: same keys, same nesting, same value types. \
Use null for fields the document does not provide. Do not invent data.\n\n\
### OCR OUTPUT\n```json\n{ocr_json}\n```\n\n\
### TEMPLATE\n```json\n{template_json}\n```\n\n\
Respond with the filled-in JSON object only."
    )
}
