//! # mistral-ocr-pipeline
//!
//! Extract the text of a PDF through a document-OCR API, save it as JSON and
//! Markdown, and optionally turn it into a structured JSON document with a
//! chat-completion model.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      read the local file once, check the %PDF magic
//!  ├─ 2. Reference  upload + signed URL │ inline data URL │ reused signed URL
//!  ├─ 3. OCR        one POST /ocr with a timeout, no retries
//!  ├─ 4. Persist    ocr_output.json (+ ocr_output.md, images/ best-effort)
//!  └─ 5. Analysis   optional: OCR JSON + template JSON → openai_analysis_output.json
//! ```
//!
//! Every stage either completes or fails the run; see [`OcrPipelineError`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mistral_ocr_pipeline::{run, PipelineConfig, ReferenceStrategy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .api_key(std::env::var("MISTRAL_API_KEY")?)
//!         .strategy(ReferenceStrategy::Upload)
//!         .output_dir("output")
//!         .build()?;
//!     let output = run("documents/sample.pdf", &config).await?;
//!     if let Some(url) = output.signed_url {
//!         eprintln!("reusable for 24h: {url}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mistral-ocr` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mistral-ocr-pipeline = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;
pub mod transport;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    AnalysisConfig, ChatBackend, PipelineConfig, PipelineConfigBuilder, ReferenceStrategy,
};
pub use error::OcrPipelineError;
pub use output::{
    AnalysisOutput, OcrImage, OcrPage, OcrResult, PipelineOutput, SavedArtifacts, TextPreview,
    TokenUsage,
};
pub use pipeline::input::PdfSource;
pub use pipeline::reference::DocumentReference;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, PipelineState, ProgressCallback};
pub use run::{analyze_only, run, run_from_bytes, run_ocr_only, run_sync};
pub use transport::{ApiClient, TrustPolicy};
