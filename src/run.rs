//! Pipeline entry points: drive one PDF through every stage, in order.
//!
//! A run is strictly sequential: each stage blocks until its network call
//! or file write completes, and the first error moves the run to
//! [`PipelineState::Failed`] without touching the remaining stages. One
//! `reqwest::Client` is shared by every call of a run.

use crate::config::{PipelineConfig, ReferenceStrategy};
use crate::error::OcrPipelineError;
use crate::output::{AnalysisOutput, PipelineOutput};
use crate::pipeline::input::{self, PdfSource};
use crate::pipeline::reference;
use crate::pipeline::{analysis, ocr, persist};
use crate::progress::{PipelineState, StateTracker};
use crate::transport::{build_client, ApiClient};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

/// Where the PDF bytes come from.
enum PdfInput<'a> {
    Path(&'a Path),
    Loaded(PdfSource),
}

/// Run the full pipeline on a local PDF.
///
/// Stages: document reference → OCR → persistence → analysis (only when
/// `config.analysis` is set).
///
/// # Errors
/// The first failing stage's error, unchanged. Nothing is retried.
pub async fn run(
    pdf_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PipelineOutput, OcrPipelineError> {
    drive(PdfInput::Path(pdf_path.as_ref()), config, true).await
}

/// Run reference, OCR and persistence only, ignoring `config.analysis`.
pub async fn run_ocr_only(
    pdf_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PipelineOutput, OcrPipelineError> {
    drive(PdfInput::Path(pdf_path.as_ref()), config, false).await
}

/// Run the full pipeline on PDF bytes already in memory.
///
/// # Example
/// ```rust,no_run
/// use mistral_ocr_pipeline::{run_from_bytes, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("invoice.pdf")?;
/// let config = PipelineConfig::builder()
///     .api_key(std::env::var("MISTRAL_API_KEY")?)
///     .build()?;
/// let output = run_from_bytes("invoice.pdf", bytes, &config).await?;
/// println!("{:?}", output.artifacts);
/// # Ok(())
/// # }
/// ```
pub async fn run_from_bytes(
    filename: impl Into<String>,
    bytes: Vec<u8>,
    config: &PipelineConfig,
) -> Result<PipelineOutput, OcrPipelineError> {
    drive(
        PdfInput::Loaded(PdfSource::from_bytes(filename, bytes)),
        config,
        true,
    )
    .await
}

/// Synchronous wrapper around [`run`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_sync(
    pdf_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PipelineOutput, OcrPipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| OcrPipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run(pdf_path, config))
}

/// Run only the analysis stage, on the OCR JSON already in `config.output_dir`.
///
/// Does not need the OCR API key.
pub async fn analyze_only(config: &PipelineConfig) -> Result<AnalysisOutput, OcrPipelineError> {
    let mut tracker = StateTracker::new(config.progress_callback.as_ref());
    let result = async {
        let analysis_cfg = config.analysis.as_ref().ok_or_else(|| {
            OcrPipelineError::Configuration("analysis stage requested without analysis settings".into())
        })?;
        let http = build_client(&config.trust)?;
        tracker.advance(PipelineState::Analyzing);
        analysis::analyze(&http, config.ocr_json_path(), analysis_cfg, &config.output_dir).await
    }
    .await;

    match result {
        Ok(out) => {
            tracker.advance(PipelineState::Done);
            Ok(out)
        }
        Err(e) => {
            error!("Analysis failed [{}]: {}", e.kind(), e);
            tracker.fail(&e);
            Err(e)
        }
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn drive(
    source: PdfInput<'_>,
    config: &PipelineConfig,
    with_analysis: bool,
) -> Result<PipelineOutput, OcrPipelineError> {
    let start = Instant::now();
    let mut tracker = StateTracker::new(config.progress_callback.as_ref());

    match execute(source, config, with_analysis, &mut tracker).await {
        Ok(mut output) => {
            output.total_duration_ms = start.elapsed().as_millis() as u64;
            info!("Pipeline complete in {}ms", output.total_duration_ms);
            tracker.advance(PipelineState::Done);
            Ok(output)
        }
        Err(e) => {
            error!("Pipeline failed while {} [{}]: {}", tracker.state(), e.kind(), e);
            tracker.fail(&e);
            Err(e)
        }
    }
}

async fn execute(
    source: PdfInput<'_>,
    config: &PipelineConfig,
    with_analysis: bool,
    tracker: &mut StateTracker<'_>,
) -> Result<PipelineOutput, OcrPipelineError> {
    // ── Step 0: Credentials and transport ────────────────────────────────
    let api_key = config.require_api_key()?;
    let http = build_client(&config.trust)?;
    let api = ApiClient::new(http.clone(), &config.api_base_url, api_key);

    // ── Step 1: Document reference ───────────────────────────────────────
    tracker.advance(PipelineState::AcquiringReference);
    let strategy = effective_strategy(config)?;
    info!("Document reference strategy: {}", strategy);
    let reference = match strategy {
        ReferenceStrategy::Reuse => reference::reuse(config.prior_url.as_deref().unwrap_or_default())?,
        other => {
            let pdf = match source {
                PdfInput::Path(path) => input::read_pdf(path).await?,
                PdfInput::Loaded(pdf) => pdf,
            };
            info!("Input PDF: {} ({} bytes)", pdf.path().display(), pdf.len());
            reference::obtain(&api, &pdf, other, None, config).await?
        }
    };

    let signed_url = reference.signed_url().map(|(url, hours)| {
        tracker.signed_url(url, hours);
        url.to_string()
    });

    // ── Step 2: OCR ──────────────────────────────────────────────────────
    tracker.advance(PipelineState::Ocr);
    let result = ocr::process(&api, &reference, config).await?;
    // Single-use; inline references can be tens of megabytes.
    drop(reference);
    if let Some(n) = result.pages_processed() {
        info!(
            "OCR processed {} pages (model {})",
            n,
            result.model().unwrap_or("unreported")
        );
    }

    // ── Step 3: Persist ──────────────────────────────────────────────────
    tracker.advance(PipelineState::Persisting);
    let artifacts = persist::save(&result, &config.output_dir, config.save_images).await?;

    // ── Step 4: Optional analysis ────────────────────────────────────────
    let analysis = match config.analysis {
        Some(ref analysis_cfg) if with_analysis => {
            tracker.advance(PipelineState::Analyzing);
            Some(
                analysis::analyze(&http, &artifacts.json_path, analysis_cfg, &config.output_dir)
                    .await?,
            )
        }
        _ => None,
    };

    Ok(PipelineOutput {
        signed_url,
        artifacts: Some(artifacts),
        analysis,
        total_duration_ms: 0,
    })
}

/// Resolve `Reuse` without a usable URL into `Upload` when fallback is allowed.
fn effective_strategy(config: &PipelineConfig) -> Result<ReferenceStrategy, OcrPipelineError> {
    if config.strategy != ReferenceStrategy::Reuse {
        return Ok(config.strategy);
    }
    let has_url = config
        .prior_url
        .as_deref()
        .is_some_and(|u| !u.trim().is_empty());
    if has_url {
        Ok(ReferenceStrategy::Reuse)
    } else if config.fallback_to_upload {
        warn!("No signed URL provided; switching to file upload");
        Ok(ReferenceStrategy::Upload)
    } else {
        Err(OcrPipelineError::Configuration(
            "no signed URL provided for the reuse strategy".into(),
        ))
    }
}
