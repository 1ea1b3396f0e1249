//! Pipeline states and the progress-callback trait that reports them.
//!
//! A run walks a fixed, linear state machine:
//!
//! ```text
//! Idle ─▶ AcquiringReference ─▶ Ocr ─▶ Persisting ─▶ (Analyzing) ─▶ Done
//!   └──────────────┴──────────────┴────────┴──────────────┴─────▶ Failed
//! ```
//!
//! Each transition fires on completion of the previous stage; any failure
//! jumps straight to [`PipelineState::Failed`] and the remaining stages are
//! skipped. Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to observe it.
//!
//! # Example
//!
//! ```rust
//! use mistral_ocr_pipeline::{PipelineConfig, PipelineProgressCallback, PipelineState};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl PipelineProgressCallback for Printer {
//!     fn on_transition(&self, from: &PipelineState, to: &PipelineState) {
//!         eprintln!("{from} -> {to}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    AcquiringReference,
    Ocr,
    Persisting,
    Analyzing,
    Done,
    /// Terminal failure: error kind and message.
    Failed { kind: String, message: String },
}

impl PipelineState {
    /// True for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed { .. })
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::AcquiringReference => f.write_str("acquiring document reference"),
            PipelineState::Ocr => f.write_str("running OCR"),
            PipelineState::Persisting => f.write_str("saving results"),
            PipelineState::Analyzing => f.write_str("analyzing"),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Failed { kind, .. } => write!(f, "failed ({kind})"),
        }
    }
}

/// Called by the orchestrator on every state change.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called when the run moves from `from` to `to`.
    fn on_transition(&self, from: &PipelineState, to: &PipelineState) {
        let _ = (from, to);
    }

    /// Called once a signed URL has been issued for an uploaded file, so the
    /// operator can save it and reuse it in a later run.
    fn on_signed_url(&self, url: &str, expiry_hours: u32) {
        let _ = (url, expiry_hours);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

/// Tracks the current state and forwards every change to the callback.
pub(crate) struct StateTracker<'a> {
    state: PipelineState,
    callback: Option<&'a ProgressCallback>,
}

impl<'a> StateTracker<'a> {
    pub(crate) fn new(callback: Option<&'a ProgressCallback>) -> Self {
        Self {
            state: PipelineState::Idle,
            callback,
        }
    }

    pub(crate) fn advance(&mut self, to: PipelineState) {
        if let Some(cb) = self.callback {
            cb.on_transition(&self.state, &to);
        }
        self.state = to;
    }

    pub(crate) fn fail(&mut self, err: &crate::error::OcrPipelineError) {
        self.advance(PipelineState::Failed {
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
    }

    pub(crate) fn signed_url(&self, url: &str, expiry_hours: u32) {
        if let Some(cb) = self.callback {
            cb.on_signed_url(url, expiry_hours);
        }
    }

    pub(crate) fn state(&self) -> &PipelineState {
        &self.state
    }
}
