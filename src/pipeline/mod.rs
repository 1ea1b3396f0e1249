//! Pipeline stages for PDF OCR and analysis.
//!
//! Each submodule implements exactly one step, so each can be tested (and
//! called) on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ reference ──▶ ocr ──▶ persist ──▶ analysis ──▶ postprocess
//! (PdfSource) (doc URL)  (POST)  (JSON + MD)  (chat)      (fence strip)
//! ```
//!
//! 1. [`input`]     — read the local PDF once and check its magic bytes
//! 2. [`reference`] — upload + signed URL, inline data URL, or reused URL
//! 3. [`ocr`]       — the single timed OCR request; no retries
//! 4. [`persist`]   — raw JSON (fatal on failure), Markdown and images (best-effort)
//! 5. [`analysis`]  — optional chat-completion over the saved JSON and a template
//! 6. [`postprocess`] — strip fences and invisible characters from the chat reply

pub mod analysis;
pub mod input;
pub mod ocr;
pub mod persist;
pub mod postprocess;
pub mod reference;
