//! Result persistence: raw OCR JSON first, derived artifacts best-effort.
//!
//! `ocr_output.json` is the artifact of record. It is written atomically
//! (temp file + rename) and any failure aborts the run. Everything derived
//! from it afterwards (Markdown, images, the text preview) is best-effort:
//! failures are logged at `warn` and never reach the caller.

use crate::error::OcrPipelineError;
use crate::output::{OcrPage, OcrResult, SavedArtifacts, TextPreview};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Raw OCR response, pretty-printed.
pub const OCR_JSON_FILE: &str = "ocr_output.json";

/// Page Markdown joined in page order.
pub const OCR_MARKDOWN_FILE: &str = "ocr_output.md";

/// Sub-directory receiving decoded page images.
pub const IMAGES_DIR: &str = "images";

/// Characters of a flat `text` field shown to the operator.
pub const PREVIEW_CHARS: usize = 300;

/// Write the OCR result into `output_dir`, creating the directory if needed.
pub async fn save(
    result: &OcrResult,
    output_dir: impl AsRef<Path>,
    save_images: bool,
) -> Result<SavedArtifacts, OcrPipelineError> {
    let dir = output_dir.as_ref();
    let json_path = dir.join(OCR_JSON_FILE);

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| OcrPipelineError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

    let json = serde_json::to_string_pretty(result.raw())
        .map_err(|e| OcrPipelineError::Internal(format!("serialise OCR result: {e}")))?;
    write_atomic(&json_path, json.as_bytes()).await?;
    info!("OCR output saved to: {}", json_path.display());

    let mut artifacts = SavedArtifacts {
        json_path,
        ..Default::default()
    };

    // ── Best-effort derivations ──────────────────────────────────────────
    let pages = match result.pages() {
        Ok(pages) => pages,
        Err(e) => {
            warn!("Skipping Markdown derivation: unexpected `pages` shape: {}", e);
            Vec::new()
        }
    };
    artifacts.page_count = pages.len();

    if let Some(markdown) = join_page_markdown(&pages) {
        let md_path = dir.join(OCR_MARKDOWN_FILE);
        match tokio::fs::write(&md_path, markdown).await {
            Ok(()) => {
                info!("OCR markdown saved to: {}", md_path.display());
                artifacts.markdown_path = Some(md_path);
            }
            Err(e) => warn!("Could not write {}: {}", md_path.display(), e),
        }
    }

    if save_images {
        artifacts.image_paths = save_page_images(&pages, &dir.join(IMAGES_DIR)).await;
    }

    artifacts.text_preview = result.text().map(text_preview);

    Ok(artifacts)
}

/// Join every non-empty page Markdown with a blank line, in page order.
///
/// Returns `None` when no page has Markdown.
pub fn join_page_markdown(pages: &[OcrPage]) -> Option<String> {
    let parts: Vec<&str> = pages
        .iter()
        .filter_map(|p| p.markdown.as_deref())
        .filter(|md| !md.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// First [`PREVIEW_CHARS`] characters of `text`.
pub fn text_preview(text: &str) -> TextPreview {
    let total_chars = text.chars().count();
    TextPreview {
        preview: text.chars().take(PREVIEW_CHARS).collect(),
        total_chars,
        truncated: total_chars > PREVIEW_CHARS,
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), OcrPipelineError> {
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| OcrPipelineError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| OcrPipelineError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

async fn save_page_images(pages: &[OcrPage], images_dir: &Path) -> Vec<PathBuf> {
    let mut written = Vec::new();
    let has_images = pages
        .iter()
        .any(|p| p.images.iter().any(|i| i.image_base64.is_some()));
    if !has_images {
        return written;
    }
    if let Err(e) = tokio::fs::create_dir_all(images_dir).await {
        warn!("Could not create {}: {}", images_dir.display(), e);
        return written;
    }

    for (page_pos, page) in pages.iter().enumerate() {
        let page_num = page.index.unwrap_or(page_pos);
        for (img_pos, image) in page.images.iter().enumerate() {
            let Some(ref payload) = image.image_base64 else {
                continue;
            };
            let bytes = match STANDARD.decode(strip_data_url(payload)) {
                Ok(b) => b,
                Err(e) => {
                    warn!("Page {}: image {} is not valid base64: {}", page_num, img_pos, e);
                    continue;
                }
            };
            let name = image_file_name(image.id.as_deref(), page_num, img_pos);
            let path = images_dir.join(name);
            match tokio::fs::write(&path, &bytes).await {
                Ok(()) => {
                    debug!("Saved image {} ({} bytes)", path.display(), bytes.len());
                    written.push(path);
                }
                Err(e) => warn!("Could not write {}: {}", path.display(), e),
            }
        }
    }
    info!("Saved {} page images", written.len());
    written
}

/// Drop a `data:<mime>;base64,` prefix if present.
fn strip_data_url(payload: &str) -> &str {
    if payload.starts_with("data:") {
        if let Some(pos) = payload.find(";base64,") {
            return &payload[pos + ";base64,".len()..];
        }
    }
    payload
}

/// File name for an image: the provider id's last component, else a positional name.
fn image_file_name(id: Option<&str>, page_num: usize, img_pos: usize) -> String {
    id.and_then(|id| Path::new(id).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && n != "." && n != "..")
        .unwrap_or_else(|| format!("page{page_num}-img{img_pos}.bin"))
}
