//! Input acquisition: read the local PDF once into a [`PdfSource`].
//!
//! The `%PDF` magic bytes are checked before anything touches the network.

use crate::error::OcrPipelineError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A PDF read from local storage. Immutable once read.
#[derive(Clone)]
pub struct PdfSource {
    filename: String,
    path: PathBuf,
    bytes: Vec<u8>,
}

impl PdfSource {
    /// Build a source from bytes already in memory.
    pub fn from_bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();
        Self {
            path: PathBuf::from(&filename),
            filename,
            bytes,
        }
    }

    /// File name sent with uploads (no directory part).
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Path the bytes were read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for PdfSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfSource")
            .field("filename", &self.filename)
            .field("path", &self.path)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Read and validate a local PDF.
pub async fn read_pdf(path: impl AsRef<Path>) -> Result<PdfSource, OcrPipelineError> {
    let path = path.as_ref().to_path_buf();

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(OcrPipelineError::FileNotFound { path });
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(OcrPipelineError::PermissionDenied { path });
        }
        Err(e) => return Err(OcrPipelineError::ReadFailed { path, source: e }),
    };

    if !bytes.starts_with(b"%PDF") {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(OcrPipelineError::NotAPdf { path, magic });
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());

    debug!("Read PDF {} ({} bytes)", path.display(), bytes.len());
    Ok(PdfSource {
        filename,
        path,
        bytes,
    })
}
