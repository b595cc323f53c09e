//! Upload stage: resolve a local document and submit it for extraction.
//!
//! File-type checking here is advisory. The service is the authority on what
//! it accepts; by default a file that does not look like an image or PDF is
//! sent anyway with a warning. We sniff magic bytes before trusting the
//! extension so a renamed file is still recognised.

use crate::api::{self, UploadResponse};
use crate::error::WorkflowError;
use crate::model::ExtractionJob;
use crate::transport::{ApiRequest, Transport};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Document types the service is known to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Jpeg,
    Png,
    Pdf,
}

impl DocumentKind {
    /// Detect the kind from leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(DocumentKind::Pdf)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(DocumentKind::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(DocumentKind::Jpeg)
        } else {
            None
        }
    }

    /// Detect the kind from a file name's extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(DocumentKind::Jpeg),
            "png" => Some(DocumentKind::Png),
            "pdf" => Some(DocumentKind::Pdf),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            DocumentKind::Jpeg => "image/jpeg",
            DocumentKind::Png => "image/png",
            DocumentKind::Pdf => "application/pdf",
        }
    }
}

/// A document ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    /// Where the bytes came from, when read from disk.
    pub path: Option<PathBuf>,
}

impl UploadFile {
    /// Wrap in-memory bytes. The content type follows the sniffed kind, then
    /// the file name's extension, then `application/octet-stream`.
    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = match DocumentKind::sniff(&bytes) {
            Some(kind) => kind.content_type().to_string(),
            None => mime_guess::from_path(&file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        };
        Self {
            file_name,
            content_type,
            bytes,
            path: None,
        }
    }

    /// Read a document from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let path = path.as_ref().to_path_buf();

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) => {
                return Err(match e.kind() {
                    std::io::ErrorKind::NotFound => WorkflowError::FileNotFound { path },
                    std::io::ErrorKind::PermissionDenied => {
                        WorkflowError::PermissionDenied { path }
                    }
                    _ if path.is_dir() => WorkflowError::UnsupportedFile {
                        path,
                        reason: "is a directory".into(),
                    },
                    _ => WorkflowError::FileReadFailed { path, source: e },
                })
            }
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        debug!("Read {} bytes from {}", bytes.len(), path.display());
        let mut file = Self::from_bytes(file_name, bytes);
        file.path = Some(path);
        Ok(file)
    }

    /// Best guess at the document kind: magic bytes first, then extension.
    pub fn kind(&self) -> Option<DocumentKind> {
        DocumentKind::sniff(&self.bytes).or_else(|| DocumentKind::from_file_name(&self.file_name))
    }

    /// Apply the accepted-type filter. Warns, or rejects when `strict`.
    pub fn check_type(&self, strict: bool) -> Result<(), WorkflowError> {
        if self.bytes.is_empty() {
            if strict {
                return Err(self.unsupported("file is empty".into()));
            }
            warn!("'{}' is empty; uploading anyway", self.file_name);
            return Ok(());
        }
        if self.kind().is_some() {
            return Ok(());
        }
        if strict {
            return Err(self.unsupported(format!("not an image or PDF ({})", self.content_type)));
        }
        warn!(
            "'{}' does not look like an image or PDF ({}); uploading anyway",
            self.file_name, self.content_type
        );
        Ok(())
    }

    fn unsupported(&self, reason: String) -> WorkflowError {
        WorkflowError::UnsupportedFile {
            path: self
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from(&self.file_name)),
            reason,
        }
    }
}

/// Send `file` to the service and return the new job.
///
/// Transport failures surface unchanged. An empty extraction id is an
/// [`WorkflowError::InvalidResponse`].
pub async fn upload(
    transport: &dyn Transport,
    file: &UploadFile,
) -> Result<ExtractionJob, WorkflowError> {
    info!(
        "Uploading '{}' ({} bytes, {})",
        file.file_name,
        file.bytes.len(),
        file.content_type
    );

    let request = ApiRequest::post_multipart(
        api::UPLOAD_PATH,
        api::UPLOAD_FIELD,
        file.file_name.clone(),
        file.content_type.clone(),
        file.bytes.clone(),
    );
    let response = transport.send(request).await?;
    let body: UploadResponse = response.json()?;

    let id = body.extraction_id.trim();
    if id.is_empty() {
        return Err(WorkflowError::InvalidResponse {
            detail: "upload returned an empty extraction_id".into(),
        });
    }

    info!("Upload accepted: extraction id {}", id);
    Ok(ExtractionJob::new(id))
}
