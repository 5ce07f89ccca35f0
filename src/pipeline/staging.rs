use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use image::ImageFormat;
use tempfile::TempPath;
use tracing::warn;

use crate::error::FaceMatchError;

/// One uploaded file, exactly as the client sent it.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadedImage {
    /// An upload without a filename is treated as absent.
    pub fn is_present(&self) -> bool {
        self.filename.as_deref().is_some_and(|f| !f.is_empty())
    }
}

/// Directory uploads are staged into. Shared by all requests; names never collide.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the upload to a fresh, randomly named file. The file is opened
    /// create-new, so concurrent requests can never share a path.
    pub fn stage(&self, uploaded: &UploadedImage) -> Result<StagedFile, FaceMatchError> {
        let suffix = staged_suffix(&uploaded.bytes, uploaded.filename.as_deref(), uploaded.content_type.as_deref());
        let mut file = tempfile::Builder::new()
            .prefix("facematch-")
            .suffix(&suffix)
            .tempfile_in(&self.dir)?;
        // On error `file` drops here and takes the partial file with it.
        file.write_all(&uploaded.bytes)?;
        file.as_file().sync_all()?;
        Ok(StagedFile { path: Some(file.into_temp_path()) })
    }
}

/// A staged upload. Deleted by [`StagedFile::release`] or, failing that, on drop.
#[derive(Debug)]
pub struct StagedFile {
    path: Option<TempPath>,
}

impl StagedFile {
    /// Path of the staged file. Empty once released.
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    pub fn is_released(&self) -> bool {
        self.path.is_none()
    }

    /// Deletes the file. Calling it again, or after the file vanished, is fine.
    /// On failure the path is kept, so a later call or the drop retries.
    pub fn release(&mut self) -> io::Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Some(path) = self.path.take() {
            // Already removed; only disarm the guard.
            let _ = path.keep();
        }
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.as_deref() {
            let shown = path.to_path_buf();
            if let Err(e) = self.release() {
                warn!("Failed to remove staged file {:?}: {}", shown, e);
            }
        }
    }
}

/// Extension for the staged file. The content decides when it is a known image
/// format; otherwise the client filename, then the declared content type, as long
/// as the extension names an image format. Anything else gets no extension.
fn staged_suffix(bytes: &[u8], filename: Option<&str>, content_type: Option<&str>) -> String {
    let sniffed = image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first())
        .map(|e| e.to_string());
    let from_name = || {
        filename
            .and_then(|f| Path::new(f).extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .filter(|e| is_image_extension(e))
    };
    let from_content_type = || {
        content_type
            .and_then(mime_guess::get_mime_extensions_str)
            .and_then(|exts| exts.iter().find(|e| is_image_extension(e)))
            .map(|e| e.to_string())
    };
    sniffed
        .or_else(from_name)
        .or_else(from_content_type)
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

fn is_image_extension(ext: &str) -> bool {
    ImageFormat::from_extension(ext).is_some()
}
