use std::io::Cursor;

use image::imageops::FilterType;
use image::{ImageFormat, ImageOutputFormat};
use tracing::debug;

use crate::error::FaceMatchError;
use crate::pipeline::staging::StagedFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Size an image must be scaled to so its larger side equals `max_dimension`,
/// or `None` if it already fits.
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> Option<Dimensions> {
    if width <= max_dimension && height <= max_dimension {
        return None;
    }
    let scale = max_dimension as f64 / width.max(height) as f64;
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, max_dimension);
    Some(Dimensions { width: scaled(width), height: scaled(height) })
}

fn output_format(format: ImageFormat) -> ImageOutputFormat {
    match format {
        ImageFormat::Jpeg => ImageOutputFormat::Jpeg(95),
        other => ImageOutputFormat::from(other),
    }
}

/// Shrinks the staged image in place when either side exceeds `max_dimension`.
/// The encoding is detected from content and kept; small images are left untouched.
pub fn normalize(staged: &StagedFile, max_dimension: u32) -> Result<Dimensions, FaceMatchError> {
    let path = staged.path();
    let reader = image::io::Reader::open(path)?.with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| FaceMatchError::ImageDecode("unrecognized image format".to_string()))?;
    let img = reader.decode().map_err(|e| FaceMatchError::ImageDecode(e.to_string()))?;

    let Some(target) = target_dimensions(img.width(), img.height(), max_dimension) else {
        return Ok(Dimensions { width: img.width(), height: img.height() });
    };
    debug!(
        "Resizing {:?} from {}x{} to {}x{}",
        path,
        img.width(),
        img.height(),
        target.width,
        target.height
    );
    let resized = img.resize_exact(target.width, target.height, FilterType::Lanczos3);
    let mut buf = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut buf), output_format(format))
        .map_err(|e| FaceMatchError::ImageDecode(format!("cannot re-encode {:?} image: {}", format, e)))?;
    std::fs::write(path, &buf)?;
    Ok(target)
}
