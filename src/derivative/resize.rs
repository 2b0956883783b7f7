//! Resize engine.
//!
//! Decodes a source image and writes an aspect-preserving, width-constrained
//! copy next to the cache.
//!
//! # Design Decisions
//!
//! - **Width only**: the caller picks a width; height follows the source
//!   aspect ratio.
//!
//! - **Never upscale**: a request at or above the source width is reported as
//!   [`ResizeOutcome::NotLarger`] and nothing is written. The caller serves the
//!   original instead.
//!
//! - **Lanczos3**: slower than triangle/nearest but avoids visible aliasing on
//!   photos, and results are cached.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};

use crate::error::DerivativeError;

/// Resampling filter used for every derivative.
pub const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

/// What a resize did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// A derivative of the given dimensions was written
    Resized { width: u32, height: u32 },

    /// The source is not wider than the requested width; nothing was written
    NotLarger { source_width: u32 },
}

/// Something that can turn a source file into a resized file.
///
/// Implementations are called on the blocking thread pool and may do CPU
/// heavy work synchronously.
pub trait Resizer: Send + Sync + 'static {
    /// Resize `source` to `width` pixels wide, writing the result to
    /// `destination`.
    ///
    /// # Errors
    ///
    /// - [`DerivativeError::Decode`] if the source cannot be decoded
    /// - [`DerivativeError::Io`] if the source cannot be read or the
    ///   destination cannot be written
    fn resize(
        &self,
        source: &Path,
        destination: &Path,
        width: u32,
    ) -> Result<ResizeOutcome, DerivativeError>;
}

// =============================================================================
// Image Resizer
// =============================================================================

/// [`Resizer`] backed by the `image` crate.
///
/// The output format is picked from the destination's extension, so a
/// derivative keeps the original's format.
#[derive(Debug, Clone, Default)]
pub struct ImageResizer {}

impl ImageResizer {
    /// Create a new resizer.
    pub fn new() -> Self {
        Self {}
    }
}

impl Resizer for ImageResizer {
    fn resize(
        &self,
        source: &Path,
        destination: &Path,
        width: u32,
    ) -> Result<ResizeOutcome, DerivativeError> {
        // Header-only read first; wide requests never pay for a full decode
        let (source_width, _) = open_reader(source)?
            .into_dimensions()
            .map_err(|e| DerivativeError::decode(source, e))?;
        if width >= source_width {
            return Ok(ResizeOutcome::NotLarger { source_width });
        }

        let img = open_reader(source)?
            .decode()
            .map_err(|e| DerivativeError::decode(source, e))?;

        let Some(resized) = resize_image(&img, width) else {
            return Ok(ResizeOutcome::NotLarger {
                source_width: img.width(),
            });
        };

        resized
            .save(destination)
            .map_err(|e| DerivativeError::io(destination, e))?;

        Ok(ResizeOutcome::Resized {
            width: resized.width(),
            height: resized.height(),
        })
    }
}

fn open_reader(source: &Path) -> Result<ImageReader<BufReader<File>>, DerivativeError> {
    ImageReader::open(source)
        .map_err(|e| DerivativeError::io(source, e))?
        .with_guessed_format()
        .map_err(|e| DerivativeError::io(source, e))
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Compute the output dimensions for resizing `source_width` x
/// `source_height` to `width`.
///
/// Returns `None` when the source is not wider than `width` (no upscaling)
/// or either dimension is zero.
pub fn target_dimensions(source_width: u32, source_height: u32, width: u32) -> Option<(u32, u32)> {
    if width == 0 || source_width == 0 || source_height == 0 || width >= source_width {
        return None;
    }

    let height = (source_height as f64 * width as f64 / source_width as f64).round() as u32;
    Some((width, height.max(1)))
}

/// Resize an already decoded image to `width`, keeping its aspect ratio.
///
/// Returns `None` when the image is not wider than `width`.
pub fn resize_image(img: &DynamicImage, width: u32) -> Option<DynamicImage> {
    let (width, height) = target_dimensions(img.width(), img.height(), width)?;
    Some(img.resize_exact(width, height, RESIZE_FILTER))
}

// =============================================================================
// Tests
// =============================================================================
