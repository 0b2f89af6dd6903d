//! Bytes and files to panel-ready bitmaps
//!
//! Uploads are normalized once, saved, and then reloaded by the slideshow.
//! Reloading runs the same normalization so a file that was replaced on
//! disk still comes out at the panel's resolution and color model.

use image::imageops::{self, BiLevel, FilterType};
use image::DynamicImage;
use std::path::Path;

use super::bitmap::{Bitmap, ColorMode, PanelSize};
use crate::error::{FrameError, FrameResult};

/// Decode an uploaded image and bring it to the panel's size and color model
pub fn decode_and_normalize(bytes: &[u8], size: PanelSize, mode: ColorMode) -> FrameResult<Bitmap> {
    if bytes.is_empty() {
        return Err(FrameError::Processing("empty upload".into()));
    }
    let img = image::load_from_memory(bytes)?;
    Ok(normalize(img, size, mode))
}

/// Load a stored image file for display
pub fn load_bitmap(path: &Path, size: PanelSize, mode: ColorMode) -> FrameResult<Bitmap> {
    let img = image::open(path).map_err(|e| match e {
        image::ImageError::IoError(io) => FrameError::Io(io),
        other => FrameError::from(other),
    })?;
    Ok(normalize(img, size, mode))
}

/// Stretch to the exact panel resolution, then convert the color model.
///
/// Mono output is grayscale Floyd-Steinberg dithered to two levels.
pub fn normalize(img: DynamicImage, size: PanelSize, mode: ColorMode) -> Bitmap {
    let img = if img.width() == size.width && img.height() == size.height {
        img
    } else {
        img.resize_exact(size.width, size.height, FilterType::Lanczos3)
    };

    match mode {
        ColorMode::Mono => {
            let mut gray = img.to_luma8();
            imageops::dither(&mut gray, &BiLevel);
            Bitmap::Mono(gray)
        }
        ColorMode::Rgb => Bitmap::Rgb(img.to_rgb8()),
    }
}
