use image::{DynamicImage, GrayImage, ImageResult, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Panel resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PanelSize {
    pub width: u32,
    pub height: u32,
}

impl PanelSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for PanelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Color model of a panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Two-level black/white (e-paper)
    Mono,
    /// 24-bit RGB (HDMI)
    Rgb,
}

/// A frame that already matches a panel's resolution and color model.
///
/// Mono bitmaps only ever contain the values 0 and 255.
#[derive(Clone, PartialEq)]
pub enum Bitmap {
    Mono(GrayImage),
    Rgb(RgbImage),
}

impl Bitmap {
    pub fn width(&self) -> u32 {
        match self {
            Bitmap::Mono(img) => img.width(),
            Bitmap::Rgb(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Bitmap::Mono(img) => img.height(),
            Bitmap::Rgb(img) => img.height(),
        }
    }

    pub fn size(&self) -> PanelSize {
        PanelSize::new(self.width(), self.height())
    }

    pub fn mode(&self) -> ColorMode {
        match self {
            Bitmap::Mono(_) => ColorMode::Mono,
            Bitmap::Rgb(_) => ColorMode::Rgb,
        }
    }

    /// Raw pixel bytes (one byte per pixel for mono, three for RGB)
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Bitmap::Mono(img) => img.as_raw(),
            Bitmap::Rgb(img) => img.as_raw(),
        }
    }

    /// Expand to RGB (mono pixels become black or white)
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            Bitmap::Mono(img) => DynamicImage::ImageLuma8(img.clone()).to_rgb8(),
            Bitmap::Rgb(img) => img.clone(),
        }
    }

    /// Content hash, used to tell frames apart in logs and tests
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.mode().hash(&mut hasher);
        self.size().hash(&mut hasher);
        self.as_bytes().hash(&mut hasher);
        hasher.finish()
    }

    /// Save as PNG (format picked from the extension)
    pub fn save(&self, path: &Path) -> ImageResult<()> {
        match self {
            Bitmap::Mono(img) => img.save(path),
            Bitmap::Rgb(img) => img.save(path),
        }
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("mode", &self.mode())
            .field("size", &self.size())
            .field("fingerprint", &format_args!("{:016x}", self.fingerprint()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_fingerprint_tells_frames_apart() {
        let black = Bitmap::Mono(GrayImage::from_pixel(4, 4, Luma([0])));
        let white = Bitmap::Mono(GrayImage::from_pixel(4, 4, Luma([255])));

        assert_eq!(black.fingerprint(), black.clone().fingerprint());
        assert_ne!(black.fingerprint(), white.fingerprint());
    }

    #[test]
    fn test_to_rgb_expands_mono() {
        let bitmap = Bitmap::Mono(GrayImage::from_pixel(2, 1, Luma([255])));
        let rgb = bitmap.to_rgb();
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }
}
