//! Linux framebuffer driver for the HDMI panel
//!
//! Writes whole frames to `/dev/fbN`. Pixel format and line stride come from
//! sysfs when available; 16 bpp is RGB565 little-endian, 32 bpp is BGRX.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::PanelDriver;
use crate::error::HardwareError;
use crate::render::{Bitmap, PanelSize};

pub struct FramebufferPanel {
    name: String,
    path: PathBuf,
    file: Option<File>,
    size: PanelSize,
    bits_per_pixel: u32,
    stride: usize,
}

/// Read a numeric attribute of `/sys/class/graphics/<fb>/`
fn sysfs_attr(device: &Path, attr: &str) -> Option<usize> {
    let fb = device.file_name()?;
    let raw = std::fs::read_to_string(Path::new("/sys/class/graphics").join(fb).join(attr)).ok()?;
    raw.trim().parse().ok()
}

impl FramebufferPanel {
    /// Open the device. Fails when it does not exist or is not writable,
    /// which callers treat as "no HDMI hardware".
    pub fn open(path: impl Into<PathBuf>, size: PanelSize) -> std::io::Result<Self> {
        let path = path.into();
        let bits_per_pixel = sysfs_attr(&path, "bits_per_pixel").map(|b| b as u32).unwrap_or(32);
        let stride = sysfs_attr(&path, "stride");
        Self::open_with_format(path, size, bits_per_pixel, stride)
    }

    /// Open with an explicit pixel format, e.g. for a plain file
    pub fn open_with_format(
        path: impl Into<PathBuf>,
        size: PanelSize,
        bits_per_pixel: u32,
        stride: Option<usize>,
    ) -> std::io::Result<Self> {
        if bits_per_pixel != 16 && bits_per_pixel != 32 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("unsupported framebuffer depth: {bits_per_pixel} bpp"),
            ));
        }

        let path = path.into();
        let file = OpenOptions::new().write(true).open(&path)?;
        let bytes_per_pixel = (bits_per_pixel / 8) as usize;
        let stride = stride.unwrap_or(size.width as usize * bytes_per_pixel);

        info!(device = %path.display(), %size, bits_per_pixel, stride, "📺 Framebuffer opened");

        Ok(Self {
            name: format!("framebuffer:{}", path.display()),
            path,
            file: Some(file),
            size,
            bits_per_pixel,
            stride,
        })
    }

    fn io_error(&self, source: std::io::Error) -> HardwareError {
        HardwareError::Io { driver: self.name.clone(), source }
    }

    /// Encode a frame in the device's pixel format, padding each line to the stride
    fn encode(&self, bitmap: &Bitmap) -> Vec<u8> {
        let rgb = bitmap.to_rgb();
        let bytes_per_pixel = (self.bits_per_pixel / 8) as usize;
        let mut buf = vec![0u8; self.stride * self.size.height as usize];

        for (y, row) in rgb.rows().enumerate() {
            let line = &mut buf[y * self.stride..(y + 1) * self.stride];
            for (x, px) in row.enumerate() {
                let at = x * bytes_per_pixel;
                if at + bytes_per_pixel > line.len() {
                    break;
                }
                let [r, g, b] = px.0;
                match self.bits_per_pixel {
                    16 => {
                        let mut rgb565: u16 = (r as u16 & 0b1111_1000) << 8;
                        rgb565 |= (g as u16 & 0b1111_1100) << 3;
                        rgb565 |= b as u16 >> 3;
                        line[at..at + 2].copy_from_slice(&rgb565.to_le_bytes());
                    }
                    _ => line[at..at + 4].copy_from_slice(&[b, g, r, 0xFF]),
                }
            }
        }

        buf
    }

    fn write_frame(&mut self, buf: &[u8]) -> Result<(), HardwareError> {
        let file = match self.file.as_mut() {
            Some(file) => file,
            None => {
                return Err(HardwareError::Init {
                    driver: self.name.clone(),
                    reason: "device not open".into(),
                })
            }
        };
        let result = file.seek(SeekFrom::Start(0)).and_then(|_| file.write_all(buf)).and_then(|_| file.flush());
        result.map_err(|e| self.io_error(e))
    }
}

impl PanelDriver for FramebufferPanel {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<(), HardwareError> {
        if self.file.is_none() {
            let file = OpenOptions::new().write(true).open(&self.path).map_err(|e| self.io_error(e))?;
            self.file = Some(file);
        }
        Ok(())
    }

    fn push(&mut self, bitmap: &Bitmap) -> Result<(), HardwareError> {
        let buf = self.encode(bitmap);
        self.write_frame(&buf)
    }

    /// Screens stay lit; nothing to power down
    fn sleep(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), HardwareError> {
        let buf = vec![0u8; self.stride * self.size.height as usize];
        self.write_frame(&buf)
    }
}
