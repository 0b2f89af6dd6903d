//! Simulated panel
//!
//! Stands in for missing hardware with the same contract: every call
//! succeeds, frames are logged and journaled, and the latest frame can be
//! written to a preview directory to look at on a desktop.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use super::PanelDriver;
use crate::error::HardwareError;
use crate::render::{Bitmap, PanelSize};

/// Something the simulated panel was asked to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Pushed { fingerprint: u64, size: PanelSize, at: DateTime<Utc> },
    Cleared { at: DateTime<Utc> },
}

#[derive(Debug, Default)]
struct JournalInner {
    events: Vec<FrameEvent>,
    pushes: usize,
    fail_pushes: usize,
}

/// Shared view of what a simulated panel displayed
#[derive(Debug, Clone, Default)]
pub struct FrameJournal {
    inner: Arc<Mutex<JournalInner>>,
}

impl FrameJournal {
    fn lock(&self) -> MutexGuard<'_, JournalInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn events(&self) -> Vec<FrameEvent> {
        self.lock().events.clone()
    }

    /// Number of successful pushes
    pub fn pushes(&self) -> usize {
        self.lock().pushes
    }

    /// Fingerprints of pushed frames, oldest first
    pub fn pushed_fingerprints(&self) -> Vec<u64> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                FrameEvent::Pushed { fingerprint, .. } => Some(*fingerprint),
                FrameEvent::Cleared { .. } => None,
            })
            .collect()
    }

    /// Make the next `count` pushes fail like a driver fault would
    pub fn fail_next_pushes(&self, count: usize) {
        self.lock().fail_pushes = count;
    }
}

pub struct SimulatedPanel {
    label: String,
    journal: FrameJournal,
    preview_dir: Option<PathBuf>,
}

impl SimulatedPanel {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), journal: FrameJournal::default(), preview_dir: None }
    }

    /// Also write every pushed frame to `<dir>/<label>.png`
    pub fn with_preview_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.preview_dir = Some(dir.into());
        self
    }

    pub fn journal(&self) -> FrameJournal {
        self.journal.clone()
    }

    fn write_preview(&self, bitmap: &Bitmap) {
        let Some(dir) = &self.preview_dir else { return };
        let path = dir.join(format!("{}.png", self.label));
        let result = std::fs::create_dir_all(dir)
            .map_err(image::ImageError::IoError)
            .and_then(|_| bitmap.save(&path));
        if let Err(e) = result {
            warn!(panel = %self.label, path = %path.display(), error = %e, "⚠️  Could not write preview");
        }
    }
}

impl PanelDriver for SimulatedPanel {
    fn name(&self) -> &str {
        &self.label
    }

    fn initialize(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    fn push(&mut self, bitmap: &Bitmap) -> Result<(), HardwareError> {
        {
            let mut journal = self.journal.lock();
            if journal.fail_pushes > 0 {
                journal.fail_pushes -= 1;
                return Err(HardwareError::Io {
                    driver: self.label.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "simulated busy timeout"),
                });
            }
            journal.pushes += 1;
            journal.events.push(FrameEvent::Pushed {
                fingerprint: bitmap.fingerprint(),
                size: bitmap.size(),
                at: Utc::now(),
            });
        }

        info!(panel = %self.label, size = %bitmap.size(), fingerprint = format!("{:016x}", bitmap.fingerprint()), "🖼️  Simulated frame");
        self.write_preview(bitmap);
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), HardwareError> {
        self.journal.lock().events.push(FrameEvent::Cleared { at: Utc::now() });
        info!(panel = %self.label, "🧹 Simulated clear");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_preview_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut panel = SimulatedPanel::new("epaper").with_preview_dir(dir.path().join("preview"));
        let bitmap = Bitmap::Mono(GrayImage::from_pixel(16, 8, Luma([0])));

        panel.push(&bitmap).unwrap();

        let written = image::open(dir.path().join("preview/epaper.png")).unwrap();
        assert_eq!((written.width(), written.height()), (16, 8));
        assert_eq!(panel.journal().pushed_fingerprints(), vec![bitmap.fingerprint()]);
    }
}
