//! Render transform
//!
//! Everything that turns input into a display-ready bitmap:
//! - `bitmap.rs` - the bitmap type handed to panel drivers
//! - `transform.rs` - uploaded bytes and stored files to panel resolution
//! - `panels.rs` - text and system-stats panels drawn from scratch

pub mod bitmap;
pub mod panels;
pub mod transform;

pub use bitmap::{Bitmap, ColorMode, PanelSize};
pub use panels::{render_stats_panel, render_text_panel};
pub use transform::{decode_and_normalize, load_bitmap, normalize};
