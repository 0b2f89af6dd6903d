//! Display arbitration and refresh scheduling for photo-frame panels.
//!
//! Each physical display (a two-level e-paper panel, an HDMI screen) is a
//! [`Panel`]: one owner of the hardware that rate-limits refreshes, runs an
//! interruptible slideshow or stats program, and serves manual requests.
//! The request layer binds to `Panel`'s methods.

pub mod config;
pub mod error;
pub mod governor;
pub mod hardware;
pub mod panel;
pub mod render;
pub mod scheduler;
pub mod state;
pub mod sysinfo;

pub use error::{FrameError, FrameResult};
pub use panel::{Panel, PanelKind, PanelProfile, Uploaded};
