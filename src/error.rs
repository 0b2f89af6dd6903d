//! Error types shared by the store, renderer, hardware and control surface.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a panel driver.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("{driver}: initialization failed: {reason}")]
    Init { driver: String, reason: String },

    #[error("{driver}: frame {width}x{height} does not match panel {panel_width}x{panel_height}")]
    Geometry {
        driver: String,
        width: u32,
        height: u32,
        panel_width: u32,
        panel_height: u32,
    },

    #[error("{driver}: {source}")]
    Io {
        driver: String,
        #[source]
        source: std::io::Error,
    },

    /// A previous driver call panicked while holding the driver.
    #[error("{0}: driver lock poisoned")]
    Poisoned(String),

    #[error("hardware task failed: {0}")]
    Task(String),
}

/// Errors surfaced by the control surface of a panel.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The referenced image does not exist.
    #[error("image {0} not found")]
    NotFound(i64),

    /// The governor refused the refresh; retry after `remaining`.
    #[error("panel needs to rest, retry in {}s", remaining.as_secs_f32().ceil())]
    RateLimited { remaining: Duration },

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// Malformed upload or undecodable stored image.
    #[error("image processing failed: {0}")]
    Processing(String),

    #[error("interval {requested}s is below the minimum of {floor}s")]
    IntervalTooShort { requested: u64, floor: u64 },

    #[error("interval {requested}s is above the maximum of {ceiling}s")]
    IntervalTooLong { requested: u64, ceiling: u64 },

    #[error("{0} is not supported on this panel")]
    Unsupported(&'static str),

    #[error("image store: {0}")]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Worker(String),
}

/// Problems with the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("[{panel}] {reason}")]
    Invalid { panel: &'static str, reason: String },
}

impl FrameError {
    /// Concrete back-off hint for rate-limited requests.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FrameError::RateLimited { remaining } => Some(*remaining),
            _ => None,
        }
    }
}

impl From<image::ImageError> for FrameError {
    fn from(err: image::ImageError) -> Self {
        FrameError::Processing(err.to_string())
    }
}

impl From<tokio::task::JoinError> for FrameError {
    fn from(err: tokio::task::JoinError) -> Self {
        FrameError::Worker(err.to_string())
    }
}

pub type FrameResult<T> = Result<T, FrameError>;
