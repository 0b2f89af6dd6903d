//! Daemon configuration
//!
//! One TOML file with a top-level section for shared paths and one table
//! per panel. Every key is optional; a missing file means all defaults.
//!
//! ```toml
//! database = "/var/lib/smart-frame/frame.db"
//!
//! [epaper]
//! interval_secs = 900
//!
//! [hdmi]
//! enabled = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;
use crate::governor::Floors;
use crate::panel::PanelProfile;
use crate::render::PanelSize;
use crate::scheduler::state::MAX_INTERVAL;

/// Application data directory, e.g. ~/.local/share/smart-frame on Linux
pub fn data_dir() -> PathBuf {
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    path.push("smart-frame");
    path
}

pub fn default_config_path() -> PathBuf {
    data_dir().join("smart-frame.toml")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// SQLite file shared by both panels
    pub database: Option<PathBuf>,
    /// Root of the per-panel upload directories
    pub media_dir: Option<PathBuf>,
    pub epaper: EpaperConfig,
    pub hdmi: HdmiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpaperConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub interval_secs: u64,
    pub min_interval_secs: u64,
    pub manual_floor_secs: u64,
    pub automatic_floor_secs: u64,
    pub base_url: String,
    pub show_on_upload: bool,
    pub autostart: bool,
}

impl Default for EpaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 800,
            height: 480,
            interval_secs: 600,
            min_interval_secs: 60,
            manual_floor_secs: 15,
            automatic_floor_secs: 60,
            base_url: "http://192.168.0.194/images/epaper/".to_string(),
            show_on_upload: false,
            autostart: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdmiConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub interval_secs: u64,
    pub min_interval_secs: u64,
    pub manual_floor_secs: u64,
    pub automatic_floor_secs: u64,
    pub base_url: String,
    pub show_on_upload: bool,
    pub autostart: bool,
    /// 0 disables the stats program
    pub stats_interval_secs: u64,
    pub framebuffer: PathBuf,
}

impl Default for HdmiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 1024,
            height: 600,
            interval_secs: 10,
            min_interval_secs: 1,
            manual_floor_secs: 0,
            automatic_floor_secs: 0,
            base_url: "http://192.168.0.194/images/".to_string(),
            show_on_upload: true,
            autostart: false,
            stats_interval_secs: 5,
            framebuffer: PathBuf::from("/dev/fb0"),
        }
    }
}

fn check_panel(panel: &'static str, width: u32, height: u32, interval: u64, min_interval: u64) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid { panel, reason };

    if width == 0 || height == 0 {
        return Err(invalid(format!("resolution {width}x{height} must be non-zero")));
    }
    if min_interval == 0 {
        return Err(invalid("min_interval_secs must be at least 1".into()));
    }
    if interval < min_interval {
        return Err(invalid(format!(
            "interval_secs ({interval}) is below min_interval_secs ({min_interval})"
        )));
    }
    let ceiling = MAX_INTERVAL.as_secs();
    if interval > ceiling {
        return Err(invalid(format!("interval_secs ({interval}) is above {ceiling}")));
    }
    Ok(())
}

impl FrameConfig {
    /// Read and validate `path`. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "⚙️  No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path: path.to_path_buf(), source }),
        };

        let config: FrameConfig =
            toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;

        info!(path = %path.display(), "⚙️  Config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.epaper;
        check_panel("epaper", e.width, e.height, e.interval_secs, e.min_interval_secs)?;
        let h = &self.hdmi;
        check_panel("hdmi", h.width, h.height, h.interval_secs, h.min_interval_secs)?;
        if h.stats_interval_secs > MAX_INTERVAL.as_secs() {
            return Err(ConfigError::Invalid {
                panel: "hdmi",
                reason: format!("stats_interval_secs ({}) is above {}", h.stats_interval_secs, MAX_INTERVAL.as_secs()),
            });
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| data_dir().join("smart-frame.db"))
    }

    pub fn media_root(&self) -> PathBuf {
        self.media_dir.clone().unwrap_or_else(|| data_dir().join("uploaded"))
    }

    pub fn epaper_profile(&self) -> PanelProfile {
        let c = &self.epaper;
        let mut profile = PanelProfile::epaper(&self.media_root());
        profile.size = PanelSize::new(c.width, c.height);
        profile.interval = Duration::from_secs(c.interval_secs);
        profile.interval_floor = Duration::from_secs(c.min_interval_secs);
        profile.floors = Floors {
            manual: Duration::from_secs(c.manual_floor_secs),
            automatic: Duration::from_secs(c.automatic_floor_secs),
        };
        profile.base_url = c.base_url.clone();
        profile.show_on_upload = c.show_on_upload;
        profile.autostart = c.autostart;
        profile
    }

    pub fn hdmi_profile(&self) -> PanelProfile {
        let c = &self.hdmi;
        let mut profile = PanelProfile::hdmi(&self.media_root());
        profile.size = PanelSize::new(c.width, c.height);
        profile.interval = Duration::from_secs(c.interval_secs);
        profile.interval_floor = Duration::from_secs(c.min_interval_secs);
        profile.floors = Floors {
            manual: Duration::from_secs(c.manual_floor_secs),
            automatic: Duration::from_secs(c.automatic_floor_secs),
        };
        profile.stats_interval = match c.stats_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        profile.base_url = c.base_url.clone();
        profile.show_on_upload = c.show_on_upload;
        profile.autostart = c.autostart;
        profile
    }
}
