use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use smart_frame::config::{default_config_path, FrameConfig};
use smart_frame::hardware::{FramebufferPanel, HardwareGateway, PanelDriver, SimulatedPanel};
use smart_frame::panel::{Panel, PanelProfile};
use smart_frame::state::library::ImageStore;
use smart_frame::sysinfo::{LinuxProbe, SystemProbe};

/// Photo-frame display daemon
#[derive(Parser, Debug)]
#[command(name = "smart-frame", version, about = "Drives e-paper and HDMI photo-frame panels")]
struct Args {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Never touch real hardware
    #[arg(long)]
    simulate: bool,

    /// Write every simulated frame as <panel>.png into this directory
    #[arg(long)]
    preview_dir: Option<PathBuf>,
}

impl Args {
    fn simulated_panel(&self, label: &str) -> SimulatedPanel {
        let panel = SimulatedPanel::new(label);
        match &self.preview_dir {
            Some(dir) => panel.with_preview_dir(dir),
            None => panel,
        }
    }
}

/// Build one panel on the shared database
fn build_panel(
    profile: PanelProfile,
    database: &Path,
    driver: Option<Box<dyn PanelDriver>>,
    args: &Args,
    probe: Arc<dyn SystemProbe>,
) -> Result<Panel> {
    let store = ImageStore::open(database, profile.kind.table())
        .with_context(|| format!("opening {} image store at {}", profile.label(), database.display()))?;
    let gateway = HardwareGateway::detect(driver, profile.size, args.simulated_panel(profile.label()));
    Ok(Panel::new(profile, store, gateway, probe))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config = FrameConfig::load(&config_path).context("loading configuration")?;
    let database = config.database_path();
    let probe: Arc<dyn SystemProbe> = Arc::new(LinuxProbe::new());

    let mut panels = Vec::new();

    if config.epaper.enabled {
        // The SPI driver is supplied by the board integration; none is linked here
        let profile = config.epaper_profile();
        panels.push(build_panel(profile, &database, None, &args, Arc::clone(&probe))?);
    }

    if config.hdmi.enabled {
        let profile = config.hdmi_profile();
        let driver: Option<Box<dyn PanelDriver>> = if args.simulate {
            None
        } else {
            match FramebufferPanel::open(&config.hdmi.framebuffer, profile.size) {
                Ok(fb) => Some(Box::new(fb) as Box<dyn PanelDriver>),
                Err(e) => {
                    info!(device = %config.hdmi.framebuffer.display(), error = %e, "📺 Framebuffer unavailable");
                    None
                }
            }
        };
        panels.push(build_panel(profile, &database, driver, &args, Arc::clone(&probe))?);
    }

    if panels.is_empty() {
        warn!("⚠️  No panels enabled in {}", config_path.display());
    }

    for panel in &panels {
        panel
            .reconcile()
            .with_context(|| format!("reconciling {} image store", panel.label()))?;

        if let Err(e) = panel.initialize().await {
            warn!(panel = panel.label(), error = %e, "⚠️  Panel did not initialize, will retry on first refresh");
        }

        panel.spawn_worker();
        if panel.profile().autostart {
            panel.start_slideshow();
        }

        info!(
            panel = panel.label(),
            hardware = panel.is_hardware_present(),
            images = panel.images().map(|i| i.len()).unwrap_or(0),
            "✅ Panel ready"
        );
    }

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("👋 Shutting down");

    for panel in &panels {
        panel.shutdown().await;
        match panel.status().to_json() {
            Ok(json) => info!(panel = panel.label(), "final status:\n{json}"),
            Err(e) => warn!(panel = panel.label(), error = %e, "⚠️  Could not serialize status"),
        }
    }

    Ok(())
}
