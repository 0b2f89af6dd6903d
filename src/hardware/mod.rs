//! Hardware gateway
//!
//! The only code that touches a physical panel. Drivers implement the
//! blocking `PanelDriver` capability; `HardwareGateway` owns one driver and
//! runs each call sequence on tokio's blocking pool.
//!
//! Serialization of those sequences is the governor's job: the sequences
//! are crate-private and only ever driven through a `RefreshPermit`.

pub mod framebuffer;
pub mod simulated;

pub use framebuffer::FramebufferPanel;
pub use simulated::{FrameEvent, FrameJournal, SimulatedPanel};

use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::HardwareError;
use crate::render::{Bitmap, PanelSize};

/// Capability interface of a physical panel
pub trait PanelDriver: Send {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Wake the controller and prepare it for a frame
    fn initialize(&mut self) -> Result<(), HardwareError>;

    /// Transfer a full frame
    fn push(&mut self, bitmap: &Bitmap) -> Result<(), HardwareError>;

    /// Put the controller into its low-power state
    fn sleep(&mut self) -> Result<(), HardwareError>;

    /// Blank the panel
    fn clear(&mut self) -> Result<(), HardwareError>;
}

type SharedDriver = Arc<Mutex<Box<dyn PanelDriver>>>;

/// Handle to one panel's driver. Clones share the driver.
#[derive(Clone)]
pub struct HardwareGateway {
    driver: SharedDriver,
    name: String,
    size: PanelSize,
    present: bool,
}

impl HardwareGateway {
    /// Wrap a real driver
    pub fn new(driver: Box<dyn PanelDriver>, size: PanelSize) -> Self {
        Self::with_presence(driver, size, true)
    }

    /// Use `driver` when the hardware was found, otherwise fall back to the
    /// simulated panel, which has the same contract.
    pub fn detect(driver: Option<Box<dyn PanelDriver>>, size: PanelSize, fallback: SimulatedPanel) -> Self {
        match driver {
            Some(driver) => Self::new(driver, size),
            None => {
                info!(panel = fallback.name(), %size, "🖥️  No panel hardware found, running in simulation mode");
                Self::simulated(fallback, size)
            }
        }
    }

    /// Wrap a simulated panel; `is_present` reports false
    pub fn simulated(panel: SimulatedPanel, size: PanelSize) -> Self {
        Self::with_presence(Box::new(panel), size, false)
    }

    fn with_presence(driver: Box<dyn PanelDriver>, size: PanelSize, present: bool) -> Self {
        let name = driver.name().to_string();
        Self { driver: Arc::new(Mutex::new(driver)), name, size, present }
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> PanelSize {
        self.size
    }

    /// Bring the panel up once at startup and put it straight back to sleep
    pub(crate) async fn initialize(&self) -> Result<(), HardwareError> {
        self.run(|driver| {
            driver.initialize()?;
            driver.sleep()
        })
        .await
    }

    /// initialize, push, sleep
    pub(crate) async fn refresh(&self, bitmap: Bitmap) -> Result<(), HardwareError> {
        if bitmap.size() != self.size {
            return Err(HardwareError::Geometry {
                driver: self.name.clone(),
                width: bitmap.width(),
                height: bitmap.height(),
                panel_width: self.size.width,
                panel_height: self.size.height,
            });
        }

        debug!(driver = %self.name, ?bitmap, "pushing frame");
        self.run(move |driver| {
            driver.initialize()?;
            driver.push(&bitmap)?;
            driver.sleep()
        })
        .await
    }

    /// initialize, clear, sleep
    pub(crate) async fn clear(&self) -> Result<(), HardwareError> {
        self.run(|driver| {
            driver.initialize()?;
            driver.clear()?;
            driver.sleep()
        })
        .await
    }

    async fn run<F>(&self, job: F) -> Result<(), HardwareError>
    where
        F: FnOnce(&mut dyn PanelDriver) -> Result<(), HardwareError> + Send + 'static,
    {
        let driver = Arc::clone(&self.driver);
        let name = self.name.clone();

        // Driver calls block on SPI/file I/O, keep them off the async workers
        tokio::task::spawn_blocking(move || {
            let mut guard = driver.lock().map_err(|_| HardwareError::Poisoned(name))?;
            job(&mut **guard)
        })
        .await
        .map_err(|e| HardwareError::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for HardwareGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareGateway")
            .field("driver", &self.name)
            .field("size", &self.size)
            .field("present", &self.present)
            .finish()
    }
}
