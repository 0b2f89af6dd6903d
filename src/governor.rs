//! Refresh governor
//!
//! Owns a panel's hardware gateway and decides when it may be refreshed.
//! Holding the governor's mutex is the "refresh in progress" state: one
//! refresh attempt at a time per panel, with a minimum gap between physical
//! refreshes that depends on who is asking.
//!
//! Once a push or clear has started it runs to completion on its own task,
//! still holding the lock, and records the refresh even if the caller that
//! started it was dropped.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{FrameError, FrameResult, HardwareError};
use crate::hardware::HardwareGateway;
use crate::render::Bitmap;

/// Who is asking for a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// A person pressed a button; denied with a wait hint inside the floor
    Manual,
    /// The background worker; waits out the floor instead
    Automatic,
}

/// Minimum gap between physical refreshes, per priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Floors {
    pub manual: Duration,
    pub automatic: Duration,
}

impl Floors {
    pub const NONE: Floors = Floors { manual: Duration::ZERO, automatic: Duration::ZERO };

    pub fn floor(&self, priority: Priority) -> Duration {
        match priority {
            Priority::Manual => self.manual,
            Priority::Automatic => self.automatic,
        }
    }
}

#[derive(Debug, Default)]
struct GovernorState {
    last_refresh_at: Option<Instant>,
}

pub struct RefreshGovernor {
    state: Arc<Mutex<GovernorState>>,
    gateway: HardwareGateway,
    floors: Floors,
}

/// Exclusive right to drive the panel once.
///
/// Dropping it without pushing releases the panel untouched.
pub struct RefreshPermit {
    state: OwnedMutexGuard<GovernorState>,
    gateway: HardwareGateway,
    granted_at: Instant,
}

enum Job {
    Push(Bitmap),
    Clear,
}

impl RefreshGovernor {
    pub fn new(gateway: HardwareGateway, floors: Floors) -> Self {
        Self { state: Arc::new(Mutex::new(GovernorState::default())), gateway, floors }
    }

    pub fn floors(&self) -> Floors {
        self.floors
    }

    pub fn gateway(&self) -> &HardwareGateway {
        &self.gateway
    }

    /// Time of the last successful refresh. Waits for an in-flight push.
    pub async fn last_refresh_at(&self) -> Option<Instant> {
        self.state.lock().await.last_refresh_at
    }

    /// Enter the critical section if the floor for `priority` has passed,
    /// otherwise report how long is left.
    async fn try_acquire(&self, priority: Priority) -> Result<RefreshPermit, Duration> {
        let state = Arc::clone(&self.state).lock_owned().await;
        let now = Instant::now();
        let floor = self.floors.floor(priority);

        if let Some(last) = state.last_refresh_at {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < floor {
                return Err(floor - elapsed);
            }
        }

        Ok(RefreshPermit { state, gateway: self.gateway.clone(), granted_at: now })
    }

    /// Ask for a refresh now. Denied with `RateLimited` inside the floor.
    pub async fn request(&self, priority: Priority) -> FrameResult<RefreshPermit> {
        self.try_acquire(priority).await.map_err(|remaining| {
            debug!(panel = %self.gateway.name(), ?priority, ?remaining, "refresh denied");
            FrameError::RateLimited { remaining }
        })
    }

    /// Wait until a refresh is allowed.
    ///
    /// Sleeps with the lock released, so manual requests still get their
    /// answer while the worker waits. Cancel-safe.
    pub async fn wait_for(&self, priority: Priority) -> RefreshPermit {
        loop {
            match self.try_acquire(priority).await {
                Ok(permit) => return permit,
                Err(remaining) => {
                    debug!(panel = %self.gateway.name(), ?remaining, "⏳ Waiting for panel to rest");
                    tokio::time::sleep(remaining).await;
                }
            }
        }
    }

    /// Enter the critical section regardless of the floors
    pub async fn exclusive(&self) -> RefreshPermit {
        let state = Arc::clone(&self.state).lock_owned().await;
        RefreshPermit { state, gateway: self.gateway.clone(), granted_at: Instant::now() }
    }
}

impl RefreshPermit {
    /// Wake the controller and put it back to sleep without drawing
    pub async fn initialize(self) -> Result<(), HardwareError> {
        self.gateway.initialize().await
    }

    /// Push a frame. The cooldown only starts if the push succeeded.
    pub async fn push(self, bitmap: Bitmap) -> Result<(), HardwareError> {
        self.run(Job::Push(bitmap)).await
    }

    /// Blank the panel. Counts as a refresh for the floors.
    pub async fn clear(self) -> Result<(), HardwareError> {
        self.run(Job::Clear).await
    }

    async fn run(self, job: Job) -> Result<(), HardwareError> {
        let mut permit = self;
        let task = tokio::spawn(async move {
            let result = match job {
                Job::Push(bitmap) => permit.gateway.refresh(bitmap).await,
                Job::Clear => permit.gateway.clear().await,
            };
            match &result {
                Ok(()) => permit.state.last_refresh_at = Some(permit.granted_at),
                Err(e) => warn!(panel = %permit.gateway.name(), error = %e, "❌ Refresh failed"),
            }
            result
        });

        task.await.map_err(|e| HardwareError::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for RefreshGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshGovernor")
            .field("gateway", &self.gateway)
            .field("floors", &self.floors)
            .finish()
    }
}
