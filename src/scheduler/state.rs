//! Scheduler state
//!
//! One `SchedulerState` per panel, shared between the control surface and
//! the worker behind a `std::sync::Mutex`. Never held across an await.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{FrameError, FrameResult};
use crate::state::data::ImageRecord;

/// Longest interval `set_interval` accepts (one week)
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// What the worker is asked to keep on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Program {
    Slideshow,
    Stats,
}

/// Where the worker is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Displaying,
    Waiting,
}

#[derive(Debug, Clone)]
pub struct SchedulerState {
    pub(crate) program: Option<Program>,
    pub(crate) phase: Phase,
    pub(crate) interval: Duration,
    interval_floor: Duration,
    pub(crate) current: Option<ImageRecord>,
    pub(crate) next: Option<ImageRecord>,
    pub(crate) last_refresh_at: Option<DateTime<Utc>>,
    pub(crate) wait_deadline: Option<Instant>,
    /// A control operation put something on screen since the worker last looked
    pub(crate) manual_display: bool,
    pub(crate) shutdown: bool,
    /// Bumped by every change the worker has to react to
    pub(crate) epoch: u64,
}

/// Snapshot reported to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub program: Option<Program>,
    pub phase: Phase,
    pub current: Option<ImageRecord>,
    pub next: Option<ImageRecord>,
    pub remaining_seconds: Option<u64>,
    pub interval_seconds: u64,
    pub last_refresh_at: Option<DateTime<Utc>>,
}

impl SchedulerStatus {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl SchedulerState {
    /// Intervals below one second are never accepted, whatever the floor.
    /// Both values are capped at `MAX_INTERVAL`.
    pub fn new(interval: Duration, interval_floor: Duration) -> Self {
        let interval_floor = interval_floor.clamp(Duration::from_secs(1), MAX_INTERVAL);
        Self {
            program: None,
            phase: Phase::Idle,
            interval: interval.clamp(interval_floor, MAX_INTERVAL),
            interval_floor,
            current: None,
            next: None,
            last_refresh_at: None,
            wait_deadline: None,
            manual_display: false,
            shutdown: false,
            epoch: 0,
        }
    }

    /// True while the slideshow is the active program
    pub fn is_running(&self) -> bool {
        self.program == Some(Program::Slideshow)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Make `program` the active one. Returns false if it already was.
    pub fn start(&mut self, program: Program) -> bool {
        if self.program == Some(program) {
            return false;
        }
        self.program = Some(program);
        self.next = None;
        self.wait_deadline = None;
        self.manual_display = false;
        self.touch();
        true
    }

    /// Stop `program` if it is the active one. Returns false otherwise.
    pub fn stop(&mut self, program: Program) -> bool {
        if self.program != Some(program) {
            return false;
        }
        self.program = None;
        self.phase = Phase::Idle;
        self.next = None;
        self.wait_deadline = None;
        self.manual_display = false;
        self.touch();
        true
    }

    /// Change the slideshow interval; the previous one is kept on rejection
    pub fn set_interval(&mut self, seconds: u64) -> FrameResult<Duration> {
        let floor = self.interval_floor.as_secs();
        if seconds < floor {
            return Err(FrameError::IntervalTooShort { requested: seconds, floor });
        }
        let ceiling = MAX_INTERVAL.as_secs();
        if seconds > ceiling {
            return Err(FrameError::IntervalTooLong { requested: seconds, ceiling });
        }
        self.interval = Duration::from_secs(seconds);
        self.touch();
        Ok(self.interval)
    }

    /// Something reached the panel
    pub(crate) fn record_display(&mut self, record: Option<ImageRecord>) {
        self.current = record;
        self.last_refresh_at = Some(Utc::now());
    }

    /// A control operation drew on the panel. The worker counts it as the
    /// current cycle's frame instead of replacing it straight away.
    pub(crate) fn record_manual_display(&mut self, record: Option<ImageRecord>) -> bool {
        self.record_display(record);
        self.manual_display = self.program.is_some();
        if self.manual_display {
            self.touch();
        }
        self.manual_display
    }

    /// Mark a change the worker has not seen yet
    pub(crate) fn touch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Drop references to a deleted image
    pub(crate) fn forget(&mut self, id: i64) {
        if self.current.as_ref().is_some_and(|r| r.id == id) {
            self.current = None;
        }
        self.forget_next(id);
    }

    /// Drop the planned next image if it was `id`
    pub(crate) fn forget_next(&mut self, id: i64) {
        if self.next.as_ref().is_some_and(|r| r.id == id) {
            self.next = None;
        }
    }

    pub(crate) fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        if phase != Phase::Waiting {
            self.wait_deadline = None;
        }
        if phase == Phase::Idle {
            self.next = None;
        }
    }

    /// Ready to push, waiting for the governor to let the panel refresh
    pub(crate) fn await_panel(&mut self) {
        self.phase = Phase::Waiting;
        self.wait_deadline = None;
    }

    pub(crate) fn start_wait(&mut self, length: Duration, next: Option<ImageRecord>) {
        self.phase = Phase::Waiting;
        self.wait_deadline = Instant::now().checked_add(length);
        self.next = next;
    }

    /// `program` is still active and no shutdown was requested
    pub(crate) fn wants(&self, program: Program) -> bool {
        !self.shutdown && self.program == Some(program)
    }

    /// A program is active but the worker idles with nothing to show
    pub(crate) fn is_starved(&self) -> bool {
        self.program.is_some() && self.phase == Phase::Idle
    }

    pub fn status(&self) -> SchedulerStatus {
        let remaining_seconds = match (self.phase, self.wait_deadline) {
            (Phase::Waiting, Some(deadline)) => {
                let left = deadline.saturating_duration_since(Instant::now());
                Some(left.as_secs_f64().ceil() as u64)
            }
            _ => None,
        };

        SchedulerStatus {
            running: self.is_running(),
            program: self.program,
            phase: self.phase,
            current: self.current.clone(),
            next: self.next.clone(),
            remaining_seconds,
            interval_seconds: self.interval.as_secs(),
            last_refresh_at: self.last_refresh_at,
        }
    }
}
