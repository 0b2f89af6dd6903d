//! Slideshow scheduling and display arbitration
//!
//! This module decides what a panel shows and when:
//! - Program, phase and interval bookkeeping (state.rs)
//! - Which image comes next (selection.rs)
//! - The per-panel background loop (worker.rs)

pub mod selection;
pub mod state;
mod worker;

pub use state::{Phase, Program, SchedulerState, SchedulerStatus};
pub(crate) use worker::run;
