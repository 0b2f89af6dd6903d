//! Background worker, one per panel
//!
//! Re-reads the active program on every iteration. All waits are on the
//! panel's `Notify` (optionally bounded by a timer), so an idle panel costs
//! nothing and any control operation can cut a wait short.
//!
//! A wake only counts as an interrupt if the state's epoch moved past the
//! one the worker started the cycle with; a permit left over from a change
//! the worker already acted on is ignored.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::selection;
use super::state::{Phase, Program};
use crate::governor::Priority;
use crate::panel::PanelCore;
use crate::render::Bitmap;
use crate::state::data::ImageRecord;

/// How a display attempt ended
enum Attempt {
    Shown,
    /// Nothing could be shown this time; wait one interval and try again
    Skipped,
    /// No active images at all
    Starved,
    /// Something changed before the push
    Interrupted,
}

/// What the worker saw at the top of an iteration
#[derive(Clone, Copy)]
struct Cycle {
    program: Program,
    epoch: u64,
}

pub(crate) async fn run(core: Arc<PanelCore>) {
    let panel = core.label();
    info!(panel, "🚀 Panel worker started");

    let mut rng = StdRng::from_entropy();
    let mut plan: Option<ImageRecord> = None;

    loop {
        let (program, epoch) = {
            let state = core.state();
            if state.shutdown {
                break;
            }
            (state.program, state.epoch)
        };

        match program {
            None => {
                plan = None;
                core.state().enter(Phase::Idle);
                pause(&core, epoch, None).await;
            }
            Some(Program::Slideshow) => {
                let cycle = Cycle { program: Program::Slideshow, epoch };
                slideshow_cycle(&core, cycle, &mut plan, &mut rng).await;
            }
            Some(Program::Stats) => {
                plan = None;
                stats_cycle(&core, Cycle { program: Program::Stats, epoch }).await;
            }
        }
    }

    core.state().enter(Phase::Idle);
    info!(panel, "🛑 Panel worker stopped");
}

/// Wait for `length` (forever if `None` or out of clock range) or for a
/// change newer than `seen`. Returns true if a change cut the wait short.
async fn pause(core: &PanelCore, seen: u64, length: Option<Duration>) -> bool {
    let deadline = length.and_then(|length| Instant::now().checked_add(length));
    loop {
        match deadline {
            Some(deadline) => {
                if tokio::time::timeout_at(deadline, core.wake.notified()).await.is_err() {
                    return false;
                }
            }
            None => core.wake.notified().await,
        }

        let epoch = core.state().epoch;
        if epoch != seen {
            return true;
        }
    }
}

/// Take the flag a control operation leaves after drawing on the panel
fn take_manual_display(core: &PanelCore) -> bool {
    std::mem::take(&mut core.state().manual_display)
}

async fn slideshow_cycle(core: &PanelCore, cycle: Cycle, plan: &mut Option<ImageRecord>, rng: &mut StdRng) {
    let panel = core.label();

    if take_manual_display(core) {
        debug!(panel, "manual display stands in for this cycle");
        *plan = None;
    } else {
        match show_next(core, cycle, plan.take(), rng).await {
            Attempt::Shown | Attempt::Skipped => {}
            Attempt::Interrupted => return,
            Attempt::Starved => {
                if go_idle(core) {
                    info!(panel, "💤 No active images, idling until the library changes");
                    pause(core, cycle.epoch, None).await;
                }
                return;
            }
        }
    }

    *plan = plan_next(core, rng);
    let interval = {
        let mut state = core.state();
        if !state.wants(cycle.program) {
            return;
        }
        let interval = state.interval();
        state.start_wait(interval, plan.clone());
        interval
    };

    if pause(core, cycle.epoch, Some(interval)).await {
        debug!(panel, "⚡ Wait interrupted, selecting again");
        *plan = None;
        core.state().next = None;
    }
}

/// Enter `Idle` for lack of images, then look at the store once more.
///
/// The control surface only wakes a worker it sees idling, so an image
/// activated between the empty listing and the phase change is caught by
/// the second look. Returns false if there is something to show after all.
fn go_idle(core: &PanelCore) -> bool {
    core.state().enter(Phase::Idle);
    match core.store.list(Some(true)) {
        Ok(candidates) => candidates.is_empty(),
        Err(_) => true,
    }
}

/// Choose the image to show after the current one
fn plan_next(core: &PanelCore, rng: &mut StdRng) -> Option<ImageRecord> {
    let current = core.state().current.as_ref().map(|r| r.id);
    match core.store.list(Some(true)) {
        Ok(candidates) => selection::pick(&candidates, current, rng).cloned(),
        Err(e) => {
            warn!(panel = core.label(), error = %e, "⚠️  Could not plan next image");
            None
        }
    }
}

/// Select, load and push one image.
///
/// `planned` is used if it is still active. Records whose file is missing
/// or unreadable are dropped and selection retries among the rest.
async fn show_next(core: &PanelCore, cycle: Cycle, planned: Option<ImageRecord>, rng: &mut StdRng) -> Attempt {
    let panel = core.label();

    let mut candidates = match core.store.list(Some(true)) {
        Ok(candidates) => candidates,
        Err(e) => {
            error!(panel, error = %e, "❌ Could not read image store");
            return Attempt::Skipped;
        }
    };
    if candidates.is_empty() {
        return Attempt::Starved;
    }

    let current = core.state().current.as_ref().map(|r| r.id);
    let mut choice = planned.and_then(|p| candidates.iter().find(|r| r.id == p.id).cloned());

    let (record, bitmap) = loop {
        let record = match choice.take() {
            Some(record) => record,
            None => {
                let picked = selection::pick(&candidates, current, rng).cloned();
                match picked {
                    Some(record) => record,
                    None => {
                        warn!(panel, "⚠️  No displayable image this cycle");
                        return Attempt::Skipped;
                    }
                }
            }
        };

        match core.load(&record).await {
            Ok(bitmap) => break (record, bitmap),
            Err(e) => {
                warn!(panel, id = record.id, file = %record.filename, error = %e, "⚠️  Skipping unreadable image");
                candidates.retain(|r| r.id != record.id);
            }
        }
    };

    push(core, cycle, bitmap, Some(record)).await
}

/// Wait for the governor and push. Gives up if anything changed since the
/// cycle started, whether before or after the governor granted.
async fn push(core: &PanelCore, cycle: Cycle, bitmap: Bitmap, record: Option<ImageRecord>) -> Attempt {
    let panel = core.label();

    let unchanged = |core: &PanelCore| {
        let state = core.state();
        state.wants(cycle.program) && state.epoch == cycle.epoch
    };
    if !unchanged(core) {
        return Attempt::Interrupted;
    }
    core.state().await_panel();

    let permit = tokio::select! {
        permit = core.governor.wait_for(Priority::Automatic) => permit,
        _ = pause(core, cycle.epoch, None) => {
            debug!(panel, "⚡ Interrupted while waiting for the panel");
            return Attempt::Interrupted;
        }
    };

    if !unchanged(core) {
        return Attempt::Interrupted;
    }
    core.state().enter(Phase::Displaying);

    match permit.push(bitmap).await {
        Ok(()) => {
            match &record {
                Some(r) => info!(panel, id = r.id, file = %r.filename, "🖼️  Showing image"),
                None => debug!(panel, program = ?cycle.program, "frame pushed"),
            }
            core.state().record_display(record);
            Attempt::Shown
        }
        Err(e) => {
            error!(panel, error = %e, "❌ Hardware fault, trying again next cycle");
            Attempt::Skipped
        }
    }
}

async fn stats_cycle(core: &PanelCore, cycle: Cycle) {
    let panel = core.label();

    let Some(period) = core.profile.stats_interval else {
        warn!(panel, "⚠️  Stats program without a stats interval, stopping it");
        core.state().stop(Program::Stats);
        return;
    };

    if !take_manual_display(core) {
        match core.render_stats().await {
            Ok(bitmap) => {
                if let Attempt::Interrupted = push(core, cycle, bitmap, None).await {
                    return;
                }
            }
            Err(e) => error!(panel, error = %e, "❌ Could not render stats"),
        }
    }

    {
        let mut state = core.state();
        if !state.wants(Program::Stats) {
            return;
        }
        state.start_wait(period, None);
    }

    pause(core, cycle.epoch, Some(period)).await;
}
