//! Per-panel control surface
//!
//! A `Panel` bundles everything one physical display needs: its profile,
//! image store, refresh governor (which owns the hardware gateway), the
//! scheduler state and the background worker. E-paper and HDMI are two
//! instances of the same type with different profiles.
//!
//! Every method is safe to call from any task. `Panel` is cheap to clone.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{FrameError, FrameResult};
use crate::governor::{Floors, Priority, RefreshGovernor};
use crate::hardware::HardwareGateway;
use crate::render::{decode_and_normalize, load_bitmap, render_stats_panel, render_text_panel, Bitmap, ColorMode, PanelSize};
use crate::scheduler::{self, Program, SchedulerState, SchedulerStatus};
use crate::state::data::{ImageRecord, ImageUpdate};
use crate::state::library::{ImageStore, ReconcileReport, PENDING_PREFIX};
use crate::sysinfo::SystemProbe;

/// Which physical display a profile describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelKind {
    Epaper,
    Hdmi,
}

impl PanelKind {
    pub fn label(&self) -> &'static str {
        match self {
            PanelKind::Epaper => "epaper",
            PanelKind::Hdmi => "hdmi",
        }
    }

    /// Table in the shared database
    pub fn table(&self) -> &'static str {
        match self {
            PanelKind::Epaper => "epaper_images",
            PanelKind::Hdmi => "hdmi_images",
        }
    }

    /// Stored files are named `<prefix>_<id>.png`
    pub fn file_prefix(&self) -> &'static str {
        match self {
            PanelKind::Epaper => "epd",
            PanelKind::Hdmi => "hdmi",
        }
    }
}

/// Static description of a panel
#[derive(Debug, Clone)]
pub struct PanelProfile {
    pub kind: PanelKind,
    pub size: PanelSize,
    pub mode: ColorMode,
    /// Slideshow interval at startup
    pub interval: Duration,
    /// Smallest interval `set_interval` accepts
    pub interval_floor: Duration,
    pub floors: Floors,
    /// Stats refresh period; `None` disables the stats program
    pub stats_interval: Option<Duration>,
    /// Prefix of the public URL of stored files
    pub base_url: String,
    pub media_dir: PathBuf,
    /// Push new uploads to the panel right away
    pub show_on_upload: bool,
    /// Start the slideshow when the daemon starts
    pub autostart: bool,
}

impl PanelProfile {
    /// 7.5" 800x480 two-level e-paper
    pub fn epaper(media_root: &Path) -> Self {
        Self {
            kind: PanelKind::Epaper,
            size: PanelSize::new(800, 480),
            mode: ColorMode::Mono,
            interval: Duration::from_secs(600),
            interval_floor: Duration::from_secs(60),
            floors: Floors {
                manual: Duration::from_secs(15),
                automatic: Duration::from_secs(60),
            },
            stats_interval: None,
            base_url: "http://192.168.0.194/images/epaper/".to_string(),
            media_dir: media_root.join("epaper"),
            show_on_upload: false,
            autostart: false,
        }
    }

    /// 1024x600 HDMI screen
    pub fn hdmi(media_root: &Path) -> Self {
        Self {
            kind: PanelKind::Hdmi,
            size: PanelSize::new(1024, 600),
            mode: ColorMode::Rgb,
            interval: Duration::from_secs(10),
            interval_floor: Duration::from_secs(1),
            floors: Floors::NONE,
            stats_interval: Some(Duration::from_secs(5)),
            base_url: "http://192.168.0.194/images/".to_string(),
            media_dir: media_root.join("hdmi"),
            show_on_upload: true,
            autostart: false,
        }
    }

    pub fn label(&self) -> &'static str {
        self.kind.label()
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, Serialize)]
pub struct Uploaded {
    pub record: ImageRecord,
    /// Whether the new image went straight to the panel
    pub displayed: bool,
}

pub(crate) struct PanelCore {
    pub(crate) profile: PanelProfile,
    pub(crate) store: ImageStore,
    pub(crate) governor: RefreshGovernor,
    probe: Arc<dyn SystemProbe>,
    state: Mutex<SchedulerState>,
    /// Single-slot interrupt for the worker; repeated wakes collapse into one
    pub(crate) wake: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PanelCore {
    pub(crate) fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn label(&self) -> &'static str {
        self.profile.label()
    }

    pub(crate) fn media_path(&self, filename: &str) -> PathBuf {
        self.profile.media_dir.join(filename)
    }

    /// Read a stored image back at panel resolution
    pub(crate) async fn load(&self, record: &ImageRecord) -> FrameResult<Bitmap> {
        let path = self.media_path(&record.filename);
        let (size, mode) = (self.profile.size, self.profile.mode);
        tokio::task::spawn_blocking(move || load_bitmap(&path, size, mode)).await?
    }

    /// Take a system snapshot and draw it
    pub(crate) async fn render_stats(&self) -> FrameResult<Bitmap> {
        let probe = Arc::clone(&self.probe);
        let (size, mode) = (self.profile.size, self.profile.mode);
        let bitmap = tokio::task::spawn_blocking(move || render_stats_panel(&probe.snapshot(), size, mode)).await?;
        Ok(bitmap)
    }
}

#[derive(Clone)]
pub struct Panel {
    core: Arc<PanelCore>,
}

impl Panel {
    pub fn new(profile: PanelProfile, store: ImageStore, gateway: HardwareGateway, probe: Arc<dyn SystemProbe>) -> Self {
        let state = SchedulerState::new(profile.interval, profile.interval_floor);
        let governor = RefreshGovernor::new(gateway, profile.floors);

        Self {
            core: Arc::new(PanelCore {
                profile,
                store,
                governor,
                probe,
                state: Mutex::new(state),
                wake: Notify::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn label(&self) -> &'static str {
        self.core.label()
    }

    pub fn profile(&self) -> &PanelProfile {
        &self.core.profile
    }

    pub fn store(&self) -> &ImageStore {
        &self.core.store
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &PanelCore {
        &self.core
    }

    pub fn is_hardware_present(&self) -> bool {
        self.core.governor.gateway().is_present()
    }

    /// Start the background worker. Must be called from within a tokio runtime.
    pub fn spawn_worker(&self) {
        let mut worker = self.core.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            warn!(panel = self.label(), "⚠️  Worker already running");
            return;
        }
        *worker = Some(tokio::spawn(scheduler::run(Arc::clone(&self.core))));
    }

    /// Stop the worker and wait for it. A push in flight completes first.
    pub async fn shutdown(&self) {
        {
            let mut state = self.core.state();
            state.shutdown = true;
            state.touch();
        }
        self.interrupt();

        let handle = self.core.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(panel = self.label(), error = %e, "⚠️  Worker ended abnormally");
            }
        }
    }

    /// Wake the controller once at startup
    pub async fn initialize(&self) -> FrameResult<()> {
        self.core.governor.exclusive().await.initialize().await?;
        Ok(())
    }

    /// Fix up the store after a restart; run before accepting uploads
    pub fn reconcile(&self) -> FrameResult<ReconcileReport> {
        Ok(self.core.store.reconcile(&self.core.profile.media_dir)?)
    }

    /// Wake the worker after a change to the scheduler state
    fn interrupt(&self) {
        self.core.wake.notify_one();
    }

    /// Wake a worker that idles for lack of active images
    fn wake_if_starved(&self) {
        let starved = {
            let mut state = self.core.state();
            let starved = state.is_starved();
            if starved {
                state.touch();
            }
            starved
        };
        if starved {
            debug!(panel = self.label(), "library changed, waking idle worker");
            self.interrupt();
        }
    }

    fn start_program(&self, program: Program) {
        let changed = self.core.state().start(program);
        if changed {
            info!(panel = self.label(), ?program, "▶️  Program started");
            self.interrupt();
        }
    }

    fn stop_program(&self, program: Program) {
        let changed = self.core.state().stop(program);
        if changed {
            info!(panel = self.label(), ?program, "⏹️  Program stopped");
            self.interrupt();
        }
    }

    fn require_stats(&self) -> FrameResult<()> {
        match self.core.profile.stats_interval {
            Some(_) => Ok(()),
            None => Err(FrameError::Unsupported("stats")),
        }
    }

    pub fn start_slideshow(&self) {
        self.start_program(Program::Slideshow);
    }

    pub fn stop_slideshow(&self) {
        self.stop_program(Program::Slideshow);
    }

    /// Replace the active program with the stats dashboard
    pub fn start_stats(&self) -> FrameResult<()> {
        self.require_stats()?;
        self.start_program(Program::Stats);
        Ok(())
    }

    pub fn stop_stats(&self) -> FrameResult<()> {
        self.require_stats()?;
        self.stop_program(Program::Stats);
        Ok(())
    }

    /// Change the slideshow interval and cut the current wait short
    pub fn set_interval(&self, seconds: u64) -> FrameResult<Duration> {
        let interval = self.core.state().set_interval(seconds)?;
        info!(panel = self.label(), seconds, "⏱️  Interval changed");
        self.interrupt();
        Ok(interval)
    }

    pub fn status(&self) -> SchedulerStatus {
        self.core.state().status()
    }

    /// Something was drawn on request
    fn displayed(&self, record: Option<ImageRecord>) {
        let running = self.core.state().record_manual_display(record);
        if running {
            self.interrupt();
        }
    }

    /// Show a stored image now
    pub async fn show_now(&self, id: i64) -> FrameResult<ImageRecord> {
        let record = self.core.store.get(id)?.ok_or(FrameError::NotFound(id))?;
        let permit = self.core.governor.request(Priority::Manual).await?;
        let bitmap = self.core.load(&record).await?;
        permit.push(bitmap).await?;

        info!(panel = self.label(), id, file = %record.filename, "👆 Showing image on request");
        self.displayed(Some(record.clone()));
        Ok(record)
    }

    /// Show a title and wrapped body text
    pub async fn show_text(&self, title: &str, body: &str) -> FrameResult<()> {
        let permit = self.core.governor.request(Priority::Manual).await?;
        let (title, body) = (title.to_string(), body.to_string());
        let (size, mode) = (self.core.profile.size, self.core.profile.mode);
        let bitmap = tokio::task::spawn_blocking(move || render_text_panel(&title, &body, size, mode)).await?;
        permit.push(bitmap).await?;

        info!(panel = self.label(), "📝 Showing text");
        self.displayed(None);
        Ok(())
    }

    /// Draw the stats dashboard once
    pub async fn show_stats(&self) -> FrameResult<()> {
        self.require_stats()?;
        let permit = self.core.governor.request(Priority::Manual).await?;
        let bitmap = self.core.render_stats().await?;
        permit.push(bitmap).await?;

        info!(panel = self.label(), "📊 Showing stats");
        self.displayed(None);
        Ok(())
    }

    /// Blank the panel, bypassing the rate limit
    pub async fn clear_panel(&self) -> FrameResult<()> {
        self.core.governor.exclusive().await.clear().await?;
        self.core.state().record_display(None);
        info!(panel = self.label(), "🧹 Panel cleared");
        Ok(())
    }

    /// All images, newest first
    pub fn images(&self) -> FrameResult<Vec<ImageRecord>> {
        Ok(self.core.store.list(None)?)
    }

    /// Take an image in or out of the rotation
    pub fn set_active(&self, id: i64, active: bool) -> FrameResult<ImageRecord> {
        let record = self
            .core
            .store
            .update(id, &ImageUpdate::active(active))?
            .ok_or(FrameError::NotFound(id))?;

        if active {
            self.wake_if_starved();
        } else {
            self.core.state().forget_next(id);
        }
        Ok(record)
    }

    /// Remove an image's file and record
    pub fn delete_image(&self, id: i64) -> FrameResult<()> {
        let record = self.core.store.get(id)?.ok_or(FrameError::NotFound(id))?;

        match std::fs::remove_file(self.core.media_path(&record.filename)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.core.store.delete(id)?;
        self.core.state().forget(id);

        info!(panel = self.label(), id, file = %record.filename, "🗑️  Image deleted");
        Ok(())
    }

    /// Store a new image, normalized to the panel.
    ///
    /// The record is created first, inactive, to get an id for the filename;
    /// it joins the rotation once its file is written. Any failure after
    /// that removes it again along with a partial file.
    pub async fn upload(&self, bytes: Vec<u8>) -> FrameResult<Uploaded> {
        let placeholder = format!("{PENDING_PREFIX}{:016x}", rand::random::<u64>());
        let pending = self.core.store.create(&placeholder, "", false)?;

        let (record, bitmap) = match self.store_upload(pending.id, bytes).await {
            Ok(stored) => stored,
            Err(e) => {
                self.rollback_upload(pending.id);
                warn!(panel = self.label(), error = %e, "❌ Upload rejected");
                return Err(e);
            }
        };
        info!(panel = self.label(), id = record.id, file = %record.filename, "📸 Image uploaded");

        let displayed = self.core.profile.show_on_upload && self.show_uploaded(&record, bitmap).await;
        if !displayed {
            self.wake_if_starved();
        }

        Ok(Uploaded { record, displayed })
    }

    fn upload_filename(&self, id: i64) -> String {
        format!("{}_{}.png", self.core.profile.kind.file_prefix(), id)
    }

    async fn store_upload(&self, id: i64, bytes: Vec<u8>) -> FrameResult<(ImageRecord, Bitmap)> {
        let filename = self.upload_filename(id);
        let path = self.core.media_path(&filename);
        let (size, mode) = (self.core.profile.size, self.core.profile.mode);

        let bitmap = tokio::task::spawn_blocking(move || -> FrameResult<Bitmap> {
            let bitmap = decode_and_normalize(&bytes, size, mode)?;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            bitmap.save(&path)?;
            Ok(bitmap)
        })
        .await??;

        let update = ImageUpdate {
            url: Some(format!("{}{}", self.core.profile.base_url, filename)),
            filename: Some(filename),
            active: Some(true),
        };
        let record = self.core.store.update(id, &update)?.ok_or(FrameError::NotFound(id))?;
        Ok((record, bitmap))
    }

    fn rollback_upload(&self, id: i64) {
        if let Err(e) = self.core.store.delete(id) {
            warn!(panel = self.label(), id, error = %e, "⚠️  Could not roll back upload record");
        }
        let path = self.core.media_path(&self.upload_filename(id));
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(panel = self.label(), file = %path.display(), error = %e, "⚠️  Could not remove partial upload");
            }
        }
    }

    /// Push a fresh upload. Being rate limited here is not an upload failure.
    async fn show_uploaded(&self, record: &ImageRecord, bitmap: Bitmap) -> bool {
        let permit = match self.core.governor.request(Priority::Manual).await {
            Ok(permit) => permit,
            Err(e) => {
                info!(panel = self.label(), id = record.id, error = %e, "⏳ Upload stored, not shown");
                return false;
            }
        };

        match permit.push(bitmap).await {
            Ok(()) => {
                self.displayed(Some(record.clone()));
                true
            }
            Err(e) => {
                warn!(panel = self.label(), id = record.id, error = %e, "⚠️  Upload stored, display failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for Panel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Panel")
            .field("profile", &self.core.profile)
            .field("store", &self.core.store)
            .field("governor", &self.core.governor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{FrameJournal, SimulatedPanel};
    use crate::scheduler::Phase;
    use crate::sysinfo::SystemSnapshot;
    use chrono::Local;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::collections::HashSet;
    use std::io::Cursor;
    use tempfile::TempDir;

    struct FixedProbe;

    impl SystemProbe for FixedProbe {
        fn snapshot(&self) -> SystemSnapshot {
            SystemSnapshot {
                cpu_pct: 12.0,
                ram_pct: 40.0,
                disk_pct: 70.0,
                temperature_c: Some(45.1),
                ip: None,
                now: Local::now(),
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        panel: Panel,
        journal: FrameJournal,
    }

    fn fixture(kind: PanelKind, tweak: impl FnOnce(&mut PanelProfile)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut profile = match kind {
            PanelKind::Epaper => PanelProfile::epaper(dir.path()),
            PanelKind::Hdmi => PanelProfile::hdmi(dir.path()),
        };
        // small frames keep the tests quick
        profile.size = PanelSize::new(64, 40);
        tweak(&mut profile);

        let store = ImageStore::open(dir.path().join("frame.db"), kind.table()).unwrap();
        let sim = SimulatedPanel::new(kind.label());
        let journal = sim.journal();
        let gateway = HardwareGateway::simulated(sim, profile.size);
        let panel = Panel::new(profile, store, gateway, Arc::new(FixedProbe));

        Fixture { _dir: dir, panel, journal }
    }

    /// HDMI-like panel with a 1s slideshow and nothing shown on upload
    fn fast_slideshow() -> Fixture {
        fixture(PanelKind::Hdmi, |p| {
            p.interval = Duration::from_secs(1);
            p.show_on_upload = false;
        })
    }

    fn png(color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(32, 20, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn fingerprint(panel: &Panel, record: &ImageRecord) -> u64 {
        let path = panel.core.media_path(&record.filename);
        load_bitmap(&path, panel.profile().size, panel.profile().mode).unwrap().fingerprint()
    }

    #[tokio::test]
    async fn test_upload_round_trip() {
        let fx = fixture(PanelKind::Epaper, |_| {});
        let uploaded = fx.panel.upload(png([200, 30, 30])).await.unwrap();
        let record = uploaded.record;

        assert_eq!(record.filename, format!("epd_{}.png", record.id));
        assert_eq!(record.url, format!("http://192.168.0.194/images/epaper/epd_{}.png", record.id));
        assert!(record.active);
        assert!(!uploaded.displayed);

        let stored = image::open(fx.panel.core.media_path(&record.filename)).unwrap();
        assert_eq!((stored.width(), stored.height()), (64, 40));

        let listed = fx.panel.images().unwrap();
        assert_eq!(listed, vec![record]);
        assert_eq!(fx.journal.pushes(), 0);
    }

    #[tokio::test]
    async fn test_hdmi_upload_is_shown() {
        let fx = fixture(PanelKind::Hdmi, |_| {});
        let uploaded = fx.panel.upload(png([10, 200, 30])).await.unwrap();

        assert!(uploaded.displayed);
        assert_eq!(fx.journal.pushed_fingerprints(), vec![fingerprint(&fx.panel, &uploaded.record)]);
        assert_eq!(fx.panel.status().current.map(|r| r.id), Some(uploaded.record.id));
    }

    #[tokio::test]
    async fn test_bad_upload_is_rolled_back() {
        let fx = fixture(PanelKind::Epaper, |_| {});
        let err = fx.panel.upload(b"not an image".to_vec()).await.unwrap_err();

        assert!(matches!(err, FrameError::Processing(_)));
        assert!(fx.panel.images().unwrap().is_empty());
        let media = &fx.panel.profile().media_dir;
        assert!(!media.exists() || std::fs::read_dir(media).unwrap().next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_now_not_found() {
        let fx = fixture(PanelKind::Epaper, |_| {});
        let err = fx.panel.show_now(42).await.unwrap_err();
        assert!(matches!(err, FrameError::NotFound(42)));
        assert_eq!(fx.journal.pushes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_floor() {
        let fx = fixture(PanelKind::Epaper, |_| {});
        let record = fx.panel.upload(png([0, 0, 0])).await.unwrap().record;

        fx.panel.show_now(record.id).await.unwrap();
        let first = fx.panel.status().last_refresh_at.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        let err = fx.panel.show_now(record.id).await.unwrap_err();
        let remaining = err.retry_after().unwrap();
        assert!(remaining > Duration::ZERO && remaining <= Duration::from_secs(10));
        assert!(matches!(
            fx.panel.show_text("hi", "there").await.unwrap_err(),
            FrameError::RateLimited { .. }
        ));
        assert_eq!(fx.journal.pushes(), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        fx.panel.show_now(record.id).await.unwrap();
        assert_eq!(fx.journal.pushes(), 2);
        assert!(fx.panel.status().last_refresh_at.unwrap() >= first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_bypasses_floor() {
        let fx = fixture(PanelKind::Epaper, |_| {});
        fx.panel.show_text("Hello", "world").await.unwrap();
        fx.panel.clear_panel().await.unwrap();

        assert_eq!(fx.journal.events().len(), 2);
        assert!(fx.panel.status().current.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slideshow_rotates_active_images_without_repeats() {
        let fx = fast_slideshow();
        let a = fx.panel.upload(png([255, 0, 0])).await.unwrap().record;
        let b = fx.panel.upload(png([0, 255, 0])).await.unwrap().record;
        let c = fx.panel.upload(png([0, 0, 255])).await.unwrap().record;
        fx.panel.set_active(c.id, false).unwrap();

        fx.panel.start_slideshow();
        fx.panel.spawn_worker();
        tokio::time::sleep(Duration::from_secs(5)).await;
        fx.panel.shutdown().await;

        let allowed: HashSet<u64> = [fingerprint(&fx.panel, &a), fingerprint(&fx.panel, &b)].into();
        let pushed = fx.journal.pushed_fingerprints();

        assert!(pushed.len() >= 4, "only {} pushes", pushed.len());
        assert!(pushed.iter().all(|f| allowed.contains(f)));
        assert!(!pushed.contains(&fingerprint(&fx.panel, &c)));
        assert!(pushed.windows(2).all(|w| w[0] != w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_active_image_is_reselected() {
        let fx = fast_slideshow();
        let a = fx.panel.upload(png([9, 9, 9])).await.unwrap().record;

        fx.panel.start_slideshow();
        fx.panel.spawn_worker();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        fx.panel.shutdown().await;

        let pushed = fx.journal.pushed_fingerprints();
        assert!(pushed.len() >= 3);
        assert!(pushed.iter().all(|&f| f == fingerprint(&fx.panel, &a)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_active_images_idles() {
        let fx = fast_slideshow();
        fx.panel.start_slideshow();
        fx.panel.spawn_worker();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let status = fx.panel.status();
        assert!(status.running);
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(fx.journal.pushes(), 0);

        // a new image wakes the idle worker
        fx.panel.upload(png([1, 2, 3])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fx.journal.pushes() >= 1);
        fx.panel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_interrupts_wait() {
        let fx = fixture(PanelKind::Hdmi, |p| {
            p.interval = Duration::from_secs(600);
            p.show_on_upload = false;
        });
        fx.panel.upload(png([255, 255, 0])).await.unwrap();
        fx.panel.upload(png([0, 255, 255])).await.unwrap();

        fx.panel.start_slideshow();
        fx.panel.spawn_worker();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fx.journal.pushes(), 1);
        assert_eq!(fx.panel.status().phase, Phase::Waiting);

        fx.panel.set_interval(2).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.journal.pushes(), 2);
        assert_eq!(fx.panel.status().interval_seconds, 2);

        fx.panel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_below_floor_rejected() {
        let fx = fixture(PanelKind::Epaper, |_| {});
        let err = fx.panel.set_interval(59).unwrap_err();
        assert!(matches!(err, FrameError::IntervalTooShort { requested: 59, floor: 60 }));
        assert_eq!(fx.panel.status().interval_seconds, 600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleting_current_image() {
        let fx = fast_slideshow();
        let a = fx.panel.upload(png([255, 0, 0])).await.unwrap().record;
        let b = fx.panel.upload(png([0, 0, 255])).await.unwrap().record;
        let fb = fingerprint(&fx.panel, &b);

        fx.panel.start_slideshow();
        fx.panel.spawn_worker();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let current = fx.panel.status().current.unwrap();
        let (gone, kept) = if current.id == a.id { (a, fb) } else { (b, fingerprint(&fx.panel, &a)) };
        fx.panel.delete_image(gone.id).unwrap();
        assert!(fx.panel.status().current.is_none());
        let before = fx.journal.pushes();

        tokio::time::sleep(Duration::from_secs(3)).await;
        let status = fx.panel.status();
        assert!(status.running);
        assert_ne!(status.next.map(|r| r.id), Some(gone.id));

        let after = fx.journal.pushed_fingerprints();
        assert!(after.len() > before);
        assert!(after[before..].iter().all(|&f| f == kept));
        fx.panel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_file_is_skipped() {
        let fx = fast_slideshow();
        let a = fx.panel.upload(png([255, 0, 0])).await.unwrap().record;
        let b = fx.panel.upload(png([0, 0, 255])).await.unwrap().record;
        std::fs::remove_file(fx.panel.core.media_path(&a.filename)).unwrap();

        fx.panel.start_slideshow();
        fx.panel.spawn_worker();
        tokio::time::sleep(Duration::from_secs(3)).await;
        fx.panel.shutdown().await;

        let pushed = fx.journal.pushed_fingerprints();
        assert!(!pushed.is_empty());
        assert!(pushed.iter().all(|&f| f == fingerprint(&fx.panel, &b)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hardware_fault_does_not_stop_worker() {
        let fx = fast_slideshow();
        fx.panel.upload(png([255, 0, 0])).await.unwrap();
        fx.panel.upload(png([0, 0, 255])).await.unwrap();
        fx.journal.fail_next_pushes(2);

        fx.panel.start_slideshow();
        fx.panel.spawn_worker();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(fx.journal.pushes() >= 1);
        assert!(fx.panel.status().running);
        fx.panel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_returns_to_idle() {
        let fx = fast_slideshow();
        fx.panel.upload(png([255, 0, 0])).await.unwrap();

        fx.panel.start_slideshow();
        fx.panel.spawn_worker();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        fx.panel.stop_slideshow();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let pushes = fx.journal.pushes();
        assert_eq!(fx.panel.status().phase, Phase::Idle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fx.journal.pushes(), pushes);
        fx.panel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hdmi_programs_are_exclusive() {
        let fx = fast_slideshow();
        let a = fx.panel.upload(png([255, 0, 0])).await.unwrap().record;
        let image = fingerprint(&fx.panel, &a);

        fx.panel.start_stats().unwrap();
        fx.panel.spawn_worker();
        tokio::time::sleep(Duration::from_secs(11)).await;

        let status = fx.panel.status();
        assert!(!status.running);
        assert_eq!(status.program, Some(Program::Stats));
        let stats_pushes = fx.journal.pushed_fingerprints();
        assert!(stats_pushes.len() >= 2);
        assert!(!stats_pushes.contains(&image));

        // the slideshow replaces stats; stopping stats afterwards is a no-op
        fx.panel.start_slideshow();
        fx.panel.stop_stats().unwrap();
        assert_eq!(fx.panel.status().program, Some(Program::Slideshow));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.journal.pushed_fingerprints().last(), Some(&image));
        fx.panel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_epaper_has_no_stats() {
        let fx = fixture(PanelKind::Epaper, |_| {});
        assert!(matches!(fx.panel.start_stats(), Err(FrameError::Unsupported(_))));
        assert!(matches!(fx.panel.show_stats().await, Err(FrameError::Unsupported(_))));
        assert_eq!(fx.panel.status().program, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_show_holds_for_an_interval() {
        let fx = fixture(PanelKind::Hdmi, |p| {
            p.interval = Duration::from_secs(10);
            p.show_on_upload = false;
        });
        fx.panel.upload(png([255, 0, 0])).await.unwrap();
        let b = fx.panel.upload(png([0, 0, 255])).await.unwrap().record;

        fx.panel.start_slideshow();
        fx.panel.spawn_worker();
        tokio::time::sleep(Duration::from_secs(2)).await;

        fx.panel.show_now(b.id).await.unwrap();
        let pushes = fx.journal.pushes();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(fx.journal.pushes(), pushes);
        assert_eq!(fx.panel.status().current.map(|r| r.id), Some(b.id));
        fx.panel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_drops_pending_records() {
        let fx = fixture(PanelKind::Epaper, |_| {});
        fx.panel.store().create("pending-abc", "", true).unwrap();
        let kept = fx.panel.upload(png([5, 5, 5])).await.unwrap().record;

        let report = fx.panel.reconcile().unwrap();
        assert_eq!(report.pending_removed, 1);
        assert_eq!(fx.panel.images().unwrap(), vec![kept]);
    }

    #[tokio::test]
    async fn test_pending_upload_never_enters_rotation() {
        let fx = fast_slideshow();
        fx.panel.upload(png([10, 10, 10])).await.unwrap();
        fx.panel.start_slideshow();
        fx.panel.spawn_worker();

        let upload = tokio::spawn({
            let panel = fx.panel.clone();
            async move { panel.upload(png([250, 250, 250])).await }
        });

        while !upload.is_finished() {
            for record in fx.panel.store().list(Some(true)).unwrap() {
                assert!(!record.filename.starts_with(PENDING_PREFIX));
            }
            if let Some(next) = fx.panel.status().next {
                assert!(!next.filename.starts_with(PENDING_PREFIX));
            }
            tokio::task::yield_now().await;
        }

        let stored = upload.await.unwrap().unwrap().record;
        assert!(stored.active);
        assert_eq!(fx.panel.store().list(Some(true)).unwrap().len(), 2);
        fx.panel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_interval_keeps_worker_alive() {
        let fx = fast_slideshow();
        fx.panel.upload(png([255, 0, 0])).await.unwrap();
        fx.panel.upload(png([0, 255, 0])).await.unwrap();

        fx.panel.start_slideshow();
        fx.panel.spawn_worker();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let err = fx.panel.set_interval(u64::MAX).unwrap_err();
        assert!(matches!(err, FrameError::IntervalTooLong { .. }));
        fx.panel.set_interval(1).unwrap();

        let before = fx.journal.pushes();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(fx.journal.pushes() > before);
        fx.panel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_governor_wait_reports_waiting() {
        let fx = fixture(PanelKind::Epaper, |_| {});
        let a = fx.panel.upload(png([0, 0, 0])).await.unwrap().record;
        fx.panel.upload(png([255, 255, 255])).await.unwrap();

        fx.panel.show_now(a.id).await.unwrap();
        fx.panel.start_slideshow();
        fx.panel.spawn_worker();
        tokio::time::sleep(Duration::from_secs(1)).await;

        // the worker holds its frame until the 60s automatic floor passes
        let status = fx.panel.status();
        assert_eq!(status.phase, Phase::Waiting);
        assert_eq!(status.remaining_seconds, None);
        assert_eq!(fx.journal.pushes(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fx.journal.pushes(), 2);
        fx.panel.shutdown().await;
    }
}
