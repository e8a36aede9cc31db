//! PlaybackScheduler: replays the registry's markers on a background thread.
//!
//! # State machine
//!
//! ```text
//!   Idle ──start()──▶ Running ──stop() / run ends──▶ Idle
//! ```
//!
//! "Stop requested" is a flag, not a state.  The worker checks it before
//! every marker (and before every default click when no markers exist), so a
//! stop takes effect once the current click and dwell have finished.
//!
//! # Threads (for beginners)
//!
//! The registry belongs to the UI thread, so the worker never touches it.
//! [`PlaybackScheduler::start`] copies an ordered snapshot of the markers and
//! hands that to the worker.  The worker only talks to two traits:
//!
//! - [`PointerInjector`] moves the cursor and presses buttons.
//! - [`Pacer`] waits between actions.
//!
//! When the worker finishes on its own (a finite loop count, or a fault) it
//! publishes [`PlaybackEvent::Finished`]; the UI thread then calls
//! [`PlaybackScheduler::reap_finished`] to join the worker and release the
//! registry's runtime lock.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use autopoint_core::{ClickKind, MarkerRegistry, MouseButton, PlaybackStep, ScreenPoint};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

// ── Injection seams ───────────────────────────────────────────────────────────

/// A physical mouse button, after `SystemDefault` has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalButton {
    Left,
    Right,
    Middle,
}

/// Error type for synthetic pointer input.
#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("platform error: {0}")]
    Platform(String),
    #[error("pointer injection is not supported on this platform")]
    Unsupported,
}

/// Platform-agnostic synthetic pointer input.
///
/// Each supported OS provides an implementation in the infrastructure layer.
pub trait PointerInjector: Send + Sync {
    /// Moves the cursor to an absolute virtual-desktop position.
    fn move_cursor(&self, position: ScreenPoint) -> Result<(), InjectionError>;

    /// Presses (`pressed == true`) or releases a button at the current position.
    fn button(&self, button: PhysicalButton, pressed: bool) -> Result<(), InjectionError>;

    /// The user's primary button (`Right` when buttons are swapped).
    fn primary_button(&self) -> PhysicalButton;
}

/// Waits between playback actions.
pub trait Pacer: Send + Sync {
    fn pause(&self, duration: Duration);
}

/// [`Pacer`] backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

// ── Settings, events, errors ──────────────────────────────────────────────────

/// Loop and fallback settings for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    /// When `false`, exactly one pass is performed.
    pub looped: bool,
    /// Passes to perform when looping; 0 means until stopped.
    pub loop_count: u32,
    /// Button clicked repeatedly when there are no markers.
    pub default_button: MouseButton,
    pub default_click_kind: ClickKind,
    /// Pause between default clicks when there are no markers.
    pub global_duration: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            looped: true,
            loop_count: 0,
            default_button: MouseButton::SystemDefault,
            default_click_kind: ClickKind::Single,
            global_duration: Duration::from_millis(1000),
        }
    }
}

/// Externally observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Running,
}

/// Result of [`PlaybackScheduler::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A run was already active; nothing changed.
    AlreadyRunning,
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// All requested passes were performed.
    Completed,
    /// `stop()` was requested.
    Stopped,
    /// The run loop failed or panicked.
    Fault(String),
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Completed passes over the marker list.
    pub passes: u32,
    /// Clicks performed (a double click counts once).
    pub actions: u64,
    pub reason: FinishReason,
}

/// Progress notifications published by the worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started,
    PassCompleted(u32),
    Finished(PlaybackReport),
}

/// Error type for playback operations.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("pointer injection failed: {0}")]
    Injection(#[from] InjectionError),
    #[error("playback fault: {0}")]
    Fault(String),
    #[error("failed to spawn playback thread: {0}")]
    Spawn(String),
}

// ── Shared run flags ──────────────────────────────────────────────────────────

/// Flags shared between the scheduler and its worker.
///
/// `running` is the single mutual-exclusion flag: it is set by a
/// compare-and-swap in `start()` and cleared by the worker when it exits.
#[derive(Debug, Default)]
struct RunFlags {
    running: AtomicBool,
    stop: AtomicBool,
}

/// Clears `running` when the worker exits, whatever the exit path.
struct RunningGuard(Arc<RunFlags>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<PlaybackEvent>>>,
}

impl EventBus {
    fn subscribe(&self) -> UnboundedReceiver<PlaybackEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn emit(&self, event: PlaybackEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// Drives at most one background playback run at a time.
pub struct PlaybackScheduler {
    injector: Arc<dyn PointerInjector>,
    pacer: Arc<dyn Pacer>,
    flags: Arc<RunFlags>,
    events: Arc<EventBus>,
    worker: Option<JoinHandle<PlaybackReport>>,
}

impl PlaybackScheduler {
    pub fn new(injector: Arc<dyn PointerInjector>, pacer: Arc<dyn Pacer>) -> Self {
        Self {
            injector,
            pacer,
            flags: Arc::new(RunFlags::default()),
            events: Arc::new(EventBus::default()),
            worker: None,
        }
    }

    /// Returns a receiver for [`PlaybackEvent`]s of every later run.
    pub fn subscribe(&self) -> UnboundedReceiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        if self.flags.running.load(Ordering::SeqCst) {
            PlaybackState::Running
        } else {
            PlaybackState::Idle
        }
    }

    /// Starts a run over the registry's current markers.
    ///
    /// Locks the registry (runtime mode) and copies an ordered snapshot, so
    /// later registry edits do not affect this run.  Returns
    /// [`StartOutcome::AlreadyRunning`] without side effects if a run is active.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::Spawn`] if the worker thread cannot be created; the
    /// runtime lock is released again in that case.
    pub fn start(
        &mut self,
        registry: &mut MarkerRegistry,
        settings: &PlaybackSettings,
    ) -> Result<StartOutcome, PlaybackError> {
        if self
            .flags
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("playback already running; start ignored");
            return Ok(StartOutcome::AlreadyRunning);
        }

        // A previous run that ended by itself but was never reaped.
        if let Some(previous) = self.worker.take() {
            join_worker(previous);
        }

        self.flags.stop.store(false, Ordering::SeqCst);
        registry.set_runtime_mode(true);
        let steps = registry.ordered_snapshot();

        let flags = Arc::clone(&self.flags);
        let events = Arc::clone(&self.events);
        let injector = Arc::clone(&self.injector);
        let pacer = Arc::clone(&self.pacer);
        let settings = settings.clone();
        let marker_count = steps.len();

        let spawned = thread::Builder::new()
            .name("autopoint-playback".to_string())
            .spawn(move || {
                let worker = Worker {
                    steps,
                    settings,
                    injector,
                    pacer,
                    flags,
                    events,
                };
                worker.run()
            });

        match spawned {
            Ok(handle) => {
                info!(markers = marker_count, "playback started");
                self.worker = Some(handle);
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                self.flags.running.store(false, Ordering::SeqCst);
                registry.set_runtime_mode(false);
                error!("failed to spawn playback thread: {e}");
                Err(PlaybackError::Spawn(e.to_string()))
            }
        }
    }

    /// Requests a stop, waits for the worker, and releases the runtime lock.
    ///
    /// Blocks until the worker's current click and dwell complete.  Returns
    /// the run's report, or `None` if nothing was running.
    pub fn stop(&mut self, registry: &mut MarkerRegistry) -> Option<PlaybackReport> {
        self.flags.stop.store(true, Ordering::SeqCst);
        let report = self.worker.take().and_then(join_worker);
        registry.set_runtime_mode(false);
        if let Some(report) = &report {
            info!(passes = report.passes, actions = report.actions, "playback stopped");
        }
        report
    }

    /// Joins a worker that ended on its own and releases the runtime lock.
    ///
    /// Returns `None` while the worker is still running or if there is none.
    pub fn reap_finished(&mut self, registry: &mut MarkerRegistry) -> Option<PlaybackReport> {
        if self.flags.running.load(Ordering::SeqCst) {
            return None;
        }
        let report = self.worker.take().and_then(join_worker)?;
        registry.set_runtime_mode(false);
        Some(report)
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.flags.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            join_worker(handle);
        }
    }
}

fn join_worker(handle: JoinHandle<PlaybackReport>) -> Option<PlaybackReport> {
    match handle.join() {
        Ok(report) => Some(report),
        Err(_) => {
            error!("playback thread terminated abnormally");
            None
        }
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

struct Worker {
    steps: Vec<PlaybackStep>,
    settings: PlaybackSettings,
    injector: Arc<dyn PointerInjector>,
    pacer: Arc<dyn Pacer>,
    flags: Arc<RunFlags>,
    events: Arc<EventBus>,
}

#[derive(Default)]
struct Progress {
    passes: u32,
    actions: u64,
}

impl Worker {
    fn run(self) -> PlaybackReport {
        let guard = RunningGuard(Arc::clone(&self.flags));
        self.events.emit(PlaybackEvent::Started);

        let mut progress = Progress::default();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_loop(&mut progress)));
        let reason = match outcome {
            Ok(Ok(reason)) => reason,
            Ok(Err(e)) => {
                error!("playback fault: {e}");
                FinishReason::Fault(e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("playback panicked: {message}");
                FinishReason::Fault(message)
            }
        };

        let report = PlaybackReport {
            passes: progress.passes,
            actions: progress.actions,
            reason,
        };
        info!(
            passes = report.passes,
            actions = report.actions,
            reason = ?report.reason,
            "playback finished"
        );

        // Observers of `Finished` must already see the scheduler as idle.
        drop(guard);
        self.events.emit(PlaybackEvent::Finished(report.clone()));
        report
    }

    fn run_loop(&self, progress: &mut Progress) -> Result<FinishReason, PlaybackError> {
        if self.steps.is_empty() {
            return self.run_default_clicks(progress);
        }

        loop {
            for step in &self.steps {
                if self.stop_requested() {
                    return Ok(FinishReason::Stopped);
                }
                self.injector.move_cursor(step.position)?;
                self.click(step.button, step.click_kind)?;
                progress.actions += 1;
                self.pacer.pause(step.dwell);
            }

            progress.passes += 1;
            debug!(pass = progress.passes, "playback pass completed");
            self.events.emit(PlaybackEvent::PassCompleted(progress.passes));

            if !self.settings.looped {
                return Ok(FinishReason::Completed);
            }
            if self.settings.loop_count > 0 && progress.passes >= self.settings.loop_count {
                return Ok(FinishReason::Completed);
            }
        }
    }

    /// Clicks at the current cursor position until stopped.
    fn run_default_clicks(&self, progress: &mut Progress) -> Result<FinishReason, PlaybackError> {
        warn!("no markers; clicking at the cursor until stopped");
        loop {
            if self.stop_requested() {
                return Ok(FinishReason::Stopped);
            }
            self.click(self.settings.default_button, self.settings.default_click_kind)?;
            progress.actions += 1;
            self.pacer.pause(self.settings.global_duration);
        }
    }

    fn click(&self, button: MouseButton, kind: ClickKind) -> Result<(), PlaybackError> {
        let physical = self.resolve(button);
        for _ in 0..kind.repetitions() {
            self.injector.button(physical, true)?;
            self.injector.button(physical, false)?;
        }
        Ok(())
    }

    fn resolve(&self, button: MouseButton) -> PhysicalButton {
        match button {
            MouseButton::Left => PhysicalButton::Left,
            MouseButton::Right => PhysicalButton::Right,
            MouseButton::Middle => PhysicalButton::Middle,
            MouseButton::SystemDefault => self.injector.primary_button(),
        }
    }

    fn stop_requested(&self) -> bool {
        self.flags.stop.load(Ordering::SeqCst)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
