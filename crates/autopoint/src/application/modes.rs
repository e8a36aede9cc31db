//! Interaction modes: Normal, Add, Remove, Running.
//!
//! Input arrives on the OS hook threads, but the registry may only be changed
//! on the UI thread.  This module splits the work in two:
//!
//! - [`HookBridge`] runs inside hook callbacks.  It reads the current mode and
//!   the shared [`PositionSnapshot`], decides synchronously whether a click is
//!   consumed, and enqueues a [`UiCommand`].  It never blocks.
//! - [`ModeController`] runs on the UI thread.  It owns the mode transitions
//!   and applies each command to the [`MarkerRegistry`] and
//!   [`PlaybackScheduler`].
//!
//! ```text
//!  hook thread                         UI thread
//!  ───────────                         ─────────
//!  HookBridge::on_click ──UiCommand──▶ ModeController::apply ──▶ MarkerRegistry
//!                       (unbounded)                          └─▶ PlaybackScheduler
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use autopoint_core::{
    MarkerImage, MarkerRegistry, MouseButton, PositionSnapshot, RegistryError, ScreenPoint,
};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::hotkey::HotkeyTracker;
use super::playback::{PlaybackError, PlaybackScheduler, PlaybackSettings, StartOutcome};

/// Pointer moves smaller than this on both axes are ignored.
const MOVE_JITTER_PX: u32 = 2;

/// Current interaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InteractionMode {
    Normal = 0,
    /// Clicks create markers.
    Add = 1,
    /// Clicks on a marker remove it.
    Remove = 2,
    /// Playback is active.
    Running = 3,
}

impl InteractionMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => InteractionMode::Add,
            2 => InteractionMode::Remove,
            3 => InteractionMode::Running,
            _ => InteractionMode::Normal,
        }
    }
}

/// Mode shared between the hook threads (read) and the UI thread (write).
#[derive(Debug, Clone, Default)]
pub struct SharedMode(Arc<AtomicU8>);

impl SharedMode {
    pub fn get(&self) -> InteractionMode {
        InteractionMode::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, mode: InteractionMode) {
        self.0.store(mode as u8, Ordering::Release);
    }
}

/// Work queued for the UI thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    /// Create a marker at the click position (Add mode).
    AddPoint(ScreenPoint),
    /// Remove the marker under the click (Remove mode).
    RemoveNearest(ScreenPoint),
    /// Update hover state for the new pointer position.
    PointerMoved(ScreenPoint),
    /// Start playback if idle, stop it if running.
    TogglePlayback,
    /// Enter a mode; entering the active mode returns to Normal.
    EnterMode(InteractionMode),
    /// Remove every marker and return to Normal.
    Clear,
}

/// Distances used for hit-testing markers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InteractionSettings {
    pub remove_radius: f64,
    pub hover_radius: f64,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            remove_radius: 15.0,
            hover_radius: 15.0,
        }
    }
}

// ── Hook side ─────────────────────────────────────────────────────────────────

/// Hook-thread half of the mode dispatcher.
///
/// Every method returns quickly: it reads atomics, takes uncontended locks,
/// and pushes onto an unbounded channel.
pub struct HookBridge {
    mode: SharedMode,
    positions: PositionSnapshot,
    commands: UnboundedSender<UiCommand>,
    remove_radius: f64,
    last_move: Mutex<Option<ScreenPoint>>,
    hotkey: Mutex<HotkeyTracker>,
}

impl HookBridge {
    pub fn new(
        mode: SharedMode,
        positions: PositionSnapshot,
        commands: UnboundedSender<UiCommand>,
        settings: InteractionSettings,
        hotkey: HotkeyTracker,
    ) -> Self {
        Self {
            mode,
            positions,
            commands,
            remove_radius: settings.remove_radius,
            last_move: Mutex::new(None),
            hotkey: Mutex::new(hotkey),
        }
    }

    /// Handles a button-down.  Returns `true` if the click must be consumed.
    pub fn on_click(&self, button: MouseButton, position: ScreenPoint) -> bool {
        if button != MouseButton::Left {
            return false;
        }
        let command = match self.mode.get() {
            InteractionMode::Add => UiCommand::AddPoint(position),
            InteractionMode::Remove => {
                if self
                    .positions
                    .nearest_within(position, self.remove_radius)
                    .is_none()
                {
                    return false;
                }
                UiCommand::RemoveNearest(position)
            }
            InteractionMode::Normal | InteractionMode::Running => return false,
        };
        self.send(command)
    }

    /// Handles a pointer move.  Moves are dropped in Add and Running mode and
    /// when within the jitter threshold of the last forwarded position.
    pub fn on_move(&self, position: ScreenPoint) {
        if matches!(
            self.mode.get(),
            InteractionMode::Add | InteractionMode::Running
        ) {
            return;
        }
        {
            let mut last = self.last_move.lock().unwrap_or_else(PoisonError::into_inner);
            if last.is_some_and(|prev| prev.is_within_jitter(position, MOVE_JITTER_PX)) {
                return;
            }
            *last = Some(position);
        }
        self.send(UiCommand::PointerMoved(position));
    }

    pub fn on_key_down(&self, vk: u16) {
        let fired = self
            .hotkey
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .key_down(vk);
        if fired {
            self.send(UiCommand::TogglePlayback);
        }
    }

    pub fn on_key_up(&self, vk: u16) {
        self.hotkey
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .key_up(vk);
    }

    fn send(&self, command: UiCommand) -> bool {
        match self.commands.send(command) {
            Ok(()) => true,
            Err(e) => {
                debug!("UI command queue closed, dropping {:?}", e.0);
                false
            }
        }
    }
}

// ── UI side ───────────────────────────────────────────────────────────────────

/// Error type for applying a [`UiCommand`].
#[derive(Debug, Error)]
pub enum ModeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

/// UI-thread half of the mode dispatcher.
pub struct ModeController {
    mode: SharedMode,
    interaction: InteractionSettings,
    playback: PlaybackSettings,
    marker_image: MarkerImage,
}

impl ModeController {
    pub fn new(
        mode: SharedMode,
        interaction: InteractionSettings,
        playback: PlaybackSettings,
        marker_image: MarkerImage,
    ) -> Self {
        Self {
            mode,
            interaction,
            playback,
            marker_image,
        }
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode.get()
    }

    pub fn playback_settings(&self) -> &PlaybackSettings {
        &self.playback
    }

    /// Replaces the global duration, e.g. from a loaded point file.  Applies
    /// to markers added afterwards and to the next run's default clicks.
    pub fn set_global_duration(&mut self, duration: Duration) {
        self.playback.global_duration = duration;
    }

    /// Applies one queued command.
    ///
    /// # Errors
    ///
    /// Registry failures when adding a marker, and playback start failures.
    /// The mode is left unchanged on error.
    pub fn apply(
        &mut self,
        command: UiCommand,
        registry: &mut MarkerRegistry,
        scheduler: &mut PlaybackScheduler,
    ) -> Result<(), ModeError> {
        match command {
            UiCommand::AddPoint(position) => {
                // The click may have been queued just before the mode changed.
                if self.mode() != InteractionMode::Add {
                    return Ok(());
                }
                let dwell_ms =
                    u32::try_from(self.playback.global_duration.as_millis()).unwrap_or(u32::MAX);
                registry.add_point(
                    &self.marker_image,
                    position,
                    self.playback.default_button,
                    self.playback.default_click_kind,
                    dwell_ms,
                )?;
            }
            UiCommand::RemoveNearest(position) => {
                if self.mode() == InteractionMode::Remove {
                    registry.remove_nearest(position, self.interaction.remove_radius);
                }
            }
            UiCommand::PointerMoved(position) => self.update_hover(position, registry),
            UiCommand::TogglePlayback => {
                self.enter(InteractionMode::Running, registry, scheduler)?;
            }
            UiCommand::EnterMode(mode) => self.enter(mode, registry, scheduler)?,
            UiCommand::Clear => {
                self.leave_running(registry, scheduler);
                registry.clear_all();
                self.mode.set(InteractionMode::Normal);
                info!("markers cleared");
            }
        }
        Ok(())
    }

    /// Joins a run that ended by itself and returns to Normal mode.
    ///
    /// Call on [`super::playback::PlaybackEvent::Finished`].
    pub fn on_playback_finished(
        &mut self,
        registry: &mut MarkerRegistry,
        scheduler: &mut PlaybackScheduler,
    ) {
        if scheduler.reap_finished(registry).is_some() && self.mode() == InteractionMode::Running
        {
            self.mode.set(InteractionMode::Normal);
        }
    }

    fn enter(
        &mut self,
        requested: InteractionMode,
        registry: &mut MarkerRegistry,
        scheduler: &mut PlaybackScheduler,
    ) -> Result<(), ModeError> {
        let current = self.mode();
        let target = if current == requested {
            InteractionMode::Normal
        } else {
            requested
        };

        if current == InteractionMode::Running {
            self.leave_running(registry, scheduler);
        }
        if target == InteractionMode::Running {
            match scheduler.start(registry, &self.playback)? {
                StartOutcome::Started => {}
                StartOutcome::AlreadyRunning => warn!("playback already running"),
            }
        }

        self.mode.set(target);
        debug!(from = ?current, to = ?target, "mode changed");
        Ok(())
    }

    fn leave_running(&mut self, registry: &mut MarkerRegistry, scheduler: &mut PlaybackScheduler) {
        if self.mode() == InteractionMode::Running {
            scheduler.stop(registry);
            self.mode.set(InteractionMode::Normal);
        }
    }

    fn update_hover(&self, position: ScreenPoint, registry: &mut MarkerRegistry) {
        if registry.is_runtime_mode() || self.mode() == InteractionMode::Add {
            return;
        }
        let target = registry
            .positions()
            .nearest_within(position, self.interaction.hover_radius);
        if let Err(e) = registry.hover_only(target) {
            debug!("hover update skipped: {e}");
        }
    }
}
