//! Global input hooks for pointer and keyboard events.
//!
//! [`InputHookManager`] owns one low-level OS hook per device class and fans
//! each event out to the handlers registered for it:
//!
//! | Device class | Handlers                          |
//! |--------------|-----------------------------------|
//! | Pointer      | `PointerMove`, `PointerClick`     |
//! | Keyboard     | `KeyDown`, `KeyUp`, `KeyPress`    |
//!
//! A hook is installed lazily when the first handler of its class subscribes,
//! and uninstalled when the last one unsubscribes, so no system-wide hook
//! stays resident while nothing listens.
//!
//! # Windows-Specific Implementation
//!
//! Hook callbacks run on the hook's own message-loop thread and must return
//! within a few hundred milliseconds or Windows silently removes the hook.
//! Handlers therefore must not block; UI work goes through a queue (see
//! [`crate::application::modes::HookBridge`]).
//!
//! # Testability
//!
//! The [`HookBackend`] trait hides the OS registration.  Tests drive the
//! manager through [`mock::MockHookBackend`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use autopoint_core::{MouseButton, ScreenPoint};
use tracing::{error, info, trace, warn};

pub mod mock;

#[cfg(target_os = "windows")]
pub mod windows;

/// Class of input device a hook intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Pointer,
    Keyboard,
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceClass::Pointer => f.write_str("pointer"),
            DeviceClass::Keyboard => f.write_str("keyboard"),
        }
    }
}

/// Logical event a handler subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEventKind {
    PointerMove,
    PointerClick,
    KeyDown,
    KeyUp,
    /// Fired together with `KeyDown`, after it.
    KeyPress,
}

impl HookEventKind {
    pub fn device(self) -> DeviceClass {
        match self {
            HookEventKind::PointerMove | HookEventKind::PointerClick => DeviceClass::Pointer,
            HookEventKind::KeyDown | HookEventKind::KeyUp | HookEventKind::KeyPress => {
                DeviceClass::Keyboard
            }
        }
    }
}

/// A raw event produced by a hook backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawHookEvent {
    PointerMove { position: ScreenPoint },
    PointerButtonDown { button: MouseButton, position: ScreenPoint },
    /// Windows virtual-key code.
    KeyDown { vk_code: u16 },
    KeyUp { vk_code: u16 },
}

impl RawHookEvent {
    pub fn device(&self) -> DeviceClass {
        match self {
            RawHookEvent::PointerMove { .. } | RawHookEvent::PointerButtonDown { .. } => {
                DeviceClass::Pointer
            }
            RawHookEvent::KeyDown { .. } | RawHookEvent::KeyUp { .. } => DeviceClass::Keyboard,
        }
    }
}

/// What the backend must do with the event after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVerdict {
    /// Forward to the next hook / the rest of the system.
    PassThrough,
    /// Suppress the event.
    Consume,
}

/// Callback a backend invokes for every event of the installed class.
pub type HookCallback = Arc<dyn Fn(&RawHookEvent) -> HookVerdict + Send + Sync>;

pub type MoveHandler = Arc<dyn Fn(ScreenPoint) + Send + Sync>;
/// Returns `Ok(true)` to consume the click.
pub type ClickHandler =
    Arc<dyn Fn(MouseButton, ScreenPoint) -> anyhow::Result<bool> + Send + Sync>;
pub type KeyHandler = Arc<dyn Fn(u16) + Send + Sync>;

/// A handler together with the event kind it listens to.
#[derive(Clone)]
pub enum HookHandler {
    PointerMove(MoveHandler),
    PointerClick(ClickHandler),
    KeyDown(KeyHandler),
    KeyUp(KeyHandler),
    KeyPress(KeyHandler),
}

impl HookHandler {
    pub fn kind(&self) -> HookEventKind {
        match self {
            HookHandler::PointerMove(_) => HookEventKind::PointerMove,
            HookHandler::PointerClick(_) => HookEventKind::PointerClick,
            HookHandler::KeyDown(_) => HookEventKind::KeyDown,
            HookHandler::KeyUp(_) => HookEventKind::KeyUp,
            HookHandler::KeyPress(_) => HookEventKind::KeyPress,
        }
    }
}

/// Error type for hook installation.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum HookError {
    #[error("failed to install {device} hook: {reason}")]
    InstallFailed { device: DeviceClass, reason: String },
    #[error("global input hooks are not supported on this platform")]
    UnsupportedPlatform,
}

/// OS registration of low-level hooks.
///
/// The production implementation uses Windows hooks; tests use
/// [`mock::MockHookBackend`].
pub trait HookBackend: Send {
    /// Installs the hook for `device`; `callback` runs for each event.
    fn install(&mut self, device: DeviceClass, callback: HookCallback) -> Result<(), HookError>;

    /// Removes the hook for `device`.  No-op if not installed.
    fn uninstall(&mut self, device: DeviceClass);
}

/// Backend for platforms without global hooks.
#[derive(Debug, Default)]
pub struct UnsupportedHookBackend;

impl HookBackend for UnsupportedHookBackend {
    fn install(&mut self, _device: DeviceClass, _callback: HookCallback) -> Result<(), HookError> {
        Err(HookError::UnsupportedPlatform)
    }

    fn uninstall(&mut self, _device: DeviceClass) {}
}

// ── Handler table ─────────────────────────────────────────────────────────────

#[derive(Default, Clone)]
struct HandlerTable {
    pointer_move: Option<MoveHandler>,
    pointer_click: Option<ClickHandler>,
    key_down: Option<KeyHandler>,
    key_up: Option<KeyHandler>,
    key_press: Option<KeyHandler>,
}

impl HandlerTable {
    /// Stores `handler`, returning whatever was registered for its kind.
    fn insert(&mut self, handler: HookHandler) -> Option<HookHandler> {
        match handler {
            HookHandler::PointerMove(h) => {
                self.pointer_move.replace(h).map(HookHandler::PointerMove)
            }
            HookHandler::PointerClick(h) => {
                self.pointer_click.replace(h).map(HookHandler::PointerClick)
            }
            HookHandler::KeyDown(h) => self.key_down.replace(h).map(HookHandler::KeyDown),
            HookHandler::KeyUp(h) => self.key_up.replace(h).map(HookHandler::KeyUp),
            HookHandler::KeyPress(h) => self.key_press.replace(h).map(HookHandler::KeyPress),
        }
    }

    fn remove(&mut self, kind: HookEventKind) {
        match kind {
            HookEventKind::PointerMove => self.pointer_move = None,
            HookEventKind::PointerClick => self.pointer_click = None,
            HookEventKind::KeyDown => self.key_down = None,
            HookEventKind::KeyUp => self.key_up = None,
            HookEventKind::KeyPress => self.key_press = None,
        }
    }

    fn has_any(&self, device: DeviceClass) -> bool {
        match device {
            DeviceClass::Pointer => self.pointer_move.is_some() || self.pointer_click.is_some(),
            DeviceClass::Keyboard => {
                self.key_down.is_some() || self.key_up.is_some() || self.key_press.is_some()
            }
        }
    }
}

struct ManagerState {
    backend: Box<dyn HookBackend>,
    pointer_installed: bool,
    keyboard_installed: bool,
}

impl ManagerState {
    fn installed(&mut self, device: DeviceClass) -> &mut bool {
        match device {
            DeviceClass::Pointer => &mut self.pointer_installed,
            DeviceClass::Keyboard => &mut self.keyboard_installed,
        }
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Single shared interception point per device class.
pub struct InputHookManager {
    state: Mutex<ManagerState>,
    handlers: Arc<RwLock<HandlerTable>>,
}

impl InputHookManager {
    pub fn new(backend: Box<dyn HookBackend>) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                backend,
                pointer_installed: false,
                keyboard_installed: false,
            }),
            handlers: Arc::new(RwLock::new(HandlerTable::default())),
        }
    }

    /// Registers `handler`, replacing any handler of the same kind.
    ///
    /// Installs the device-class hook if this is its first handler.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`HookError`] if installation fails; the handler
    /// is not registered in that case.
    pub fn subscribe(&self, handler: HookHandler) -> Result<(), HookError> {
        let kind = handler.kind();
        let device = kind.device();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = self.write_handlers().insert(handler);

        if !*state.installed(device) {
            let callback = self.callback();
            if let Err(e) = state.backend.install(device, callback) {
                let mut handlers = self.write_handlers();
                handlers.remove(kind);
                if let Some(previous) = previous {
                    handlers.insert(previous);
                }
                warn!(%device, "hook install failed: {e}");
                return Err(e);
            }
            *state.installed(device) = true;
            info!(%device, "input hook installed");
        }
        Ok(())
    }

    /// Removes the handler for `kind`, uninstalling the device-class hook if
    /// no handlers of that class remain.
    pub fn unsubscribe(&self, kind: HookEventKind) {
        let device = kind.device();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let remaining = {
            let mut handlers = self.write_handlers();
            handlers.remove(kind);
            handlers.has_any(device)
        };

        if !remaining && *state.installed(device) {
            state.backend.uninstall(device);
            *state.installed(device) = false;
            info!(%device, "input hook uninstalled");
        }
    }

    pub fn is_installed(&self, device: DeviceClass) -> bool {
        *self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .installed(device)
    }

    /// Removes every handler and hook.
    pub fn shutdown(&self) {
        for kind in [
            HookEventKind::PointerMove,
            HookEventKind::PointerClick,
            HookEventKind::KeyDown,
            HookEventKind::KeyUp,
            HookEventKind::KeyPress,
        ] {
            self.unsubscribe(kind);
        }
    }

    fn write_handlers(&self) -> std::sync::RwLockWriteGuard<'_, HandlerTable> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn callback(&self) -> HookCallback {
        let handlers = Arc::clone(&self.handlers);
        Arc::new(move |event| dispatch(&handlers, event))
    }
}

impl Drop for InputHookManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// Routes one event to its handlers.  Never panics and never propagates a
/// handler failure to the OS callback chain.
fn dispatch(handlers: &RwLock<HandlerTable>, event: &RawHookEvent) -> HookVerdict {
    // Clone the Arcs out so handlers run without the lock held.
    let table = handlers
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    trace!(?event, "hook event");

    match *event {
        RawHookEvent::PointerMove { position } => {
            if let Some(h) = table.pointer_move {
                guarded(HookEventKind::PointerMove, || h(position));
            }
            HookVerdict::PassThrough
        }
        RawHookEvent::PointerButtonDown { button, position } => {
            let Some(h) = table.pointer_click else {
                return HookVerdict::PassThrough;
            };
            match guarded(HookEventKind::PointerClick, || h(button, position)) {
                Some(Ok(true)) => HookVerdict::Consume,
                Some(Ok(false)) | None => HookVerdict::PassThrough,
                Some(Err(e)) => {
                    error!(kind = ?HookEventKind::PointerClick, "hook handler failed: {e:#}");
                    HookVerdict::PassThrough
                }
            }
        }
        RawHookEvent::KeyDown { vk_code } => {
            if let Some(h) = table.key_down {
                guarded(HookEventKind::KeyDown, || h(vk_code));
            }
            if let Some(h) = table.key_press {
                guarded(HookEventKind::KeyPress, || h(vk_code));
            }
            HookVerdict::PassThrough
        }
        RawHookEvent::KeyUp { vk_code } => {
            if let Some(h) = table.key_up {
                guarded(HookEventKind::KeyUp, || h(vk_code));
            }
            HookVerdict::PassThrough
        }
    }
}

/// Runs a handler, converting a panic into a logged `None`.
fn guarded<T>(kind: HookEventKind, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            error!(?kind, "hook handler panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kinds_map_to_device_classes() {
        assert_eq!(HookEventKind::PointerMove.device(), DeviceClass::Pointer);
        assert_eq!(HookEventKind::PointerClick.device(), DeviceClass::Pointer);
        assert_eq!(HookEventKind::KeyPress.device(), DeviceClass::Keyboard);
        assert_eq!(
            RawHookEvent::KeyUp { vk_code: 0x41 }.device(),
            DeviceClass::Keyboard
        );
    }

    #[test]
    fn test_dispatch_without_handlers_passes_through() {
        let table = RwLock::new(HandlerTable::default());
        let verdict = dispatch(
            &table,
            &RawHookEvent::PointerButtonDown {
                button: MouseButton::Left,
                position: ScreenPoint::new(0, 0),
            },
        );
        assert_eq!(verdict, HookVerdict::PassThrough);
    }

    #[test]
    fn test_dispatch_click_error_is_not_consumed() {
        // Arrange
        let table = RwLock::new(HandlerTable::default());
        table.write().unwrap().insert(HookHandler::PointerClick(Arc::new(
            |_: MouseButton, _: ScreenPoint| -> anyhow::Result<bool> {
                Err(anyhow::anyhow!("handler failed"))
            },
        )));

        // Act
        let verdict = dispatch(
            &table,
            &RawHookEvent::PointerButtonDown {
                button: MouseButton::Left,
                position: ScreenPoint::new(1, 1),
            },
        );

        // Assert
        assert_eq!(verdict, HookVerdict::PassThrough);
    }

    #[test]
    fn test_unsupported_backend_reports_unsupported_platform() {
        let manager = InputHookManager::new(Box::new(UnsupportedHookBackend));
        let result = manager.subscribe(HookHandler::PointerMove(Arc::new(|_: ScreenPoint| {})));
        assert_eq!(result, Err(HookError::UnsupportedPlatform));
        assert!(!manager.is_installed(DeviceClass::Pointer));
    }
}
