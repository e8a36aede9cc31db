//! Mock pointer injector for unit and integration testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use autopoint_core::ScreenPoint;

use crate::application::playback::{InjectionError, PhysicalButton, PointerInjector};

/// One recorded call on [`MockPointerInjector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedAction {
    Move(ScreenPoint),
    Press(PhysicalButton),
    Release(PhysicalButton),
}

/// Records every injected action instead of touching the OS.
#[derive(Default)]
pub struct MockPointerInjector {
    actions: Mutex<Vec<InjectedAction>>,
    swapped_buttons: AtomicBool,
    should_fail: AtomicBool,
}

impl MockPointerInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a left-handed setup: `primary_button()` returns `Right`.
    pub fn set_swapped_buttons(&self, swapped: bool) {
        self.swapped_buttons.store(swapped, Ordering::SeqCst);
    }

    /// Makes every following call fail with a platform error.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn actions(&self) -> Vec<InjectedAction> {
        self.actions.lock().expect("lock poisoned").clone()
    }

    /// Number of button presses recorded so far.
    pub fn press_count(&self) -> usize {
        self.actions
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|a| matches!(a, InjectedAction::Press(_)))
            .count()
    }

    fn record(&self, action: InjectedAction) -> Result<(), InjectionError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(InjectionError::Platform("injected failure".to_string()));
        }
        self.actions.lock().expect("lock poisoned").push(action);
        Ok(())
    }
}

impl PointerInjector for MockPointerInjector {
    fn move_cursor(&self, position: ScreenPoint) -> Result<(), InjectionError> {
        self.record(InjectedAction::Move(position))
    }

    fn button(&self, button: PhysicalButton, pressed: bool) -> Result<(), InjectionError> {
        if pressed {
            self.record(InjectedAction::Press(button))
        } else {
            self.record(InjectedAction::Release(button))
        }
    }

    fn primary_button(&self) -> PhysicalButton {
        if self.swapped_buttons.load(Ordering::SeqCst) {
            PhysicalButton::Right
        } else {
            PhysicalButton::Left
        }
    }
}
