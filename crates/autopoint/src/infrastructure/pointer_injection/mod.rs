//! Synthetic pointer input for playback.
//!
//! Implementations of [`crate::application::playback::PointerInjector`]:
//!
//! - `windows` – `SetCursorPos` + `SendInput`.
//! - [`mock::MockPointerInjector`] – records every action for tests.
//! - [`UnsupportedInjector`] – fails every call on platforms without an
//!   implementation, so playback ends with a logged fault instead of
//!   silently doing nothing.

use autopoint_core::ScreenPoint;

use crate::application::playback::{InjectionError, PhysicalButton, PointerInjector};

pub mod mock;

#[cfg(target_os = "windows")]
pub mod windows;

#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedInjector;

impl PointerInjector for UnsupportedInjector {
    fn move_cursor(&self, _position: ScreenPoint) -> Result<(), InjectionError> {
        Err(InjectionError::Unsupported)
    }

    fn button(&self, _button: PhysicalButton, _pressed: bool) -> Result<(), InjectionError> {
        Err(InjectionError::Unsupported)
    }

    fn primary_button(&self) -> PhysicalButton {
        PhysicalButton::Left
    }
}
