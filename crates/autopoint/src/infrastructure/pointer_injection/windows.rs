//! Windows pointer injection via `SetCursorPos` and `SendInput`.
//!
//! The cursor is positioned with `SetCursorPos`, which takes virtual-desktop
//! pixels directly, so no normalization to the [0, 65535] range is needed.
//! Button presses are injected at the current cursor position.

#![cfg(target_os = "windows")]

use autopoint_core::ScreenPoint;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_MOUSE, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP,
    MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP,
    MOUSEINPUT,
};
use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SetCursorPos, SM_SWAPBUTTON};

use crate::application::playback::{InjectionError, PhysicalButton, PointerInjector};

/// Windows implementation of [`PointerInjector`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsPointerInjector;

impl WindowsPointerInjector {
    pub fn new() -> Self {
        Self
    }
}

impl PointerInjector for WindowsPointerInjector {
    fn move_cursor(&self, position: ScreenPoint) -> Result<(), InjectionError> {
        // SAFETY: SetCursorPos has no pointer arguments.
        unsafe { SetCursorPos(position.x, position.y) }
            .map_err(|e| InjectionError::Platform(e.to_string()))
    }

    fn button(&self, button: PhysicalButton, pressed: bool) -> Result<(), InjectionError> {
        let flags = match (button, pressed) {
            (PhysicalButton::Left, true) => MOUSEEVENTF_LEFTDOWN,
            (PhysicalButton::Left, false) => MOUSEEVENTF_LEFTUP,
            (PhysicalButton::Right, true) => MOUSEEVENTF_RIGHTDOWN,
            (PhysicalButton::Right, false) => MOUSEEVENTF_RIGHTUP,
            (PhysicalButton::Middle, true) => MOUSEEVENTF_MIDDLEDOWN,
            (PhysicalButton::Middle, false) => MOUSEEVENTF_MIDDLEUP,
        };

        let input = INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx: 0,
                    dy: 0,
                    mouseData: 0,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        };
        // SAFETY: input is a valid INPUT structure on the stack
        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent == 1 {
            Ok(())
        } else {
            Err(InjectionError::Platform(format!(
                "SendInput injected {sent} of 1 events ({button:?} pressed={pressed})"
            )))
        }
    }

    fn primary_button(&self) -> PhysicalButton {
        // SAFETY: GetSystemMetrics is always safe to call
        if unsafe { GetSystemMetrics(SM_SWAPBUTTON) } != 0 {
            PhysicalButton::Right
        } else {
            PhysicalButton::Left
        }
    }
}
