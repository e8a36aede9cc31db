//! Windows low-level keyboard and mouse hook backend.
//!
//! Each device class gets its own thread that installs `WH_MOUSE_LL` or
//! `WH_KEYBOARD_LL` and pumps a Win32 message loop.  Uninstalling posts
//! `WM_QUIT` to that thread, which unhooks and exits.
//!
//! # Safety
//!
//! This module uses `unsafe` code exclusively for Windows API FFI calls.
//! All `unsafe` blocks are annotated with `// SAFETY:` comments.

#![cfg(target_os = "windows")]

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use autopoint_core::{MouseButton, ScreenPoint};
use tracing::{debug, warn};
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW,
    SetWindowsHookExW, UnhookWindowsHookEx, HC_ACTION, HHOOK, KBDLLHOOKSTRUCT, MSG,
    MSLLHOOKSTRUCT, PM_NOREMOVE, WH_KEYBOARD_LL, WH_MOUSE_LL, WINDOWS_HOOK_ID, WM_KEYDOWN,
    WM_KEYUP, WM_LBUTTONDOWN, WM_MBUTTONDOWN, WM_MOUSEMOVE, WM_QUIT, WM_RBUTTONDOWN,
    WM_SYSKEYDOWN, WM_SYSKEYUP, WM_USER,
};

use super::{DeviceClass, HookBackend, HookCallback, HookError, HookVerdict, RawHookEvent};

/// Callbacks read by the `extern "system"` hook procedures, which cannot
/// capture state.
static POINTER_CALLBACK: RwLock<Option<HookCallback>> = RwLock::new(None);
static KEYBOARD_CALLBACK: RwLock<Option<HookCallback>> = RwLock::new(None);

fn slot(device: DeviceClass) -> &'static RwLock<Option<HookCallback>> {
    match device {
        DeviceClass::Pointer => &POINTER_CALLBACK,
        DeviceClass::Keyboard => &KEYBOARD_CALLBACK,
    }
}

fn set_slot(device: DeviceClass, callback: Option<HookCallback>) {
    *slot(device).write().unwrap_or_else(PoisonError::into_inner) = callback;
}

fn invoke(device: DeviceClass, event: &RawHookEvent) -> HookVerdict {
    let callback = slot(device)
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    callback.map_or(HookVerdict::PassThrough, |cb| cb(event))
}

struct HookThread {
    thread_id: u32,
    handle: JoinHandle<()>,
}

/// Windows implementation of [`HookBackend`].
#[derive(Default)]
pub struct WindowsHookBackend {
    threads: HashMap<DeviceClass, HookThread>,
}

impl WindowsHookBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HookBackend for WindowsHookBackend {
    fn install(&mut self, device: DeviceClass, callback: HookCallback) -> Result<(), HookError> {
        if self.threads.contains_key(&device) {
            set_slot(device, Some(callback));
            return Ok(());
        }
        set_slot(device, Some(callback));

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<u32, String>>(1);
        let name = format!("autopoint-{device}-hook");
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run_hook_thread(device, ready_tx))
            .map_err(|e| {
                set_slot(device, None);
                HookError::InstallFailed {
                    device,
                    reason: e.to_string(),
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                self.threads.insert(device, HookThread { thread_id, handle });
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                set_slot(device, None);
                Err(HookError::InstallFailed { device, reason })
            }
            Err(_) => {
                let _ = handle.join();
                set_slot(device, None);
                Err(HookError::InstallFailed {
                    device,
                    reason: "hook thread exited before reporting".to_string(),
                })
            }
        }
    }

    fn uninstall(&mut self, device: DeviceClass) {
        let Some(hook) = self.threads.remove(&device) else {
            return;
        };
        // SAFETY: Posting a message to a thread id we own; the thread has a
        // message queue because it called PeekMessageW before reporting.
        let posted = unsafe { PostThreadMessageW(hook.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) };
        if let Err(e) = posted {
            warn!(%device, "failed to post WM_QUIT to hook thread: {e}");
        }
        if hook.handle.join().is_err() {
            warn!(%device, "hook thread panicked");
        }
        set_slot(device, None);
    }
}

impl Drop for WindowsHookBackend {
    fn drop(&mut self) {
        let devices: Vec<DeviceClass> = self.threads.keys().copied().collect();
        for device in devices {
            self.uninstall(device);
        }
    }
}

/// Entry point for a hook thread.
fn run_hook_thread(device: DeviceClass, ready: mpsc::SyncSender<Result<u32, String>>) {
    let (hook_id, proc): (WINDOWS_HOOK_ID, HookProc) = match device {
        DeviceClass::Pointer => (WH_MOUSE_LL, mouse_hook_proc),
        DeviceClass::Keyboard => (WH_KEYBOARD_LL, keyboard_hook_proc),
    };

    let mut msg = MSG::default();
    // SAFETY: Forces creation of this thread's message queue so that
    // PostThreadMessageW from `uninstall` cannot race it.
    unsafe {
        let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);
    }

    // SAFETY: SetWindowsHookExW requires the calling thread to run a message
    // loop, which it does below until WM_QUIT.
    let hook: HHOOK = match unsafe { SetWindowsHookExW(hook_id, Some(proc), None, 0) } {
        Ok(hook) => hook,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };

    // SAFETY: GetCurrentThreadId has no preconditions.
    let thread_id = unsafe { GetCurrentThreadId() };
    if ready.send(Ok(thread_id)).is_err() {
        // SAFETY: `hook` was returned by SetWindowsHookExW above.
        unsafe {
            let _ = UnhookWindowsHookEx(hook);
        }
        return;
    }
    debug!(%device, thread_id, "hook thread running");

    // SAFETY: Standard Win32 GetMessage/DispatchMessage loop pattern.
    unsafe {
        while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
            DispatchMessageW(&msg);
        }
        let _ = UnhookWindowsHookEx(hook);
    }
}

type HookProc = unsafe extern "system" fn(i32, WPARAM, LPARAM) -> LRESULT;

/// Low-level mouse hook callback.
///
/// # Safety
///
/// Called by Windows from the hook thread; must return quickly.
unsafe extern "system" fn mouse_hook_proc(n_code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
    if n_code != HC_ACTION as i32 {
        // SAFETY: Must call CallNextHookEx when n_code < 0.
        return CallNextHookEx(None, n_code, w_param, l_param);
    }

    // SAFETY: l_param points to a MSLLHOOKSTRUCT when n_code == HC_ACTION.
    let mhs = &*(l_param.0 as *const MSLLHOOKSTRUCT);
    let position = ScreenPoint::new(mhs.pt.x, mhs.pt.y);

    let event = match w_param.0 as u32 {
        WM_MOUSEMOVE => RawHookEvent::PointerMove { position },
        WM_LBUTTONDOWN => RawHookEvent::PointerButtonDown {
            button: MouseButton::Left,
            position,
        },
        WM_RBUTTONDOWN => RawHookEvent::PointerButtonDown {
            button: MouseButton::Right,
            position,
        },
        WM_MBUTTONDOWN => RawHookEvent::PointerButtonDown {
            button: MouseButton::Middle,
            position,
        },
        _ => return CallNextHookEx(None, n_code, w_param, l_param),
    };

    if invoke(DeviceClass::Pointer, &event) == HookVerdict::Consume {
        return LRESULT(1);
    }
    // SAFETY: Forward to the next hook in the chain.
    CallNextHookEx(None, n_code, w_param, l_param)
}

/// Low-level keyboard hook callback.
///
/// # Safety
///
/// Called by Windows from the hook thread; must return quickly.
unsafe extern "system" fn keyboard_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code != HC_ACTION as i32 {
        // SAFETY: Must call CallNextHookEx when n_code < 0.
        return CallNextHookEx(None, n_code, w_param, l_param);
    }

    // SAFETY: l_param points to a KBDLLHOOKSTRUCT when n_code == HC_ACTION.
    let kbs = &*(l_param.0 as *const KBDLLHOOKSTRUCT);
    let vk_code = kbs.vkCode as u16;

    let event = match w_param.0 as u32 {
        WM_KEYDOWN | WM_SYSKEYDOWN => RawHookEvent::KeyDown { vk_code },
        WM_KEYUP | WM_SYSKEYUP => RawHookEvent::KeyUp { vk_code },
        _ => return CallNextHookEx(None, n_code, w_param, l_param),
    };

    if invoke(DeviceClass::Keyboard, &event) == HookVerdict::Consume {
        return LRESULT(1);
    }
    // SAFETY: Forward the event to the next hook in the chain.
    CallNextHookEx(None, n_code, w_param, l_param)
}
