//! Windows overlay surface: a layered, click-through, topmost popup window
//! spanning the virtual desktop, updated with `UpdateLayeredWindow`.
//!
//! The window lives on its own thread ("autopoint-overlay") that pumps
//! messages for it and for a `SetWinEventHook(EVENT_SYSTEM_FOREGROUND)`
//! hook.  Foreground and display changes are forwarded to the host as
//! [`SurfaceEvent`]s, which it hands to
//! [`super::OverlayService::handle_surface_event`].
//!
//! A display-configuration change (`WM_DISPLAYCHANGE`) makes the next
//! present report [`RenderError::RecreateRequired`], so the service rebuilds
//! the DIB at the new desktop size.  The accompanying
//! [`SurfaceEvent::DisplayChanged`] makes the host render right away.
//!
//! # Safety
//!
//! This module uses `unsafe` code exclusively for Windows API FFI calls.
//! All `unsafe` blocks are annotated with `// SAFETY:` comments.

#![cfg(target_os = "windows")]

use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::{mpsc, Mutex, Once, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self as async_mpsc, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use windows::core::{w, PCWSTR};
use windows::Win32::Foundation::{COLORREF, HMODULE, HWND, LPARAM, LRESULT, POINT, SIZE, WPARAM};
use windows::Win32::Graphics::Gdi::{
    CreateCompatibleDC, CreateDIBSection, DeleteDC, DeleteObject, SelectObject, AC_SRC_ALPHA,
    AC_SRC_OVER, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, BLENDFUNCTION, DIB_RGB_COLORS, HBITMAP,
    HDC, HGDIOBJ,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
    GetSystemMetrics, PeekMessageW, PostThreadMessageW, RegisterClassW, SetWindowPos, ShowWindow,
    UpdateLayeredWindow, EVENT_SYSTEM_FOREGROUND, HWND_TOPMOST, MSG, PM_NOREMOVE,
    SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN, SM_YVIRTUALSCREEN,
    SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE, SW_SHOWNOACTIVATE, ULW_ALPHA, WINDOW_STYLE,
    WINEVENT_OUTOFCONTEXT, WM_DISPLAYCHANGE, WM_QUIT, WM_USER, WNDCLASSW, WS_EX_LAYERED,
    WS_EX_NOACTIVATE, WS_EX_TOOLWINDOW, WS_EX_TOPMOST, WS_EX_TRANSPARENT, WS_POPUP,
};

use super::compositor::{FrameBuffer, FramePresenter, SoftwareContext};
use super::{RenderError, SurfaceContext, SurfaceDevice, SurfaceEvent, SurfaceRect};

/// Set by the window procedure, consumed by the next present.
static DISPLAY_CHANGED: AtomicBool = AtomicBool::new(false);
/// Overlay window, read by the foreground hook procedure.
static OVERLAY_HWND: AtomicIsize = AtomicIsize::new(0);
static SURFACE_TX: Mutex<Option<UnboundedSender<SurfaceEvent>>> = Mutex::new(None);

fn hwnd_from(raw: isize) -> HWND {
    HWND(raw as *mut c_void)
}

/// Current virtual-desktop rectangle (all monitors).
pub fn virtual_desktop_bounds() -> SurfaceRect {
    // SAFETY: GetSystemMetrics is always safe to call.
    unsafe {
        SurfaceRect {
            x: GetSystemMetrics(SM_XVIRTUALSCREEN),
            y: GetSystemMetrics(SM_YVIRTUALSCREEN),
            width: GetSystemMetrics(SM_CXVIRTUALSCREEN).max(1) as u32,
            height: GetSystemMetrics(SM_CYVIRTUALSCREEN).max(1) as u32,
        }
    }
}

/// [`SurfaceDevice`] backed by a layered window.
pub struct LayeredWindowSurface {
    hwnd: isize,
    thread_id: u32,
    thread: Option<JoinHandle<()>>,
    surface_rx: Option<UnboundedReceiver<SurfaceEvent>>,
}

impl LayeredWindowSurface {
    /// Creates the window on a dedicated thread and waits until it exists.
    ///
    /// # Errors
    ///
    /// [`RenderError::Device`] if the thread cannot be spawned or the window
    /// cannot be created.
    pub fn create() -> Result<Self, RenderError> {
        let bounds = virtual_desktop_bounds();
        let (surface_tx, surface_rx) = async_mpsc::unbounded_channel();
        *SURFACE_TX.lock().unwrap_or_else(PoisonError::into_inner) = Some(surface_tx);

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(isize, u32), String>>(1);
        let thread = thread::Builder::new()
            .name("autopoint-overlay".to_string())
            .spawn(move || run_window_thread(bounds, ready_tx))
            .map_err(|e| RenderError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok((hwnd, thread_id))) => {
                info!(thread_id, "overlay window created");
                Ok(Self {
                    hwnd,
                    thread_id,
                    thread: Some(thread),
                    surface_rx: Some(surface_rx),
                })
            }
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(RenderError::Device(reason))
            }
            Err(_) => {
                let _ = thread.join();
                Err(RenderError::Device(
                    "overlay thread exited before reporting".to_string(),
                ))
            }
        }
    }

    /// Foreground and display-change notifications.  Returns `Some` once.
    pub fn take_surface_events(&mut self) -> Option<UnboundedReceiver<SurfaceEvent>> {
        self.surface_rx.take()
    }
}

impl SurfaceDevice for LayeredWindowSurface {
    fn desktop_bounds(&self) -> SurfaceRect {
        virtual_desktop_bounds()
    }

    fn create_context(&mut self) -> Result<Box<dyn SurfaceContext>, RenderError> {
        let bounds = virtual_desktop_bounds();
        DISPLAY_CHANGED.store(false, Ordering::SeqCst);

        // SAFETY: `self.hwnd` is the live overlay window owned by our thread.
        unsafe {
            SetWindowPos(
                hwnd_from(self.hwnd),
                HWND_TOPMOST,
                bounds.x,
                bounds.y,
                bounds.width as i32,
                bounds.height as i32,
                SWP_NOACTIVATE,
            )
        }
        .map_err(|e| RenderError::Device(e.to_string()))?;

        let presenter = LayeredPresenter::new(self.hwnd, bounds)?;
        debug!(width = bounds.width, height = bounds.height, "layered context created");
        Ok(Box::new(SoftwareContext::new(bounds, presenter)))
    }

    fn reassert_topmost(&self) {
        // SAFETY: `self.hwnd` is the live overlay window; SWP_NOACTIVATE keeps
        // focus with the foreground application.
        let result = unsafe {
            SetWindowPos(
                hwnd_from(self.hwnd),
                HWND_TOPMOST,
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE,
            )
        };
        if let Err(e) = result {
            warn!("failed to reassert overlay z-order: {e}");
        }
    }
}

impl Drop for LayeredWindowSurface {
    fn drop(&mut self) {
        // SAFETY: Posting to the overlay thread, whose queue exists because it
        // called PeekMessageW before reporting ready.
        let posted = unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) };
        if let Err(e) = posted {
            warn!("failed to post WM_QUIT to overlay thread: {e}");
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("overlay thread panicked");
            }
        }
        *SURFACE_TX.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// ── Window thread ─────────────────────────────────────────────────────────────

fn run_window_thread(bounds: SurfaceRect, ready: mpsc::SyncSender<Result<(isize, u32), String>>) {
    let mut msg = MSG::default();
    // SAFETY: Forces creation of this thread's message queue.
    unsafe {
        let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);
    }

    let hwnd = match create_window(bounds) {
        Ok(hwnd) => hwnd,
        Err(reason) => {
            let _ = ready.send(Err(reason));
            return;
        }
    };
    OVERLAY_HWND.store(hwnd.0 as isize, Ordering::SeqCst);

    // SAFETY: The callback is a plain function; WINEVENT_OUTOFCONTEXT delivers
    // events through this thread's message loop below.
    let hook: HWINEVENTHOOK = unsafe {
        SetWinEventHook(
            EVENT_SYSTEM_FOREGROUND,
            EVENT_SYSTEM_FOREGROUND,
            HMODULE::default(),
            Some(foreground_event_proc),
            0,
            0,
            WINEVENT_OUTOFCONTEXT,
        )
    };
    if hook.is_invalid() {
        warn!("foreground hook unavailable; overlay z-order will not be reasserted");
    }

    // SAFETY: GetCurrentThreadId has no preconditions.
    let thread_id = unsafe { GetCurrentThreadId() };
    if ready.send(Ok((hwnd.0 as isize, thread_id))).is_err() {
        cleanup(hwnd, hook);
        return;
    }

    // SAFETY: Standard Win32 GetMessage/DispatchMessage loop pattern.
    unsafe {
        while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
            DispatchMessageW(&msg);
        }
    }
    cleanup(hwnd, hook);
}

fn cleanup(hwnd: HWND, hook: HWINEVENTHOOK) {
    OVERLAY_HWND.store(0, Ordering::SeqCst);
    // SAFETY: Both handles were created on this thread.
    unsafe {
        if !hook.is_invalid() {
            let _ = UnhookWinEvent(hook);
        }
        let _ = DestroyWindow(hwnd);
    }
    debug!("overlay window destroyed");
}

fn create_window(bounds: SurfaceRect) -> Result<HWND, String> {
    static REGISTER_CLASS: Once = Once::new();
    let class_name: PCWSTR = w!("AutoPointOverlay");

    // SAFETY: Null module name returns the handle of the current executable.
    let hinstance = unsafe { GetModuleHandleW(PCWSTR::null()) }.map_err(|e| e.to_string())?;

    REGISTER_CLASS.call_once(|| {
        let wc = WNDCLASSW {
            hInstance: hinstance.into(),
            lpszClassName: class_name,
            lpfnWndProc: Some(overlay_wndproc),
            ..Default::default()
        };
        // SAFETY: `wc` is fully initialized and the class name is static.
        unsafe {
            RegisterClassW(&wc);
        }
    });

    // SAFETY: The class is registered above; all pointers are valid for the
    // duration of the call.
    let hwnd = unsafe {
        CreateWindowExW(
            WS_EX_LAYERED | WS_EX_TRANSPARENT | WS_EX_TOPMOST | WS_EX_TOOLWINDOW | WS_EX_NOACTIVATE,
            class_name,
            w!("AutoPoint"),
            WINDOW_STYLE(WS_POPUP.0),
            bounds.x,
            bounds.y,
            bounds.width as i32,
            bounds.height as i32,
            None,
            None,
            hinstance,
            None,
        )
    }
    .map_err(|e| e.to_string())?;

    // SAFETY: `hwnd` was just created on this thread.
    unsafe {
        let _ = ShowWindow(hwnd, SW_SHOWNOACTIVATE);
    }
    Ok(hwnd)
}

/// # Safety
///
/// Called by Windows on the overlay thread.
unsafe extern "system" fn overlay_wndproc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if msg == WM_DISPLAYCHANGE {
        DISPLAY_CHANGED.store(true, Ordering::SeqCst);
        send_surface_event(SurfaceEvent::DisplayChanged);
    }
    DefWindowProcW(hwnd, msg, wparam, lparam)
}

/// # Safety
///
/// Called by Windows on the overlay thread for `EVENT_SYSTEM_FOREGROUND`.
unsafe extern "system" fn foreground_event_proc(
    _hook: HWINEVENTHOOK,
    _event: u32,
    hwnd: HWND,
    _id_object: i32,
    _id_child: i32,
    _event_thread: u32,
    _event_time: u32,
) {
    if hwnd.0 as isize == OVERLAY_HWND.load(Ordering::SeqCst) {
        return;
    }
    send_surface_event(SurfaceEvent::ForegroundChanged);
}

fn send_surface_event(event: SurfaceEvent) {
    if let Some(tx) = SURFACE_TX
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        let _ = tx.send(event);
    }
}

// ── Presenter ─────────────────────────────────────────────────────────────────

/// Owns a 32-bit top-down DIB section and pushes frames with
/// `UpdateLayeredWindow(ULW_ALPHA)`.
struct LayeredPresenter {
    hwnd: isize,
    origin: POINT,
    size: SIZE,
    mem_dc: HDC,
    dib: HBITMAP,
    old_bitmap: HGDIOBJ,
    bits: *mut u8,
    len: usize,
}

// SAFETY: The DC and DIB are only touched through `&mut self`, and GDI memory
// DCs are not bound to the creating thread.
unsafe impl Send for LayeredPresenter {}

impl LayeredPresenter {
    fn new(hwnd: isize, bounds: SurfaceRect) -> Result<Self, RenderError> {
        // SAFETY: A null DC creates a memory DC compatible with the screen.
        let mem_dc = unsafe { CreateCompatibleDC(HDC::default()) };
        if mem_dc.is_invalid() {
            return Err(RenderError::Device("CreateCompatibleDC failed".to_string()));
        }

        let mut bmi = BITMAPINFO::default();
        bmi.bmiHeader = BITMAPINFOHEADER {
            biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: bounds.width as i32,
            biHeight: -(bounds.height as i32),
            biPlanes: 1,
            biBitCount: 32,
            biCompression: BI_RGB.0,
            ..Default::default()
        };

        let mut bits: *mut c_void = ptr::null_mut();
        // SAFETY: `bmi` describes a 32-bit top-down bitmap; `bits` receives
        // the pixel pointer owned by the returned section.
        let dib = unsafe {
            CreateDIBSection(
                mem_dc,
                &bmi,
                DIB_RGB_COLORS,
                &mut bits,
                windows::Win32::Foundation::HANDLE::default(),
                0,
            )
        };
        let dib = match dib {
            Ok(dib) if !bits.is_null() => dib,
            Ok(dib) => {
                // SAFETY: Both objects were created above.
                unsafe {
                    let _ = DeleteObject(dib);
                    let _ = DeleteDC(mem_dc);
                }
                return Err(RenderError::Device("DIB section has no pixels".to_string()));
            }
            Err(e) => {
                // SAFETY: `mem_dc` was created above.
                unsafe {
                    let _ = DeleteDC(mem_dc);
                }
                return Err(RenderError::Device(e.to_string()));
            }
        };

        // SAFETY: `dib` is a valid bitmap not selected into any other DC.
        let old_bitmap = unsafe { SelectObject(mem_dc, dib) };

        Ok(Self {
            hwnd,
            origin: POINT {
                x: bounds.x,
                y: bounds.y,
            },
            size: SIZE {
                cx: bounds.width as i32,
                cy: bounds.height as i32,
            },
            mem_dc,
            dib,
            old_bitmap,
            bits: bits as *mut u8,
            len: bounds.width as usize * bounds.height as usize * 4,
        })
    }
}

impl FramePresenter for LayeredPresenter {
    fn present(&mut self, frame: &FrameBuffer) -> Result<(), RenderError> {
        if DISPLAY_CHANGED.swap(false, Ordering::SeqCst) {
            return Err(RenderError::RecreateRequired);
        }
        let bytes = frame.as_bytes();
        if bytes.len() != self.len {
            return Err(RenderError::RecreateRequired);
        }

        // SAFETY: `bits` points to `len` writable bytes owned by the DIB
        // section, which lives as long as `self`.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.bits, self.len);
        }

        let blend = BLENDFUNCTION {
            BlendOp: AC_SRC_OVER as u8,
            BlendFlags: 0,
            SourceConstantAlpha: 255,
            AlphaFormat: AC_SRC_ALPHA as u8,
        };
        let source = POINT::default();
        // SAFETY: All pointers reference locals or fields alive for the call;
        // the DIB holds premultiplied BGRA as ULW_ALPHA requires.
        unsafe {
            UpdateLayeredWindow(
                hwnd_from(self.hwnd),
                HDC::default(),
                Some(&self.origin as *const POINT),
                Some(&self.size as *const SIZE),
                self.mem_dc,
                Some(&source as *const POINT),
                COLORREF(0),
                Some(&blend as *const BLENDFUNCTION),
                ULW_ALPHA,
            )
        }
        .map_err(|e| RenderError::Device(e.to_string()))
    }
}

impl Drop for LayeredPresenter {
    fn drop(&mut self) {
        // SAFETY: Restores the original bitmap before deleting the objects
        // created in `new`.
        unsafe {
            SelectObject(self.mem_dc, self.old_bitmap);
            let _ = DeleteObject(self.dib);
            let _ = DeleteDC(self.mem_dc);
        }
    }
}
