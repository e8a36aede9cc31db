//! Overlay renderer: draws every marker on a transparent, click-through,
//! always-on-top surface spanning the whole virtual desktop.
//!
//! # Layers (for beginners)
//!
//! ```text
//!  MarkerRegistry ──MarkerVisuals──▶ OverlayService ──SurfaceContext──▶ pixels on screen
//!                                         │
//!                                         └──SurfaceDevice (creates contexts, z-order)
//! ```
//!
//! - [`OverlayService`] keeps the draw list (one [`OverlayImageEntry`] per
//!   marker) and the decoded bitmaps.  All mutation and rendering happen
//!   under one mutex, so a render pass never sees a half-updated list.
//! - A [`SurfaceDevice`] is the platform window.  It creates
//!   [`SurfaceContext`]s, which own GPU/GDI resources and can be *lost*.
//!
//! # Device loss
//!
//! When a frame fails with [`RenderError::RecreateRequired`] the service:
//!
//! 1. releases every texture and drops the context (one flush),
//! 2. sleeps `recreate_backoff` with the lock released,
//! 3. creates a new context,
//! 4. publishes [`OverlayEvent::RendererRecreated`],
//! 5. retries the render pass once.
//!
//! The draw list is empty after a flush.  Subscribers re-add their images,
//! typically through [`autopoint_core::MarkerRegistry::rebind_visuals`].
//!
//! Nothing redraws on its own between marker edits, so the host forwards
//! [`SurfaceEvent::DisplayChanged`] to [`OverlayService::handle_surface_event`]
//! to run the recovery right away.  If creating the new context fails the
//! service stays unavailable; the host retries with
//! [`OverlayService::restore`] until it comes back, which publishes the same
//! `RendererRecreated` event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use autopoint_core::{MarkerImage, MarkerSize, MarkerVisuals, ScreenPoint, VisualError, VisualHandle};
use image::RgbaImage;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

pub mod compositor;
pub mod headless;
pub mod image_source;
pub mod mock;

#[cfg(target_os = "windows")]
pub mod windows;

// ── Device seams ──────────────────────────────────────────────────────────────

/// Rectangle in virtual-desktop pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl SurfaceRect {
    pub fn new(origin: ScreenPoint, size: MarkerSize) -> Self {
        Self {
            x: origin.x,
            y: origin.y,
            width: size.width,
            height: size.height,
        }
    }
}

/// Identifier of an uploaded bitmap inside one [`SurfaceContext`].
pub type TextureId = u64;

/// Error type for overlay rendering.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// The graphics context was lost and must be recreated.
    #[error("graphics device lost; surface must be recreated")]
    RecreateRequired,
    /// The renderer is not initialized or already shut down.
    #[error("renderer unavailable")]
    Unavailable,
    #[error("failed to decode marker image {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("graphics device error: {0}")]
    Device(String),
}

impl From<RenderError> for VisualError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Unavailable => VisualError::Unavailable,
            RenderError::Decode { path, reason } => VisualError::Decode { path, reason },
            other => VisualError::Device(other.to_string()),
        }
    }
}

/// Drawing resources bound to one device generation.
pub trait SurfaceContext: Send {
    /// Uploads a straight-alpha RGBA bitmap.
    fn upload(&mut self, image: &RgbaImage) -> Result<TextureId, RenderError>;

    /// Releases a texture.  Unknown ids are ignored.
    fn release(&mut self, texture: TextureId);

    /// Starts a frame; the surface is cleared to fully transparent.
    fn begin_frame(&mut self) -> Result<(), RenderError>;

    /// Draws `texture` stretched over `rect` (virtual-desktop coordinates).
    fn draw(&mut self, texture: TextureId, rect: SurfaceRect);

    /// Presents the frame.
    fn end_frame(&mut self) -> Result<(), RenderError>;
}

/// The platform overlay window.
pub trait SurfaceDevice: Send {
    /// Virtual-desktop area the surface covers.
    fn desktop_bounds(&self) -> SurfaceRect;

    /// Creates a fresh drawing context.
    fn create_context(&mut self) -> Result<Box<dyn SurfaceContext>, RenderError>;

    /// Puts the surface back on top of the z-order without activating it.
    fn reassert_topmost(&self);
}

// ── Service ───────────────────────────────────────────────────────────────────

/// Tuning for [`OverlayService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Pause between dropping a lost context and creating the next one.
    pub recreate_backoff: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            recreate_backoff: Duration::from_millis(250),
        }
    }
}

/// Notifications published by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayEvent {
    /// The context was recreated; every previously added image is gone.
    RendererRecreated,
}

/// Notifications from the platform window, delivered to the host's loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// Another window became the foreground window.
    ForegroundChanged,
    /// Resolution or monitor layout changed; the current context is stale.
    DisplayChanged,
}

/// One marker's cached bitmap and placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayImageEntry {
    pub texture: TextureId,
    pub top_left: ScreenPoint,
    pub size: MarkerSize,
}

struct OverlayInner {
    device: Box<dyn SurfaceDevice>,
    context: Option<Box<dyn SurfaceContext>>,
    entries: Vec<(VisualHandle, OverlayImageEntry)>,
    /// CPU-side bitmaps; survive device loss.
    decoded: HashMap<(MarkerImage, MarkerSize), Arc<RgbaImage>>,
    disposed: bool,
}

impl OverlayInner {
    /// Releases every texture and drops the context.
    fn flush(&mut self) {
        if let Some(mut context) = self.context.take() {
            for (_, entry) in &self.entries {
                context.release(entry.texture);
            }
        }
        self.entries.clear();
    }

    fn render_pass(&mut self) -> Result<(), RenderError> {
        let context = self.context.as_mut().ok_or(RenderError::Unavailable)?;
        context.begin_frame()?;
        for (_, entry) in &self.entries {
            context.draw(entry.texture, SurfaceRect::new(entry.top_left, entry.size));
        }
        context.end_frame()
    }

    fn bitmap(
        &mut self,
        image: &MarkerImage,
        size: MarkerSize,
    ) -> Result<Arc<RgbaImage>, RenderError> {
        let key = (image.clone(), size);
        if let Some(bitmap) = self.decoded.get(&key) {
            return Ok(Arc::clone(bitmap));
        }
        let bitmap = Arc::new(image_source::decode_marker_image(image, size)?);
        self.decoded.insert(key, Arc::clone(&bitmap));
        Ok(bitmap)
    }
}

/// Explicitly constructed overlay renderer, owned by the application root.
pub struct OverlayService {
    inner: Mutex<OverlayInner>,
    config: OverlayConfig,
    subscribers: Mutex<Vec<UnboundedSender<OverlayEvent>>>,
}

impl OverlayService {
    /// Creates an uninitialized service; call [`OverlayService::initialize`].
    pub fn new(device: Box<dyn SurfaceDevice>, config: OverlayConfig) -> Self {
        Self {
            inner: Mutex::new(OverlayInner {
                device,
                context: None,
                entries: Vec::new(),
                decoded: HashMap::new(),
                disposed: false,
            }),
            config,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Creates the first drawing context.  Idempotent while running.
    ///
    /// # Errors
    ///
    /// [`RenderError::Unavailable`] after [`OverlayService::shutdown`], or the
    /// device's error if the context cannot be created.
    pub fn initialize(&self) -> Result<(), RenderError> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(RenderError::Unavailable);
        }
        if inner.context.is_none() {
            let context = inner.device.create_context()?;
            inner.context = Some(context);
            let bounds = inner.device.desktop_bounds();
            info!(
                x = bounds.x,
                y = bounds.y,
                width = bounds.width,
                height = bounds.height,
                "overlay initialized"
            );
        }
        Ok(())
    }

    /// Releases every resource.  Later calls to `add` fail with `Unavailable`.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.flush();
        inner.decoded.clear();
        inner.disposed = true;
        info!("overlay shut down");
    }

    /// Returns a receiver for renderer notifications.
    pub fn subscribe(&self) -> UnboundedReceiver<OverlayEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Decodes `image` (once per image and size), uploads it, and draws it at
    /// `top_left` from the next frame on.
    ///
    /// # Errors
    ///
    /// [`RenderError::Unavailable`] if not initialized, [`RenderError::Decode`]
    /// if the bitmap cannot be read.
    pub fn add(
        &self,
        image: &MarkerImage,
        top_left: ScreenPoint,
        size: MarkerSize,
    ) -> Result<VisualHandle, RenderError> {
        let handle = {
            let mut inner = self.lock();
            if inner.disposed || inner.context.is_none() {
                return Err(RenderError::Unavailable);
            }
            let bitmap = inner.bitmap(image, size)?;
            let context = inner.context.as_mut().ok_or(RenderError::Unavailable)?;
            let texture = context.upload(&bitmap)?;
            let handle = VisualHandle::new_v4();
            inner.entries.push((
                handle,
                OverlayImageEntry {
                    texture,
                    top_left,
                    size,
                },
            ));
            handle
        };
        self.redraw();
        Ok(handle)
    }

    /// Disposes the entry for `handle`.  Unknown handles are ignored.
    pub fn remove(&self, handle: VisualHandle) {
        {
            let mut inner = self.lock();
            let Some(index) = inner.entries.iter().position(|(h, _)| *h == handle) else {
                debug!(%handle, "remove for unknown overlay handle ignored");
                return;
            };
            let (_, entry) = inner.entries.remove(index);
            if let Some(context) = inner.context.as_mut() {
                context.release(entry.texture);
            }
        }
        self.redraw();
    }

    /// Disposes every entry.
    pub fn clear(&self) {
        {
            let mut inner = self.lock();
            let inner = &mut *inner;
            if let Some(context) = inner.context.as_mut() {
                for (_, entry) in &inner.entries {
                    context.release(entry.texture);
                }
            }
            inner.entries.clear();
        }
        self.redraw();
    }

    /// Number of entries currently in the draw list.
    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Clears the surface and draws every entry, recovering once from device
    /// loss.
    ///
    /// # Errors
    ///
    /// [`RenderError::Unavailable`] if not initialized; any error of the
    /// retried pass or of context recreation.
    pub fn render(&self) -> Result<(), RenderError> {
        let first = self.lock().render_pass();
        match first {
            Err(RenderError::RecreateRequired) => {
                self.recover()?;
                self.lock().render_pass()
            }
            other => other,
        }
    }

    /// Called on a foreground-window change: puts the surface back on top.
    pub fn handle_foreground_change(&self) {
        self.lock().device.reassert_topmost();
    }

    /// Reacts to a platform window notification.
    ///
    /// A display change renders immediately so a stale context is detected
    /// and recreated without waiting for the next marker edit.
    pub fn handle_surface_event(&self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::ForegroundChanged => self.handle_foreground_change(),
            SurfaceEvent::DisplayChanged => {
                info!("display configuration changed; refreshing overlay");
                self.redraw();
            }
        }
    }

    /// `true` while a drawing context exists.
    pub fn is_available(&self) -> bool {
        let inner = self.lock();
        !inner.disposed && inner.context.is_some()
    }

    /// Recreates the context after a failed recovery.
    ///
    /// Returns `Ok(true)` when a new context was created (subscribers receive
    /// [`OverlayEvent::RendererRecreated`]) and `Ok(false)` when the renderer
    /// was already available.
    ///
    /// # Errors
    ///
    /// [`RenderError::Unavailable`] after [`OverlayService::shutdown`], or the
    /// device's error if the context still cannot be created.
    pub fn restore(&self) -> Result<bool, RenderError> {
        {
            let mut inner = self.lock();
            if inner.disposed {
                return Err(RenderError::Unavailable);
            }
            if inner.context.is_some() {
                return Ok(false);
            }
            let context = inner.device.create_context()?;
            inner.context = Some(context);
        }

        info!("overlay surface restored");
        self.notify(OverlayEvent::RendererRecreated);
        self.redraw();
        Ok(true)
    }

    fn recover(&self) -> Result<(), RenderError> {
        warn!("graphics device lost; recreating overlay surface");
        self.lock().flush();

        thread::sleep(self.config.recreate_backoff);

        {
            let mut inner = self.lock();
            if inner.disposed {
                return Err(RenderError::Unavailable);
            }
            let context = inner.device.create_context().map_err(|e| {
                error!("overlay surface recreation failed: {e}");
                e
            })?;
            inner.context = Some(context);
        }

        info!("overlay surface recreated");
        self.notify(OverlayEvent::RendererRecreated);
        Ok(())
    }

    fn redraw(&self) {
        match self.render() {
            Ok(()) => {}
            Err(RenderError::Unavailable) => debug!("overlay redraw skipped: unavailable"),
            Err(e) => error!("overlay render failed: {e}"),
        }
    }

    fn notify(&self, event: OverlayEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event).is_ok());
    }

    fn lock(&self) -> MutexGuard<'_, OverlayInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MarkerVisuals for OverlayService {
    fn add_visual(
        &self,
        image: &MarkerImage,
        top_left: ScreenPoint,
        size: MarkerSize,
    ) -> Result<VisualHandle, VisualError> {
        self.add(image, top_left, size).map_err(VisualError::from)
    }

    fn remove_visual(&self, handle: VisualHandle) {
        self.remove(handle);
    }
}
