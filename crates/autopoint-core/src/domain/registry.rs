//! MarkerRegistry: the authoritative, ordered set of markers.
//!
//! The registry is owned by the UI thread.  It is the only place markers are
//! created, edited, or destroyed, and it enforces two rules:
//!
//! 1. **Unique order.**  No two markers ever share an `order` value.  A
//!    reorder request that would break this is rejected and the marker keeps
//!    its previous order.
//! 2. **Runtime lock.**  While playback runs, hover changes are refused and
//!    every marker reports `is_runtime_locked() == true`.
//!
//! # Talking to the renderer
//!
//! The registry never touches a graphics device.  It asks a [`MarkerVisuals`]
//! implementation (the overlay renderer in the application crate) for a
//! visual per marker and hands it back on removal.  When the renderer loses
//! its device and flushes every resource, the host calls
//! [`MarkerRegistry::rebind_visuals`] to register all images again.
//!
//! # Reading positions from the hook thread
//!
//! Hook callbacks must never wait on the UI thread, yet Remove mode has to
//! decide synchronously whether a click lands on a marker.  The registry
//! therefore publishes a [`PositionSnapshot`] after every add/remove/clear,
//! which the hook thread reads under a short-lived read lock.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::marker::{ClickKind, Marker, MarkerId, MarkerSize, MouseButton, ScreenPoint};

// ── Visuals seam ──────────────────────────────────────────────────────────────

/// Opaque handle to a renderer-owned marker visual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisualHandle(pub Uuid);

impl VisualHandle {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for VisualHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Source of the bitmap drawn for a marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum MarkerImage {
    /// The target glyph shipped with the application.
    #[default]
    BuiltIn,
    /// A user-supplied bitmap file.
    File(PathBuf),
}

impl fmt::Display for MarkerImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerImage::BuiltIn => f.write_str("built-in target"),
            MarkerImage::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Error reported by a [`MarkerVisuals`] implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VisualError {
    /// The renderer has not been initialized (or was already shut down).
    #[error("renderer unavailable")]
    Unavailable,
    /// The marker image could not be decoded.
    #[error("failed to decode marker image {path}: {reason}")]
    Decode { path: String, reason: String },
    /// The graphics device refused the resource.
    #[error("graphics device error: {0}")]
    Device(String),
}

/// Renderer-side operations the registry needs.
///
/// The overlay renderer implements this; tests use a recording fake.
pub trait MarkerVisuals: Send + Sync {
    /// Registers a visual drawn at `top_left` with `size`, returning its handle.
    fn add_visual(
        &self,
        image: &MarkerImage,
        top_left: ScreenPoint,
        size: MarkerSize,
    ) -> Result<VisualHandle, VisualError>;

    /// Disposes a visual.  Unknown handles are ignored.
    fn remove_visual(&self, handle: VisualHandle);
}

// ── Change notifications ──────────────────────────────────────────────────────

/// Change notifications for UI bindings.
///
/// All methods have empty default bodies so a listener only implements the
/// events it cares about.  Listeners run synchronously on the thread that
/// mutated the registry (the UI thread).
pub trait RegistryListener: Send {
    fn on_added(&self, _marker: &Marker) {}
    fn on_removed(&self, _marker: &Marker) {}
    fn on_reordered(&self, _marker: &Marker, _previous_order: u32) {}
    /// Hover, runtime-lock, duration, or action changed.
    fn on_changed(&self, _marker: &Marker) {}
}

// ── Hook-thread position snapshot ─────────────────────────────────────────────

/// Read-mostly copy of every marker's position, shareable across threads.
#[derive(Debug, Clone, Default)]
pub struct PositionSnapshot {
    inner: Arc<RwLock<Vec<(MarkerId, ScreenPoint)>>>,
}

impl PositionSnapshot {
    /// Returns the closest marker and its distance, if any marker exists.
    pub fn nearest(&self, target: ScreenPoint) -> Option<(MarkerId, f64)> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        nearest_of(guard.iter().copied(), target)
    }

    /// Returns the closest marker if it lies within `radius` of `target`.
    pub fn nearest_within(&self, target: ScreenPoint, radius: f64) -> Option<MarkerId> {
        self.nearest(target)
            .filter(|(_, dist)| *dist <= radius)
            .map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, entries: Vec<(MarkerId, ScreenPoint)>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = entries;
    }
}

/// First-minimum nearest search shared by the registry and the snapshot.
fn nearest_of(
    entries: impl Iterator<Item = (MarkerId, ScreenPoint)>,
    target: ScreenPoint,
) -> Option<(MarkerId, f64)> {
    entries
        .map(|(id, pos)| (id, pos.distance_to(target)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

// ── Playback snapshot ─────────────────────────────────────────────────────────

/// One step of a playback pass, copied out of the registry.
///
/// The scheduler works on a `Vec<PlaybackStep>` so later registry edits do not
/// affect a run already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStep {
    pub marker_id: MarkerId,
    pub order: u32,
    pub position: ScreenPoint,
    pub button: MouseButton,
    pub click_kind: ClickKind,
    pub dwell: Duration,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Error type for registry operations.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    /// Another marker already uses the requested order value.
    #[error("order {order} already in use; change for marker {id} rejected")]
    DuplicateOrder { id: MarkerId, order: u32 },

    #[error("unknown marker: {0}")]
    UnknownMarker(MarkerId),

    /// The change is not allowed while playback holds the runtime lock.
    #[error("registry is runtime locked")]
    RuntimeLocked,

    #[error("marker visual unavailable: {0}")]
    Visual(#[from] VisualError),
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Ordered collection of markers.
///
/// Iteration via [`MarkerRegistry::markers`] follows insertion order; playback
/// order is the separate `order` field (see [`MarkerRegistry::ordered_snapshot`]).
pub struct MarkerRegistry {
    markers: Vec<Marker>,
    visuals: Arc<dyn MarkerVisuals>,
    marker_size: MarkerSize,
    runtime_mode: bool,
    listeners: Vec<Box<dyn RegistryListener>>,
    positions: PositionSnapshot,
}

impl MarkerRegistry {
    /// Creates an empty registry drawing markers through `visuals`.
    pub fn new(visuals: Arc<dyn MarkerVisuals>, marker_size: MarkerSize) -> Self {
        Self {
            markers: Vec::new(),
            visuals,
            marker_size,
            runtime_mode: false,
            listeners: Vec::new(),
            positions: PositionSnapshot::default(),
        }
    }

    /// Subscribes a change listener.
    pub fn add_listener(&mut self, listener: Box<dyn RegistryListener>) {
        self.listeners.push(listener);
    }

    /// Creates a marker at `position` and returns its id.
    ///
    /// The new marker's order is one past the current maximum (0 when empty).
    /// If `image` cannot be decoded the built-in visual is used instead and
    /// the marker is still created.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Visual`] when the renderer cannot create any
    /// visual at all (e.g. it is not initialized).
    pub fn add_point(
        &mut self,
        image: &MarkerImage,
        position: ScreenPoint,
        button: MouseButton,
        click_kind: ClickKind,
        duration_ms: u32,
    ) -> Result<MarkerId, RegistryError> {
        let (visual, image) = self.attach_visual(image, position)?;
        let order = self.next_order();

        let marker = Marker {
            id: Uuid::new_v4(),
            position,
            button,
            click_kind,
            duration_ms,
            order,
            is_hovered: false,
            is_runtime_locked: self.runtime_mode,
            image,
            visual: Some(visual),
        };
        let id = marker.id;
        debug!(%id, %position, order, "marker added");

        self.markers.push(marker);
        self.publish_positions();
        if let Some(added) = self.markers.last() {
            for listener in &self.listeners {
                listener.on_added(added);
            }
        }
        Ok(id)
    }

    /// Removes the marker closest to `target` if it lies within `radius`.
    ///
    /// Returns the removed marker's id, or `None` (with no mutation) when the
    /// registry is empty or the closest marker is farther than `radius`.
    pub fn remove_nearest(&mut self, target: ScreenPoint, radius: f64) -> Option<MarkerId> {
        let (id, dist) = nearest_of(self.markers.iter().map(|m| (m.id, m.position)), target)?;
        if dist > radius {
            return None;
        }
        let index = self.index_of(id)?;
        let removed = self.markers.remove(index);
        if let Some(handle) = removed.visual {
            self.visuals.remove_visual(handle);
        }
        debug!(%id, distance = dist, "marker removed");

        self.publish_positions();
        for listener in &self.listeners {
            listener.on_removed(&removed);
        }
        Some(id)
    }

    /// Removes marker `id` and disposes its visual.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownMarker`] if `id` is not registered.
    pub fn remove(&mut self, id: MarkerId) -> Result<(), RegistryError> {
        let index = self.index_of(id).ok_or(RegistryError::UnknownMarker(id))?;
        let removed = self.markers.remove(index);
        if let Some(handle) = removed.visual {
            self.visuals.remove_visual(handle);
        }
        self.publish_positions();
        for listener in &self.listeners {
            listener.on_removed(&removed);
        }
        Ok(())
    }

    /// Disposes every marker's visual and empties the registry.  Idempotent.
    pub fn clear_all(&mut self) {
        let removed = std::mem::take(&mut self.markers);
        for marker in &removed {
            if let Some(handle) = marker.visual {
                self.visuals.remove_visual(handle);
            }
        }
        self.publish_positions();
        for marker in &removed {
            for listener in &self.listeners {
                listener.on_removed(marker);
            }
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "registry cleared");
        }
    }

    /// Toggles the runtime lock.  Enabling it forces every hover state off.
    pub fn set_runtime_mode(&mut self, enabled: bool) {
        self.runtime_mode = enabled;
        for marker in &mut self.markers {
            let changed = marker.is_runtime_locked != enabled || (enabled && marker.is_hovered);
            marker.is_runtime_locked = enabled;
            if enabled {
                marker.is_hovered = false;
            }
            if changed {
                for listener in &self.listeners {
                    listener.on_changed(marker);
                }
            }
        }
    }

    pub fn is_runtime_mode(&self) -> bool {
        self.runtime_mode
    }

    /// Requests a new playback order for marker `id`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownMarker`] if `id` is not registered.
    /// - [`RegistryError::DuplicateOrder`] if another marker already uses
    ///   `new_order`; the marker keeps its previous order.
    pub fn request_order(&mut self, id: MarkerId, new_order: u32) -> Result<(), RegistryError> {
        let index = self.index_of(id).ok_or(RegistryError::UnknownMarker(id))?;
        let previous = self.markers[index].order;
        if previous == new_order {
            return Ok(());
        }
        if !self.is_order_unique(new_order, Some(id)) {
            warn!(%id, order = new_order, "duplicate order ignored");
            return Err(RegistryError::DuplicateOrder { id, order: new_order });
        }

        self.markers[index].order = new_order;
        let marker = &self.markers[index];
        for listener in &self.listeners {
            listener.on_reordered(marker, previous);
        }
        Ok(())
    }

    /// Returns `true` if no marker other than `exclude` uses `order`.
    pub fn is_order_unique(&self, order: u32, exclude: Option<MarkerId>) -> bool {
        !self
            .markers
            .iter()
            .any(|m| Some(m.id) != exclude && m.order == order)
    }

    /// Sets the hover state of one marker.
    ///
    /// # Errors
    ///
    /// [`RegistryError::RuntimeLocked`] while the runtime lock is held.
    pub fn set_hovered(&mut self, id: MarkerId, hovered: bool) -> Result<(), RegistryError> {
        if self.runtime_mode {
            return Err(RegistryError::RuntimeLocked);
        }
        let index = self.index_of(id).ok_or(RegistryError::UnknownMarker(id))?;
        if self.markers[index].is_hovered != hovered {
            self.markers[index].is_hovered = hovered;
            self.notify_changed(index);
        }
        Ok(())
    }

    /// Hovers `target` (or nothing) and un-hovers every other marker.
    ///
    /// # Errors
    ///
    /// [`RegistryError::RuntimeLocked`] while the runtime lock is held.
    pub fn hover_only(&mut self, target: Option<MarkerId>) -> Result<(), RegistryError> {
        if self.runtime_mode {
            return Err(RegistryError::RuntimeLocked);
        }
        for index in 0..self.markers.len() {
            let should_hover = Some(self.markers[index].id) == target;
            if self.markers[index].is_hovered != should_hover {
                self.markers[index].is_hovered = should_hover;
                self.notify_changed(index);
            }
        }
        Ok(())
    }

    /// Changes the dwell time of marker `id`.
    pub fn set_duration(&mut self, id: MarkerId, duration_ms: u32) -> Result<(), RegistryError> {
        let index = self.index_of(id).ok_or(RegistryError::UnknownMarker(id))?;
        if self.markers[index].duration_ms != duration_ms {
            self.markers[index].duration_ms = duration_ms;
            self.notify_changed(index);
        }
        Ok(())
    }

    /// Changes the button and click kind of marker `id`.
    pub fn set_action(
        &mut self,
        id: MarkerId,
        button: MouseButton,
        click_kind: ClickKind,
    ) -> Result<(), RegistryError> {
        let index = self.index_of(id).ok_or(RegistryError::UnknownMarker(id))?;
        let marker = &mut self.markers[index];
        if marker.button != button || marker.click_kind != click_kind {
            marker.button = button;
            marker.click_kind = click_kind;
            self.notify_changed(index);
        }
        Ok(())
    }

    /// Registers every marker's image again after the renderer recreated its
    /// device.  Old handles are not released: the renderer already flushed them.
    ///
    /// Returns the number of markers that received a new visual.
    pub fn rebind_visuals(&mut self) -> usize {
        let mut rebound = 0;
        for index in 0..self.markers.len() {
            let (image, position) = {
                let m = &self.markers[index];
                (m.image.clone(), m.position)
            };
            match self.attach_visual(&image, position) {
                Ok((handle, image)) => {
                    let marker = &mut self.markers[index];
                    marker.visual = Some(handle);
                    marker.image = image;
                    rebound += 1;
                }
                Err(e) => {
                    warn!(id = %self.markers[index].id, "failed to rebind marker visual: {e}");
                    self.markers[index].visual = None;
                }
            }
        }
        debug!(rebound, total = self.markers.len(), "marker visuals rebound");
        rebound
    }

    /// Markers in insertion order.
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn get(&self, id: MarkerId) -> Option<&Marker> {
        self.markers.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn marker_size(&self) -> MarkerSize {
        self.marker_size
    }

    /// Markers sorted by ascending `order`, copied for playback.
    pub fn ordered_snapshot(&self) -> Vec<PlaybackStep> {
        let mut steps: Vec<PlaybackStep> = self
            .markers
            .iter()
            .map(|m| PlaybackStep {
                marker_id: m.id,
                order: m.order,
                position: m.position,
                button: m.button,
                click_kind: m.click_kind,
                dwell: Duration::from_millis(u64::from(m.duration_ms)),
            })
            .collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    /// Shared position snapshot for the hook thread.
    pub fn positions(&self) -> PositionSnapshot {
        self.positions.clone()
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn next_order(&self) -> u32 {
        self.markers
            .iter()
            .map(|m| m.order)
            .max()
            .map_or(0, |max| max.saturating_add(1))
    }

    fn index_of(&self, id: MarkerId) -> Option<usize> {
        self.markers.iter().position(|m| m.id == id)
    }

    fn notify_changed(&self, index: usize) {
        let marker = &self.markers[index];
        for listener in &self.listeners {
            listener.on_changed(marker);
        }
    }

    fn publish_positions(&self) {
        self.positions
            .publish(self.markers.iter().map(|m| (m.id, m.position)).collect());
    }

    /// Creates a visual for `image`, falling back to the built-in image when a
    /// custom bitmap fails to decode.  Returns the handle and the image that
    /// was actually used.
    fn attach_visual(
        &self,
        image: &MarkerImage,
        position: ScreenPoint,
    ) -> Result<(VisualHandle, MarkerImage), RegistryError> {
        let origin = position.centered_box_origin(self.marker_size);
        match self.visuals.add_visual(image, origin, self.marker_size) {
            Ok(handle) => Ok((handle, image.clone())),
            Err(VisualError::Decode { path, reason }) if *image != MarkerImage::BuiltIn => {
                warn!(%path, %reason, "marker image unusable, falling back to built-in target");
                let handle =
                    self.visuals
                        .add_visual(&MarkerImage::BuiltIn, origin, self.marker_size)?;
                Ok((handle, MarkerImage::BuiltIn))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
