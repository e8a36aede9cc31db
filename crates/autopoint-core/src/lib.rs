//! # autopoint-core
//!
//! Shared library for AutoPoint containing the marker model, the ordered
//! marker registry, and the point-set document format.
//!
//! This crate has zero dependencies on OS APIs, graphics devices, or input
//! hooks.  Everything that touches the desktop lives in the `autopoint` crate
//! and reaches this one through small traits.
//!
//! # Architecture overview (for beginners)
//!
//! AutoPoint lets a user drop *markers* on arbitrary screen positions and then
//! replays a click at each marker, in order, on a background thread.
//!
//! - **`domain`** – The [`Marker`] entity, its action (button + click kind +
//!   dwell duration) and the [`MarkerRegistry`] that keeps the playback order
//!   unique.  The registry talks to the renderer only through the
//!   [`MarkerVisuals`] trait.
//!
//! - **`document`** – The JSON point-set file: reading, writing, and the
//!   `load_points` / `save_points` bridge between a document and a registry.

pub mod document;
pub mod domain;

// Re-export the most-used types at the crate root so callers can write
// `autopoint_core::MarkerRegistry` instead of the full module path.
pub use document::{
    load_points, read_document, save_points, write_document, PointDocument, PointDocumentError,
    PointRecord,
};
pub use domain::marker::{ClickKind, Marker, MarkerId, MarkerSize, MouseButton, ScreenPoint};
pub use domain::registry::{
    MarkerImage, MarkerVisuals, PositionSnapshot, RegistryError, RegistryListener,
    MarkerRegistry, PlaybackStep, VisualError, VisualHandle,
};
