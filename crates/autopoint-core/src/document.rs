//! Point-set documents: the JSON file a user saves markers into.
//!
//! ```json
//! {
//!   "duration": 1000,
//!   "points": [
//!     { "x": 10, "y": 10, "button": "Left",  "click_kind": "Single", "duration_ms": 500 },
//!     { "x": 20, "y": 20, "button": "Right", "click_kind": "Double", "duration_ms": 300 }
//!   ]
//! }
//! ```
//!
//! The document lists markers in playback order.  Button and click-kind names
//! are kept as strings on disk and mapped to [`MouseButton`] / [`ClickKind`]
//! when the document is applied to a registry, so one unknown name rejects
//! the whole document before anything in the registry changes.
//!
//! `duration` is the optional global duration used when the marker list is
//! empty during playback.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::marker::{ClickKind, MarkerId, MouseButton, ScreenPoint};
use crate::domain::registry::{MarkerImage, MarkerRegistry, RegistryError};

/// Error type for point-set document operations.
#[derive(Debug, Error)]
pub enum PointDocumentError {
    #[error("I/O error accessing point file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed point document: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("failed to serialize point document: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The document contains no points.
    #[error("point document contains no points")]
    Empty,

    #[error("unknown mouse button {name:?} at point {index}")]
    UnknownButton { index: usize, name: String },

    #[error("unknown click kind {name:?} at point {index}")]
    UnknownClickKind { index: usize, name: String },

    /// The registry could not materialize a marker.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ── Document schema ───────────────────────────────────────────────────────────

/// On-disk point set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointDocument {
    /// Global duration in milliseconds, if the user saved one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default)]
    pub points: Vec<PointRecord>,
}

/// One marker as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointRecord {
    pub x: i32,
    pub y: i32,
    pub button: String,
    pub click_kind: String,
    #[serde(default)]
    pub duration_ms: u32,
}

impl PointRecord {
    pub fn new(
        position: ScreenPoint,
        button: MouseButton,
        click_kind: ClickKind,
        duration_ms: u32,
    ) -> Self {
        Self {
            x: position.x,
            y: position.y,
            button: button.as_name().to_string(),
            click_kind: click_kind.as_name().to_string(),
            duration_ms,
        }
    }

    pub fn position(&self) -> ScreenPoint {
        ScreenPoint::new(self.x, self.y)
    }
}

/// A record whose names have been resolved to typed values.
struct ResolvedPoint {
    position: ScreenPoint,
    button: MouseButton,
    click_kind: ClickKind,
    duration_ms: u32,
}

impl PointDocument {
    /// Parses a document from JSON text.  Does not reject empty documents.
    pub fn from_json(text: &str) -> Result<Self, PointDocumentError> {
        serde_json::from_str(text).map_err(PointDocumentError::Parse)
    }

    pub fn to_json_pretty(&self) -> Result<String, PointDocumentError> {
        serde_json::to_string_pretty(self).map_err(PointDocumentError::Serialize)
    }

    fn resolve(&self) -> Result<Vec<ResolvedPoint>, PointDocumentError> {
        self.points
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let button = MouseButton::from_name(&record.button).ok_or_else(|| {
                    PointDocumentError::UnknownButton {
                        index,
                        name: record.button.clone(),
                    }
                })?;
                let click_kind = ClickKind::from_name(&record.click_kind).ok_or_else(|| {
                    PointDocumentError::UnknownClickKind {
                        index,
                        name: record.click_kind.clone(),
                    }
                })?;
                Ok(ResolvedPoint {
                    position: record.position(),
                    button,
                    click_kind,
                    duration_ms: record.duration_ms,
                })
            })
            .collect()
    }
}

// ── Registry bridge ───────────────────────────────────────────────────────────

/// Replaces the registry's entire contents with the markers in `document`.
///
/// Markers receive orders `0..N` matching document order.  The load is all
/// or nothing: on any error the registry keeps exactly the markers it had.
///
/// # Errors
///
/// - [`PointDocumentError::UnknownButton`] / [`PointDocumentError::UnknownClickKind`]
///   for names outside the closed sets.
/// - [`PointDocumentError::Registry`] if the renderer cannot create a visual;
///   the markers added before the failure are removed again.
pub fn load_points(
    registry: &mut MarkerRegistry,
    document: &PointDocument,
    image: &MarkerImage,
) -> Result<Vec<MarkerId>, PointDocumentError> {
    let resolved = document.resolve()?;
    let previous: Vec<MarkerId> = registry.markers().iter().map(|m| m.id()).collect();

    // New markers go in next to the old ones so a failure can be undone.
    let mut ids = Vec::with_capacity(resolved.len());
    for point in resolved {
        let added = registry.add_point(
            image,
            point.position,
            point.button,
            point.click_kind,
            point.duration_ms,
        );
        match added {
            Ok(id) => ids.push(id),
            Err(e) => {
                for id in &ids {
                    registry.remove(*id)?;
                }
                warn!(added = ids.len(), "point set load rolled back: {e}");
                return Err(e.into());
            }
        }
    }

    for id in previous {
        registry.remove(id)?;
    }
    // New markers hold orders above every old one; renumber them 0..N.  Each
    // target is below every order not yet renumbered, so none collide.
    for (order, id) in (0u32..).zip(&ids) {
        registry.request_order(*id, order)?;
    }
    info!(count = ids.len(), "point set loaded");
    Ok(ids)
}

/// Emits the registry's markers in ascending `order`.
///
/// The global duration is not part of the registry; callers set
/// [`PointDocument::duration`] themselves.
pub fn save_points(registry: &MarkerRegistry) -> PointDocument {
    PointDocument {
        duration: None,
        points: registry
            .ordered_snapshot()
            .into_iter()
            .map(|step| {
                let dwell_ms = u32::try_from(step.dwell.as_millis()).unwrap_or(u32::MAX);
                PointRecord::new(step.position, step.button, step.click_kind, dwell_ms)
            })
            .collect(),
    }
}

// ── Files ─────────────────────────────────────────────────────────────────────

/// Reads a document from `path`.
///
/// # Errors
///
/// [`PointDocumentError::Io`] if the file cannot be read,
/// [`PointDocumentError::Parse`] if it is not a valid document, and
/// [`PointDocumentError::Empty`] if it lists no points.
pub fn read_document(path: &Path) -> Result<PointDocument, PointDocumentError> {
    let text = std::fs::read_to_string(path).map_err(|source| PointDocumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document = PointDocument::from_json(&text)?;
    if document.points.is_empty() {
        return Err(PointDocumentError::Empty);
    }
    Ok(document)
}

/// Writes `document` to `path`, creating parent directories as needed.
pub fn write_document(path: &Path, document: &PointDocument) -> Result<(), PointDocumentError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| PointDocumentError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = document.to_json_pretty()?;
    std::fs::write(path, content).map_err(|source| PointDocumentError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::marker::MarkerSize;
    use crate::domain::registry::{MarkerVisuals, VisualError, VisualHandle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    struct NullVisuals;

    impl MarkerVisuals for NullVisuals {
        fn add_visual(
            &self,
            _image: &MarkerImage,
            _top_left: ScreenPoint,
            _size: MarkerSize,
        ) -> Result<VisualHandle, VisualError> {
            Ok(VisualHandle::new_v4())
        }

        fn remove_visual(&self, _handle: VisualHandle) {}
    }

    fn make_registry() -> MarkerRegistry {
        MarkerRegistry::new(Arc::new(NullVisuals), MarkerSize::default())
    }

    fn sample_document() -> PointDocument {
        PointDocument {
            duration: Some(250),
            points: vec![
                PointRecord::new(ScreenPoint::new(10, 10), MouseButton::Left, ClickKind::Single, 500),
                PointRecord::new(ScreenPoint::new(20, 20), MouseButton::Right, ClickKind::Double, 300),
                PointRecord::new(
                    ScreenPoint::new(-5, 40),
                    MouseButton::SystemDefault,
                    ClickKind::Single,
                    0,
                ),
            ],
        }
    }

    #[test]
    fn test_load_points_assigns_document_order() {
        // Arrange
        let mut registry = make_registry();

        // Act
        let ids = load_points(&mut registry, &sample_document(), &MarkerImage::BuiltIn).unwrap();

        // Assert
        let orders: Vec<u32> = ids.iter().map(|id| registry.get(*id).unwrap().order()).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_load_points_replaces_existing_markers() {
        let mut registry = make_registry();
        load_points(&mut registry, &sample_document(), &MarkerImage::BuiltIn).unwrap();

        let single = PointDocument {
            duration: None,
            points: vec![PointRecord::new(
                ScreenPoint::new(1, 1),
                MouseButton::Middle,
                ClickKind::Single,
                5,
            )],
        };
        load_points(&mut registry, &single, &MarkerImage::BuiltIn).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.markers()[0].order(), 0);
    }

    #[test]
    fn test_save_after_load_preserves_actions() {
        // Arrange
        let mut registry = make_registry();
        let document = sample_document();

        // Act
        load_points(&mut registry, &document, &MarkerImage::BuiltIn).unwrap();
        let saved = save_points(&registry);

        // Assert
        assert_eq!(saved.points, document.points);
    }

    #[test]
    fn test_load_points_rejects_unknown_button_without_touching_registry() {
        // Arrange
        let mut registry = make_registry();
        load_points(&mut registry, &sample_document(), &MarkerImage::BuiltIn).unwrap();
        let mut bad = sample_document();
        bad.points[1].button = "Thumb".to_string();

        // Act
        let result = load_points(&mut registry, &bad, &MarkerImage::BuiltIn);

        // Assert
        assert!(matches!(
            result,
            Err(PointDocumentError::UnknownButton { index: 1, .. })
        ));
        assert_eq!(registry.len(), 3);
    }

    /// Accepts `budget` visuals, then reports the renderer unavailable.
    struct BudgetVisuals {
        budget: AtomicUsize,
        live: AtomicUsize,
    }

    impl MarkerVisuals for BudgetVisuals {
        fn add_visual(
            &self,
            _image: &MarkerImage,
            _top_left: ScreenPoint,
            _size: MarkerSize,
        ) -> Result<VisualHandle, VisualError> {
            let left = self.budget.load(Ordering::SeqCst);
            if left == 0 {
                return Err(VisualError::Unavailable);
            }
            self.budget.store(left - 1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(VisualHandle::new_v4())
        }

        fn remove_visual(&self, _handle: VisualHandle) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_load_points_failing_midway_keeps_previous_markers() {
        // Arrange: two existing markers, room for one more visual only.
        let visuals = Arc::new(BudgetVisuals {
            budget: AtomicUsize::new(3),
            live: AtomicUsize::new(0),
        });
        let mut registry = MarkerRegistry::new(visuals.clone(), MarkerSize::default());
        for x in [100, 200] {
            registry
                .add_point(
                    &MarkerImage::BuiltIn,
                    ScreenPoint::new(x, x),
                    MouseButton::Left,
                    ClickKind::Single,
                    40,
                )
                .unwrap();
        }
        let before = save_points(&registry);

        // Act
        let result = load_points(&mut registry, &sample_document(), &MarkerImage::BuiltIn);

        // Assert
        assert!(matches!(
            result,
            Err(PointDocumentError::Registry(RegistryError::Visual(
                VisualError::Unavailable
            )))
        ));
        assert_eq!(registry.len(), 2);
        assert_eq!(save_points(&registry), before);
        assert_eq!(visuals.live.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_load_points_over_existing_markers_renumbers_from_zero() {
        // Arrange: existing orders 0 and 7.
        let mut registry = make_registry();
        let first = registry
            .add_point(&MarkerImage::BuiltIn, ScreenPoint::new(1, 1), MouseButton::Left, ClickKind::Single, 1)
            .unwrap();
        registry
            .add_point(&MarkerImage::BuiltIn, ScreenPoint::new(2, 2), MouseButton::Left, ClickKind::Single, 1)
            .unwrap();
        registry.request_order(first, 7).unwrap();

        // Act
        let ids = load_points(&mut registry, &sample_document(), &MarkerImage::BuiltIn).unwrap();

        // Assert
        assert_eq!(registry.len(), 3);
        let orders: Vec<u32> = ids.iter().map(|id| registry.get(*id).unwrap().order()).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(save_points(&registry).points, sample_document().points);
    }

    #[test]
    fn test_load_points_rejects_unknown_click_kind() {
        let mut registry = make_registry();
        let mut bad = sample_document();
        bad.points[0].click_kind = "Triple".to_string();

        let result = load_points(&mut registry, &bad, &MarkerImage::BuiltIn);

        assert!(matches!(
            result,
            Err(PointDocumentError::UnknownClickKind { index: 0, .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_system_button_alias_is_accepted() {
        let mut registry = make_registry();
        let mut doc = sample_document();
        doc.points[0].button = "System".to_string();

        load_points(&mut registry, &doc, &MarkerImage::BuiltIn).unwrap();

        assert_eq!(registry.markers()[0].button(), MouseButton::SystemDefault);
    }

    #[test]
    fn test_from_json_missing_duration_defaults() {
        let text = r#"{ "points": [ { "x": 1, "y": 2, "button": "Left", "click_kind": "Single" } ] }"#;

        let doc = PointDocument::from_json(text).unwrap();

        assert_eq!(doc.duration, None);
        assert_eq!(doc.points[0].duration_ms, 0);
    }

    #[test]
    fn test_from_json_malformed_returns_parse_error() {
        let result = PointDocument::from_json("{ not json");
        assert!(matches!(result, Err(PointDocumentError::Parse(_))));
    }

    #[test]
    fn test_to_json_omits_absent_duration() {
        let doc = PointDocument::default();
        let text = doc.to_json_pretty().unwrap();
        assert!(!text.contains("duration\""), "got {text}");
    }

    // ── Files ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_write_then_read_document_via_temp_dir() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("autopoint_test_{}", Uuid::new_v4()));
        let path = dir.join("nested").join("points.json");
        let doc = sample_document();

        // Act
        write_document(&path, &doc).unwrap();
        let restored = read_document(&path).unwrap();

        // Assert
        assert_eq!(restored, doc);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_read_document_rejects_empty_point_list() {
        let dir = std::env::temp_dir().join(format!("autopoint_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.json");
        std::fs::write(&path, r#"{ "duration": 100 }"#).unwrap();

        let result = read_document(&path);

        assert!(matches!(result, Err(PointDocumentError::Empty)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_read_document_missing_file_returns_io_error() {
        let path = PathBuf::from("/nonexistent/autopoint/points.json");
        let result = read_document(&path);
        assert!(matches!(result, Err(PointDocumentError::Io { .. })));
    }
}
