//! Marker entity and its value types.
//!
//! A [`Marker`] is one automated action point: a screen position plus the
//! click to perform there and how long to dwell afterwards.  Markers are only
//! created and mutated through [`crate::MarkerRegistry`], which owns the
//! ordering rules; this module holds the plain data.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::registry::{MarkerImage, VisualHandle};

/// Unique identifier for a marker, generated on creation (UUID v4).
pub type MarkerId = Uuid;

/// Integer position in virtual-desktop coordinates (multi-monitor aware, may
/// be negative on monitors left of or above the primary one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

impl ScreenPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other` in pixels.
    pub fn distance_to(self, other: ScreenPoint) -> f64 {
        let dx = f64::from(self.x) - f64::from(other.x);
        let dy = f64::from(self.y) - f64::from(other.y);
        (dx * dx + dy * dy).sqrt()
    }

    /// Returns `true` when both axes differ from `other` by less than `px`.
    pub fn is_within_jitter(self, other: ScreenPoint, px: u32) -> bool {
        self.x.abs_diff(other.x) < px && self.y.abs_diff(other.y) < px
    }

    /// Top-left corner of a box of `size` centred on this point.
    pub fn centered_box_origin(self, size: MarkerSize) -> ScreenPoint {
        ScreenPoint {
            x: self.x - (size.width / 2) as i32,
            y: self.y - (size.height / 2) as i32,
        }
    }
}

impl fmt::Display for ScreenPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Pixel size of a marker's visual on the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerSize {
    pub width: u32,
    pub height: u32,
}

impl MarkerSize {
    pub const fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }
}

impl Default for MarkerSize {
    fn default() -> Self {
        Self::square(32)
    }
}

/// Mouse button used for an automated click.
///
/// `SystemDefault` resolves to the user's primary button at injection time,
/// so a left-handed (swapped) setup clicks with the physical right button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    #[default]
    SystemDefault,
}

impl MouseButton {
    pub const ALL: [MouseButton; 4] = [
        MouseButton::Left,
        MouseButton::Right,
        MouseButton::Middle,
        MouseButton::SystemDefault,
    ];

    /// Persisted name of the button.
    pub fn as_name(self) -> &'static str {
        match self {
            MouseButton::Left => "Left",
            MouseButton::Right => "Right",
            MouseButton::Middle => "Middle",
            MouseButton::SystemDefault => "Default",
        }
    }

    /// Parses a persisted name, case-insensitively.  `"System"` is accepted as
    /// an alias of `"Default"`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("system") {
            return Some(MouseButton::SystemDefault);
        }
        Self::ALL
            .into_iter()
            .find(|b| b.as_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_name())
    }
}

/// Whether an automated click is a single or a double click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClickKind {
    #[default]
    Single,
    Double,
}

impl ClickKind {
    /// Number of press/release pairs the click consists of.
    pub fn repetitions(self) -> usize {
        match self {
            ClickKind::Single => 1,
            ClickKind::Double => 2,
        }
    }

    pub fn as_name(self) -> &'static str {
        match self {
            ClickKind::Single => "Single",
            ClickKind::Double => "Double",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        [ClickKind::Single, ClickKind::Double]
            .into_iter()
            .find(|k| k.as_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ClickKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_name())
    }
}

/// One automated action point.
///
/// Fields are read through accessors; every mutation goes through the
/// registry so the order-uniqueness and runtime-lock rules cannot be bypassed.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub(crate) id: MarkerId,
    pub(crate) position: ScreenPoint,
    pub(crate) button: MouseButton,
    pub(crate) click_kind: ClickKind,
    pub(crate) duration_ms: u32,
    pub(crate) order: u32,
    pub(crate) is_hovered: bool,
    pub(crate) is_runtime_locked: bool,
    pub(crate) image: MarkerImage,
    pub(crate) visual: Option<VisualHandle>,
}

impl Marker {
    pub fn id(&self) -> MarkerId {
        self.id
    }

    pub fn position(&self) -> ScreenPoint {
        self.position
    }

    pub fn button(&self) -> MouseButton {
        self.button
    }

    pub fn click_kind(&self) -> ClickKind {
        self.click_kind
    }

    /// Dwell time after this marker's click during playback.
    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    /// Position of this marker in the playback sequence.
    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn is_hovered(&self) -> bool {
        self.is_hovered
    }

    pub fn is_runtime_locked(&self) -> bool {
        self.is_runtime_locked
    }

    /// Bitmap the overlay draws for this marker.
    pub fn image(&self) -> &MarkerImage {
        &self.image
    }

    /// Overlay resource currently showing this marker, if any.
    pub fn visual(&self) -> Option<VisualHandle> {
        self.visual
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
