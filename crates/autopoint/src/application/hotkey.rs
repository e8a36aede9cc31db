//! Playback toggle hotkey: chord parsing and pressed-key tracking.
//!
//! A chord is written `Mod+Mod+Key`, e.g. `"F6"` or `"Ctrl+Shift+P"`.
//! Modifiers are `Ctrl`, `Alt` and `Shift`; keys are `A`-`Z`, `0`-`9`,
//! `F1`-`F24` and a few named keys (`Space`, `Enter`, `Esc`, `Tab`, `Pause`,
//! `ScrollLock`, `Insert`, `Delete`, `Home`, `End`, `PageUp`, `PageDown`).
//!
//! Key codes are Windows virtual-key codes, which is what the keyboard hook
//! reports.  Left/right modifier variants (`VK_LSHIFT`, `VK_RCONTROL`, ...)
//! are folded onto their generic modifier.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const VK_SHIFT: u16 = 0x10;
const VK_CONTROL: u16 = 0x11;
const VK_MENU: u16 = 0x12;
const VK_F1: u16 = 0x70;
const VK_F6: u16 = 0x75;

const NAMED_KEYS: &[(&str, u16)] = &[
    ("Space", 0x20),
    ("Enter", 0x0D),
    ("Esc", 0x1B),
    ("Escape", 0x1B),
    ("Tab", 0x09),
    ("Pause", 0x13),
    ("ScrollLock", 0x91),
    ("Insert", 0x2D),
    ("Delete", 0x2E),
    ("Home", 0x24),
    ("End", 0x23),
    ("PageUp", 0x21),
    ("PageDown", 0x22),
];

/// Error returned when a chord string cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HotkeyParseError {
    #[error("hotkey is empty")]
    Empty,
    #[error("unknown key {0:?}")]
    UnknownKey(String),
    #[error("hotkey has no non-modifier key")]
    MissingKey,
    #[error("hotkey has more than one non-modifier key")]
    MultipleKeys,
}

/// A parsed key chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hotkey {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    /// Virtual-key code of the non-modifier key.
    pub key: u16,
}

impl Default for Hotkey {
    fn default() -> Self {
        Self {
            ctrl: false,
            alt: false,
            shift: false,
            key: VK_F6,
        }
    }
}

impl FromStr for Hotkey {
    type Err = HotkeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(HotkeyParseError::Empty);
        }
        let mut hotkey = Hotkey {
            ctrl: false,
            alt: false,
            shift: false,
            key: 0,
        };
        let mut key = None;

        for part in s.split('+').map(str::trim) {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => hotkey.ctrl = true,
                "alt" => hotkey.alt = true,
                "shift" => hotkey.shift = true,
                _ => {
                    let vk = key_code(part)
                        .ok_or_else(|| HotkeyParseError::UnknownKey(part.to_string()))?;
                    if key.replace(vk).is_some() {
                        return Err(HotkeyParseError::MultipleKeys);
                    }
                }
            }
        }

        hotkey.key = key.ok_or(HotkeyParseError::MissingKey)?;
        Ok(hotkey)
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            f.write_str("Ctrl+")?;
        }
        if self.alt {
            f.write_str("Alt+")?;
        }
        if self.shift {
            f.write_str("Shift+")?;
        }
        match key_name(self.key) {
            Some(name) => f.write_str(&name),
            None => write!(f, "0x{:02X}", self.key),
        }
    }
}

/// Maps a key name to its virtual-key code.
fn key_code(name: &str) -> Option<u16> {
    let upper = name.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    if bytes.len() == 1 && (bytes[0].is_ascii_uppercase() || bytes[0].is_ascii_digit()) {
        // VK codes for A-Z and 0-9 equal their ASCII values.
        return Some(u16::from(bytes[0]));
    }
    if let Some(n) = upper.strip_prefix('F').and_then(|n| n.parse::<u16>().ok()) {
        if (1..=24).contains(&n) {
            return Some(VK_F1 + n - 1);
        }
    }
    NAMED_KEYS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, vk)| *vk)
}

fn key_name(vk: u16) -> Option<String> {
    match vk {
        0x30..=0x39 | 0x41..=0x5A => Some(char::from(vk as u8).to_string()),
        v if (VK_F1..VK_F1 + 24).contains(&v) => Some(format!("F{}", v - VK_F1 + 1)),
        _ => NAMED_KEYS
            .iter()
            .find(|(_, code)| *code == vk)
            .map(|(n, _)| (*n).to_string()),
    }
}

/// Folds left/right modifier codes onto the generic ones.
fn normalize(vk: u16) -> u16 {
    match vk {
        0xA0 | 0xA1 => VK_SHIFT,
        0xA2 | 0xA3 => VK_CONTROL,
        0xA4 | 0xA5 => VK_MENU,
        other => other,
    }
}

// ── Tracker ───────────────────────────────────────────────────────────────────

/// Tracks held keys and reports when the chord is completed.
#[derive(Debug, Clone)]
pub struct HotkeyTracker {
    hotkey: Hotkey,
    pressed: HashSet<u16>,
}

impl HotkeyTracker {
    pub fn new(hotkey: Hotkey) -> Self {
        Self {
            hotkey,
            pressed: HashSet::new(),
        }
    }

    pub fn hotkey(&self) -> Hotkey {
        self.hotkey
    }

    /// Records a key-down.  Returns `true` when this press completes the chord.
    ///
    /// Auto-repeat key-downs of a key already held never fire.
    pub fn key_down(&mut self, vk: u16) -> bool {
        let vk = normalize(vk);
        let newly_pressed = self.pressed.insert(vk);
        newly_pressed && vk == self.hotkey.key && self.modifiers_match()
    }

    pub fn key_up(&mut self, vk: u16) {
        self.pressed.remove(&normalize(vk));
    }

    fn modifiers_match(&self) -> bool {
        self.pressed.contains(&VK_CONTROL) == self.hotkey.ctrl
            && self.pressed.contains(&VK_MENU) == self.hotkey.alt
            && self.pressed.contains(&VK_SHIFT) == self.hotkey.shift
    }
}
