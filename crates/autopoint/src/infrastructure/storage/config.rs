//! TOML-based configuration for AutoPoint.
//!
//! Reads `AppConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\AutoPoint\config.toml`
//! - Linux:    `~/.config/autopoint/config.toml`
//! - macOS:    `~/Library/Application Support/AutoPoint/config.toml`
//!
//! # Example (for beginners)
//!
//! ```toml
//! [general]
//! log_level = "debug"
//!
//! [playback]
//! looped = false
//! duration_ms = 250
//! button = "Left"
//!
//! [interaction]
//! toggle_hotkey = "Ctrl+Shift+F6"
//! ```
//!
//! Every field carries `#[serde(default = "...")]`, so any subset of the file
//! is valid and a missing file yields [`AppConfig::default`].
//!
//! The raw values are turned into the typed settings the application layer
//! uses by [`AppConfig::playback_settings`], [`AppConfig::interaction_settings`]
//! and friends.  Out-of-range values are corrected there with a warning
//! rather than rejected.

use std::path::{Path, PathBuf};
use std::time::Duration;

use autopoint_core::{ClickKind, MarkerImage, MarkerSize, MouseButton};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::application::hotkey::Hotkey;
use crate::application::modes::InteractionSettings;
use crate::application::playback::PlaybackSettings;
use crate::infrastructure::overlay::OverlayConfig;

/// Shortest dwell a marker or the global duration may have.
pub const MIN_DURATION_MS: u32 = 10;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub overlay: OverlaySection,
    #[serde(default)]
    pub interaction: InteractionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Playback behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    #[serde(default = "default_true")]
    pub looped: bool,
    /// Passes per run when looping; 0 runs until stopped.
    #[serde(default)]
    pub loop_count: u32,
    /// Global duration: dwell for new markers and the default-click interval.
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u32,
    /// `Left`, `Right`, `Middle` or `Default`.
    #[serde(default = "default_button")]
    pub button: String,
    /// `Single` or `Double`.
    #[serde(default = "default_click_kind")]
    pub click_kind: String,
}

/// Marker visuals and renderer tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlaySection {
    /// Side length of the square marker bitmap in pixels.
    #[serde(default = "default_marker_size")]
    pub marker_size: u32,
    /// Custom marker bitmap.  The built-in target is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker_image: Option<PathBuf>,
    /// Pause before recreating a lost graphics context.
    #[serde(default = "default_recreate_backoff_ms")]
    pub recreate_backoff_ms: u64,
}

/// Pointer and keyboard interaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionConfig {
    #[serde(default = "default_radius")]
    pub remove_radius: f64,
    #[serde(default = "default_radius")]
    pub hover_radius: f64,
    /// Chord such as `"F6"` or `"Ctrl+Shift+P"`.
    #[serde(default = "default_hotkey")]
    pub toggle_hotkey: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_duration_ms() -> u32 {
    1000
}
fn default_button() -> String {
    MouseButton::SystemDefault.as_name().to_string()
}
fn default_click_kind() -> String {
    ClickKind::Single.as_name().to_string()
}
fn default_marker_size() -> u32 {
    32
}
fn default_recreate_backoff_ms() -> u64 {
    250
}
fn default_radius() -> f64 {
    15.0
}
fn default_hotkey() -> String {
    "F6".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            looped: default_true(),
            loop_count: 0,
            duration_ms: default_duration_ms(),
            button: default_button(),
            click_kind: default_click_kind(),
        }
    }
}

impl Default for OverlaySection {
    fn default() -> Self {
        Self {
            marker_size: default_marker_size(),
            marker_image: None,
            recreate_backoff_ms: default_recreate_backoff_ms(),
        }
    }
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            remove_radius: default_radius(),
            hover_radius: default_radius(),
            toggle_hotkey: default_hotkey(),
        }
    }
}

// ── Typed settings ────────────────────────────────────────────────────────────

impl AppConfig {
    /// Playback settings with the duration clamped to [`MIN_DURATION_MS`] and
    /// unknown button or click names replaced by their defaults.
    pub fn playback_settings(&self) -> PlaybackSettings {
        let p = &self.playback;
        let duration_ms = if p.duration_ms < MIN_DURATION_MS {
            warn!(
                configured = p.duration_ms,
                minimum = MIN_DURATION_MS,
                "playback.duration_ms below minimum; clamped"
            );
            MIN_DURATION_MS
        } else {
            p.duration_ms
        };
        let default_button = MouseButton::from_name(&p.button).unwrap_or_else(|| {
            warn!(button = %p.button, "unknown playback.button; using Default");
            MouseButton::SystemDefault
        });
        let default_click_kind = ClickKind::from_name(&p.click_kind).unwrap_or_else(|| {
            warn!(click_kind = %p.click_kind, "unknown playback.click_kind; using Single");
            ClickKind::Single
        });

        PlaybackSettings {
            looped: p.looped,
            loop_count: p.loop_count,
            default_button,
            default_click_kind,
            global_duration: Duration::from_millis(u64::from(duration_ms)),
        }
    }

    pub fn interaction_settings(&self) -> InteractionSettings {
        InteractionSettings {
            remove_radius: non_negative(self.interaction.remove_radius, "remove_radius"),
            hover_radius: non_negative(self.interaction.hover_radius, "hover_radius"),
        }
    }

    /// The playback toggle chord, or F6 when the configured one is invalid.
    pub fn toggle_hotkey(&self) -> Hotkey {
        self.interaction
            .toggle_hotkey
            .parse()
            .unwrap_or_else(|e| {
                warn!(
                    hotkey = %self.interaction.toggle_hotkey,
                    "invalid interaction.toggle_hotkey ({e}); using F6"
                );
                Hotkey::default()
            })
    }

    pub fn overlay_config(&self) -> OverlayConfig {
        OverlayConfig {
            recreate_backoff: Duration::from_millis(self.overlay.recreate_backoff_ms),
        }
    }

    pub fn marker_size(&self) -> MarkerSize {
        MarkerSize::square(self.overlay.marker_size.max(1))
    }

    pub fn marker_image(&self) -> MarkerImage {
        self.overlay
            .marker_image
            .clone()
            .map_or(MarkerImage::BuiltIn, MarkerImage::File)
    }
}

fn non_negative(value: f64, field: &str) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        warn!(value, field, "interaction radius must be non-negative; using 15");
        default_radius()
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the default location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `AutoPoint`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("AutoPoint"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("autopoint"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("AutoPoint")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    // ── AppConfig defaults ────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_playback_values() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert!(cfg.playback.looped);
        assert_eq!(cfg.playback.loop_count, 0);
        assert_eq!(cfg.playback.duration_ms, 1000);
        assert_eq!(cfg.playback.button, "Default");
        assert_eq!(cfg.playback.click_kind, "Single");
    }

    #[test]
    fn test_app_config_default_overlay_and_interaction() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.overlay.marker_size, 32);
        assert_eq!(cfg.overlay.marker_image, None);
        assert_eq!(cfg.overlay.recreate_backoff_ms, 250);
        assert_eq!(cfg.interaction.remove_radius, 15.0);
        assert_eq!(cfg.interaction.toggle_hotkey, "F6");
        assert_eq!(cfg.general.log_level, "info");
    }

    // ── TOML parsing ──────────────────────────────────────────────────────────

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_partial_playback_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[playback]
looped = false
button = "Right"
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert!(!cfg.playback.looped);
        assert_eq!(cfg.playback.button, "Right");
        // Unspecified fields keep their defaults
        assert_eq!(cfg.playback.duration_ms, 1000);
        assert_eq!(cfg.interaction.hover_radius, 15.0);
    }

    #[test]
    fn test_marker_image_path_round_trips() {
        let mut cfg = AppConfig::default();
        cfg.overlay.marker_image = Some(PathBuf::from("markers/target.png"));

        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&toml_str).expect("deserialize");

        assert_eq!(restored, cfg);
        assert_eq!(
            restored.marker_image(),
            MarkerImage::File(PathBuf::from("markers/target.png"))
        );
    }

    #[test]
    fn test_absent_marker_image_is_omitted_and_built_in() {
        let cfg = AppConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        assert!(!toml_str.contains("marker_image"));
        assert_eq!(cfg.marker_image(), MarkerImage::BuiltIn);
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    // ── Typed settings ────────────────────────────────────────────────────────

    #[test]
    fn test_playback_settings_clamps_short_duration() {
        let mut cfg = AppConfig::default();
        cfg.playback.duration_ms = 3;

        let settings = cfg.playback_settings();

        assert_eq!(settings.global_duration, Duration::from_millis(10));
    }

    #[test]
    fn test_playback_settings_parses_names() {
        let mut cfg = AppConfig::default();
        cfg.playback.button = "middle".to_string();
        cfg.playback.click_kind = "Double".to_string();
        cfg.playback.loop_count = 3;

        let settings = cfg.playback_settings();

        assert_eq!(settings.default_button, MouseButton::Middle);
        assert_eq!(settings.default_click_kind, ClickKind::Double);
        assert_eq!(settings.loop_count, 3);
    }

    #[test]
    fn test_playback_settings_unknown_names_fall_back() {
        let mut cfg = AppConfig::default();
        cfg.playback.button = "Thumb".to_string();
        cfg.playback.click_kind = "Triple".to_string();

        let settings = cfg.playback_settings();

        assert_eq!(settings.default_button, MouseButton::SystemDefault);
        assert_eq!(settings.default_click_kind, ClickKind::Single);
    }

    #[test]
    fn test_invalid_hotkey_falls_back_to_f6() {
        let mut cfg = AppConfig::default();
        cfg.interaction.toggle_hotkey = "Ctrl+Banana".to_string();

        assert_eq!(cfg.toggle_hotkey(), Hotkey::default());
    }

    #[test]
    fn test_valid_hotkey_is_parsed() {
        let mut cfg = AppConfig::default();
        cfg.interaction.toggle_hotkey = "Ctrl+Shift+F7".to_string();

        let hotkey = cfg.toggle_hotkey();

        assert!(hotkey.ctrl && hotkey.shift && !hotkey.alt);
        assert_eq!(hotkey.key, 0x76);
    }

    #[test]
    fn test_negative_radius_is_replaced() {
        let mut cfg = AppConfig::default();
        cfg.interaction.remove_radius = -4.0;

        assert_eq!(cfg.interaction_settings().remove_radius, 15.0);
    }

    #[test]
    fn test_zero_marker_size_becomes_one_pixel() {
        let mut cfg = AppConfig::default();
        cfg.overlay.marker_size = 0;

        assert_eq!(cfg.marker_size(), MarkerSize::square(1));
    }

    #[test]
    fn test_overlay_config_uses_backoff() {
        let mut cfg = AppConfig::default();
        cfg.overlay.recreate_backoff_ms = 40;

        assert_eq!(cfg.overlay_config().recreate_backoff, Duration::from_millis(40));
    }

    // ── load / save ───────────────────────────────────────────────────────────

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");

        let cfg = load_config_from(&path).expect("missing file is not an error");

        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("autopoint_cfg_{}", Uuid::new_v4()));
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.playback.duration_ms = 250;
        cfg.general.log_level = "debug".to_string();

        // Act
        save_config_to(&path, &cfg).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_config_from_malformed_file_is_parse_error() {
        let dir = std::env::temp_dir().join(format!("autopoint_cfg_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[playback\nlooped = ").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
    }
}
