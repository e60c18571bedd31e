//! TOML-based configuration for the lifecycle service.
//!
//! Reads `ServiceConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\mrcam\config.toml`
//! - Linux:    `~/.config/mrcam/config.toml`
//! - macOS:    `~/Library/Application Support/mrcam/config.toml`
//!
//! # Example
//!
//! ```toml
//! [service]
//! log_level = "debug"
//! scan_interval_ms = 5000
//!
//! [target]
//! host_process = "WUDFHost"
//! driver_module = "MRUSBHost"
//!
//! [control]
//! enable_passthrough = true
//!
//! [control.shortcuts]
//! Recenter = "Win+Space"
//! PanLeft = "Win+Alt+Left"
//! ```
//!
//! Every field carries a serde default, so a partial file (or no file at all)
//! still yields a complete configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mrcam_core::keymap::parse_chord;
use mrcam_core::{ControlRecord, Shortcut};

use crate::application::lifecycle::LifecycleSettings;

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

    /// `[control.shortcuts]` names a slot that does not exist.
    #[error("unknown shortcut {0:?}")]
    UnknownShortcut(String),

    /// A chord string contains a key name that is not recognised.
    #[error("invalid key chord {chord:?} for shortcut {shortcut}")]
    InvalidChord { shortcut: String, chord: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level service configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub target: TargetSection,
    #[serde(default)]
    pub shm: ShmSection,
    #[serde(default)]
    pub control: ControlSection,
}

/// Loop timing and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Pause between scans while the consumer has not asked for frames.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Granularity of every wait in the lifecycle loop.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// How long to wait for the module to report removal.
    #[serde(default = "default_removal_timeout_ms")]
    pub removal_timeout_ms: u64,
}

/// Which process to inject and what to inject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetSection {
    /// Executable name of the user-mode driver host (case-insensitive substring).
    #[serde(default = "default_host_process")]
    pub host_process: String,
    /// Module that marks the host as the one serving the headset camera.
    #[serde(default = "default_driver_module")]
    pub driver_module: String,
    /// Camera module file, resolved next to the service executable when
    /// relative.
    #[serde(default = "default_implant_file")]
    pub implant_file: PathBuf,
}

/// Where file-backed segments live on hosts without named sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShmSection {
    /// Overrides `$MRCAM_SHM_DIR` and `/dev/shm`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Initial contents of the control segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlSection {
    #[serde(default = "default_true")]
    pub enable_passthrough: bool,
    #[serde(default)]
    pub disable_win_y: bool,
    #[serde(default)]
    pub enable_blue_light_filter: bool,
    /// Chord overrides keyed by shortcut name, e.g. `Recenter = "Win+Space"`.
    #[serde(default)]
    pub shortcuts: BTreeMap<String, String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_scan_interval_ms() -> u64 {
    5_000
}
fn default_tick_ms() -> u64 {
    100
}
fn default_removal_timeout_ms() -> u64 {
    1_000
}
fn default_host_process() -> String {
    "WUDFHost".to_string()
}
fn default_driver_module() -> String {
    "MRUSBHost".to_string()
}
fn default_implant_file() -> PathBuf {
    PathBuf::from("mrcam_implant.dll")
}
fn default_true() -> bool {
    true
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            scan_interval_ms: default_scan_interval_ms(),
            tick_ms: default_tick_ms(),
            removal_timeout_ms: default_removal_timeout_ms(),
        }
    }
}

impl Default for TargetSection {
    fn default() -> Self {
        Self {
            host_process: default_host_process(),
            driver_module: default_driver_module(),
            implant_file: default_implant_file(),
        }
    }
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            enable_passthrough: default_true(),
            disable_win_y: false,
            enable_blue_light_filter: false,
            shortcuts: BTreeMap::new(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl ServiceSection {
    /// Loop timing for the lifecycle manager.  A zero tick is raised to 1 ms.
    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        let tick_ms = self.tick_ms.max(1);
        let scan_ticks = (self.scan_interval_ms / tick_ms).clamp(1, u64::from(u32::MAX));
        LifecycleSettings {
            tick: Duration::from_millis(tick_ms),
            scan_ticks: scan_ticks as u32,
            removal_timeout: Duration::from_millis(self.removal_timeout_ms),
        }
    }
}

impl ControlSection {
    /// Builds the record published when the control segment is created.
    ///
    /// Shortcuts not named in `[control.shortcuts]` keep their built-in
    /// chords.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownShortcut`] for a key that is not a slot name
    /// (case-insensitive), [`ConfigError::InvalidChord`] for an unparsable
    /// chord.
    pub fn to_record(&self) -> Result<ControlRecord, ConfigError> {
        let mut record = ControlRecord::with_defaults();
        record.enable_passthrough = u8::from(self.enable_passthrough);
        record.disable_win_y = u8::from(self.disable_win_y);
        record.enable_blue_light_filter = u8::from(self.enable_blue_light_filter);

        for (name, chord) in &self.shortcuts {
            let shortcut = Shortcut::ALL
                .into_iter()
                .find(|s| s.name().eq_ignore_ascii_case(name))
                .ok_or_else(|| ConfigError::UnknownShortcut(name.clone()))?;
            let keys = parse_chord(chord).ok_or_else(|| ConfigError::InvalidChord {
                shortcut: name.clone(),
                chord: chord.clone(),
            })?;
            record.set_keys(shortcut, &keys);
        }
        Ok(record)
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

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `ServiceConfig` from disk, returning the default if the file does
/// not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<ServiceConfig, ConfigError> {
    load_config_from(config_file_path()?)
}

/// Loads `ServiceConfig` from an explicit path.
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_from(path: PathBuf) -> Result<ServiceConfig, ConfigError> {
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServiceConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Resolves the platform config directory, `mrcam` subdirectory included.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("mrcam"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("mrcam"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("mrcam")
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
    use mrcam_core::keymap::windows_vk::{VK_LWIN, VK_MENU, VK_SPACE};
    use uuid::Uuid;

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_service_config_default_targets_driver_host() {
        // Arrange / Act
        let cfg = ServiceConfig::default();

        // Assert
        assert_eq!(cfg.target.host_process, "WUDFHost");
        assert_eq!(cfg.target.driver_module, "MRUSBHost");
        assert_eq!(cfg.service.log_level, "info");
        assert!(cfg.shm.dir.is_none());
    }

    #[test]
    fn test_default_timing_matches_lifecycle_defaults() {
        let settings = ServiceSection::default().lifecycle_settings();
        assert_eq!(settings, LifecycleSettings::default());
    }

    #[test]
    fn test_zero_tick_is_raised_to_one_millisecond() {
        let section = ServiceSection {
            tick_ms: 0,
            scan_interval_ms: 10,
            ..ServiceSection::default()
        };
        let settings = section.lifecycle_settings();
        assert_eq!(settings.tick, Duration::from_millis(1));
        assert_eq!(settings.scan_ticks, 10);
    }

    #[test]
    fn test_default_control_section_yields_default_record() {
        let record = ControlSection::default().to_record().expect("record");
        assert_eq!(record, ControlRecord::with_defaults());
    }

    // ── Control record ────────────────────────────────────────────────────────

    #[test]
    fn test_shortcut_override_replaces_only_that_slot() {
        // Arrange
        let mut section = ControlSection::default();
        section
            .shortcuts
            .insert("recenter".to_string(), "Win+Alt+Space".to_string());

        // Act
        let record = section.to_record().expect("record");

        // Assert
        assert_eq!(
            &record.keys(Shortcut::Recenter)[..4],
            &[VK_LWIN, VK_MENU, VK_SPACE, 0]
        );
        assert_eq!(
            record.keys(Shortcut::PanLeft),
            ControlRecord::with_defaults().keys(Shortcut::PanLeft)
        );
    }

    #[test]
    fn test_toggles_are_written_to_record() {
        let section = ControlSection {
            enable_passthrough: false,
            disable_win_y: true,
            enable_blue_light_filter: true,
            shortcuts: BTreeMap::new(),
        };
        let record = section.to_record().expect("record");
        assert_eq!(record.enable_passthrough, 0);
        assert_eq!(record.disable_win_y, 1);
        assert_eq!(record.enable_blue_light_filter, 1);
    }

    #[test]
    fn test_unknown_shortcut_name_is_rejected() {
        let mut section = ControlSection::default();
        section
            .shortcuts
            .insert("Teleport".to_string(), "Win+T".to_string());
        assert!(matches!(
            section.to_record(),
            Err(ConfigError::UnknownShortcut(name)) if name == "Teleport"
        ));
    }

    #[test]
    fn test_unparsable_chord_is_rejected() {
        let mut section = ControlSection::default();
        section
            .shortcuts
            .insert("PanLeft".to_string(), "Win+NoSuchKey".to_string());
        assert!(matches!(
            section.to_record(),
            Err(ConfigError::InvalidChord { .. })
        ));
    }

    // ── TOML ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_service_config_serializes_and_deserializes_round_trip() {
        // Arrange
        let mut cfg = ServiceConfig::default();
        cfg.service.scan_interval_ms = 2_000;
        cfg.shm.dir = Some(PathBuf::from("/tmp/mrcam"));
        cfg.control
            .shortcuts
            .insert("Increase".to_string(), "Win+Up".to_string());

        // Act
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: ServiceConfig = toml::from_str(&toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_unset_shm_dir_is_omitted() {
        let toml_str = toml::to_string_pretty(&ServiceConfig::default()).expect("serialize");
        assert!(!toml_str.contains("dir ="), "None dir must be omitted");
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: ServiceConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, ServiceConfig::default());
    }

    #[test]
    fn test_deserialize_partial_section_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[service]
tick_ms = 50

[target]
host_process = "OtherHost"
"#;

        // Act
        let cfg: ServiceConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.service.tick_ms, 50);
        assert_eq!(cfg.service.scan_interval_ms, 5_000);
        assert_eq!(cfg.target.host_process, "OtherHost");
        assert_eq!(cfg.target.driver_module, "MRUSBHost");
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<ServiceConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    // ── Files ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");
        let cfg = load_config_from(path).expect("default");
        assert_eq!(cfg, ServiceConfig::default());
    }

    #[test]
    fn test_load_config_from_reads_written_file() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("mrcam_cfg_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[service]\nlog_level = \"debug\"\n").unwrap();

        // Act
        let cfg = load_config_from(path).expect("load");

        // Assert
        assert_eq!(cfg.service.log_level, "debug");

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_config_from_malformed_file_returns_parse_error() {
        let dir = std::env::temp_dir().join(format!("mrcam_cfg_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[service\n").unwrap();

        let result = load_config_from(path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }
}
