use crate::domain::models::DeliveryMode;
use crate::domain::profile::{builtin_profiles, ReportProfile};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "turret_mouse".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_sensitivity")]
    pub sensitivity_x: f64,
    #[serde(default = "default_sensitivity")]
    pub sensitivity_y: f64,
    #[serde(default)]
    pub display_width: u32,
    #[serde(default)]
    pub display_height: u32,
    #[serde(default)]
    pub delivery_mode: DeliveryMode,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Discovery Settings
    #[serde(default = "default_scan_period_secs")]
    pub scan_period_secs: u64,
    #[serde(default = "default_pairing_timeout_ms")]
    pub pairing_timeout_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    // Delivery Settings
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    // Supported devices
    #[serde(default = "builtin_profiles")]
    pub profiles: Vec<ReportProfile>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sensitivity_x: default_sensitivity(),
            sensitivity_y: default_sensitivity(),
            display_width: 0,
            display_height: 0,
            delivery_mode: DeliveryMode::default(),
            log_settings: LogSettings::default(),
            scan_period_secs: default_scan_period_secs(),
            pairing_timeout_ms: default_pairing_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            debounce_ms: default_debounce_ms(),
            profiles: builtin_profiles(),
        }
    }
}

fn default_sensitivity() -> f64 {
    1.0
}
fn default_scan_period_secs() -> u64 {
    180
}
fn default_pairing_timeout_ms() -> u64 {
    10_000
}
fn default_max_reconnect_attempts() -> u32 {
    3
}
fn default_debounce_ms() -> u64 {
    16
}

impl Settings {
    pub fn scan_period(&self) -> Duration {
        Duration::from_secs(self.scan_period_secs)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_millis(self.pairing_timeout_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from the user config directory, falling back to
    /// defaults when the file is missing or unreadable.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("TurretMouse");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn add_profile(&mut self, profile: ReportProfile) -> anyhow::Result<()> {
        self.settings
            .profiles
            .retain(|p| p.device_name != profile.device_name);
        self.settings.profiles.push(profile);
        self.save()
    }
}
