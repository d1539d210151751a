use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

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
    "bluetooth_central".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralSettings {
    #[serde(default)]
    pub log_settings: LogSettings,

    /// Text encoding used by writes that don't name one
    #[serde(default = "default_encoding")]
    pub default_encoding: String,

    /// Wait for the stack to confirm notification enablement before settling
    #[serde(default = "default_false")]
    pub confirm_subscriptions: bool,

    /// Auto-stop duration for scans started without an explicit one
    #[serde(default)]
    pub default_scan_seconds: Option<u64>,

    #[serde(default)]
    pub known_peripherals: Vec<String>,
}

impl Default for CentralSettings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            default_encoding: default_encoding(),
            confirm_subscriptions: false,
            default_scan_seconds: None,
            known_peripherals: Vec::new(),
        }
    }
}

fn default_encoding() -> String {
    "iso-8859-1".to_string()
}

pub struct SettingsService {
    settings: CentralSettings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    /// Load settings from an explicit path, falling back to defaults
    pub fn load_from(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                CentralSettings::default()
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
        path.push("BluetoothCentral");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<CentralSettings> {
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

    pub fn get(&self) -> &CentralSettings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut CentralSettings {
        &mut self.settings
    }

    pub fn add_known_peripheral(&mut self, id: &str) -> anyhow::Result<()> {
        if !self.settings.known_peripherals.iter().any(|p| p == id) {
            self.settings.known_peripherals.push(id.to_string());
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("bluetooth_central_{}_{}", name, std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: CentralSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.default_encoding, "iso-8859-1");
        assert!(!settings.confirm_subscriptions);
        assert_eq!(settings.log_settings.level, "info");
        assert!(settings.known_peripherals.is_empty());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let path = scratch_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::load_from(path.clone());
        assert_eq!(service.get().default_encoding, "iso-8859-1");

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_known_peripherals_persist() {
        let path = scratch_path("known");
        let mut service = SettingsService::load_from(path.clone());
        service.get_mut().default_encoding = "utf-8".to_string();
        service.add_known_peripheral("A1").unwrap();
        service.add_known_peripheral("A1").unwrap();

        let reloaded = SettingsService::load_from(path.clone());
        assert_eq!(reloaded.get().known_peripherals, vec!["A1".to_string()]);
        assert_eq!(reloaded.get().default_encoding, "utf-8");

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
