// SettingsManager Service
// Handles application settings persistence

use std::path::PathBuf;
use std::sync::RwLock;

use crate::models::Settings;

/// Manages application settings storage and retrieval
pub struct SettingsManager {
    settings_path: PathBuf,
    cache: RwLock<Option<Settings>>,
}

impl SettingsManager {
    /// Create a new SettingsManager with the given app data directory
    pub fn new(app_data_dir: PathBuf) -> Self {
        Self {
            settings_path: app_data_dir.join("settings.json"),
            cache: RwLock::new(None),
        }
    }

    /// Load settings from disk, or write and return defaults if not found
    pub fn load(&self) -> Result<Settings, String> {
        if let Ok(cache) = self.cache.read() {
            if let Some(ref settings) = *cache {
                return Ok(settings.clone());
            }
        }

        let settings = if self.settings_path.exists() {
            let content = std::fs::read_to_string(&self.settings_path)
                .map_err(|e| format!("Failed to read settings: {e}"))?;
            serde_json::from_str(&content).map_err(|e| format!("Failed to parse settings: {e}"))?
        } else {
            let defaults = Settings::default();
            self.save_internal(&defaults)?;
            defaults
        };

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, settings: &Settings) -> Result<(), String> {
        self.save_internal(settings)?;

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(())
    }

    fn save_internal(&self, settings: &Settings) -> Result<(), String> {
        if let Some(parent) = self.settings_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {e}"))?;
        }

        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;
        std::fs::write(&self.settings_path, content)
            .map_err(|e| format!("Failed to write settings: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_creates_defaults() {
        let temp = tempdir().unwrap();
        let manager = SettingsManager::new(temp.path().to_path_buf());

        let settings = manager.load().unwrap();
        assert_eq!(settings.backend_port, 8008);
        assert_eq!(settings.queue_concurrency, 1);
        assert!(temp.path().join("settings.json").exists());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let temp = tempdir().unwrap();
        let manager = SettingsManager::new(temp.path().to_path_buf());

        let mut settings = Settings::default();
        settings.media_dir = "/srv/media".to_string();
        settings.backend_port = 9900;
        manager.save(&settings).unwrap();

        let manager = SettingsManager::new(temp.path().to_path_buf());
        let loaded = manager.load().unwrap();
        assert_eq!(loaded.media_dir, "/srv/media");
        assert_eq!(loaded.backend_port, 9900);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("settings.json"), r#"{"backendPort": 9000}"#).unwrap();

        let manager = SettingsManager::new(temp.path().to_path_buf());
        let settings = manager.load().unwrap();
        assert_eq!(settings.backend_port, 9000);
        assert_eq!(settings.queue_concurrency, 1);
        assert_eq!(settings.media_dir, "media");
    }
}
