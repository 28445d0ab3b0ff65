use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Persisted engine configuration. Only the custom binary directory is
/// stored; everything else is derived per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub custom_bin_dir: Option<PathBuf>,
}

fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("seqreg")
        .join("settings.json")
}

pub fn save_settings(settings: &EngineSettings) -> Result<()> {
    save_to(settings, &settings_path())
}

pub fn load_settings() -> EngineSettings {
    load_from(&settings_path())
}

fn save_to(settings: &EngineSettings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| Error::Settings(e.to_string()))?;
    std::fs::write(path, json)?;

    log::info!("Settings saved to: {}", path.display());
    Ok(())
}

fn load_from(path: &Path) -> EngineSettings {
    if path.exists() {
        match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(settings) => {
                    log::info!("Settings loaded from: {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("Failed to parse settings file: {}. Using defaults.", e);
                    EngineSettings::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read settings file: {}. Using defaults.", e);
                EngineSettings::default()
            }
        }
    } else {
        log::info!("No settings file found. Using defaults.");
        EngineSettings::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trips_custom_bin_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = EngineSettings {
            custom_bin_dir: Some(PathBuf::from("/opt/elastix/bin")),
        };
        save_to(&settings, &path).unwrap();
        let loaded = load_from(&path);
        assert_eq!(loaded.custom_bin_dir, settings.custom_bin_dir);
    }

    #[test]
    fn missing_or_corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("settings.json");
        assert!(load_from(&missing).custom_bin_dir.is_none());

        std::fs::write(&missing, "not json").unwrap();
        assert!(load_from(&missing).custom_bin_dir.is_none());
    }
}
