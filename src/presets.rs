//! Registration preset catalog.
//!
//! A preset names an ordered list of elastix parameter files tuned for a
//! particular anatomy and modality. The catalog lives next to the parameter
//! files themselves as a `presets.json` database.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const PRESET_DATABASE_FILENAME: &str = "presets.json";

/// One entry of the preset database.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationPreset {
    pub id: String,
    pub modality: String,
    pub content: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub publications: Vec<String>,
    /// Parameter file names, relative to the database directory, in the
    /// order elastix applies them.
    pub parameter_files: Vec<String>,
}

/// The preset database together with the directory its file names resolve
/// against.
#[derive(Debug, Clone)]
pub struct PresetCatalog {
    dir: PathBuf,
    presets: Vec<RegistrationPreset>,
}

impl PresetCatalog {
    /// Read `presets.json` from the given directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PRESET_DATABASE_FILENAME);
        let raw = fs::read_to_string(&path).map_err(|e| Error::PresetDatabase {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let presets: Vec<RegistrationPreset> =
            serde_json::from_str(&raw).map_err(|e| Error::PresetDatabase {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            presets,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistrationPreset> {
        self.presets.iter()
    }

    pub fn get(&self, index: usize) -> Result<&RegistrationPreset> {
        self.presets.get(index).ok_or(Error::PresetIndex {
            index,
            count: self.presets.len(),
        })
    }

    /// Absolute paths of the preset's parameter files, verified to exist.
    pub fn resolved_parameter_files(&self, index: usize) -> Result<Vec<PathBuf>> {
        let preset = self.get(index)?;
        let mut paths = Vec::with_capacity(preset.parameter_files.len());
        for name in &preset.parameter_files {
            let path = self.dir.join(name);
            if !path.is_file() {
                return Err(Error::PresetFileMissing(path));
            }
            paths.push(path);
        }
        Ok(paths)
    }
}
