use std::fs;
use std::path::Path;

use anyhow::Result;
use directories::ProjectDirs;
use serde::Deserialize;
use tracing::warn;

use crate::session::FitMode;

pub const CONFIG_FILE: &str = "config.toml";

pub const DEFAULT_ZOOM_STEP: f32 = 0.15;
pub const DEFAULT_PAN_STEP: f32 = 50.0;

/// Viewer options from `config.toml`. Every field is optional; persisted
/// state and deep links take precedence over anything set here.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub fit_mode: Option<FitMode>,
    pub outline_open: Option<bool>,
    pub zoom_step: Option<f32>,
    pub pan_step: Option<f32>,
}

impl ViewerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Loads the config from the platform config directory. A missing file
    /// means defaults; a malformed one is ignored with a warning rather
    /// than failing viewer startup.
    pub fn load_default(dirs: &ProjectDirs) -> Self {
        let path = dirs.config_dir().join(CONFIG_FILE);
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(err) => {
                warn!(?err, path = %path.display(), "ignoring unreadable viewer config");
                Self::default()
            }
        }
    }

    pub fn zoom_step(&self) -> f32 {
        self.zoom_step.unwrap_or(DEFAULT_ZOOM_STEP)
    }

    pub fn pan_step(&self) -> f32 {
        self.pan_step.unwrap_or(DEFAULT_PAN_STEP)
    }
}
