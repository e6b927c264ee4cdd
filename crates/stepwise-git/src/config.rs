//! Project configuration (`.stepwise/config.json`).

use crate::project::Project;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stepwise::v1::manifest::DEFAULT_SECTIONS;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub manifest: ManifestConfig,
    pub manuals: ManualsConfig,
}

/// The one metadata file whose conflicts are resolved automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// Relative to the project root.
    pub path: PathBuf,
    /// Dependency groups merged during resolution.
    pub sections: Vec<String>,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        ManifestConfig {
            path: PathBuf::from("package.json"),
            sections: DEFAULT_SECTIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualsConfig {
    pub templates_dir: PathBuf,
    pub views_dir: PathBuf,
    /// Shell command that re-renders the manuals for a super-step.
    pub render_command: Option<String>,
}

impl Default for ManualsConfig {
    fn default() -> Self {
        ManualsConfig {
            templates_dir: PathBuf::from(".stepwise/manuals/templates"),
            views_dir: PathBuf::from(".stepwise/manuals/views"),
            render_command: None,
        }
    }
}

impl ManualsConfig {
    /// Template file owned by super-step `n`.
    pub fn template_path(&self, n: u32) -> PathBuf {
        self.templates_dir.join(format!("step{}.tmpl", n))
    }
}

/// Load the project's config.
///
/// An explicitly given file must parse. The auto-discovered one is allowed to
/// be broken or missing: that yields the defaults.
pub fn load_config(project: &Project, config_path: Option<&Path>) -> Result<Config> {
    let explicit = config_path.is_some();
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => project.config_file(),
    };

    if !explicit && !path.is_file() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed reading config file: {}", path.display()))?;

    match serde_json::from_str::<Config>(&content) {
        Ok(config) => Ok(config),
        Err(e) if explicit => {
            Err(e).with_context(|| format!("Invalid config file: {}", path.display()))
        }
        Err(e) => {
            tracing::warn!(
                "Failed to parse auto-discovered config {}: {}",
                path.display(),
                e
            );
            Ok(Config::default())
        }
    }
}
