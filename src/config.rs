// Path conventions for the monthly run, optionally overridden from a JSON file

use crate::discovery::RecencyKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file picked up from the root when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "ncts-monthly.json";

/// Where inputs are read and outputs land.
///
/// Relative paths are resolved against a root directory by [`Config::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input directory holding the monthly downloads
    pub working_dir: PathBuf,

    /// Root of the upload tree (`AMTv4/Terminology`, `AMTv4/Map`)
    pub upload_dir: PathBuf,

    /// Destination of the filtered change report (None = working dir)
    pub report_output_dir: Option<PathBuf>,

    /// How "latest" is decided among matching inputs
    pub recency: RecencyKind,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            working_dir: PathBuf::from("WorkingFiles"),
            upload_dir: PathBuf::from("Files for upload"),
            report_output_dir: None,
            recency: RecencyKind::Name,
        }
    }
}

impl Config {
    /// Load from an explicit file, or from `ncts-monthly.json` under `root`
    /// when present, or fall back to defaults.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let implicit = root.join(DEFAULT_CONFIG_FILE);
                if implicit.is_file() {
                    Self::from_file(&implicit)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::malformed(path, format!("invalid config JSON: {}", e)))
    }

    /// Anchor every relative path at `root`
    pub fn resolve(mut self, root: &Path) -> Self {
        self.working_dir = anchor(root, self.working_dir);
        self.upload_dir = anchor(root, self.upload_dir);
        self.report_output_dir = self.report_output_dir.map(|dir| anchor(root, dir));
        self
    }

    pub fn report_output_dir(&self) -> &Path {
        self.report_output_dir
            .as_deref()
            .unwrap_or(&self.working_dir)
    }
}

fn anchor(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}
