use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_derive::{Deserialize, Serialize};

#[derive(Deserialize, Debug, Default, Serialize)]
pub struct Registration {
    pub display_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug, Default, Serialize)]
pub struct Logging {
    /// Where service-mode stdio is redirected. Without it, output from a
    /// service-manager run goes nowhere.
    pub log_path: Option<PathBuf>,
    pub filter: Option<String>,
}

#[derive(Deserialize, Debug, Default, Serialize)]
pub struct Config {
    #[serde(default)]
    pub registration: Registration,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}
