use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vigorish_core::{CoreConfig, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    pub data_dir: PathBuf,
    pub core: CoreConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("vigorish"),
            core: CoreConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load the config file at `path`, or from the default data directory
    /// when no path is given. A missing file yields the defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default().data_dir.join("config.json"),
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = tokio::fs::read_to_string(&path).await?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }
}
