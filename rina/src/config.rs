use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use common::FileFormat;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Worker threads for queue processing. 0 processes on the calling thread.
    pub workers: usize,
    pub record_journal: bool,
    pub log_level: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            record_journal: false,
            log_level: "info".to_string(),
        }
    }
}

impl RenderConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        let serialized = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Ok(common::deserialize(&serialized, format)?)
    }
}
