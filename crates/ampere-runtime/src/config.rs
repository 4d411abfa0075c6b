use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_human_response_timeout_secs() -> u64 {
    30 * 60
}

fn default_replay_batch_size() -> usize {
    500
}

fn default_plan_max_steps() -> usize {
    64
}

fn default_log_retention_days() -> u64 {
    14
}

/// Core configuration. Loadable from a JSON file; every field has a default
/// so a missing or partial file still yields a working config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_human_response_timeout_secs")]
    pub human_response_timeout_secs: u64,
    #[serde(default = "default_replay_batch_size")]
    pub replay_batch_size: usize,
    #[serde(default = "default_plan_max_steps")]
    pub plan_max_steps: usize,
    /// `None` runs on an in-memory database.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            human_response_timeout_secs: default_human_response_timeout_secs(),
            replay_batch_size: default_replay_batch_size(),
            plan_max_steps: default_plan_max_steps(),
            db_path: None,
            logs_dir: None,
            log_retention_days: default_log_retention_days(),
        }
    }
}

impl CoreConfig {
    /// Read the config file at `path`. A missing file yields the defaults;
    /// a malformed file is an error.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("failed to read {}", path.display())));
            }
        };
        let config = serde_json::from_str(&raw)
            .map_err(|err| anyhow::anyhow!("invalid config {}: {}", path.display(), err))?;
        Ok(config)
    }

    pub fn human_response_timeout(&self) -> Duration {
        Duration::from_secs(self.human_response_timeout_secs)
    }
}
