use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the conversation collections.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Keep everything in memory only.
    #[serde(default)]
    pub in_memory: bool,
    /// Conversations idle for longer than this are deleted with their turns.
    #[serde(default)]
    pub retention_days: Option<u32>,
    #[serde(default = "d_sweep")]
    pub retention_sweep_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            in_memory: false,
            retention_days: None,
            retention_sweep_secs: d_sweep(),
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_sweep() -> u64 {
    3600
}
