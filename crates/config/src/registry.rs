use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Location and write strategy of the local registry database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub bulk_load: BulkLoad,
    /// Log writes instead of performing them.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            bulk_load: BulkLoad::default(),
            dry_run: false,
        }
    }
}

fn default_path() -> PathBuf {
    PathBuf::from("registry.sqlite")
}

/// How a full checksum replacement is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BulkLoad {
    /// Multi-row `INSERT` statements of up to `rows` rows each.
    Batched { rows: usize },
    /// One `INSERT` per row.
    RowByRow,
}

impl Default for BulkLoad {
    fn default() -> Self {
        Self::Batched { rows: 500 }
    }
}
