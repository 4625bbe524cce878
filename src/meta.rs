//! Project identity record (`version.json`)
//!
//! Written once when a project is created. Reopening reads it for status
//! reporting but never requires the versions to match; migration between
//! engine versions is a marker, not a gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::errors::{EngineError, Result};
use crate::{ENGINE_VERSION, SCHEMA_VERSION};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionMeta {
    pub engine_version: String,
    pub schema_version: u32,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
}

impl VersionMeta {
    /// Fresh identity record for a newly created project
    pub fn for_project(project_id: &str) -> Self {
        Self {
            engine_version: ENGINE_VERSION.to_string(),
            schema_version: SCHEMA_VERSION,
            project_id: project_id.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        fs::write(path, content).map_err(|e| EngineError::io("write-version", path, e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| EngineError::io("read-version", path, e))?;
        serde_json::from_str(&content).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("version.json");

        let meta = VersionMeta::for_project("demo");
        meta.save(&path).unwrap();

        let loaded = VersionMeta::load(&path).unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(loaded.project_id, "demo");
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let result = VersionMeta::load(&temp.path().join("absent.json"));
        assert!(matches!(result, Err(EngineError::Io { .. })));
    }
}
