// layout.rs - Canonical path derivation for a project directory
//
// Every path the engine touches is derived here from (root, project_id):
//
//     <root>/<project_id>/
//         .lock
//         version.json
//         chunks/<name>.json        committed primary
//         chunks/<name>.tmp         in-flight write
//         chunks_bak/<name>.bak     previous committed value
//         checkpoints/*.zip
//
// Pure path arithmetic except for ensure_dirs(), which is idempotent.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{EngineError, Result};

static CHUNK_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("chunk name regex"));

/// Validate a chunk (shard) name against the `[A-Za-z0-9_.-]+` charset
pub fn validate_chunk_name(name: &str) -> Result<()> {
    if CHUNK_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(EngineError::InvalidName(format!(
            "chunk name '{}' must match [A-Za-z0-9_.-]+",
            name
        )))
    }
}

/// Validate a project id: non-empty, no path separators, no leading dot
pub fn validate_project_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(EngineError::InvalidName(
            "project id must not be empty".to_string(),
        ));
    }
    if id.contains('/') || id.contains('\\') {
        return Err(EngineError::InvalidName(format!(
            "project id '{}' must not contain path separators",
            id
        )));
    }
    if id.starts_with('.') {
        return Err(EngineError::InvalidName(format!(
            "project id '{}' must not start with a dot",
            id
        )));
    }
    Ok(())
}

/// Resolved path layout for one project
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
    project_id: String,
    project_dir: PathBuf,
}

impl ProjectLayout {
    /// Resolve the layout for `(root, project_id)`
    ///
    /// Validates the project id but touches nothing on disk.
    pub fn new(root: impl Into<PathBuf>, project_id: &str) -> Result<Self> {
        validate_project_id(project_id)?;
        let root = root.into();
        let project_dir = root.join(project_id);
        Ok(Self {
            root,
            project_id: project_id.to_string(),
            project_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.project_dir.join("chunks")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.project_dir.join("chunks_bak")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.project_dir.join("checkpoints")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.project_dir.join(".lock")
    }

    pub fn version_path(&self) -> PathBuf {
        self.project_dir.join("version.json")
    }

    /// Committed primary for a chunk name
    pub fn chunk_primary(&self, name: &str) -> PathBuf {
        self.chunks_dir().join(format!("{}.json", name))
    }

    /// Previous committed value for a chunk name
    pub fn chunk_backup(&self, name: &str) -> PathBuf {
        self.backup_dir().join(format!("{}.bak", name))
    }

    /// In-flight write target for a chunk name
    pub fn chunk_tmp(&self, name: &str) -> PathBuf {
        self.chunks_dir().join(format!("{}.tmp", name))
    }

    /// Create the project directory tree if missing (idempotent)
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.project_dir.clone(),
            self.chunks_dir(),
            self.backup_dir(),
            self.checkpoints_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| EngineError::io("create-dir", &dir, e))?;
        }
        Ok(())
    }
}
