//! Shard I/O core: atomic writes, self-healing reads, orphan sweep
//!
//! A shard is one named JSON object persisted as `chunks/<name>.json`.
//! Writes go through a crash-safe swap:
//!
//! 1. ensure `chunks/` and `chunks_bak/` exist
//! 2. serialize the payload
//! 3. write `<name>.tmp`, flush, fsync the file and its directory
//! 4. parse the tmp back and require structural equality
//! 5. rotate the current primary into `chunks_bak/<name>.bak`
//! 6. rename `<name>.tmp` over `<name>.json`
//! 7. fsync `chunks/` (best effort)
//!
//! Reads fall back to the backup when the primary fails to parse and
//! rewrite the recovered value as the new primary. A `.tmp` file observed
//! outside an in-flight write is an orphan from an interrupted run and is
//! swept on startup.
//!
//! The swap relies on `rename(2)` being atomic within one local
//! filesystem; the engine assumes the project directory does not span
//! filesystems.

use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::errors::{EngineError, Result};
use crate::hooks::{self, EngineHooks};
use crate::layout::ProjectLayout;

/// One chunk's payload: a JSON object, owned
pub type ChunkPayload = Map<String, Value>;

pub struct ShardStore {
    layout: ProjectLayout,
    hooks: Arc<dyn EngineHooks>,
}

impl ShardStore {
    pub fn new(layout: ProjectLayout, hooks: Arc<dyn EngineHooks>) -> Self {
        Self { layout, hooks }
    }

    /// Commit `payload` as the new value of chunk `name`
    ///
    /// Transactional at the shard level: any failure before the rename in
    /// step 6 leaves the prior primary unchanged, and the backup always
    /// reflects the previously committed value. Faults are reported to the
    /// fault sink and returned.
    pub fn persist_chunk(&self, name: &str, payload: &ChunkPayload) -> Result<()> {
        match self.persist_inner(name, payload) {
            Ok(()) => Ok(()),
            Err(e) => {
                hooks::emit_fault(&self.hooks, &e);
                Err(e)
            }
        }
    }

    fn persist_inner(&self, name: &str, payload: &ChunkPayload) -> Result<()> {
        let chunks_dir = self.layout.chunks_dir();
        let backup_dir = self.layout.backup_dir();
        let primary = self.layout.chunk_primary(name);
        let backup = self.layout.chunk_backup(name);
        let tmp = self.layout.chunk_tmp(name);

        // 1. directories
        fs::create_dir_all(&chunks_dir)
            .map_err(|e| EngineError::io("create-dir", &chunks_dir, e))?;
        fs::create_dir_all(&backup_dir)
            .map_err(|e| EngineError::io("create-dir", &backup_dir, e))?;

        // 2. serialize before touching anything on disk
        let bytes = serde_json::to_vec_pretty(payload)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;

        // 3. tmp write + fsync
        if let Err(e) = self.write_tmp(&tmp, &bytes, &chunks_dir) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        // 4. readback integrity check
        match read_object(&tmp) {
            Some(read_back) if &read_back == payload => {}
            _ => {
                let _ = fs::remove_file(&tmp);
                return Err(EngineError::Integrity(name.to_string()));
            }
        }

        // 5. rotate the current primary into the backup; a failed rotation
        //    is tolerated, the swap still commits
        if primary.exists() {
            if let Err(e) = rotate_backup(&primary, &backup) {
                hooks::emit_status(
                    &self.hooks,
                    &format!("Warning: backup rotation failed for '{}': {}", name, e),
                );
            }
        }

        // 6. the swap; the prior backup still holds the last committed
        //    value if this fails
        fs::rename(&tmp, &primary).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            EngineError::io("rename-chunk", &primary, e)
        })?;

        // 7. directory fsync, best effort
        if fsync_dir(&chunks_dir).is_err() {
            hooks::emit_status(
                &self.hooks,
                &format!("Warning: directory sync failed after committing '{}'", name),
            );
        }

        Ok(())
    }

    /// Read chunk `name`, healing a corrupt primary from its backup
    ///
    /// A missing primary yields the empty object. When both primary and
    /// backup are unreadable the fault is surfaced to the sink and the
    /// empty object is returned so callers can continue.
    pub fn fetch_chunk(&self, name: &str) -> Result<ChunkPayload> {
        let primary = self.layout.chunk_primary(name);
        if !primary.exists() {
            return Ok(ChunkPayload::new());
        }

        if let Some(data) = read_object(&primary) {
            return Ok(data);
        }

        hooks::emit_status(
            &self.hooks,
            &format!("Primary '{}' corrupted, attempting backup recovery", name),
        );

        if let Some(data) = read_object(&self.layout.chunk_backup(name)) {
            // Reinstall the recovered value as the primary. A failed
            // rewrite already reported its fault; the caller still gets
            // the recovered data.
            let _ = self.persist_chunk(name, &data);
            return Ok(data);
        }

        let fault = EngineError::CorruptionUnrecoverable(name.to_string());
        hooks::emit_fault(&self.hooks, &fault);
        Ok(ChunkPayload::new())
    }

    /// Delete orphaned `.tmp` files left by an interrupted write
    pub fn sweep_orphans(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.files_with_extension("tmp")? {
            fs::remove_file(&path).map_err(|e| EngineError::io("remove-orphan", &path, e))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Number of `.tmp` orphans currently present (no mutation)
    pub fn count_orphans(&self) -> usize {
        self.files_with_extension("tmp").map(|v| v.len()).unwrap_or(0)
    }

    /// Number of committed shards (`.json` files under `chunks/`)
    pub fn count_shards(&self) -> usize {
        self.files_with_extension("json").map(|v| v.len()).unwrap_or(0)
    }

    fn files_with_extension(&self, ext: &str) -> Result<Vec<std::path::PathBuf>> {
        let dir = self.layout.chunks_dir();
        let mut out = Vec::new();
        if !dir.is_dir() {
            return Ok(out);
        }
        let entries = fs::read_dir(&dir).map_err(|e| EngineError::io("read-dir", &dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::io("read-dir", &dir, e))?;
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some(ext) {
                out.push(path);
            }
        }
        Ok(out)
    }

    fn write_tmp(&self, tmp: &Path, bytes: &[u8], dir: &Path) -> Result<()> {
        let mut file = File::create(tmp).map_err(|e| EngineError::io("create-tmp", tmp, e))?;
        file.write_all(bytes)
            .map_err(|e| EngineError::io("write-tmp", tmp, e))?;
        file.flush().map_err(|e| EngineError::io("flush-tmp", tmp, e))?;
        file.sync_all()
            .map_err(|e| EngineError::io("fsync-tmp", tmp, e))?;
        fsync_dir(dir).map_err(|e| EngineError::io("fsync-dir", dir, e))?;
        Ok(())
    }
}

impl std::fmt::Debug for ShardStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardStore")
            .field("layout", &self.layout)
            .finish()
    }
}

/// Parse a path as a top-level JSON object; None on any failure
fn read_object(path: &Path) -> Option<ChunkPayload> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<Value>(&content).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Copy the primary to the backup location atomically (tmp+rename within
/// the backup directory)
fn rotate_backup(primary: &Path, backup: &Path) -> std::io::Result<()> {
    let file_name = backup
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("chunk.bak");
    let staging = backup.with_file_name(format!("{}.tmp", file_name));
    fs::copy(primary, &staging)?;
    if let Err(e) = fs::rename(&staging, backup) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    Ok(())
}

fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    let handle = File::open(dir)?;
    handle.sync_all()
}
