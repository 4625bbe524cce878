//! Checkpoint archives: point-in-time zip snapshots of the shard state
//!
//! An archive `checkpoints/checkpoint_<label>_<YYYYMMDD_HHMMSS>.zip`
//! mirrors `chunks/` and `chunks_bak/` and carries a `_manifest.json` at
//! the zip root. Archives are built in a `.tmp` sibling and renamed into
//! place; a crash mid-archive never leaves a half-written zip visible.
//! Retention keeps the newest N archives by modification time.
//!
//! Restore is destructive: current shard state is wiped before
//! extraction. An extraction failure leaves the project partially
//! restored; the engine surfaces the fault and stays active so the caller
//! can retry or pick another archive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::{CheckpointPhase, EngineError, Result};
use crate::layout::ProjectLayout;

/// Manifest written at the zip root of every archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub label: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub shard_names: Vec<String>,
}

/// Parsed listing entry for one archive
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    /// Archive file name under `checkpoints/`
    pub name: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub bytes: u64,
}

pub struct CheckpointStore {
    layout: ProjectLayout,
}

impl CheckpointStore {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    /// Archive the current shard state and prune beyond `retention`
    ///
    /// The caller must have flushed the staging buffer first; the archive
    /// reflects only what is on disk. Returns the archive file name.
    pub fn create(&self, label: &str, notes: &str, retention: usize) -> Result<String> {
        let dir = self.layout.checkpoints_dir();
        fs::create_dir_all(&dir).map_err(|e| EngineError::io("create-dir", &dir, e))?;

        let name = self.allocate_archive_name(&dir, label);
        let final_path = dir.join(&name);
        let tmp_path = dir.join(format!("{}.tmp", name));

        let manifest = CheckpointManifest {
            label: sanitize_label(label),
            notes: notes.to_string(),
            created_at: Utc::now(),
            shard_names: self.shard_names()?,
        };

        if let Err(e) = self.write_archive(&tmp_path, &manifest) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            EngineError::checkpoint(
                CheckpointPhase::Archive,
                format!("failed to place archive {}: {}", name, e),
            )
        })?;

        self.prune(retention)?;
        Ok(name)
    }

    /// Archives newest-first with parsed manifest fields
    pub fn list(&self) -> Result<Vec<CheckpointInfo>> {
        let dir = self.layout.checkpoints_dir();
        let mut out = Vec::new();
        if !dir.is_dir() {
            return Ok(out);
        }

        for path in zip_files(&dir)? {
            // unreadable archives are skipped, not fatal to the listing
            if let Some(info) = self.read_info(&path) {
                out.push(info);
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// Replace current shard state with the archive's contents
    pub fn restore(&self, name: &str) -> Result<()> {
        if name.contains('/') || name.contains('\\') {
            return Err(EngineError::InvalidName(format!(
                "checkpoint name '{}' must not contain path separators",
                name
            )));
        }

        let path = self.layout.checkpoints_dir().join(name);
        let file = File::open(&path).map_err(|e| {
            EngineError::checkpoint(CheckpointPhase::Open, format!("cannot open {}: {}", name, e))
        })?;
        let mut archive = ZipArchive::new(file).map_err(|e| {
            EngineError::checkpoint(CheckpointPhase::Open, format!("cannot read {}: {}", name, e))
        })?;

        // the manifest must parse before anything is destroyed
        read_manifest(&mut archive)?;

        self.wipe_dir(&self.layout.chunks_dir())?;
        self.wipe_dir(&self.layout.backup_dir())?;

        self.extract(&mut archive)
    }

    fn extract(&self, archive: &mut ZipArchive<File>) -> Result<()> {
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(|e| {
                EngineError::checkpoint(CheckpointPhase::Extract, e.to_string())
            })?;
            if entry.is_dir() {
                continue;
            }
            let Some(relative) = entry.enclosed_name() else {
                continue;
            };
            let Some(target) = self.target_for(&relative) else {
                continue;
            };

            let mut out = File::create(&target).map_err(|e| {
                EngineError::checkpoint(
                    CheckpointPhase::Extract,
                    format!("cannot create {}: {}", target.display(), e),
                )
            })?;
            std::io::copy(&mut entry, &mut out).map_err(|e| {
                EngineError::checkpoint(
                    CheckpointPhase::Extract,
                    format!("cannot write {}: {}", target.display(), e),
                )
            })?;
        }
        Ok(())
    }

    /// Map an archive-internal path to its on-disk location
    ///
    /// Only direct children of the archive's `chunks/` and `chunks_bak/`
    /// directories are restored; everything else (including the manifest)
    /// is skipped.
    fn target_for(&self, relative: &Path) -> Option<PathBuf> {
        let mut components = relative.iter();
        let top = components.next()?.to_str()?;
        let file_name = components.next()?;
        if components.next().is_some() {
            return None;
        }
        match top {
            "chunks" => Some(self.layout.chunks_dir().join(file_name)),
            "chunks_bak" => Some(self.layout.backup_dir().join(file_name)),
            _ => None,
        }
    }

    fn wipe_dir(&self, dir: &Path) -> Result<()> {
        if dir.is_dir() {
            fs::remove_dir_all(dir).map_err(|e| {
                EngineError::checkpoint(
                    CheckpointPhase::Wipe,
                    format!("cannot clear {}: {}", dir.display(), e),
                )
            })?;
        }
        fs::create_dir_all(dir).map_err(|e| {
            EngineError::checkpoint(
                CheckpointPhase::Wipe,
                format!("cannot recreate {}: {}", dir.display(), e),
            )
        })
    }

    fn write_archive(&self, path: &Path, manifest: &CheckpointManifest) -> Result<()> {
        let archive_err = |message: String| EngineError::checkpoint(CheckpointPhase::Archive, message);

        let file = File::create(path).map_err(|e| archive_err(e.to_string()))?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for name in &manifest.shard_names {
            let source = self.layout.chunk_primary(name);
            let bytes = fs::read(&source).map_err(|e| archive_err(e.to_string()))?;
            zip.start_file(format!("chunks/{}.json", name), options)
                .map_err(|e| archive_err(e.to_string()))?;
            zip.write_all(&bytes).map_err(|e| archive_err(e.to_string()))?;
        }

        for path in files_with_extension(&self.layout.backup_dir(), "bak")? {
            if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
                let bytes = fs::read(&path).map_err(|e| archive_err(e.to_string()))?;
                zip.start_file(format!("chunks_bak/{}", file_name), options)
                    .map_err(|e| archive_err(e.to_string()))?;
                zip.write_all(&bytes).map_err(|e| archive_err(e.to_string()))?;
            }
        }

        let manifest_json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        zip.start_file("_manifest.json", options)
            .map_err(|e| archive_err(e.to_string()))?;
        zip.write_all(&manifest_json)
            .map_err(|e| archive_err(e.to_string()))?;

        let file = zip.finish().map_err(|e| archive_err(e.to_string()))?;
        let _ = file.sync_all();
        Ok(())
    }

    /// Shard names present on disk, the manifest's source of truth
    fn shard_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = files_with_extension(&self.layout.chunks_dir(), "json")?
            .into_iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        names.sort();
        Ok(names)
    }

    fn allocate_archive_name(&self, dir: &Path, label: &str) -> String {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let base = format!("checkpoint_{}_{}", sanitize_label(label), stamp);
        if !dir.join(format!("{}.zip", base)).exists() {
            return format!("{}.zip", base);
        }
        // same label within one second: disambiguate with the smallest
        // free counter, mirroring project id collision handling
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}.zip", base, n);
            if !dir.join(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }

    fn prune(&self, retention: usize) -> Result<()> {
        let dir = self.layout.checkpoints_dir();
        let mut archives: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
        for path in zip_files(&dir)? {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .map_err(|e| {
                    EngineError::checkpoint(CheckpointPhase::Prune, e.to_string())
                })?;
            archives.push((path, modified));
        }

        archives.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        for (path, _) in archives.into_iter().skip(retention.max(1)) {
            fs::remove_file(&path).map_err(|e| {
                EngineError::checkpoint(CheckpointPhase::Prune, e.to_string())
            })?;
        }
        Ok(())
    }

    fn read_info(&self, path: &Path) -> Option<CheckpointInfo> {
        let bytes = fs::metadata(path).ok()?.len();
        let file = File::open(path).ok()?;
        let mut archive = ZipArchive::new(file).ok()?;
        let manifest = read_manifest(&mut archive).ok()?;
        Some(CheckpointInfo {
            name: path.file_name()?.to_str()?.to_string(),
            label: manifest.label,
            created_at: manifest.created_at,
            bytes,
        })
    }
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("layout", &self.layout)
            .finish()
    }
}

fn read_manifest(archive: &mut ZipArchive<File>) -> Result<CheckpointManifest> {
    let mut entry = archive.by_name("_manifest.json").map_err(|e| {
        EngineError::checkpoint(CheckpointPhase::Manifest, format!("missing manifest: {}", e))
    })?;
    let mut content = String::new();
    entry.read_to_string(&mut content).map_err(|e| {
        EngineError::checkpoint(CheckpointPhase::Manifest, e.to_string())
    })?;
    serde_json::from_str(&content).map_err(|e| {
        EngineError::checkpoint(CheckpointPhase::Manifest, format!("invalid manifest: {}", e))
    })
}

/// Restrict a label to the chunk-name charset; empty labels become "manual"
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    if cleaned.is_empty() {
        "manual".to_string()
    } else {
        cleaned
    }
}

fn zip_files(dir: &Path) -> Result<Vec<PathBuf>> {
    files_with_extension(dir, "zip")
}

fn files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    let entries = fs::read_dir(dir).map_err(|e| EngineError::io("read-dir", dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::io("read-dir", dir, e))?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some(ext) {
            out.push(path);
        }
    }
    Ok(out)
}
