//! The SafeChunk engine: one instance binds one project directory
//!
//! Responsibilities:
//! - Factory construction (`create` / `open`) with exclusive PID locking
//! - Lifecycle gate: every data operation requires the `Active` state
//! - Debounced staging buffer, flushed by a dedicated sleeper thread
//! - Checkpoint surface (create / list / restore)
//! - Health reporting and teardown (`detach` / `delete_project`)
//!
//! Concurrency model: a single mutex serializes the staging buffer,
//! lifecycle state and all flush I/O. The sleeper thread rendezvouses on
//! the same mutex before touching anything, and a condvar wakes it when a
//! new debounce deadline is armed or shutdown is requested. Disk I/O runs
//! with the mutex held, so callers wanting a responsive UI drive the
//! engine off their UI thread.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use sysinfo::Disks;

use crate::buffer::StagingBuffer;
use crate::checkpoint::{CheckpointInfo, CheckpointStore};
use crate::errors::{EngineError, Result};
use crate::hooks::{self, EngineHooks, NoopHooks};
use crate::layout::{validate_chunk_name, ProjectLayout};
use crate::lock::{LockManager, LockState};
use crate::meta::VersionMeta;
use crate::process::{ProcessProbe, SystemProbe};
use crate::registry;
use crate::shard::{ChunkPayload, ShardStore};
use crate::DEFAULT_ROOT;

/// Construction-time configuration
#[derive(Clone)]
pub struct EngineOptions {
    /// Directory holding all project directories
    pub root: PathBuf,
    /// Quiescent interval after the last stage before the buffer flushes
    pub debounce_delay: Duration,
    /// Default number of checkpoint archives to keep
    pub checkpoint_retention: usize,
    /// Observability sinks
    pub hooks: Arc<dyn EngineHooks>,
    /// Liveness predicate for lock-owner PIDs
    pub probe: Arc<dyn ProcessProbe>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            debounce_delay: Duration::from_millis(1500),
            checkpoint_retention: 10,
            hooks: Arc::new(NoopHooks),
            probe: Arc::new(SystemProbe),
        }
    }
}

impl EngineOptions {
    /// Default options with a specific root directory
    pub fn at_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

/// Engine lifecycle; `Detached` and `Deleted` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    Detached,
    Deleted,
}

/// Outcome tag returned by [`ChunkEngine::create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateStatus {
    /// The requested project id was free
    Created,
    /// The id collided; the project was created under the contained id
    Renamed(String),
}

/// Snapshot of project diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub active: bool,
    pub project_id: String,
    pub root: PathBuf,
    /// Committed shards (`.json` files under `chunks/`)
    pub shards: usize,
    /// Leftover `.tmp` files from interrupted writes
    pub orphans: usize,
    pub dirty_buffer: bool,
    pub storage_usage_percent: f64,
}

struct EngineInner {
    state: LifecycleState,
    buffer: StagingBuffer,
    shutdown: bool,
}

struct EngineShared {
    layout: ProjectLayout,
    store: ShardStore,
    checkpoints: CheckpointStore,
    lock: LockManager,
    hooks: Arc<dyn EngineHooks>,
    debounce: Duration,
    retention: usize,
    inner: Mutex<EngineInner>,
    wakeup: Condvar,
}

impl EngineShared {
    fn lock_inner(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fault-tolerant sharded JSON persistence for one project
pub struct ChunkEngine {
    shared: Arc<EngineShared>,
    timer: Option<JoinHandle<()>>,
}

impl ChunkEngine {
    /// Create a new project and bind an engine to it
    ///
    /// An existing directory under the requested id is never touched; the
    /// id is suffixed with the smallest free `_N` instead and the status
    /// tag reports the rename.
    pub fn create(project_id: &str, options: EngineOptions) -> Result<(Self, CreateStatus)> {
        fs::create_dir_all(&options.root)
            .map_err(|e| EngineError::io("create-root", &options.root, e))?;

        let final_id = registry::allocate_project_id(&options.root, project_id)?;
        let status = if final_id == project_id {
            CreateStatus::Created
        } else {
            CreateStatus::Renamed(final_id.clone())
        };

        let layout = ProjectLayout::new(options.root.clone(), &final_id)?;
        layout.ensure_dirs()?;

        let lock = LockManager::new(layout.lock_path(), options.probe.clone());
        match lock.try_acquire()? {
            LockState::Acquired => {}
            LockState::HeldByLive(pid) => return Err(EngineError::Locked { pid }),
            LockState::Stale(_) => lock.reclaim_and_acquire()?,
        }

        if let Err(e) = VersionMeta::for_project(&final_id).save(&layout.version_path()) {
            let _ = lock.release();
            return Err(e);
        }

        hooks::emit_status(&options.hooks, &format!("Project '{}' created", final_id));
        let engine = Self::start(layout, lock, options)?;
        Ok((engine, status))
    }

    /// Open an existing project
    ///
    /// A stale lock (dead owner) is reclaimed; a live owner yields
    /// [`EngineError::Locked`] and no engine. Orphaned `.tmp` files from a
    /// prior crash are swept before the engine goes active.
    pub fn open(project_id: &str, options: EngineOptions) -> Result<Self> {
        let layout = ProjectLayout::new(options.root.clone(), project_id)?;
        if !layout.project_dir().is_dir() {
            return Err(EngineError::NotFound(project_id.to_string()));
        }

        let lock = LockManager::new(layout.lock_path(), options.probe.clone());
        match lock.try_acquire()? {
            LockState::Acquired => {}
            LockState::HeldByLive(pid) => return Err(EngineError::Locked { pid }),
            LockState::Stale(pid) => {
                hooks::emit_status(
                    &options.hooks,
                    &format!("Stale lock from process {}, reclaiming", pid),
                );
                lock.reclaim_and_acquire()?;
            }
        }

        if let Err(e) = layout.ensure_dirs() {
            let _ = lock.release();
            return Err(e);
        }

        if layout.version_path().is_file() {
            match VersionMeta::load(&layout.version_path()) {
                Ok(meta) => hooks::emit_status(
                    &options.hooks,
                    &format!(
                        "Opened project '{}' (created by engine {})",
                        meta.project_id, meta.engine_version
                    ),
                ),
                Err(e) => hooks::emit_fault(&options.hooks, &e),
            }
        }

        let sweeper = ShardStore::new(layout.clone(), options.hooks.clone());
        match sweeper.sweep_orphans() {
            Ok(0) => {}
            Ok(swept) => hooks::emit_status(
                &options.hooks,
                &format!("Removed {} orphaned write artifact(s)", swept),
            ),
            Err(e) => {
                let _ = lock.release();
                return Err(e);
            }
        }

        Self::start(layout, lock, options)
    }

    fn start(layout: ProjectLayout, lock: LockManager, options: EngineOptions) -> Result<Self> {
        let hooks = options.hooks.clone();
        let store = ShardStore::new(layout.clone(), hooks.clone());
        let checkpoints = CheckpointStore::new(layout.clone());
        let project_dir = layout.project_dir().to_path_buf();

        let shared = Arc::new(EngineShared {
            layout,
            store,
            checkpoints,
            lock,
            hooks: hooks.clone(),
            debounce: options.debounce_delay,
            retention: options.checkpoint_retention.max(1),
            inner: Mutex::new(EngineInner {
                state: LifecycleState::Active,
                buffer: StagingBuffer::new(),
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });

        let timer_shared = Arc::clone(&shared);
        let timer = thread::Builder::new()
            .name("safechunk-flush".to_string())
            .spawn(move || timer_loop(timer_shared))
            .map_err(|e| EngineError::io("spawn-flush-timer", project_dir, e))?;

        hooks::emit_status(&hooks, "Engine attached, project locked");
        Ok(Self {
            shared,
            timer: Some(timer),
        })
    }

    pub fn project_id(&self) -> &str {
        self.shared.layout.project_id()
    }

    pub fn root(&self) -> &Path {
        self.shared.layout.root()
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.lock_inner().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    /// Stage a payload for a debounced write
    ///
    /// The payload is copied into the buffer; later stages for the same
    /// chunk within the debounce window replace it, so only the last
    /// payload is ever written.
    pub fn stage_update(&self, payload: &ChunkPayload, chunk_name: &str) -> Result<()> {
        validate_chunk_name(chunk_name)?;
        let mut inner = self.shared.lock_inner();
        guard_active(&inner)?;

        inner.buffer.stage(chunk_name, payload.clone(), self.shared.debounce);
        hooks::emit_status(
            &self.shared.hooks,
            &format!("Changes staged for '{}'", chunk_name),
        );
        drop(inner);
        self.shared.wakeup.notify_all();
        Ok(())
    }

    /// Commit all staged payloads now
    ///
    /// When this returns `Ok`, every stage issued before the call is
    /// durable on disk (as far as the filesystem honors fsync).
    pub fn force_sync(&self) -> Result<()> {
        let mut inner = self.shared.lock_inner();
        guard_active(&inner)?;
        commit_staged(&self.shared, &mut inner).map(|_| ())
    }

    /// Read a chunk, healing a corrupt primary from its backup
    pub fn fetch_chunk(&self, chunk_name: &str) -> Result<ChunkPayload> {
        validate_chunk_name(chunk_name)?;
        let inner = self.shared.lock_inner();
        guard_active(&inner)?;
        self.shared.store.fetch_chunk(chunk_name)
    }

    /// Flush, then archive the current shard state
    ///
    /// `retention` falls back to the configured default. Returns the
    /// archive file name.
    pub fn create_checkpoint(
        &self,
        label: &str,
        notes: &str,
        retention: Option<usize>,
    ) -> Result<String> {
        let mut inner = self.shared.lock_inner();
        guard_active(&inner)?;

        hooks::emit_status(&self.shared.hooks, &format!("Creating checkpoint '{}'", label));
        commit_staged(&self.shared, &mut inner)?;

        let keep = retention.unwrap_or(self.shared.retention).max(1);
        match self.shared.checkpoints.create(label, notes, keep) {
            Ok(name) => {
                hooks::emit_status(&self.shared.hooks, &format!("Checkpoint '{}' created", name));
                Ok(name)
            }
            Err(e) => {
                hooks::emit_fault(&self.shared.hooks, &e);
                Err(e)
            }
        }
    }

    /// Destructively replace shard state with a checkpoint's contents
    ///
    /// A failed extraction can leave the project partially restored; the
    /// engine stays active so the caller can retry or restore another
    /// archive.
    pub fn restore_checkpoint(&self, name: &str) -> Result<()> {
        let mut inner = self.shared.lock_inner();
        guard_active(&inner)?;
        commit_staged(&self.shared, &mut inner)?;

        match self.shared.checkpoints.restore(name) {
            Ok(()) => {
                hooks::emit_status(&self.shared.hooks, &format!("Checkpoint '{}' restored", name));
                Ok(())
            }
            Err(e) => {
                hooks::emit_fault(&self.shared.hooks, &e);
                Err(e)
            }
        }
    }

    /// Archives newest-first with parsed manifest fields
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointInfo>> {
        let inner = self.shared.lock_inner();
        guard_active(&inner)?;
        self.shared.checkpoints.list()
    }

    /// Project diagnostics; counts orphans but never mutates state
    pub fn get_health_report(&self) -> HealthReport {
        let inner = self.shared.lock_inner();
        HealthReport {
            active: inner.state == LifecycleState::Active,
            project_id: self.shared.layout.project_id().to_string(),
            root: self.shared.layout.root().to_path_buf(),
            shards: self.shared.store.count_shards(),
            orphans: self.shared.store.count_orphans(),
            dirty_buffer: inner.buffer.is_dirty(),
            storage_usage_percent: storage_usage_percent(self.shared.layout.project_dir()),
        }
    }

    /// Flush, stop the timer, release the lock
    ///
    /// Idempotent; calling on an already detached or deleted engine is a
    /// no-op. Waits for any in-flight flush (both run under the engine
    /// mutex, so a flush in progress completes first).
    pub fn detach(&mut self) -> Result<()> {
        {
            let mut inner = self.shared.lock_inner();
            if inner.state != LifecycleState::Active {
                return Ok(());
            }
            // best-effort flush; faults were already surfaced to the sink
            let _ = commit_staged(&self.shared, &mut inner);
            inner.buffer.clear_deadline();
            inner.shutdown = true;
            inner.state = LifecycleState::Detached;
        }
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.timer.take() {
            let _ = handle.join();
        }

        if let Err(e) = self.shared.lock.release() {
            hooks::emit_fault(&self.shared.hooks, &e);
        }
        hooks::emit_status(&self.shared.hooks, "Engine detached");
        Ok(())
    }

    /// Detach, then recursively remove the project directory
    ///
    /// Refuses to run without `confirmed = true`.
    pub fn delete_project(&mut self, confirmed: bool) -> Result<()> {
        if !confirmed {
            return Err(EngineError::ConfirmationRequired);
        }
        {
            let inner = self.shared.lock_inner();
            guard_active(&inner)?;
        }
        self.detach()?;

        let dir = self.shared.layout.project_dir().to_path_buf();
        if let Err(source) = fs::remove_dir_all(&dir) {
            let fault = EngineError::io("remove-project", &dir, source);
            hooks::emit_fault(&self.shared.hooks, &fault);
            return Err(fault);
        }

        self.shared.lock_inner().state = LifecycleState::Deleted;
        hooks::emit_status(
            &self.shared.hooks,
            &format!("Project '{}' deleted", self.shared.layout.project_id()),
        );
        Ok(())
    }
}

impl Drop for ChunkEngine {
    fn drop(&mut self) {
        // an embedder that forgets teardown still flushes and unlocks
        if self.timer.is_some() {
            let _ = self.detach();
        }
    }
}

impl std::fmt::Debug for ChunkEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkEngine")
            .field("project_id", &self.shared.layout.project_id())
            .field("root", &self.shared.layout.root())
            .finish()
    }
}

fn guard_active(inner: &EngineInner) -> Result<()> {
    if inner.state == LifecycleState::Active {
        Ok(())
    } else {
        Err(EngineError::Inactive)
    }
}

/// Persist every staged chunk, clearing only the entries that committed
///
/// Within one chunk, writes land in stage order because the buffer holds
/// at most the latest payload. Order across chunk names is unspecified.
/// Returns the number of shards written; the first fault aborts nothing
/// else (remaining chunks still persist) but is returned to the caller.
fn commit_staged(shared: &EngineShared, inner: &mut EngineInner) -> Result<usize> {
    inner.buffer.clear_deadline();
    if !inner.buffer.is_dirty() {
        return Ok(0);
    }

    inner.buffer.set_flushing(true);
    hooks::emit_status(
        &shared.hooks,
        &format!("Syncing {} chunk(s) to disk", inner.buffer.len()),
    );

    let mut first_fault = None;
    let mut written = 0;
    for name in inner.buffer.names() {
        let Some(payload) = inner.buffer.get(&name).cloned() else {
            continue;
        };
        match shared.store.persist_chunk(&name, &payload) {
            Ok(()) => {
                inner.buffer.remove(&name);
                written += 1;
            }
            Err(fault) => {
                if first_fault.is_none() {
                    first_fault = Some(fault);
                }
            }
        }
    }
    inner.buffer.set_flushing(false);

    match first_fault {
        Some(fault) => Err(fault),
        None => {
            if written > 0 {
                hooks::emit_sync(&shared.hooks);
                hooks::emit_status(&shared.hooks, "Sync complete");
            }
            Ok(written)
        }
    }
}

/// Sleeper thread: waits for the debounce deadline, then flushes
fn timer_loop(shared: Arc<EngineShared>) {
    let mut inner = shared.lock_inner();
    loop {
        if inner.shutdown {
            break;
        }
        let wait = match inner.buffer.deadline() {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    if !inner.buffer.is_flushing() {
                        let _ = commit_staged(&shared, &mut inner);
                    }
                    continue;
                }
                deadline - now
            }
            None => Duration::from_secs(60),
        };
        let (guard, _timeout) = shared
            .wakeup
            .wait_timeout(inner, wait)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner = guard;
    }
}

fn storage_usage_percent(path: &Path) -> f64 {
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    let mut best: Option<(usize, u64, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if target.starts_with(mount) {
            let depth = mount.as_os_str().len();
            if best.map_or(true, |(d, _, _)| depth > d) {
                best = Some((depth, disk.total_space(), disk.available_space()));
            }
        }
    }

    match best {
        Some((_, total, available)) if total > 0 => {
            (total.saturating_sub(available)) as f64 / total as f64 * 100.0
        }
        _ => 0.0,
    }
}
