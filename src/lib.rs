//! # SafeChunk Core
//!
//! A single-writer, crash-resistant, file-backed persistence layer. State
//! lives as independently named JSON "chunks" inside a project directory;
//! the engine provides database-like durability on top of ordinary files,
//! with no server process.
//!
//! ## Guarantees
//!
//! - Atomic shard replacement (tmp write, fsync, backup rotation, rename)
//! - Self-healing reads: a corrupt primary is recovered from its backup
//! - Exclusive project ownership via a PID lock with stale-owner detection
//! - Debounced write coalescing with an explicit `force_sync` barrier
//! - Point-in-time zip checkpoints with retention
//!
//! ## Layout
//!
//! ```text
//! <root>/<project_id>/
//!     .lock                    owner PID
//!     version.json             engine/schema identity
//!     chunks/<name>.json       committed primaries
//!     chunks_bak/<name>.bak    previous committed values
//!     checkpoints/*.zip        point-in-time archives
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use safechunk_core::{ChunkEngine, EngineOptions};
//! use serde_json::json;
//!
//! # fn main() -> safechunk_core::Result<()> {
//! let (mut engine, _status) = ChunkEngine::create("demo", EngineOptions::default())?;
//!
//! let mut profile = serde_json::Map::new();
//! profile.insert("name".to_string(), json!("Alice"));
//! engine.stage_update(&profile, "user_profile")?;
//!
//! engine.force_sync()?;
//! assert_eq!(engine.fetch_chunk("user_profile")?, profile);
//! engine.detach()?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod checkpoint;
pub mod engine;
pub mod errors;
pub mod hooks;
pub mod layout;
pub mod lock;
pub mod meta;
pub mod process;
pub mod registry;
pub mod shard;

pub use checkpoint::{CheckpointInfo, CheckpointManifest, CheckpointStore};
pub use engine::{ChunkEngine, CreateStatus, EngineOptions, HealthReport, LifecycleState};
pub use errors::{CheckpointPhase, EngineError, Result};
pub use hooks::{EngineHooks, NoopHooks};
pub use layout::ProjectLayout;
pub use lock::{LockManager, LockState};
pub use meta::VersionMeta;
pub use process::{ProcessProbe, SystemProbe};
pub use registry::list_all_projects;
pub use shard::{ChunkPayload, ShardStore};

/// Engine version stamped into `version.json`
pub const ENGINE_VERSION: &str = "0.4.1";

/// On-disk schema version; bumped only on layout changes
pub const SCHEMA_VERSION: u32 = 1;

/// Default root directory for project storage
pub const DEFAULT_ROOT: &str = "./user_projects";
