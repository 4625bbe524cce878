//! Observability sinks registerable on the engine
//!
//! Three callbacks cover everything an embedder needs to surface: status
//! messages, sync completions, and faults. All three are invoked
//! synchronously from whichever engine context performed the operation.
//! A panicking sink is contained; it never unwinds into the engine.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::errors::EngineError;

/// Engine-to-embedder notification surface
///
/// All methods default to no-ops so implementors override only what they
/// display.
pub trait EngineHooks: Send + Sync {
    /// Informational activity (staging, syncing, lifecycle changes)
    fn on_status(&self, _message: &str) {}

    /// Fired once per successful sync that wrote at least one shard
    fn on_sync(&self) {}

    /// Any non-fatal or fatal I/O, lock or integrity error
    fn on_fault(&self, _error: &EngineError) {}
}

/// Default sink that discards everything
#[derive(Debug, Default)]
pub struct NoopHooks;

impl EngineHooks for NoopHooks {}

pub(crate) fn emit_status(hooks: &Arc<dyn EngineHooks>, message: &str) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| hooks.on_status(message)));
}

pub(crate) fn emit_sync(hooks: &Arc<dyn EngineHooks>) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| hooks.on_sync()));
}

pub(crate) fn emit_fault(hooks: &Arc<dyn EngineHooks>, error: &EngineError) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| hooks.on_fault(error)));
}
