//! Process liveness probe consumed by the lock manager
//!
//! The engine never enumerates processes itself; it asks a `ProcessProbe`
//! whether a recorded lock owner is still alive. Tests inject deterministic
//! probes, production uses `SystemProbe`.

use sysinfo::{Pid, System};

/// Liveness predicate for PIDs recorded in lock files
pub trait ProcessProbe: Send + Sync {
    /// Returns true if a process with this PID exists on the host right now
    fn is_alive(&self, pid: u32) -> bool;
}

/// Default probe backed by an OS process table snapshot
#[derive(Debug, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let mut sys = System::new();
        sys.refresh_processes(sysinfo::ProcessesToUpdate::All);
        sys.process(Pid::from_u32(pid)).is_some()
    }
}

impl<F> ProcessProbe for F
where
    F: Fn(u32) -> bool + Send + Sync,
{
    fn is_alive(&self, pid: u32) -> bool {
        self(pid)
    }
}
