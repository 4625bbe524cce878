//! Error types for the SafeChunk engine

use std::path::PathBuf;
use thiserror::Error;

/// Phase discriminator for checkpoint failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPhase {
    /// Building the zip archive
    Archive,
    /// Deleting archives beyond the retention window
    Prune,
    /// Opening an existing archive for restore or listing
    Open,
    /// Reading or parsing `_manifest.json`
    Manifest,
    /// Clearing current shard state before extraction
    Wipe,
    /// Extracting archive entries into the project
    Extract,
}

impl std::fmt::Display for CheckpointPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointPhase::Archive => write!(f, "archive"),
            CheckpointPhase::Prune => write!(f, "prune"),
            CheckpointPhase::Open => write!(f, "open"),
            CheckpointPhase::Manifest => write!(f, "manifest"),
            CheckpointPhase::Wipe => write!(f, "wipe"),
            CheckpointPhase::Extract => write!(f, "extract"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine is not active")]
    Inactive,

    #[error("Project is locked by live process {pid}")]
    Locked { pid: u32 },

    #[error("Project not found: {0}")]
    NotFound(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("I/O error during {op} at {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity error: readback mismatch for chunk '{0}'")]
    Integrity(String),

    #[error("Unrecoverable corruption: primary and backup unreadable for chunk '{0}'")]
    CorruptionUnrecoverable(String),

    #[error("Checkpoint {phase} error: {message}")]
    Checkpoint {
        phase: CheckpointPhase,
        message: String,
    },

    #[error("Destructive operation requires explicit confirmation")]
    ConfirmationRequired,
}

impl EngineError {
    /// Wrap an `io::Error` with the failing operation and path
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn checkpoint(phase: CheckpointPhase, message: impl Into<String>) -> Self {
        EngineError::Checkpoint {
            phase,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_error_display() {
        let err = EngineError::Locked { pid: 4242 };
        let display = format!("{}", err);
        assert!(display.contains("locked"));
        assert!(display.contains("4242"));
    }

    #[test]
    fn test_io_error_display() {
        let err = EngineError::io(
            "rename",
            PathBuf::from("/tmp/p/chunks/a.tmp"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let display = format!("{}", err);
        assert!(display.contains("rename"));
        assert!(display.contains("a.tmp"));
        assert!(display.contains("denied"));
    }

    #[test]
    fn test_checkpoint_error_display() {
        let err = EngineError::checkpoint(CheckpointPhase::Extract, "truncated entry");
        let display = format!("{}", err);
        assert!(display.contains("extract"));
        assert!(display.contains("truncated entry"));
    }

    #[test]
    fn test_integrity_and_corruption_display() {
        let int_err = EngineError::Integrity("settings".to_string());
        let cor_err = EngineError::CorruptionUnrecoverable("settings".to_string());

        assert!(format!("{}", int_err).contains("readback mismatch"));
        assert!(format!("{}", cor_err).contains("primary and backup"));
    }
}
