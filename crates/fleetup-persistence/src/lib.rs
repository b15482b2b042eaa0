//! ---
//! fu_section: "03-persistence-logging"
//! fu_subsection: "module"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Persistence abstractions and storage bindings."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Durable local state for the agent: the SQLite database holding install
//! history and the audit event outbox, plus hashed JSON state files.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing persistence files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for SQLite failures.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Reported when a state file fails integrity verification.
    #[error("state file hash mismatch")]
    HashMismatch,
    /// Reported when an install record referenced by id does not exist.
    #[error("install record {0} not found")]
    RecordNotFound(i64),
}

pub mod events;
pub mod installed;
pub mod state_file;
pub mod store;

pub use events::StoredEvent;
pub use installed::InstalledVersion;
pub use state_file::{load_state, save_state, STATE_FILE_VERSION};
pub use store::Store;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_stable() {
        let err = PersistenceError::RecordNotFound(7);
        assert_eq!(format!("{err}"), "install record 7 not found");
        assert_eq!(
            format!("{}", PersistenceError::HashMismatch),
            "state file hash mismatch"
        );
    }
}
