use thiserror::Error;

/// Errors produced by the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A record addressed by id does not exist in the backend.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level HTTP failure talking to the remote backend.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote backend answered with a non-success status.
    #[error("Remote backend responded {status}: {message}")]
    Remote { status: u16, message: String },

    /// The remote backend returned a document we could not interpret.
    #[error("Malformed document: {0}")]
    Malformed(String),

    /// A storage lock was poisoned by a panicking writer.
    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
