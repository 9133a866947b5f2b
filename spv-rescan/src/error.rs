//! Error types for the SPV rescan coordinator.

use std::io;
use thiserror::Error;

use crate::client::LifecycleState;

/// Main error type for the coordinator.
#[derive(Debug, Error)]
pub enum SpvError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Chain service error: {0}")]
    Chain(#[from] ChainError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Rescan error: {0}")]
    Rescan(#[from] RescanError),

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("General error: {0}")]
    General(String),
}

/// Parse-related errors for operator input.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument value for {0}: {1}")]
    InvalidArgument(String, String),

    #[error("Invalid hex in {0}: {1}")]
    InvalidHex(String, String),
}

/// Logging-related errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    DirectoryCreation(#[source] std::io::Error),

    #[error("Failed to open log file {0}: {1}")]
    FileOpen(String, #[source] std::io::Error),

    #[error("Subscriber initialization failed: {0}")]
    SubscriberInit(String),
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Data not found: {0}")]
    NotFound(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Data directory locked: {0}")]
    DirectoryLocked(String),

    #[error("Timed out after {0:?} waiting for the store lock")]
    LockTimeout(std::time::Duration),
}

/// Errors surfaced by a [`ChainService`](crate::chain::ChainService).
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC call {operation} failed: {message}")]
    Rpc {
        operation: String,
        message: String,
    },

    #[error("Chain service is not running")]
    NotStarted,

    #[error("Chain service is already running")]
    AlreadyRunning,

    #[error("No headers synchronized yet")]
    NotSynced,

    #[error("No block known at height {0}")]
    UnknownHeight(u32),

    #[error("Compact filter error for block {block}: {message}")]
    Filter {
        block: bitcoin::BlockHash,
        message: String,
    },

    #[error("Rescan event receiver dropped")]
    ReceiverDropped,

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Synchronization-related errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The monitor was configured in a way it cannot run with.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Chain service error: {0}")]
    Chain(#[from] ChainError),
}

/// Rescan-related errors.
#[derive(Debug, Error)]
pub enum RescanError {
    /// The range is empty, inverted, or one of its bounds could not be resolved.
    #[error("Invalid rescan range: {0}")]
    Range(String),

    /// The underlying rescan primitive reported a failure.
    #[error("Rescan of blocks {start}..={end} failed: {source}")]
    Primitive {
        start: u32,
        end: u32,
        #[source]
        source: ChainError,
    },

    /// A rescan instance was reused after reaching a terminal state.
    #[error("Invalid rescan state: {0}")]
    InvalidState(String),

    /// The rescan task went away without reporting completion.
    #[error("Rescan task failed: {0}")]
    TaskFailed(String),
}

impl RescanError {
    /// Returns a static string representing the error category based on the variant
    pub fn category(&self) -> &'static str {
        match self {
            RescanError::Range(_) => "range",
            RescanError::Primitive {
                ..
            } => "primitive",
            RescanError::InvalidState(_) => "state",
            RescanError::TaskFailed(_) => "task",
        }
    }
}

/// Type alias for Result with SpvError.
pub type Result<T> = std::result::Result<T, SpvError>;

/// Type alias for storage operation results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Type alias for chain service results.
pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// Type alias for sync operation results.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Type alias for rescan results.
pub type RescanResult<T> = std::result::Result<T, RescanError>;

/// Type alias for logging operation results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;
