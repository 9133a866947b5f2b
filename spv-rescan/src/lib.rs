//! Supervisory coordinator for a Bitcoin SPV client.
//!
//! This library drives a chain service until its header chain reaches a target
//! height, then runs one bounded, cancellable rescan of a watched output script
//! using BIP158 compact block filters, and finally reports the best block until
//! it is asked to shut down.
//!
//! - [`sync::SyncMonitor`] polls the chain service until the sync threshold is reached
//! - [`rescan::Rescan`] resolves the scan range and relays match notifications
//! - [`client::Supervisor`] sequences the phases and owns cancellation
//! - [`chain::NodeChainService`] backs the chain service with a Bitcoin Core node
//!
//! # Quick Start
//!
//! ```no_run
//! use spv_rescan::chain::NodeChainService;
//! use spv_rescan::{Config, StartBound, Supervisor, WatchTarget};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let watch = WatchTarget::from_hex("0014751e76e8199196d454941c45d1b3a323f1433bd6")?;
//!     let config = Config::default().with_rescan(watch, StartBound::Genesis);
//!
//!     let mut supervisor = Supervisor::new(config);
//!     let summary = supervisor.run(NodeChainService::new).await?;
//!     println!("stopped after {} status reports", summary.status_reports);
//!
//!     Ok(())
//! }
//! ```

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod chain;
pub mod client;
pub mod error;
pub mod event_bus;
pub mod logging;
pub mod rescan;
pub mod storage;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use chain::{ChainService, NodeChainService};
pub use client::{Config, LifecycleEvent, LifecycleState, RunSummary, Supervisor};
pub use error::{
    ChainError, LoggingError, LoggingResult, ParseError, RescanError, SpvError, StorageError,
    SyncError,
};
pub use logging::{init_console_logging, init_logging, LogFileConfig, LoggingConfig, LoggingGuard};
pub use rescan::{Rescan, RescanEvent, RescanEventHandler, RescanOutcome};
pub use sync::{SyncMonitor, SyncOutcome};
pub use tracing::level_filters::LevelFilter;
pub use types::{BlockStamp, ScanRange, StartBound, WatchTarget};

// Re-export commonly used bitcoin types
pub use bitcoin::{BlockHash, ScriptBuf, Txid};

/// Current version of the spv-rescan library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
