//! Events broadcast by the supervisor.

use super::LifecycleState;
use crate::rescan::RescanOutcome;
use crate::types::BlockStamp;

/// Lifecycle notifications published on the supervisor's event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The supervisor moved from one phase to the next.
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    /// The chain reached the sync threshold.
    Synced(BlockStamp),
    /// The rescan ended without failing.
    RescanFinished(RescanOutcome),
    /// Periodic steady-state report.
    BestBlock(BlockStamp),
}
