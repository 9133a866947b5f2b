mod chain;
mod handler;

pub use chain::{stub_hash, stub_txid, StubChainService};
pub use handler::RecordingHandler;
