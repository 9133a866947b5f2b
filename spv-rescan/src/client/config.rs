//! Configuration for the rescan coordinator.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::event_bus::DEFAULT_EVENT_CAPACITY;
use crate::rescan::DEFAULT_EVENT_BUFFER;
use crate::storage::DEFAULT_OPEN_TIMEOUT;
use crate::sync::DEFAULT_POLL_INTERVAL;
use crate::types::{StartBound, WatchTarget};

/// Height the chain must reach before a rescan may start.
pub const DEFAULT_SYNC_HEIGHT: u32 = 81_373;

/// Default spacing between steady-state best block reports.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Name of the store directory under the data directory.
pub const STORE_DIR_NAME: &str = "filters.db";

/// Name of the log file under the log directory.
pub const LOG_FILE_NAME: &str = "spv-rescan.log";

const DEFAULT_HOME_SUBDIR: &str = ".spv-rescan";

/// How to authenticate against the node's RPC interface.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RpcAuth {
    #[default]
    None,
    UserPass {
        user: String,
        password: String,
    },
    CookieFile(PathBuf),
}

/// Node connection used by the chain service.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub auth: RpcAuth,
    /// How often the chain service looks for new blocks.
    pub poll_interval: Duration,
    /// Blocks fetched between two store flushes.
    pub batch_size: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:48332".to_string(),
            auth: RpcAuth::None,
            poll_interval: Duration::from_secs(2),
            batch_size: 500,
        }
    }
}

/// What to rescan once the chain is synchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescanConfig {
    pub watch: WatchTarget,
    pub start: StartBound,
}

/// Configuration for one supervised run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the store. Defaults to `~/.spv-rescan/data`.
    pub data_dir: PathBuf,

    /// Directory holding the log file. Defaults to `~/.spv-rescan`.
    pub log_dir: PathBuf,

    /// Write synchronized filters to the store instead of keeping them in memory.
    pub persist_to_disk: bool,

    /// Height at which the chain counts as synchronized.
    pub sync_height: u32,

    /// Spacing between best block queries while syncing.
    pub poll_interval: Duration,

    /// Spacing between best block reports in steady state.
    pub status_interval: Duration,

    /// Bounded wait for the store lock.
    pub store_open_timeout: Duration,

    /// Rescan to run after sync, if any.
    pub rescan: Option<RescanConfig>,

    pub rpc: RpcConfig,

    /// Cancel the run on SIGINT/SIGTERM.
    pub handle_signals: bool,

    /// Capacity of the lifecycle event bus.
    pub event_capacity: usize,

    /// Capacity of the rescan event channel.
    pub rescan_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        let home = default_home_dir();
        Self {
            data_dir: home.join("data"),
            log_dir: home,
            persist_to_disk: false,
            sync_height: DEFAULT_SYNC_HEIGHT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            status_interval: DEFAULT_STATUS_INTERVAL,
            store_open_timeout: DEFAULT_OPEN_TIMEOUT,
            rescan: None,
            rpc: RpcConfig::default(),
            handle_signals: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            rescan_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl Config {
    /// Set the data directory.
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Set the log directory.
    pub fn with_log_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_dir = path.into();
        self
    }

    pub fn with_persist_to_disk(mut self, persist: bool) -> Self {
        self.persist_to_disk = persist;
        self
    }

    pub fn with_sync_height(mut self, height: u32) -> Self {
        self.sync_height = height;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn with_store_open_timeout(mut self, timeout: Duration) -> Self {
        self.store_open_timeout = timeout;
        self
    }

    /// Rescan `watch` from `start` once synchronized.
    pub fn with_rescan(mut self, watch: WatchTarget, start: StartBound) -> Self {
        self.rescan = Some(RescanConfig {
            watch,
            start,
        });
        self
    }

    pub fn with_rpc(mut self, rpc: RpcConfig) -> Self {
        self.rpc = rpc;
        self
    }

    /// Leave signal handling to the caller.
    pub fn without_signal_handling(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Path of the store.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_DIR_NAME)
    }

    /// Path of the log file.
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE_NAME)
    }

    /// Validate the configuration and create the data directory.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be > 0".to_string());
        }

        if self.status_interval.is_zero() {
            return Err("status_interval must be > 0".to_string());
        }

        if self.event_capacity == 0 || self.rescan_buffer == 0 {
            return Err("event channel capacities must be > 0".to_string());
        }

        if self.rpc.batch_size == 0 {
            return Err("rpc batch_size must be > 0".to_string());
        }

        std::fs::create_dir_all(&self.data_dir).map_err(|e| {
            format!("A valid data directory must be provided {:?}: {e}", self.data_dir)
        })?;

        Ok(())
    }
}

/// `~/.spv-rescan`, or `./.spv-rescan` when no home directory is known.
pub fn default_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| Path::new(".").to_path_buf()).join(DEFAULT_HOME_SUBDIR)
}
