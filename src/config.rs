//! Configuration options for EngageDb.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default expiry of primary counter hashes, in seconds.
pub const DEFAULT_COUNTER_TTL_SECS: u64 = 1800;

/// Configuration options for opening a counter store and running the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Create the journal directory if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Persist committed scripts and writes to the journal.
    /// Disabling turns the store into a pure in-memory cache.
    /// Default: true
    pub use_journal: bool,

    /// Sync journal appends to disk.
    /// Default: false (the cache is reconstructible from the system of record)
    pub sync_journal: bool,

    /// Journal size that triggers an automatic checkpoint (in bytes).
    /// Set to 0 to only checkpoint manually.
    /// Default: 16MB
    pub checkpoint_threshold: u64,

    /// Expiry applied to every primary counter hash (in seconds).
    /// Default: 1800
    pub counter_ttl_secs: u64,

    /// Maximum time a caller waits for the store before giving up (in ms).
    /// Default: 500
    pub op_timeout_ms: u64,

    /// Maximum execution time of a Lua script (in ms). 0 disables the limit.
    /// Default: 5000
    pub script_timeout_ms: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            use_journal: true,
            sync_journal: false,
            checkpoint_threshold: 16 * 1024 * 1024, // 16MB
            counter_ttl_secs: DEFAULT_COUNTER_TTL_SECS,
            op_timeout_ms: 500,
            script_timeout_ms: 5000,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let options: Options = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Sets whether to create the journal directory if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Enables or disables the journal.
    pub fn use_journal(mut self, value: bool) -> Self {
        self.use_journal = value;
        self
    }

    /// Enables or disables fsync after every journal append.
    pub fn sync_journal(mut self, value: bool) -> Self {
        self.sync_journal = value;
        self
    }

    /// Sets the automatic checkpoint threshold.
    pub fn checkpoint_threshold(mut self, bytes: u64) -> Self {
        self.checkpoint_threshold = bytes;
        self
    }

    /// Sets the counter hash expiry.
    pub fn counter_ttl(mut self, ttl: Duration) -> Self {
        self.counter_ttl_secs = ttl.as_secs();
        self
    }

    /// Sets the bounded wait for store access.
    pub fn op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the Lua script execution limit, or None for no limit.
    pub fn script_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.script_timeout_ms = timeout.map(|t| t.as_millis() as u64).unwrap_or(0);
        self
    }

    /// Returns the bounded wait for store access.
    pub fn op_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Returns the Lua script execution limit.
    pub fn script_timeout_duration(&self) -> Option<Duration> {
        match self.script_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.counter_ttl_secs == 0 {
            return Err(crate::Error::invalid_argument("counter_ttl_secs must be > 0"));
        }
        if self.op_timeout_ms == 0 {
            return Err(crate::Error::invalid_argument("op_timeout_ms must be > 0"));
        }
        Ok(())
    }
}
