//! Configuration for the stateful cache.

use std::time::Duration;

/// Default maximum number of resident sessions.
pub const DEFAULT_MAX_SIZE: usize = 1_000;

/// Default time a caller waits for a free slot when `block_on_full` is set.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between idle sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for the stateful cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of sessions held in memory before passivation.
    pub max_size: usize,

    /// Idle duration after which a session is passivated by the sweep.
    /// `None` disables time-based passivation.
    pub idle_timeout: Option<Duration>,

    /// Whether `create` and activation wait for a free slot when every
    /// resident session is in use. If false they fail immediately.
    pub block_on_full: bool,

    /// Upper bound on the wait when `block_on_full` is set.
    pub block_timeout: Duration,

    /// Interval for the background sweeper.
    pub sweep_interval: Duration,

    /// Age after which passivated records are purged from the store.
    /// `None` keeps passivated sessions until explicitly removed.
    pub removal_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            idle_timeout: None,
            block_on_full: false,
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            removal_timeout: None,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of resident sessions.
    ///
    /// A value of zero is clamped to one.
    pub fn with_max_size(mut self, max: usize) -> Self {
        self.max_size = max.max(1);
        self
    }

    /// Enable idle-timeout passivation.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Disable idle-timeout passivation.
    pub fn without_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }

    /// Block callers for up to `timeout` when the cache is full.
    ///
    /// A timeout too large to add to the current instant waits without a deadline.
    pub fn with_blocking(mut self, timeout: Duration) -> Self {
        self.block_on_full = true;
        self.block_timeout = timeout;
        self
    }

    /// Fail immediately when the cache is full.
    pub fn fail_fast(mut self) -> Self {
        self.block_on_full = false;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Purge passivated records older than `timeout`.
    pub fn with_removal_timeout(mut self, timeout: Duration) -> Self {
        self.removal_timeout = Some(timeout);
        self
    }
}
