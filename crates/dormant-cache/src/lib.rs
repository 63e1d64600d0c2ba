//! Stateful session cache with passivation.
//!
//! This crate keeps conversational session state in memory with:
//! - A bounded resident set; least recently used idle sessions are
//!   passivated to a [`ContextStore`] when the cache is full
//! - Transparent activation when a passivated session is requested
//! - Exclusive checkout, so a session serves one caller at a time
//! - Idle-timeout passivation and removal of stale passivated records
//! - Lifecycle callbacks and interceptors around every transition
//!
//! # Example
//!
//! ```rust,ignore
//! use dormant_cache::{CacheConfig, ContextStore, StatefulCache};
//!
//! let config = CacheConfig::default()
//!     .with_max_size(1000)
//!     .with_idle_timeout(Duration::from_secs(600));
//!
//! let cache = StatefulCache::new(config, CartBean, ContextStore::in_memory());
//! let key = cache.create("ada")?;
//!
//! let mut cart = cache.get(&key)?;
//! cart.items.push("book".into());
//! cache.finished(cart)?;
//! ```

mod cache;
mod config;
mod error;
mod key;
mod lifecycle;
pub mod store;
mod sweeper;
mod usage;

pub use cache::{CacheStats, EntryInfo, SessionHandle, StatefulCache, SweepReport};
pub use config::{CacheConfig, DEFAULT_BLOCK_TIMEOUT, DEFAULT_MAX_SIZE, DEFAULT_SWEEP_INTERVAL};
pub use error::{Error, Result, StoreError};
pub use key::SessionKey;
pub use lifecycle::{
    EntryState, Event, HookError, HookResult, Interceptor, Lifecycle, Phase, PhaseContext,
    SessionBean, TracingInterceptor, transition,
};
pub use store::{ContextStore, FileBackend, MemoryBackend, RecordMeta, SqliteBackend, StoreBackend};
pub use sweeper::SweeperHandle;
pub use usage::UsageTracker;
