//! CLI command handlers.

pub mod config;
pub mod simulate;
pub mod store;

use anyhow::{Context as _, Result};

use dormant_cache::{CacheConfig, ContextStore, FileBackend, SqliteBackend};
use dormant_config::{ConfigSource, DormantConfig, ResolvedCache, ResolvedConfig, StoreKind};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Merged config layers, before defaults.
    pub layer: DormantConfig,
    /// Config files checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Problems found while loading config files.
    pub warnings: Vec<String>,
    /// Fully resolved configuration.
    pub config: ResolvedConfig,
}

impl Context {
    /// Open the configured context store.
    pub fn open_store(&self) -> Result<ContextStore> {
        let store = &self.config.store;
        let path = || {
            store
                .path
                .as_deref()
                .with_context(|| format!("the {} store needs a path", store.kind))
        };

        Ok(match store.kind {
            StoreKind::Memory => ContextStore::in_memory(),
            StoreKind::File => {
                let path = path()?;
                let backend = FileBackend::open(path)
                    .with_context(|| format!("failed to open store directory {}", path.display()))?;
                ContextStore::new(backend)
            }
            StoreKind::Sqlite => {
                let path = path()?;
                let backend = SqliteBackend::open(path)
                    .with_context(|| format!("failed to open store database {}", path.display()))?;
                ContextStore::new(backend)
            }
        })
    }
}

/// Translate resolved `[cache]` settings into a cache configuration.
pub fn cache_config(settings: &ResolvedCache) -> CacheConfig {
    let mut config = CacheConfig::new()
        .with_max_size(settings.max_size)
        .with_sweep_interval(settings.sweep_interval);

    if let Some(timeout) = settings.idle_timeout {
        config = config.with_idle_timeout(timeout);
    }
    if let Some(timeout) = settings.removal_timeout {
        config = config.with_removal_timeout(timeout);
    }

    if settings.block_on_full {
        config.with_blocking(settings.block_timeout)
    } else {
        config.fail_fast()
    }
}
