//! Configuration types.
//!
//! Every layer deserializes into a [`DormantConfig`] whose fields are all
//! optional, so a file only needs to mention what it changes. [`DormantConfig::resolve`]
//! fills the gaps with defaults and validates the result.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Default maximum number of resident sessions.
pub const DEFAULT_MAX_SIZE: usize = 1_000;

/// Default wait when the cache is full and blocking is enabled.
pub const DEFAULT_BLOCK_TIMEOUT_MS: u64 = 5_000;

/// Default interval between idle sweeps.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// ─────────────────────────────────────────────────────────────────────────────
// Partial (layer) types
// ─────────────────────────────────────────────────────────────────────────────

/// One configuration layer, as read from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DormantConfig {
    /// Cache sizing and timeouts (`[cache]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSection>,

    /// Context store selection (`[store]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreSection>,

    /// Log output (`[logging]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSection>,
}

/// `[cache]` section. Durations are in milliseconds; zero disables the
/// idle and removal timeouts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_on_full: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removal_timeout_ms: Option<u64>,
}

/// `[store]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<StoreKind>,
    /// Directory (file backend) or database file (sqlite backend).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Console filter level (`error`, `warn`, `info`, `debug`, `trace`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Directory for daily-rotated JSON logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Context store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
    Sqlite,
}

impl StoreKind {
    /// Whether the backend needs a `path`.
    pub fn needs_path(&self) -> bool {
        !matches!(self, Self::Memory)
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::File => write!(f, "file"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::InvalidValue {
                field: "store.backend".to_string(),
                reason: format!("unknown backend '{other}' (expected memory, file or sqlite)"),
            }),
        }
    }
}

impl DormantConfig {
    /// Create an empty layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a layer from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another layer on top of this one (other takes priority).
    ///
    /// Merging is per field: a value set in `other` replaces ours, an unset
    /// one leaves ours alone.
    pub fn merge(&mut self, other: DormantConfig) {
        merge_section(&mut self.cache, other.cache, CacheSection::merge);
        merge_section(&mut self.store, other.store, StoreSection::merge);
        merge_section(&mut self.logging, other.logging, LoggingSection::merge);
    }

    /// Fill defaults and validate.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let cache = self.cache.clone().unwrap_or_default();
        let store = self.store.clone().unwrap_or_default();
        let logging = self.logging.clone().unwrap_or_default();

        let max_size = cache.max_size.unwrap_or(DEFAULT_MAX_SIZE);
        if max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.max_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let sweep_interval_ms = cache.sweep_interval_ms.unwrap_or(DEFAULT_SWEEP_INTERVAL_MS);
        if sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.sweep_interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let kind = store.backend.unwrap_or_default();
        if kind.needs_path() && store.path.is_none() {
            return Err(ConfigError::MissingField {
                field: "path".to_string(),
                context: format!("[store] (backend = \"{kind}\")"),
            });
        }

        Ok(ResolvedConfig {
            cache: ResolvedCache {
                max_size,
                idle_timeout: cache.idle_timeout_ms.and_then(non_zero_millis),
                block_on_full: cache.block_on_full.unwrap_or(false),
                block_timeout: Duration::from_millis(
                    cache.block_timeout_ms.unwrap_or(DEFAULT_BLOCK_TIMEOUT_MS),
                ),
                sweep_interval: Duration::from_millis(sweep_interval_ms),
                removal_timeout: cache.removal_timeout_ms.and_then(non_zero_millis),
            },
            store: ResolvedStore {
                kind,
                path: if kind.needs_path() { store.path } else { None },
            },
            logging: ResolvedLogging {
                level: logging
                    .level
                    .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
                file: logging.file,
            },
        })
    }
}

impl CacheSection {
    fn merge(&mut self, other: CacheSection) {
        self.max_size = other.max_size.or(self.max_size);
        self.idle_timeout_ms = other.idle_timeout_ms.or(self.idle_timeout_ms);
        self.block_on_full = other.block_on_full.or(self.block_on_full);
        self.block_timeout_ms = other.block_timeout_ms.or(self.block_timeout_ms);
        self.sweep_interval_ms = other.sweep_interval_ms.or(self.sweep_interval_ms);
        self.removal_timeout_ms = other.removal_timeout_ms.or(self.removal_timeout_ms);
    }
}

impl StoreSection {
    fn merge(&mut self, other: StoreSection) {
        self.backend = other.backend.or(self.backend);
        if other.path.is_some() {
            self.path = other.path;
        }
    }
}

impl LoggingSection {
    fn merge(&mut self, other: LoggingSection) {
        if other.level.is_some() {
            self.level = other.level;
        }
        if other.file.is_some() {
            self.file = other.file;
        }
    }
}

fn merge_section<T>(ours: &mut Option<T>, theirs: Option<T>, merge: fn(&mut T, T)) {
    let Some(theirs) = theirs else {
        return;
    };
    match ours {
        Some(ours) => merge(ours, theirs),
        None => *ours = Some(theirs),
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolved types
// ─────────────────────────────────────────────────────────────────────────────

/// Fully populated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub cache: ResolvedCache,
    pub store: ResolvedStore,
    pub logging: ResolvedLogging,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCache {
    pub max_size: usize,
    pub idle_timeout: Option<Duration>,
    pub block_on_full: bool,
    pub block_timeout: Duration,
    pub sweep_interval: Duration,
    pub removal_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStore {
    pub kind: StoreKind,
    /// Present for file and sqlite backends.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLogging {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// The resolved values as a complete layer, e.g. for display.
    pub fn to_config(&self) -> DormantConfig {
        let millis = |d: Duration| d.as_millis() as u64;
        DormantConfig {
            cache: Some(CacheSection {
                max_size: Some(self.cache.max_size),
                idle_timeout_ms: Some(self.cache.idle_timeout.map_or(0, millis)),
                block_on_full: Some(self.cache.block_on_full),
                block_timeout_ms: Some(millis(self.cache.block_timeout)),
                sweep_interval_ms: Some(millis(self.cache.sweep_interval)),
                removal_timeout_ms: Some(self.cache.removal_timeout.map_or(0, millis)),
            }),
            store: Some(StoreSection {
                backend: Some(self.store.kind),
                path: self.store.path.clone(),
            }),
            logging: Some(LoggingSection {
                level: Some(self.logging.level.clone()),
                file: self.logging.file.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = DormantConfig::from_toml(
            r#"
[cache]
max_size = 50
idle_timeout_ms = 60000
block_on_full = true
block_timeout_ms = 250

[store]
backend = "sqlite"
path = "/tmp/sessions.db"

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let cache = config.cache.as_ref().unwrap();
        assert_eq!(cache.max_size, Some(50));
        assert_eq!(cache.block_on_full, Some(true));
        assert_eq!(config.store.as_ref().unwrap().backend, Some(StoreKind::Sqlite));
        assert_eq!(config.logging.as_ref().unwrap().level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_unknown_backend_is_parse_error() {
        let err = DormantConfig::from_toml("[store]\nbackend = \"redis\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_resolve_defaults() {
        let resolved = DormantConfig::new().resolve().unwrap();
        assert_eq!(resolved.cache.max_size, DEFAULT_MAX_SIZE);
        assert_eq!(resolved.cache.idle_timeout, None);
        assert!(!resolved.cache.block_on_full);
        assert_eq!(resolved.cache.block_timeout, Duration::from_millis(DEFAULT_BLOCK_TIMEOUT_MS));
        assert_eq!(resolved.store.kind, StoreKind::Memory);
        assert_eq!(resolved.logging.level, "info");
    }

    #[test]
    fn test_merge_is_per_field() {
        let mut base = DormantConfig::from_toml(
            r#"
[cache]
max_size = 10
idle_timeout_ms = 1000

[store]
backend = "file"
path = "/srv/a"
"#,
        )
        .unwrap();
        let overlay = DormantConfig::from_toml(
            r#"
[cache]
max_size = 20

[store]
path = "/srv/b"
"#,
        )
        .unwrap();

        base.merge(overlay);
        let cache = base.cache.as_ref().unwrap();
        assert_eq!(cache.max_size, Some(20));
        assert_eq!(cache.idle_timeout_ms, Some(1000));

        let store = base.store.as_ref().unwrap();
        assert_eq!(store.backend, Some(StoreKind::File));
        assert_eq!(store.path, Some(PathBuf::from("/srv/b")));
    }

    #[test]
    fn test_merge_into_empty_section() {
        let mut base = DormantConfig::new();
        base.merge(DormantConfig::from_toml("[logging]\nlevel = \"warn\"\n").unwrap());
        assert_eq!(base.resolve().unwrap().logging.level, "warn");
    }

    #[test]
    fn test_zero_max_size_rejected() {
        let config = DormantConfig::from_toml("[cache]\nmax_size = 0\n").unwrap();
        let err = config.resolve().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "cache.max_size"
        ));
    }

    #[test]
    fn test_file_backend_requires_path() {
        let config = DormantConfig::from_toml("[store]\nbackend = \"file\"\n").unwrap();
        let err = config.resolve().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
        assert!(err.to_string().contains("path"));
    }

    #[test]
    fn test_zero_timeouts_disable() {
        let toml = "[cache]\nidle_timeout_ms = 0\nremoval_timeout_ms = 0\n";
        let config = DormantConfig::from_toml(toml).unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.cache.idle_timeout, None);
        assert_eq!(resolved.cache.removal_timeout, None);
    }

    #[test]
    fn test_resolved_round_trips_through_toml() {
        let config = DormantConfig::from_toml(
            r#"
[cache]
max_size = 7
idle_timeout_ms = 1500

[store]
backend = "file"
path = "/srv/s"
"#,
        )
        .unwrap();
        let resolved = config.resolve().unwrap();

        let shown = resolved.to_config().to_toml().unwrap();
        let reparsed = DormantConfig::from_toml(&shown).unwrap().resolve().unwrap();
        assert_eq!(reparsed, resolved);
    }

    #[test]
    fn test_store_kind_from_str() {
        assert_eq!("SQLite".parse::<StoreKind>().unwrap(), StoreKind::Sqlite);
        assert!("redis".parse::<StoreKind>().is_err());
    }
}
