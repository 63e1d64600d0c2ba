//! Integration tests for passivation, activation and lifecycle callbacks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dormant_cache::{
    CacheConfig, ContextStore, EntryState, Error, FileBackend, HookError, HookResult, Interceptor,
    Lifecycle, MemoryBackend, Phase, PhaseContext, RecordMeta, SessionBean, SessionKey,
    SqliteBackend, StatefulCache, StoreBackend, StoreError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Cart {
    owner: String,
    items: Vec<String>,
}

/// Bean that journals every callback and fails hooks for chosen owners.
#[derive(Default)]
struct JournalBean {
    journal: Arc<Mutex<Vec<String>>>,
    fail_pre_invoke: Option<&'static str>,
    fail_pre_passivate: Option<&'static str>,
}

impl JournalBean {
    fn record(&self, phase: &str, cart: Option<&Cart>) -> HookResult {
        let owner = cart.map(|c| c.owner.as_str()).unwrap_or("-");
        self.journal.lock().push(format!("{phase}:{owner}"));
        Ok(())
    }
}

impl SessionBean for JournalBean {
    type State = Cart;
    type InitArgs = &'static str;

    fn instantiate(&self, _key: &SessionKey, owner: &'static str) -> Result<Cart, HookError> {
        Ok(Cart {
            owner: owner.to_string(),
            items: Vec::new(),
        })
    }

    fn post_construct(&self, _key: &SessionKey, state: &mut Cart) -> HookResult {
        self.record("post-construct", Some(state))
    }

    fn pre_invoke(&self, _key: &SessionKey, state: &mut Cart) -> HookResult {
        if self.fail_pre_invoke == Some(state.owner.as_str()) {
            return Err(HookError::new("checkout refused"));
        }
        self.record("pre-invoke", Some(state))
    }

    fn post_invoke(&self, _key: &SessionKey, state: &mut Cart) -> HookResult {
        self.record("post-invoke", Some(state))
    }

    fn pre_passivate(&self, _key: &SessionKey, state: &mut Cart) -> HookResult {
        if self.fail_pre_passivate == Some(state.owner.as_str()) {
            return Err(HookError::new("cannot release resources"));
        }
        self.record("pre-passivate", Some(state))
    }

    fn post_passivate(&self, _key: &SessionKey) -> HookResult {
        self.record("post-passivate", None)
    }

    fn pre_activate(&self, _key: &SessionKey) -> HookResult {
        self.record("pre-activate", None)
    }

    fn post_activate(&self, _key: &SessionKey, state: &mut Cart) -> HookResult {
        self.record("post-activate", Some(state))
    }

    fn pre_destroy(&self, _key: &SessionKey, state: &mut Cart) -> HookResult {
        self.record("pre-destroy", Some(state))
    }
}

/// Memory backend whose writes can be switched off, globally or for one key.
#[derive(Default)]
struct FlakyBackend {
    inner: MemoryBackend,
    fail_puts: AtomicBool,
    fail_key: Mutex<Option<SessionKey>>,
}

impl StoreBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn put(&self, key: &SessionKey, bytes: &[u8]) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) || *self.fail_key.lock() == Some(*key) {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.put(key, bytes)
    }

    fn get(&self, key: &SessionKey) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn delete(&self, key: &SessionKey) -> Result<bool, StoreError> {
        self.inner.delete(key)
    }

    fn list(&self) -> Result<Vec<RecordMeta>, StoreError> {
        self.inner.list()
    }
}

fn journal_cache(config: CacheConfig, bean: JournalBean) -> StatefulCache<JournalBean> {
    StatefulCache::new(config, bean, ContextStore::in_memory())
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle callbacks
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_callbacks_follow_session_lifecycle() {
    let bean = JournalBean::default();
    let journal = Arc::clone(&bean.journal);
    let cache = journal_cache(CacheConfig::new().with_max_size(4), bean);

    let key = cache.create("ada").unwrap();
    cache.get(&key).unwrap().finish().unwrap();
    cache.passivate_all();
    cache.get(&key).unwrap().finish().unwrap();
    cache.remove(&key).unwrap();

    assert_eq!(
        *journal.lock(),
        vec![
            "post-construct:ada",
            "pre-invoke:ada",
            "post-invoke:ada",
            "pre-passivate:ada",
            "post-passivate:-",
            "pre-activate:-",
            "post-activate:ada",
            "pre-invoke:ada",
            "post-invoke:ada",
            "pre-destroy:ada",
        ]
    );
}

#[test]
fn test_interceptors_wrap_bean_callbacks() {
    struct Tag(&'static str, Arc<Mutex<Vec<String>>>);

    impl Interceptor<Cart> for Tag {
        fn before(&self, ctx: &mut PhaseContext<'_, Cart>) -> HookResult {
            self.1.lock().push(format!("{}>{}", self.0, ctx.phase));
            Ok(())
        }

        fn after(&self, ctx: &mut PhaseContext<'_, Cart>) -> HookResult {
            self.1.lock().push(format!("{}<{}", self.0, ctx.phase));
            Ok(())
        }
    }

    let bean = JournalBean::default();
    let journal = Arc::clone(&bean.journal);
    let lifecycle = Lifecycle::new(bean)
        .with_interceptor(Tag("outer", Arc::clone(&journal)))
        .with_interceptor(Tag("inner", Arc::clone(&journal)));
    let cache =
        StatefulCache::with_lifecycle(CacheConfig::new(), lifecycle, ContextStore::in_memory());

    cache.create("ada").unwrap();

    assert_eq!(
        *journal.lock(),
        vec![
            "outer>post-construct",
            "inner>post-construct",
            "post-construct:ada",
            "inner<post-construct",
            "outer<post-construct",
        ]
    );
}

#[test]
fn test_pre_invoke_failure_force_removes() {
    let bean = JournalBean {
        fail_pre_invoke: Some("mallory"),
        ..Default::default()
    };
    let journal = Arc::clone(&bean.journal);
    let cache = journal_cache(CacheConfig::new(), bean);
    let key = cache.create("mallory").unwrap();

    let err = cache.get(&key).unwrap_err();
    assert!(matches!(err, Error::Lifecycle { phase: Phase::PreInvoke, .. }));
    assert!(matches!(cache.get(&key), Err(Error::NotFound(_))));
    assert!(cache.is_empty());

    // No pre-destroy for forced removal
    assert!(!journal.lock().iter().any(|e| e.starts_with("pre-destroy")));
}

#[test]
fn test_pre_passivate_failure_during_eviction() {
    let bean = JournalBean {
        fail_pre_passivate: Some("mallory"),
        ..Default::default()
    };
    let cache = journal_cache(CacheConfig::new().with_max_size(1), bean);
    let victim = cache.create("mallory").unwrap();

    let err = cache.create("ada").unwrap_err();
    assert!(matches!(err, Error::Lifecycle { phase: Phase::PrePassivate, .. }));
    assert!(matches!(cache.peek(&victim), Err(Error::NotFound(_))));

    // Capacity was released by the forced removal
    let ada = cache.create("ada").unwrap();
    assert_eq!(cache.peek(&ada).unwrap().state, EntryState::Ready);
}

// ─────────────────────────────────────────────────────────────────────────────
// Capacity
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_lru_victim_is_least_recently_used() {
    let cache = journal_cache(CacheConfig::new().with_max_size(2), JournalBean::default());
    let a = cache.create("a").unwrap();
    let b = cache.create("b").unwrap();

    // Touch `a` so `b` becomes the eviction candidate
    cache.get(&a).unwrap().finish().unwrap();
    cache.create("c").unwrap();

    assert_eq!(cache.peek(&a).unwrap().state, EntryState::Ready);
    assert_eq!(cache.peek(&b).unwrap().state, EntryState::Passivated);
}

#[test]
fn test_in_use_sessions_are_never_evicted() {
    let cache = journal_cache(CacheConfig::new().with_max_size(2), JournalBean::default());
    let a = cache.create("a").unwrap();
    let b = cache.create("b").unwrap();
    let held = cache.get(&a).unwrap();

    cache.create("c").unwrap();
    assert_eq!(cache.peek(&a).unwrap().state, EntryState::InUse);
    assert_eq!(cache.peek(&b).unwrap().state, EntryState::Passivated);
    held.finish().unwrap();
}

#[test]
fn test_blocking_create_times_out() {
    let config = CacheConfig::new()
        .with_max_size(1)
        .with_blocking(Duration::from_millis(100));
    let cache = journal_cache(config, JournalBean::default());
    let key = cache.create("a").unwrap();
    let _held = cache.get(&key).unwrap();

    let started = Instant::now();
    let err = cache.create("b").unwrap_err();
    assert!(matches!(err, Error::Capacity(_)));
    assert!(started.elapsed() >= Duration::from_millis(90));
}

#[test]
fn test_blocking_create_waits_for_finish() {
    let config = CacheConfig::new()
        .with_max_size(1)
        .with_blocking(Duration::from_secs(5));
    let cache = journal_cache(config, JournalBean::default());
    let a = cache.create("a").unwrap();
    let held = cache.get(&a).unwrap();

    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        held.finish().unwrap();
    });

    let b = cache.create("b").unwrap();
    releaser.join().unwrap();

    assert_eq!(cache.peek(&a).unwrap().state, EntryState::Passivated);
    assert_eq!(cache.peek(&b).unwrap().state, EntryState::Ready);
}

#[test]
fn test_failed_eviction_keeps_victim_resident() {
    let backend = Arc::new(FlakyBackend::default());
    let store = ContextStore::from_shared(backend.clone());
    let config = CacheConfig::new().with_max_size(1);
    let cache = StatefulCache::new(config, JournalBean::default(), store);

    let a = cache.create("a").unwrap();
    backend.fail_puts.store(true, Ordering::SeqCst);

    let err = cache.create("b").unwrap_err();
    assert!(matches!(err, Error::Capacity(_)));
    assert_eq!(cache.peek(&a).unwrap().state, EntryState::Ready);
    assert_eq!(cache.stats().passivation_failures, 1);

    // The victim is still usable
    cache.get(&a).unwrap().finish().unwrap();

    backend.fail_puts.store(false, Ordering::SeqCst);
    cache.create("b").unwrap();
    assert_eq!(cache.peek(&a).unwrap().state, EntryState::Passivated);
}

#[test]
fn test_blocking_without_representable_deadline_waits_for_finish() {
    let config = CacheConfig::new()
        .with_max_size(1)
        .with_blocking(Duration::MAX);
    let cache = journal_cache(config, JournalBean::default());
    let a = cache.create("a").unwrap();
    let held = cache.get(&a).unwrap();

    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        held.finish().unwrap();
    });

    let b = cache.create("b").unwrap();
    releaser.join().unwrap();

    assert_eq!(cache.peek(&a).unwrap().state, EntryState::Passivated);
    assert_eq!(cache.peek(&b).unwrap().state, EntryState::Ready);
}

#[test]
fn test_get_on_unknown_key_does_not_evict() {
    let cache = journal_cache(CacheConfig::new().with_max_size(1), JournalBean::default());
    let a = cache.create("a").unwrap();

    assert!(matches!(cache.get(&SessionKey::generate()), Err(Error::NotFound(_))));
    assert_eq!(cache.peek(&a).unwrap().state, EntryState::Ready);
}

// ─────────────────────────────────────────────────────────────────────────────
// Idle sweep and expiry
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_sweep_passivates_idle_sessions_only() {
    let config = CacheConfig::new().with_idle_timeout(Duration::from_millis(20));
    let cache = journal_cache(config, JournalBean::default());
    let idle = cache.create("idle").unwrap();
    let busy = cache.create("busy").unwrap();
    let held = cache.get(&busy).unwrap();

    std::thread::sleep(Duration::from_millis(50));
    let report = cache.sweep();

    assert_eq!(report.passivated, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(cache.peek(&idle).unwrap().state, EntryState::Passivated);
    assert_eq!(cache.peek(&busy).unwrap().state, EntryState::InUse);
    held.finish().unwrap();

    // Passivated sessions come back on demand
    assert_eq!(cache.get(&idle).unwrap().owner, "idle");
}

#[test]
fn test_sweep_continues_past_failed_session() {
    let backend = Arc::new(FlakyBackend::default());
    let store = ContextStore::from_shared(backend.clone());
    let config = CacheConfig::new().with_idle_timeout(Duration::from_millis(20));
    let cache = StatefulCache::new(config, JournalBean::default(), store);

    let a = cache.create("a").unwrap();
    let b = cache.create("b").unwrap();
    let c = cache.create("c").unwrap();
    *backend.fail_key.lock() = Some(b);

    std::thread::sleep(Duration::from_millis(50));
    let report = cache.sweep();

    assert_eq!(report.examined, 3);
    assert_eq!(report.passivated, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(cache.peek(&a).unwrap().state, EntryState::Passivated);
    assert_eq!(cache.peek(&c).unwrap().state, EntryState::Passivated);
    assert_eq!(cache.peek(&b).unwrap().state, EntryState::Ready);
    assert_eq!(cache.stats().passivation_failures, 1);

    // The session that failed to passivate keeps serving calls
    let cart = cache.get(&b).unwrap();
    assert_eq!(cart.owner, "b");
    cart.finish().unwrap();
}

#[test]
fn test_sweep_without_idle_timeout_is_noop() {
    let cache = journal_cache(CacheConfig::new(), JournalBean::default());
    cache.create("a").unwrap();
    std::thread::sleep(Duration::from_millis(10));

    let report = cache.sweep();
    assert_eq!(report.examined, 0);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_removal_timeout_purges_passivated_records() {
    let config = CacheConfig::new().with_removal_timeout(Duration::from_millis(10));
    let cache = journal_cache(config, JournalBean::default());
    let key = cache.create("a").unwrap();
    cache.passivate_all();

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(cache.expire_passivated().unwrap(), 1);
    assert!(matches!(cache.get(&key), Err(Error::NotFound(_))));
    assert_eq!(cache.stats().expired, 1);
}

#[test]
fn test_background_sweeper() {
    let config = CacheConfig::new()
        .with_idle_timeout(Duration::from_millis(10))
        .with_sweep_interval(Duration::from_millis(10));
    let cache = journal_cache(config, JournalBean::default());
    let key = cache.create("a").unwrap();
    let sweeper = cache.start_sweeper();

    let deadline = Instant::now() + Duration::from_secs(5);
    while cache.peek(&key).unwrap().state != EntryState::Passivated && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    sweeper.stop();

    assert_eq!(cache.peek(&key).unwrap().state, EntryState::Passivated);
}

// ─────────────────────────────────────────────────────────────────────────────
// Stores
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_peek_snapshots_state_without_activation() {
    let backend = Arc::new(MemoryBackend::new());
    let store = ContextStore::from_shared(backend.clone());
    let cache = StatefulCache::new(CacheConfig::new(), JournalBean::default(), store);
    let key = cache.create("ada").unwrap();
    {
        let mut cart = cache.get(&key).unwrap();
        cart.items.push("kettle".to_string());
    }

    let resident = cache.peek(&key).unwrap();
    let snapshot = resident.state_snapshot.unwrap();
    assert_eq!(snapshot["owner"], "ada");
    assert_eq!(snapshot["items"][0], "kettle");

    let held = cache.get(&key).unwrap();
    assert_eq!(cache.peek(&key).unwrap().state_snapshot, None);
    held.finish().unwrap();

    cache.passivate_all();
    let passivated = cache.peek(&key).unwrap();
    assert_eq!(passivated.state, EntryState::Passivated);
    assert_eq!(passivated.state_snapshot.unwrap()["owner"], "ada");

    // Still passivated: nothing was activated or linked
    assert!(backend.contains(&key).unwrap());
    assert!(cache.is_empty());
    assert_eq!(cache.stats().activated, 0);
}

#[test]
fn test_peek_passivated_with_corrupt_record_has_no_snapshot() {
    let backend = Arc::new(MemoryBackend::new());
    let store = ContextStore::from_shared(backend.clone());
    let cache = StatefulCache::new(CacheConfig::new(), JournalBean::default(), store);
    let key = cache.create("a").unwrap();
    cache.passivate_all();
    backend.put(&key, b"\x00garbage").unwrap();

    let info = cache.peek(&key).unwrap();
    assert_eq!(info.state, EntryState::Passivated);
    assert_eq!(info.state_snapshot, None);
    assert!(backend.contains(&key).unwrap());
}

#[test]
fn test_store_io_error_is_not_reported_as_missing() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("sessions");
    let store = ContextStore::new(FileBackend::open(&root).unwrap());
    let cache = StatefulCache::new(CacheConfig::new(), JournalBean::default(), store);
    let key = cache.create("ada").unwrap();
    cache.passivate_all();

    // Replace the store directory with a regular file
    std::fs::remove_dir_all(&root).unwrap();
    std::fs::write(&root, "not a directory").unwrap();

    assert!(matches!(cache.get(&key), Err(Error::Store(_))));
    assert!(matches!(cache.peek(&key), Err(Error::Store(_))));
    assert!(matches!(cache.contains(&key), Err(Error::Store(_))));
    assert!(cache.is_empty());
}

#[test]
fn test_corrupt_record_is_discarded_on_activation() {
    let backend = Arc::new(MemoryBackend::new());
    let store = ContextStore::from_shared(backend.clone());
    let cache = StatefulCache::new(CacheConfig::new(), JournalBean::default(), store);
    let key = cache.create("a").unwrap();
    cache.passivate_all();

    backend.put(&key, b"\x00garbage").unwrap();

    assert!(matches!(cache.get(&key), Err(Error::Deserialization { .. })));
    assert!(matches!(cache.get(&key), Err(Error::NotFound(_))));
    assert!(backend.is_empty());
}

#[test]
fn test_remove_with_corrupt_record_succeeds() {
    let backend = Arc::new(MemoryBackend::new());
    let store = ContextStore::from_shared(backend.clone());
    let cache = StatefulCache::new(CacheConfig::new(), JournalBean::default(), store);
    let key = cache.create("a").unwrap();
    cache.passivate_all();
    backend.put(&key, b"{}").unwrap();

    cache.remove(&key).unwrap();
    assert!(backend.is_empty());
}

#[test]
fn test_file_store_survives_cache_restart() {
    let dir = tempfile::tempdir().unwrap();
    let key = {
        let store = ContextStore::new(FileBackend::open(dir.path()).unwrap());
        let cache = StatefulCache::new(CacheConfig::new(), JournalBean::default(), store);
        let key = cache.create("ada").unwrap();
        {
            let mut cart = cache.get(&key).unwrap();
            cart.items.push("kettle".to_string());
        }
        assert_eq!(cache.passivate_all().passivated, 1);
        key
    };

    let store = ContextStore::new(FileBackend::open(dir.path()).unwrap());
    let cache = StatefulCache::new(CacheConfig::new(), JournalBean::default(), store);
    let cart = cache.get(&key).unwrap();
    assert_eq!(cart.items, vec!["kettle"]);
}

#[test]
fn test_sqlite_store_survives_cache_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.db");
    let key = {
        let store = ContextStore::new(SqliteBackend::open(&path).unwrap());
        let cache = StatefulCache::new(CacheConfig::new(), JournalBean::default(), store);
        let key = cache.create("ada").unwrap();
        cache.passivate_all();
        key
    };

    let store = ContextStore::new(SqliteBackend::open(&path).unwrap());
    let cache = StatefulCache::new(CacheConfig::new(), JournalBean::default(), store);
    assert_eq!(cache.peek(&key).unwrap().state, EntryState::Passivated);
    assert_eq!(cache.get(&key).unwrap().owner, "ada");
    assert!(cache.store().records().unwrap().is_empty());
}
