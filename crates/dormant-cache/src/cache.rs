//! Stateful session cache with LRU passivation.
//!
//! Locking is two-level:
//! - each session slot has its own mutex, held across store I/O and hooks;
//! - the resident map (recency order, capacity accounting, usage tracker)
//!   has one mutex, held only for map bookkeeping.
//!
//! An entry lock may be held while taking the map lock. The map lock only
//! ever *try*-locks entries, so the two orders never deadlock.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use lru::LruCache;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Condvar, Mutex, RawMutex};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::key::SessionKey;
use crate::lifecycle::{EntryState, Event, Lifecycle, Phase, SessionBean, transition};
use crate::store::ContextStore;
use crate::sweeper::SweeperHandle;
use crate::usage::UsageTracker;

/// Longest single wait on the capacity condvar before re-scanning for victims.
const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Per-session slot guarded by its own lock.
struct Slot<S> {
    state: EntryState,
    /// `None` while passivated, being activated, or checked out.
    payload: Option<S>,
    last_access: Instant,
    /// Removal requested while in use; applied on finish.
    remove_pending: bool,
    /// Holds one unit of resident capacity.
    reserved: bool,
}

impl<S> Slot<S> {
    /// Locked stand-in inserted while a key is loaded from the store.
    fn placeholder() -> Self {
        Self {
            state: EntryState::Passivated,
            payload: None,
            last_access: Instant::now(),
            remove_pending: false,
            reserved: false,
        }
    }
}

type SlotRef<S> = Arc<Mutex<Slot<S>>>;
type SlotGuard<S> = ArcMutexGuard<RawMutex, Slot<S>>;

/// State protected by the map-level lock.
struct Resident<S> {
    /// All linked slots in recency order (placeholders included).
    lru: LruCache<SessionKey, SlotRef<S>>,

    /// In-use / idle tracking for the idle sweep.
    usage: UsageTracker,

    /// Capacity units held by slots and pending reservations.
    occupied: usize,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    activated: AtomicU64,
    passivated: AtomicU64,
    removed: AtomicU64,
    expired: AtomicU64,
    passivation_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Inner<B: SessionBean> {
    resident: Mutex<Resident<B::State>>,

    /// Signalled whenever capacity is freed or a session becomes idle.
    capacity_changed: Condvar,

    lifecycle: Lifecycle<B>,
    store: ContextStore,
    config: CacheConfig,
    counters: Counters,
}

/// One unit of resident capacity, returned on drop unless committed.
struct Reservation<'a, B: SessionBean> {
    inner: &'a Inner<B>,
    armed: bool,
}

impl<B: SessionBean> Reservation<'_, B> {
    /// Hand the unit over to a linked slot.
    fn commit(mut self) {
        self.armed = false;
    }
}

impl<B: SessionBean> Drop for Reservation<'_, B> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.resident.lock().occupied -= 1;
            self.inner.capacity_changed.notify_all();
        }
    }
}

/// Stateful session cache.
///
/// This cache provides:
/// - bounded residency with LRU passivation of idle sessions
/// - activation from the [`ContextStore`] on demand
/// - exclusive checkout: a session serves one caller at a time
/// - idle-timeout passivation via [`sweep`](Self::sweep) or a background sweeper
/// - lifecycle callbacks around every transition
///
/// Clones share the same cache.
pub struct StatefulCache<B: SessionBean> {
    inner: Arc<Inner<B>>,
}

impl<B: SessionBean> Clone for StatefulCache<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: SessionBean> StatefulCache<B> {
    /// Create a cache for `bean` passivating into `store`.
    pub fn new(config: CacheConfig, bean: B, store: ContextStore) -> Self {
        Self::with_lifecycle(config, Lifecycle::new(bean), store)
    }

    /// Create a cache with a pre-assembled lifecycle (bean plus interceptors).
    pub fn with_lifecycle(
        config: CacheConfig,
        lifecycle: Lifecycle<B>,
        store: ContextStore,
    ) -> Self {
        let resident = Resident {
            lru: LruCache::unbounded(),
            usage: UsageTracker::new(config.idle_timeout),
            occupied: 0,
        };

        Self {
            inner: Arc::new(Inner {
                resident: Mutex::new(resident),
                capacity_changed: Condvar::new(),
                lifecycle,
                store,
                config,
                counters: Counters::default(),
            }),
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &ContextStore {
        &self.inner.store
    }

    pub fn bean(&self) -> &B {
        self.inner.lifecycle.bean()
    }

    /// Number of resident sessions (including in-flight activations).
    pub fn len(&self) -> usize {
        self.inner.resident.lock().occupied
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of linked keys, most recently used first.
    pub fn keys(&self) -> Vec<SessionKey> {
        self.inner
            .resident
            .lock()
            .lru
            .iter()
            .map(|(key, _)| *key)
            .collect()
    }

    /// Create a session and register it as resident and ready.
    ///
    /// Evicts the least recently used idle session if the cache is full.
    /// Fails with [`Error::Capacity`] if no slot can be freed in time.
    pub fn create(&self, args: B::InitArgs) -> Result<SessionKey> {
        let inner = &self.inner;
        let reservation = inner.reserve()?;

        let key = SessionKey::generate();
        let ready = transition(EntryState::New, Event::Create)?;
        let mut state = inner.lifecycle.instantiate(&key, args)?;
        inner
            .lifecycle
            .fire(Phase::PostConstruct, &key, Some(&mut state))?;

        let slot = Slot {
            state: ready,
            payload: Some(state),
            last_access: Instant::now(),
            remove_pending: false,
            reserved: true,
        };

        {
            let mut resident = inner.resident.lock();
            resident.lru.put(key, Arc::new(Mutex::new(slot)));
            resident.usage.mark_idle(&key);
            reservation.commit();

            debug!(key = %key, resident = resident.occupied, "Session created");
        }
        inner.capacity_changed.notify_all();
        Counters::bump(&inner.counters.created);

        Ok(key)
    }

    /// Check out a session for a business call.
    ///
    /// Resident sessions are marked in use; passivated ones are activated
    /// first. The returned handle owns the session state until it is
    /// finished (or dropped).
    pub fn get(&self, key: &SessionKey) -> Result<SessionHandle<B>> {
        loop {
            let slot = self.inner.resident.lock().lru.get(key).cloned();

            let guard = match slot {
                Some(slot) => slot.lock_arc(),
                None => match self.inner.activate(key)? {
                    Some(guard) => guard,
                    // Someone else linked the key meanwhile
                    None => continue,
                },
            };

            match guard.state {
                EntryState::Ready => {
                    trace!(key = %key, "Session checked out");
                    return self.check_out(*key, guard);
                }
                EntryState::InUse => return Err(Error::InUse(*key)),
                EntryState::Removed => return Err(Error::NotFound(*key)),
                // Evicted or still unresolved while we waited; look again
                EntryState::Passivated | EntryState::New => continue,
            }
        }
    }

    /// Return a checked-out session to the cache.
    pub fn finished(&self, handle: SessionHandle<B>) -> Result<()> {
        handle.finish()
    }

    /// Best-effort snapshot of a session without checking it out.
    ///
    /// Never activates and never changes state. May observe a session that
    /// has a pending removal, or one that is mid-removal. The state snapshot
    /// is the serde form of an idle resident session or of a passivated
    /// record; checked-out sessions and undecodable records have none.
    pub fn peek(&self, key: &SessionKey) -> Result<EntryInfo> {
        let slot = self.inner.resident.lock().lru.peek(key).cloned();

        if let Some(slot) = slot {
            let guard = slot.lock();
            let idle = guard.state == EntryState::Ready;
            return Ok(EntryInfo {
                key: *key,
                state: guard.state,
                idle_for: idle.then(|| guard.last_access.elapsed()),
                remove_pending: guard.remove_pending,
                state_snapshot: guard
                    .payload
                    .as_ref()
                    .and_then(|payload| serde_json::to_value(payload).ok()),
            });
        }

        let state_snapshot = match self.inner.store.inspect(key) {
            Ok(snapshot) => Some(snapshot),
            Err(Error::Deserialization { .. }) => None,
            Err(e) => return Err(e),
        };
        Ok(EntryInfo {
            key: *key,
            state: EntryState::Passivated,
            idle_for: None,
            remove_pending: false,
            state_snapshot,
        })
    }

    /// Whether the session exists, resident or passivated.
    pub fn contains(&self, key: &SessionKey) -> Result<bool> {
        if self.inner.resident.lock().lru.contains(key) {
            return Ok(true);
        }
        self.inner.store.contains(key)
    }

    /// Remove a session permanently.
    ///
    /// In-use sessions are removed when finished. Unknown or already removed
    /// keys are a no-op.
    pub fn remove(&self, key: &SessionKey) -> Result<()> {
        let inner = &self.inner;
        loop {
            let slot = inner.resident.lock().lru.peek(key).cloned();

            let Some(slot) = slot else {
                if inner.remove_passivated(key)? {
                    return Ok(());
                }
                continue;
            };

            let mut guard = slot.lock();
            let entry = &mut *guard;
            match entry.state {
                EntryState::Ready => {
                    let removed = transition(entry.state, Event::Remove)?;
                    let mut state = entry.payload.take();
                    let hook = inner.lifecycle.fire(Phase::PreDestroy, key, state.as_mut());
                    entry.state = removed;
                    inner.unlink(key, entry);
                    Counters::bump(&inner.counters.removed);
                    debug!(key = %key, "Session removed");
                    return hook;
                }
                EntryState::InUse => {
                    entry.remove_pending = true;
                    debug!(key = %key, "Session in use, removal deferred until finished");
                    return Ok(());
                }
                EntryState::Removed => return Ok(()),
                EntryState::Passivated | EntryState::New => continue,
            }
        }
    }

    /// Passivate idle sessions past the idle timeout, then purge expired
    /// passivated records.
    ///
    /// Per-session failures are logged and counted; they do not stop the sweep.
    pub fn sweep(&self) -> SweepReport {
        let inner = &self.inner;
        let mut report = SweepReport::default();

        if let Some(idle_timeout) = inner.config.idle_timeout {
            let candidates = inner.resident.lock().usage.sweep(Instant::now());
            report.examined = candidates.len();

            for key in candidates {
                let slot = inner.resident.lock().lru.peek(&key).cloned();
                // Busy slots are skipped until the next sweep
                let Some(guard) = slot.and_then(|s| s.try_lock_arc()) else {
                    continue;
                };
                // Re-check under the entry lock: it may have been used meanwhile
                if guard.state != EntryState::Ready || guard.last_access.elapsed() <= idle_timeout {
                    continue;
                }

                match inner.passivate_locked(key, guard) {
                    Ok(()) => report.passivated += 1,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Idle passivation failed");
                        report.failed += 1;
                    }
                }
            }
        }

        match self.expire_passivated() {
            Ok(count) => report.expired = count,
            Err(e) => warn!(error = %e, "Failed to purge expired session records"),
        }

        if report.passivated > 0 || report.failed > 0 || report.expired > 0 {
            debug!(
                examined = report.examined,
                passivated = report.passivated,
                failed = report.failed,
                expired = report.expired,
                "Idle sweep finished"
            );
        }

        report
    }

    /// Delete passivated records older than the removal timeout.
    pub fn expire_passivated(&self) -> Result<usize> {
        let Some(timeout) = self.inner.config.removal_timeout else {
            return Ok(0);
        };
        let age = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(age).unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let purged = self.inner.store.purge_older_than(cutoff)?;
        self.inner
            .counters
            .expired
            .fetch_add(purged.len() as u64, Ordering::Relaxed);
        Ok(purged.len())
    }

    /// Passivate every idle session (e.g. before shutdown).
    pub fn passivate_all(&self) -> SweepReport {
        let inner = &self.inner;
        let slots: Vec<(SessionKey, SlotRef<B::State>)> = inner
            .resident
            .lock()
            .lru
            .iter()
            .map(|(key, slot)| (*key, Arc::clone(slot)))
            .collect();

        let mut report = SweepReport {
            examined: slots.len(),
            ..Default::default()
        };

        for (key, slot) in slots {
            let guard = slot.lock_arc();
            if guard.state != EntryState::Ready {
                continue;
            }
            match inner.passivate_locked(key, guard) {
                Ok(()) => report.passivated += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "Passivation failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Start a background thread that sweeps every `sweep_interval`.
    ///
    /// The thread exits when the handle is stopped or dropped, or when the
    /// last clone of the cache is dropped.
    pub fn start_sweeper(&self) -> SweeperHandle {
        let weak: Weak<Inner<B>> = Arc::downgrade(&self.inner);
        SweeperHandle::spawn(self.inner.config.sweep_interval, move || {
            match weak.upgrade() {
                Some(inner) => {
                    StatefulCache { inner }.sweep();
                    true
                }
                None => false,
            }
        })
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        let (resident, available, in_use) = {
            let r = inner.resident.lock();
            (r.occupied, r.usage.idle_count(), r.usage.in_use_count())
        };
        let c = &inner.counters;

        CacheStats {
            resident,
            max_size: inner.config.max_size,
            available,
            in_use,
            created: c.created.load(Ordering::Relaxed),
            activated: c.activated.load(Ordering::Relaxed),
            passivated: c.passivated.load(Ordering::Relaxed),
            removed: c.removed.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            passivation_failures: c.passivation_failures.load(Ordering::Relaxed),
        }
    }

    fn check_out(
        &self,
        key: SessionKey,
        mut guard: SlotGuard<B::State>,
    ) -> Result<SessionHandle<B>> {
        let inner = &self.inner;
        let entry = &mut *guard;
        let in_use = transition(entry.state, Event::Get)?;
        let Some(mut state) = entry.payload.take() else {
            return Err(Error::IllegalTransition {
                from: entry.state,
                event: Event::Get,
            });
        };

        if let Err(e) = inner.lifecycle.fire(Phase::PreInvoke, &key, Some(&mut state)) {
            inner.force_remove(&key, entry);
            return Err(e);
        }

        entry.state = in_use;
        entry.last_access = Instant::now();
        inner.resident.lock().usage.mark_in_use(&key);

        let slot = Arc::clone(ArcMutexGuard::mutex(&guard));
        Ok(SessionHandle {
            inner: Arc::clone(inner),
            key,
            slot,
            state: Some(state),
        })
    }
}

impl<B: SessionBean> Inner<B> {
    /// Obtain one unit of capacity, passivating LRU idle sessions as needed.
    fn reserve(&self) -> Result<Reservation<'_, B>> {
        // `Some(None)` blocks without a deadline (timeout past the clock's range)
        let deadline = self
            .config
            .block_on_full
            .then(|| Instant::now().checked_add(self.config.block_timeout));

        let mut resident = self.resident.lock();
        loop {
            if resident.occupied < self.config.max_size {
                resident.occupied += 1;
                return Ok(Reservation {
                    inner: self,
                    armed: true,
                });
            }

            if let Some((victim, guard)) = pick_victim(&*resident) {
                drop(resident);
                debug!(key = %victim, "Evicting least recently used session");
                match self.passivate_locked(victim, guard) {
                    Ok(()) => {}
                    Err(e @ Error::Lifecycle { .. }) => return Err(e),
                    Err(e) => {
                        return Err(Error::Capacity(format!(
                            "could not passivate session {victim}: {e}"
                        )));
                    }
                }
                resident = self.resident.lock();
                continue;
            }

            let Some(deadline) = deadline else {
                return Err(Error::Capacity(format!(
                    "all {} resident sessions are in use",
                    self.config.max_size
                )));
            };

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return Err(Error::Capacity(format!(
                    "no session became idle within {}ms",
                    self.config.block_timeout.as_millis()
                )));
            }
            let slice = deadline.map_or(WAIT_SLICE, |deadline| {
                deadline.saturating_duration_since(now).min(WAIT_SLICE)
            });
            self.capacity_changed.wait_for(&mut resident, slice);
        }
    }

    /// Passivate a Ready session whose entry lock the caller holds.
    ///
    /// On store failure the session stays resident and usable.
    fn passivate_locked(&self, key: SessionKey, mut guard: SlotGuard<B::State>) -> Result<()> {
        let entry = &mut *guard;
        let passivated = transition(entry.state, Event::Evict)?;
        let Some(mut state) = entry.payload.take() else {
            return Err(Error::IllegalTransition {
                from: entry.state,
                event: Event::Evict,
            });
        };

        if let Err(e) = self
            .lifecycle
            .fire(Phase::PrePassivate, &key, Some(&mut state))
        {
            self.force_remove(&key, entry);
            return Err(e);
        }

        if let Err(e) = self.store.passivate(&key, &state) {
            Counters::bump(&self.counters.passivation_failures);
            warn!(key = %key, error = %e, "Passivation failed, session stays resident");

            // Undo pre-passivate so the session can keep serving calls
            if let Err(hook_err) = self
                .lifecycle
                .fire(Phase::PostActivate, &key, Some(&mut state))
            {
                self.force_remove(&key, entry);
                return Err(hook_err);
            }
            entry.payload = Some(state);
            return Err(e);
        }

        drop(state);
        entry.state = passivated;
        self.unlink(&key, entry);
        Counters::bump(&self.counters.passivated);

        if let Err(e) = self.lifecycle.fire(Phase::PostPassivate, &key, None) {
            entry.state = EntryState::Removed;
            self.discard_record(&key);
            return Err(e);
        }

        Ok(())
    }

    /// Load a non-resident key into a locked Ready slot.
    ///
    /// Returns `None` if the key is already linked and the caller should retry.
    fn activate(&self, key: &SessionKey) -> Result<Option<SlotGuard<B::State>>> {
        let ready = transition(EntryState::Passivated, Event::Activate)?;
        let Some(mut guard) = self.link_placeholder(key) else {
            return Ok(None);
        };
        let entry = &mut *guard;

        // Authoritative while the placeholder is linked: nobody else can
        // activate or passivate this key meanwhile
        match self.store.contains(key) {
            Ok(true) => {}
            Ok(false) => {
                entry.state = EntryState::Removed;
                self.unlink(key, entry);
                return Err(Error::NotFound(*key));
            }
            Err(e) => {
                self.unlink(key, entry);
                return Err(e);
            }
        }

        match self.reserve() {
            Ok(reservation) => {
                entry.reserved = true;
                reservation.commit();
            }
            Err(e) => {
                self.unlink(key, entry);
                return Err(e);
            }
        }

        match self.load(key) {
            Ok(state) => {
                entry.payload = Some(state);
                entry.state = ready;
                entry.last_access = Instant::now();
                self.resident.lock().usage.mark_idle(key);
                Counters::bump(&self.counters.activated);
                Ok(Some(guard))
            }
            Err(e) => {
                // Transient store errors leave the record for a later retry
                entry.state = match e {
                    Error::Store(_) => EntryState::Passivated,
                    _ => EntryState::Removed,
                };
                if let Error::Deserialization { .. } = e {
                    Counters::bump(&self.counters.removed);
                }
                self.unlink(key, entry);
                Err(e)
            }
        }
    }

    /// Run the activation hooks around reading the record, then drop the record.
    fn load(&self, key: &SessionKey) -> Result<B::State> {
        if let Err(e) = self.lifecycle.fire(Phase::PreActivate, key, None) {
            self.discard_record(key);
            return Err(e);
        }

        let mut state: B::State = self.store.activate(key)?;

        if let Err(e) = self
            .lifecycle
            .fire(Phase::PostActivate, key, Some(&mut state))
        {
            self.discard_record(key);
            return Err(e);
        }

        self.store.remove(key)?;
        Ok(state)
    }

    /// Remove a passivated session. Returns `false` if the key became
    /// resident meanwhile and the caller should retry.
    fn remove_passivated(&self, key: &SessionKey) -> Result<bool> {
        let Some(mut guard) = self.link_placeholder(key) else {
            return Ok(false);
        };

        let entry = &mut *guard;
        let mut existed = true;
        let result = match self.store.activate::<B::State>(key) {
            Ok(mut state) => {
                let hook = self
                    .lifecycle
                    .fire(Phase::PreDestroy, key, Some(&mut state));
                self.store.remove(key).and(hook)
            }
            Err(Error::NotFound(_)) => {
                existed = false;
                Ok(())
            }
            // The undecodable record has already been purged
            Err(Error::Deserialization { .. }) => Ok(()),
            Err(e) => Err(e),
        };

        entry.state = match result {
            Err(Error::Store(_)) => EntryState::Passivated,
            _ => EntryState::Removed,
        };
        self.unlink(key, entry);

        if existed && entry.state == EntryState::Removed {
            Counters::bump(&self.counters.removed);
            debug!(key = %key, "Passivated session removed");
        }
        result.map(|()| true)
    }

    /// Link a locked, capacity-free placeholder for a non-resident key.
    fn link_placeholder(&self, key: &SessionKey) -> Option<SlotGuard<B::State>> {
        let mut resident = self.resident.lock();
        if resident.lru.contains(key) {
            return None;
        }
        let slot = Arc::new(Mutex::new(Slot::placeholder()));
        let guard = slot.lock_arc();
        resident.lru.put(*key, slot);
        Some(guard)
    }

    /// Drop a slot from the resident map and release its capacity.
    fn unlink(&self, key: &SessionKey, entry: &mut Slot<B::State>) {
        let freed = std::mem::take(&mut entry.reserved);
        {
            let mut resident = self.resident.lock();
            resident.lru.pop(key);
            resident.usage.forget(key);
            if freed {
                resident.occupied -= 1;
            }
        }
        self.capacity_changed.notify_all();
    }

    /// Discard a session whose hook failed, without further callbacks.
    fn force_remove(&self, key: &SessionKey, entry: &mut Slot<B::State>) {
        warn!(key = %key, "Force-removing session after hook failure");
        entry.payload = None;
        entry.state = EntryState::Removed;
        self.unlink(key, entry);
        self.discard_record(key);
    }

    fn discard_record(&self, key: &SessionKey) {
        if let Err(e) = self.store.remove(key) {
            warn!(key = %key, error = %e, "Failed to delete session record");
        }
        Counters::bump(&self.counters.removed);
    }

    /// Apply `finished` for a checked-out session.
    fn finish(&self, key: SessionKey, slot: &SlotRef<B::State>, mut state: B::State) -> Result<()> {
        let mut guard = slot.lock();
        let entry = &mut *guard;
        let ready = transition(entry.state, Event::Finish)?;

        if entry.remove_pending {
            let hook = self.lifecycle.fire(Phase::PreDestroy, &key, Some(&mut state));
            entry.remove_pending = false;
            entry.state = EntryState::Removed;
            self.unlink(&key, entry);
            Counters::bump(&self.counters.removed);
            debug!(key = %key, "Deferred removal applied");
            return hook;
        }

        if let Err(e) = self
            .lifecycle
            .fire(Phase::PostInvoke, &key, Some(&mut state))
        {
            self.force_remove(&key, entry);
            return Err(e);
        }

        entry.payload = Some(state);
        entry.state = ready;
        entry.last_access = Instant::now();
        {
            let mut resident = self.resident.lock();
            resident.lru.promote(&key);
            resident.usage.mark_idle(&key);
        }
        self.capacity_changed.notify_all();
        trace!(key = %key, "Session finished");

        Ok(())
    }
}

/// Least recently used Ready session whose lock is free right now.
fn pick_victim<S>(resident: &Resident<S>) -> Option<(SessionKey, SlotGuard<S>)> {
    resident.lru.iter().rev().find_map(|(key, slot)| {
        let guard = slot.try_lock_arc()?;
        (guard.state == EntryState::Ready).then_some((*key, guard))
    })
}

/// Exclusive checkout of a session's state.
///
/// Dereferences to the state. Call [`finish`](Self::finish) (or
/// [`StatefulCache::finished`]) when the business call completes; dropping
/// the handle finishes it as well, logging any hook failure.
pub struct SessionHandle<B: SessionBean> {
    inner: Arc<Inner<B>>,
    key: SessionKey,
    slot: SlotRef<B::State>,
    /// Always `Some` until the handle is finished.
    state: Option<B::State>,
}

impl<B: SessionBean> SessionHandle<B> {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Request removal once this checkout finishes.
    pub fn remove_on_finish(&self) {
        self.slot.lock().remove_pending = true;
    }

    /// Return the session to the cache.
    pub fn finish(mut self) -> Result<()> {
        match self.state.take() {
            Some(state) => self.inner.finish(self.key, &self.slot, state),
            None => Ok(()),
        }
    }
}

impl<B: SessionBean> std::fmt::Debug for SessionHandle<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<B: SessionBean> Deref for SessionHandle<B> {
    type Target = B::State;

    fn deref(&self) -> &B::State {
        self.state
            .as_ref()
            .expect("session state is present until the handle is finished")
    }
}

impl<B: SessionBean> DerefMut for SessionHandle<B> {
    fn deref_mut(&mut self) -> &mut B::State {
        self.state
            .as_mut()
            .expect("session state is present until the handle is finished")
    }
}

impl<B: SessionBean> Drop for SessionHandle<B> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take()
            && let Err(e) = self.inner.finish(self.key, &self.slot, state)
        {
            warn!(key = %self.key, error = %e, "Finishing dropped session handle failed");
        }
    }
}

/// Snapshot returned by [`StatefulCache::peek`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub key: SessionKey,
    pub state: EntryState,
    /// Time since last use, for idle resident sessions.
    pub idle_for: Option<Duration>,
    pub remove_pending: bool,
    /// Serialized session state, when it can be read without a checkout.
    pub state_snapshot: Option<serde_json::Value>,
}

/// Outcome of a sweep or bulk passivation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Sessions considered.
    pub examined: usize,
    pub passivated: usize,
    pub failed: usize,
    /// Passivated records purged by the removal timeout.
    pub expired: usize,
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Current number of resident sessions.
    pub resident: usize,

    /// Maximum resident sessions.
    pub max_size: usize,

    /// Resident sessions that are idle (evictable).
    pub available: usize,

    /// Resident sessions that are checked out.
    pub in_use: usize,

    pub created: u64,
    pub activated: u64,
    pub passivated: u64,
    pub removed: u64,
    pub expired: u64,
    pub passivation_failures: u64,
}
