//! Session lifecycle: state machine, bean callbacks and interceptor chain.
//!
//! The cache is mechanism; this module is policy. [`transition`] is the
//! single source of truth for which state changes are legal, and
//! [`Lifecycle`] runs the callbacks that surround each change:
//!
//! ```text
//! create ──► New ──► Ready ◄──────► InUse
//!                     │  ▲   get/finished
//!              evict  ▼  │ activate
//!                   Passivated
//!                     │
//!   Ready|Passivated ─┴─► Removed   (InUse: deferred until finished)
//! ```
//!
//! For every phase, interceptors run `before` in registration order, then
//! the bean callback, then interceptor `after` in reverse order.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::key::SessionKey;

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a cached session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Instantiated, post-construct not yet completed.
    New,
    /// Resident and idle; eligible for eviction.
    Ready,
    /// Checked out by exactly one caller.
    InUse,
    /// State lives in the context store only.
    Passivated,
    /// Terminal.
    Removed,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::New => write!(f, "new"),
            EntryState::Ready => write!(f, "ready"),
            EntryState::InUse => write!(f, "in_use"),
            EntryState::Passivated => write!(f, "passivated"),
            EntryState::Removed => write!(f, "removed"),
        }
    }
}

/// Events that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Create,
    Get,
    Finish,
    Evict,
    Activate,
    Remove,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Create => write!(f, "create"),
            Event::Get => write!(f, "get"),
            Event::Finish => write!(f, "finish"),
            Event::Evict => write!(f, "evict"),
            Event::Activate => write!(f, "activate"),
            Event::Remove => write!(f, "remove"),
        }
    }
}

/// Compute the state that follows `from` on `event`.
///
/// Removing an in-use session is not a transition: the cache records a
/// pending removal and applies it when the session is finished.
pub fn transition(from: EntryState, event: Event) -> Result<EntryState> {
    use EntryState::*;

    match (from, event) {
        (New, Event::Create) => Ok(Ready),
        (Ready, Event::Get) => Ok(InUse),
        (InUse, Event::Finish) => Ok(Ready),
        (Ready, Event::Evict) => Ok(Passivated),
        (Passivated, Event::Activate) => Ok(Ready),
        (Ready | Passivated, Event::Remove) => Ok(Removed),
        (from, event) => Err(Error::IllegalTransition { from, event }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hooks
// ─────────────────────────────────────────────────────────────────────────────

/// Callback phases around state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    PostConstruct,
    PreInvoke,
    PostInvoke,
    PrePassivate,
    PostPassivate,
    PreActivate,
    PostActivate,
    PreDestroy,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PostConstruct => write!(f, "post-construct"),
            Phase::PreInvoke => write!(f, "pre-invoke"),
            Phase::PostInvoke => write!(f, "post-invoke"),
            Phase::PrePassivate => write!(f, "pre-passivate"),
            Phase::PostPassivate => write!(f, "post-passivate"),
            Phase::PreActivate => write!(f, "pre-activate"),
            Phase::PostActivate => write!(f, "post-activate"),
            Phase::PreDestroy => write!(f, "pre-destroy"),
        }
    }
}

/// Failure reported by a bean callback or interceptor.
///
/// Converts from any error type so hook bodies can use `?` freely.
#[derive(Debug, Clone)]
pub struct HookError {
    message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E: std::error::Error> From<E> for HookError {
    fn from(err: E) -> Self {
        Self::new(err.to_string())
    }
}

/// Result of a bean callback or interceptor.
pub type HookResult = std::result::Result<(), HookError>;

/// The business object provider.
///
/// Supplies the state type stored by the cache, constructs it from
/// `InitArgs`, and optionally reacts to each lifecycle phase. Passivated
/// state goes through serde, so `State` must round-trip through
/// `Serialize`/`Deserialize`; a serializer error surfaces as
/// [`Error::Serialization`].
pub trait SessionBean: Send + Sync + 'static {
    /// Conversational state held per session.
    type State: Serialize + DeserializeOwned + Send + 'static;

    /// Arguments for creating a session.
    type InitArgs;

    /// Build the initial state for a new session.
    fn instantiate(&self, key: &SessionKey, args: Self::InitArgs)
    -> std::result::Result<Self::State, HookError>;

    fn post_construct(&self, _key: &SessionKey, _state: &mut Self::State) -> HookResult {
        Ok(())
    }

    fn pre_invoke(&self, _key: &SessionKey, _state: &mut Self::State) -> HookResult {
        Ok(())
    }

    fn post_invoke(&self, _key: &SessionKey, _state: &mut Self::State) -> HookResult {
        Ok(())
    }

    /// Release anything that cannot be externalized.
    fn pre_passivate(&self, _key: &SessionKey, _state: &mut Self::State) -> HookResult {
        Ok(())
    }

    fn post_passivate(&self, _key: &SessionKey) -> HookResult {
        Ok(())
    }

    fn pre_activate(&self, _key: &SessionKey) -> HookResult {
        Ok(())
    }

    /// Reacquire resources released in `pre_passivate`.
    fn post_activate(&self, _key: &SessionKey, _state: &mut Self::State) -> HookResult {
        Ok(())
    }

    fn pre_destroy(&self, _key: &SessionKey, _state: &mut Self::State) -> HookResult {
        Ok(())
    }
}

/// What an interceptor sees for one phase.
///
/// `state` is `None` for phases where the session has no in-memory state
/// (pre-activate, post-passivate).
pub struct PhaseContext<'a, S> {
    pub key: &'a SessionKey,
    pub phase: Phase,
    pub state: Option<&'a mut S>,
}

/// Cross-cutting behaviour wrapped around every lifecycle phase.
pub trait Interceptor<S>: Send + Sync {
    fn before(&self, _ctx: &mut PhaseContext<'_, S>) -> HookResult {
        Ok(())
    }

    fn after(&self, _ctx: &mut PhaseContext<'_, S>) -> HookResult {
        Ok(())
    }
}

/// Interceptor that emits a debug event around each phase.
#[derive(Debug, Clone, Default)]
pub struct TracingInterceptor;

impl<S> Interceptor<S> for TracingInterceptor {
    fn before(&self, ctx: &mut PhaseContext<'_, S>) -> HookResult {
        debug!(key = %ctx.key, phase = %ctx.phase, "Entering lifecycle phase");
        Ok(())
    }

    fn after(&self, ctx: &mut PhaseContext<'_, S>) -> HookResult {
        debug!(key = %ctx.key, phase = %ctx.phase, "Completed lifecycle phase");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

/// Runs bean callbacks and the interceptor chain for each phase.
pub struct Lifecycle<B: SessionBean> {
    bean: Arc<B>,
    interceptors: Vec<Arc<dyn Interceptor<B::State>>>,
}

impl<B: SessionBean> Lifecycle<B> {
    pub fn new(bean: B) -> Self {
        Self {
            bean: Arc::new(bean),
            interceptors: Vec::new(),
        }
    }

    /// Append an interceptor; earlier interceptors wrap later ones.
    pub fn with_interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor<B::State> + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn bean(&self) -> &B {
        &self.bean
    }

    pub(crate) fn instantiate(&self, key: &SessionKey, args: B::InitArgs) -> Result<B::State> {
        self.bean
            .instantiate(key, args)
            .map_err(|e| hook_failed(key, Phase::PostConstruct, e))
    }

    /// Run `phase` for `key`. The first failing hook aborts the chain.
    pub(crate) fn fire(
        &self,
        phase: Phase,
        key: &SessionKey,
        state: Option<&mut B::State>,
    ) -> Result<()> {
        let mut ctx = PhaseContext { key, phase, state };

        for interceptor in &self.interceptors {
            interceptor
                .before(&mut ctx)
                .map_err(|e| hook_failed(key, phase, e))?;
        }

        self.invoke_bean(key, phase, ctx.state.as_deref_mut())
            .map_err(|e| hook_failed(key, phase, e))?;

        for interceptor in self.interceptors.iter().rev() {
            interceptor
                .after(&mut ctx)
                .map_err(|e| hook_failed(key, phase, e))?;
        }

        Ok(())
    }

    fn invoke_bean(
        &self,
        key: &SessionKey,
        phase: Phase,
        state: Option<&mut B::State>,
    ) -> HookResult {
        let bean = &self.bean;
        match (phase, state) {
            (Phase::PostPassivate, _) => bean.post_passivate(key),
            (Phase::PreActivate, _) => bean.pre_activate(key),
            (Phase::PostConstruct, Some(s)) => bean.post_construct(key, s),
            (Phase::PreInvoke, Some(s)) => bean.pre_invoke(key, s),
            (Phase::PostInvoke, Some(s)) => bean.post_invoke(key, s),
            (Phase::PrePassivate, Some(s)) => bean.pre_passivate(key, s),
            (Phase::PostActivate, Some(s)) => bean.post_activate(key, s),
            (Phase::PreDestroy, Some(s)) => bean.pre_destroy(key, s),
            (_, None) => Ok(()),
        }
    }
}

fn hook_failed(key: &SessionKey, phase: Phase, err: HookError) -> Error {
    warn!(key = %key, phase = %phase, error = %err, "Lifecycle hook failed");
    Error::Lifecycle {
        key: *key,
        phase,
        message: err.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Counter {
        hits: u32,
    }

    #[derive(Default)]
    struct CountingBean {
        calls: Mutex<Vec<String>>,
        fail_on: Option<Phase>,
    }

    impl CountingBean {
        fn record(&self, what: &str) -> HookResult {
            self.calls.lock().push(what.to_string());
            match self.fail_on {
                Some(p) if p.to_string() == what => Err(HookError::new("boom")),
                _ => Ok(()),
            }
        }
    }

    impl SessionBean for CountingBean {
        type State = Counter;
        type InitArgs = u32;

        fn instantiate(
            &self,
            _key: &SessionKey,
            hits: u32,
        ) -> std::result::Result<Counter, HookError> {
            Ok(Counter { hits })
        }

        fn pre_invoke(&self, _key: &SessionKey, state: &mut Counter) -> HookResult {
            state.hits += 1;
            self.record("pre-invoke")
        }

        fn post_passivate(&self, _key: &SessionKey) -> HookResult {
            self.record("post-passivate")
        }
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Interceptor<Counter> for Recorder {
        fn before(&self, ctx: &mut PhaseContext<'_, Counter>) -> HookResult {
            self.log.lock().push(format!("{}:before:{}", self.name, ctx.phase));
            Ok(())
        }

        fn after(&self, ctx: &mut PhaseContext<'_, Counter>) -> HookResult {
            self.log.lock().push(format!("{}:after:{}", self.name, ctx.phase));
            Ok(())
        }
    }

    #[test]
    fn test_legal_transitions() {
        use EntryState::*;
        assert_eq!(transition(New, Event::Create).unwrap(), Ready);
        assert_eq!(transition(Ready, Event::Get).unwrap(), InUse);
        assert_eq!(transition(InUse, Event::Finish).unwrap(), Ready);
        assert_eq!(transition(Ready, Event::Evict).unwrap(), Passivated);
        assert_eq!(transition(Passivated, Event::Activate).unwrap(), Ready);
        assert_eq!(transition(Ready, Event::Remove).unwrap(), Removed);
        assert_eq!(transition(Passivated, Event::Remove).unwrap(), Removed);
    }

    #[test]
    fn test_illegal_transitions() {
        use EntryState::*;
        assert!(matches!(
            transition(InUse, Event::Remove),
            Err(Error::IllegalTransition { from: InUse, event: Event::Remove })
        ));
        assert!(transition(InUse, Event::Evict).is_err());
        assert!(transition(Passivated, Event::Get).is_err());
        assert!(transition(Removed, Event::Get).is_err());
        assert!(transition(Removed, Event::Remove).is_err());
    }

    #[test]
    fn test_interceptor_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = Lifecycle::new(CountingBean::default())
            .with_interceptor(Recorder { name: "outer", log: log.clone() })
            .with_interceptor(Recorder { name: "inner", log: log.clone() });

        let key = SessionKey::generate();
        let mut state = Counter::default();
        lifecycle
            .fire(Phase::PreInvoke, &key, Some(&mut state))
            .unwrap();

        assert_eq!(state.hits, 1);
        assert_eq!(
            *log.lock(),
            vec![
                "outer:before:pre-invoke",
                "inner:before:pre-invoke",
                "inner:after:pre-invoke",
                "outer:after:pre-invoke",
            ]
        );
    }

    #[test]
    fn test_stateless_phase_reaches_bean() {
        let lifecycle = Lifecycle::new(CountingBean::default());
        let key = SessionKey::generate();
        lifecycle.fire(Phase::PostPassivate, &key, None).unwrap();
        assert_eq!(*lifecycle.bean().calls.lock(), vec!["post-passivate"]);
    }

    #[test]
    fn test_hook_failure_maps_to_lifecycle_error() {
        let bean = CountingBean {
            fail_on: Some(Phase::PreInvoke),
            ..Default::default()
        };
        let lifecycle = Lifecycle::new(bean);
        let key = SessionKey::generate();
        let mut state = Counter::default();

        let err = lifecycle
            .fire(Phase::PreInvoke, &key, Some(&mut state))
            .unwrap_err();
        match err {
            Error::Lifecycle { key: k, phase, message } => {
                assert_eq!(k, key);
                assert_eq!(phase, Phase::PreInvoke);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_hook_error_from_std_error() {
        fn fails() -> HookResult {
            let _: u32 = "x".parse()?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(err.message().contains("invalid digit"));
    }
}
