//! Circuit breaker for guarding calls to external dependencies
//!
//! One breaker exists per (dependency, consumer) pair. It runs the guarded
//! operation while closed, rejects calls while open, and lets exactly one
//! trial call through once the recovery timeout has elapsed.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{EventRecord, NoopSink, SharedSink};

/// Name of the event emitted on every state transition
pub const STATE_CHANGE_EVENT: &str = "circuit_breaker.state_change";

/// Error kind excluded from failure counting by default
pub const RATE_LIMITED_KIND: &str = "rate_limited";

/// Classifies an error so breakers can skip kinds that should not trip them
pub trait FailureKind {
    /// Stable, lowercase kind name (e.g. `rate_limited`, `network`)
    fn failure_kind(&self) -> &str;
}

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through normally
    Closed,
    /// Calls are rejected without being attempted
    Open,
    /// A single trial call is allowed to probe recovery
    HalfOpen,
}

impl CircuitState {
    /// Numeric code used as the event value
    pub fn code(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait in the open state before allowing a trial call
    pub recovery_timeout: Duration,
    /// Error kinds that propagate without counting as failures
    pub excluded_kinds: BTreeSet<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            excluded_kinds: BTreeSet::from([RATE_LIMITED_KIND.to_string()]),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set recovery timeout
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Exclude an additional error kind from failure counting
    pub fn with_excluded_kind(mut self, kind: impl Into<String>) -> Self {
        self.excluded_kinds.insert(kind.into());
        self
    }

    /// Count every error kind as a failure
    pub fn without_exclusions(mut self) -> Self {
        self.excluded_kinds.clear();
        self
    }

    fn is_excluded(&self, kind: &str) -> bool {
        self.excluded_kinds.contains(kind)
    }
}

/// Error returned by a guarded call
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The breaker refused to run the operation
    #[error("circuit '{breaker}' is {state}, call rejected")]
    Rejected {
        /// Breaker name
        breaker: String,
        /// State that caused the rejection
        state: CircuitState,
    },

    /// The operation ran and failed
    #[error("{0}")]
    Failed(E),
}

impl<E> CallError<E> {
    /// Whether the call was rejected without running
    pub fn is_rejected(&self) -> bool {
        matches!(self, CallError::Rejected { .. })
    }

    /// The operation's own error, if it ran
    pub fn into_failure(self) -> Option<E> {
        match self {
            CallError::Failed(e) => Some(e),
            CallError::Rejected { .. } => None,
        }
    }
}

/// Point-in-time view of a breaker, for health reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Breaker name
    pub name: String,
    /// Effective state
    pub state: CircuitState,
    /// Consecutive failures counted so far
    pub consecutive_failures: u32,
    /// Configured failure threshold
    pub failure_threshold: u32,
    /// Milliseconds since the last state transition
    pub since_transition_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    transitioned_at: Instant,
    trial_in_flight: bool,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            transitioned_at: Instant::now(),
            trial_in_flight: false,
        }
    }

    fn move_to(&mut self, to: CircuitState) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        self.state = to;
        self.transitioned_at = Instant::now();
        (from != to).then_some((from, to))
    }
}

/// Circuit breaker guarding one dependency for one consumer
///
/// # Usage
///
/// ```ignore
/// let breaker = CircuitBreaker::new("model:primary@planner", CircuitBreakerConfig::default());
///
/// match breaker.execute(|| provider.generate(&request)).await {
///     Ok(response) => Ok(response),
///     Err(CallError::Rejected { .. }) => Err(ProviderError::Unavailable),
///     Err(CallError::Failed(e)) => Err(e),
/// }
/// ```
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    sink: SharedSink,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker that does not publish events
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_sink(name, config, Arc::new(NoopSink))
    }

    /// Create a new circuit breaker publishing state changes to `sink`
    pub fn with_sink(name: impl Into<String>, config: CircuitBreakerConfig, sink: SharedSink) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
            sink,
        }
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Effective state. An open breaker whose recovery timeout has elapsed
    /// reports `HalfOpen`: the next call will be let through as a trial.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        self.effective_state(&inner)
    }

    /// Consecutive failures counted since the last reset
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Whether a call made now would be attempted
    pub fn is_call_permitted(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner.transitioned_at.elapsed() >= self.config.recovery_timeout,
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Health snapshot
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: self.effective_state(&inner),
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            since_transition_ms: inner.transitioned_at.elapsed().as_millis() as u64,
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// Returns `CallError::Rejected` without invoking the operation when the
    /// circuit is open, or when it is half-open and the trial call is already
    /// in flight.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureKind,
    {
        let admission = match self.try_acquire() {
            Ok(admission) => admission,
            Err(state) => {
                debug!(breaker = %self.name, state = %state, "Call rejected");
                return Err(CallError::Rejected {
                    breaker: self.name.clone(),
                    state,
                });
            }
        };

        let mut guard = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };
        let result = operation().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.on_success(admission),
            Err(e) if self.config.is_excluded(e.failure_kind()) => {
                debug!(
                    breaker = %self.name,
                    kind = e.failure_kind(),
                    "Excluded failure kind, not counted"
                );
                self.on_excluded(admission);
            }
            Err(e) => {
                debug!(breaker = %self.name, kind = e.failure_kind(), "Guarded call failed");
                self.on_failure(admission);
            }
        }

        result.map_err(CallError::Failed)
    }

    /// Like [`execute`](Self::execute), but a rejected call yields
    /// `fallback(state)` instead of an error.
    pub async fn execute_or_else<T, E, F, Fut, G>(&self, operation: F, fallback: G) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureKind,
        G: FnOnce(CircuitState) -> T,
    {
        match self.execute(operation).await {
            Ok(value) => Ok(value),
            Err(CallError::Rejected { state, .. }) => Ok(fallback(state)),
            Err(CallError::Failed(e)) => Err(e),
        }
    }

    /// Force the circuit open
    pub fn force_open(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.trial_in_flight = false;
            inner.move_to(CircuitState::Open)
        };
        info!(breaker = %self.name, "Circuit breaker force opened");
        self.publish(transition);
    }

    /// Force the circuit closed and clear failures
    pub fn force_close(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.consecutive_failures = 0;
            inner.trial_in_flight = false;
            inner.move_to(CircuitState::Closed)
        };
        info!(breaker = %self.name, "Circuit breaker force closed");
        self.publish(transition);
    }

    /// Reset to a fresh closed breaker
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            *inner = BreakerInner::new();
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
        };
        debug!(breaker = %self.name, "Circuit breaker reset");
        self.publish(transition);
    }

    fn effective_state(&self, inner: &BreakerInner) -> CircuitState {
        match inner.state {
            CircuitState::Open if inner.transitioned_at.elapsed() >= self.config.recovery_timeout => {
                CircuitState::HalfOpen
            }
            other => other,
        }
    }

    fn try_acquire(&self) -> Result<Admission, CircuitState> {
        let (admission, transition) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => (Ok(Admission::Normal), None),
                CircuitState::Open => {
                    if inner.transitioned_at.elapsed() >= self.config.recovery_timeout {
                        inner.trial_in_flight = true;
                        let transition = inner.move_to(CircuitState::HalfOpen);
                        (Ok(Admission::Trial), transition)
                    } else {
                        (Err(CircuitState::Open), None)
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        (Err(CircuitState::HalfOpen), None)
                    } else {
                        inner.trial_in_flight = true;
                        (Ok(Admission::Trial), None)
                    }
                }
            }
        };

        if transition.is_some() {
            info!(breaker = %self.name, "Circuit breaker transitioning to half_open");
        }
        self.publish(transition);
        admission
    }

    fn on_success(&self, admission: Admission) {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures = 0;
                    None
                }
                CircuitState::HalfOpen if admission == Admission::Trial => {
                    inner.consecutive_failures = 0;
                    inner.trial_in_flight = false;
                    inner.move_to(CircuitState::Closed)
                }
                // A straggler admitted before the circuit tripped does not
                // get to close it.
                _ => None,
            }
        };

        if transition.is_some() {
            info!(breaker = %self.name, "Circuit breaker recovered, transitioning to closed");
        }
        self.publish(transition);
    }

    fn on_failure(&self, admission: Admission) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            match inner.state {
                CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opened"
                    );
                    inner.move_to(CircuitState::Open)
                }
                CircuitState::HalfOpen if admission == Admission::Trial => {
                    inner.trial_in_flight = false;
                    warn!(breaker = %self.name, "Trial call failed, circuit breaker reopened");
                    inner.move_to(CircuitState::Open)
                }
                _ => None,
            }
        };
        self.publish(transition);
    }

    fn on_excluded(&self, admission: Admission) {
        if admission == Admission::Trial {
            self.release_trial();
        }
    }

    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn publish(&self, transition: Option<(CircuitState, CircuitState)>) {
        if let Some((from, to)) = transition {
            self.sink.emit(
                EventRecord::new(STATE_CHANGE_EVENT, to.code())
                    .with_label("breaker", &self.name)
                    .with_label("from", from)
                    .with_label("to", to),
            );
        }
    }
}

/// Releases the half-open trial slot if the guarded future is dropped
/// before it completes.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(breaker = %self.breaker.name, "Trial call abandoned, releasing slot");
            self.breaker.release_trial();
        }
    }
}

/// Identity of a breaker: the dependency it guards and who is calling
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakerKey {
    /// Guarded dependency, e.g. `model:primary` or `store:memory`
    pub dependency: String,
    /// Consumer name, e.g. an agent or `coordinator`
    pub consumer: String,
}

impl BreakerKey {
    /// Create a key
    pub fn new(dependency: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
            consumer: consumer.into(),
        }
    }
}

impl fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.dependency, self.consumer)
    }
}

/// Registry of breakers keyed by (dependency, consumer)
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<BreakerKey, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
    sink: SharedSink,
}

impl CircuitBreakerRegistry {
    /// Create a new registry with default config
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default(), Arc::new(NoopSink))
    }

    /// Create a registry whose breakers use `config` and publish to `sink`
    pub fn with_config(config: CircuitBreakerConfig, sink: SharedSink) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config: config,
            sink,
        }
    }

    /// Config applied by [`get_or_create`](Self::get_or_create)
    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Get or create the breaker for a (dependency, consumer) pair
    pub fn get_or_create(&self, dependency: &str, consumer: &str) -> Arc<CircuitBreaker> {
        let key = BreakerKey::new(dependency, consumer);
        if let Some(cb) = self.breakers.read().get(&key) {
            return Arc::clone(cb);
        }

        let mut breakers = self.breakers.write();
        let cb = breakers.entry(key).or_insert_with_key(|key| {
            Arc::new(CircuitBreaker::with_sink(
                key.to_string(),
                self.default_config.clone(),
                Arc::clone(&self.sink),
            ))
        });
        Arc::clone(cb)
    }

    /// Register a breaker with a custom config, replacing any existing one
    pub fn register(
        &self,
        dependency: &str,
        consumer: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let key = BreakerKey::new(dependency, consumer);
        let cb = Arc::new(CircuitBreaker::with_sink(
            key.to_string(),
            config,
            Arc::clone(&self.sink),
        ));
        self.breakers.write().insert(key, Arc::clone(&cb));
        cb
    }

    /// Get a breaker if it exists
    pub fn get(&self, dependency: &str, consumer: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .get(&BreakerKey::new(dependency, consumer))
            .cloned()
    }

    /// Snapshots of every breaker, sorted by name
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.breakers.read().values().map(|cb| cb.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Whether no breakers exist yet
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Reset all circuit breakers
    pub fn reset_all(&self) {
        for cb in self.breakers.read().values() {
            cb.reset();
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum TestError {
        Boom,
        RateLimited,
    }

    impl FailureKind for TestError {
        fn failure_kind(&self) -> &str {
            match self {
                TestError::Boom => "network",
                TestError::RateLimited => RATE_LIMITED_KIND,
            }
        }
    }

    async fn fail(cb: &CircuitBreaker) {
        let _ = cb.execute(|| async { Err::<(), _>(TestError::Boom) }).await;
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, CallError<TestError>> {
        cb.execute(|| async { Ok::<_, TestError>(7) }).await
    }

    fn quick_config(threshold: u32, recovery_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(threshold)
            .with_recovery_timeout(Duration::from_millis(recovery_ms))
    }

    #[tokio::test]
    async fn test_circuit_breaker_starts_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_call_permitted());
        assert_eq!(succeed(&cb).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("test", quick_config(3, 60_000));

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = succeed(&cb).await.unwrap_err();
        assert!(rejected.is_rejected());
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_run_operation() {
        let cb = CircuitBreaker::new("test", quick_config(1, 60_000));
        fail(&cb).await;

        let mut ran = false;
        let result = cb
            .execute(|| {
                ran = true;
                async { Ok::<_, TestError>(()) }
            })
            .await;

        assert!(result.unwrap_err().is_rejected());
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("test", quick_config(3, 60_000));

        fail(&cb).await;
        fail(&cb).await;
        succeed(&cb).await.unwrap();

        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_excluded_kind_not_counted() {
        let cb = CircuitBreaker::new("test", quick_config(2, 60_000));

        for _ in 0..5 {
            let err = cb
                .execute(|| async { Err::<(), _>(TestError::RateLimited) })
                .await
                .unwrap_err();
            assert_eq!(err.into_failure(), Some(TestError::RateLimited));
        }

        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_excluded_kind_counted_when_exclusions_cleared() {
        let cb = CircuitBreaker::new("test", quick_config(2, 60_000).without_exclusions());

        for _ in 0..2 {
            let _ = cb
                .execute(|| async { Err::<(), _>(TestError::RateLimited) })
                .await;
        }

        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_recovers_after_trial_success() {
        let cb = CircuitBreaker::new("test", quick_config(2, 5));

        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_reopens_on_failure_and_restarts_timer() {
        let cb = CircuitBreaker::new("test", quick_config(2, 30));

        fail(&cb).await;
        fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(succeed(&cb).await.unwrap_err().is_rejected());
    }

    #[tokio::test]
    async fn test_half_open_allows_single_trial() {
        let cb = Arc::new(CircuitBreaker::new("test", quick_config(1, 5)));
        fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(15)).await;

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let trial_cb = Arc::clone(&cb);
        let trial = tokio::spawn(async move {
            trial_cb
                .execute(|| async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok::<_, TestError>(1)
                })
                .await
        });

        started_rx.await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Concurrent calls during the trial are rejected, not run.
        for _ in 0..3 {
            let err = succeed(&cb).await.unwrap_err();
            assert!(matches!(
                err,
                CallError::Rejected {
                    state: CircuitState::HalfOpen,
                    ..
                }
            ));
        }

        release_tx.send(()).unwrap();
        assert_eq!(trial.await.unwrap().unwrap(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_trial_releases_slot() {
        let cb = CircuitBreaker::new("test", quick_config(1, 5));
        fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(15)).await;

        let pending = cb.execute(|| std::future::pending::<Result<(), TestError>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());

        assert!(cb.is_call_permitted());
        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_excluded_error_during_trial_keeps_half_open() {
        let cb = CircuitBreaker::new("test", quick_config(1, 5));
        fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(15)).await;

        let _ = cb
            .execute(|| async { Err::<(), _>(TestError::RateLimited) })
            .await;

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_call_permitted());
    }

    #[tokio::test]
    async fn test_execute_or_else_uses_fallback_when_open() {
        let cb = CircuitBreaker::new("test", quick_config(1, 60_000));
        fail(&cb).await;

        let value = cb
            .execute_or_else(|| async { Ok::<_, TestError>("live") }, |_| "fallback")
            .await
            .unwrap();
        assert_eq!(value, "fallback");
    }

    #[tokio::test]
    async fn test_state_changes_emit_events() {
        let sink = Arc::new(RecordingSink::new());
        let cb = CircuitBreaker::with_sink("model:a@agent", quick_config(1, 5), sink.clone());

        fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        succeed(&cb).await.unwrap();

        let events = sink.named(STATE_CHANGE_EVENT);
        let transitions: Vec<(String, String)> = events
            .iter()
            .map(|e| {
                (
                    e.label("from").unwrap().to_string(),
                    e.label("to").unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                ("closed".to_string(), "open".to_string()),
                ("open".to_string(), "half_open".to_string()),
                ("half_open".to_string(), "closed".to_string()),
            ]
        );
        assert!(events.iter().all(|e| e.label("breaker") == Some("model:a@agent")));
    }

    #[test]
    fn test_force_open_and_close() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_call_permitted());

        cb.force_close();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_call_permitted());
    }

    #[tokio::test]
    async fn test_reset() {
        let cb = CircuitBreaker::new("test", quick_config(2, 60_000));
        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_registry_get_or_create() {
        let registry = CircuitBreakerRegistry::new();

        let cb1 = registry.get_or_create("model:a", "planner");
        let cb2 = registry.get_or_create("model:a", "planner");
        let cb3 = registry.get_or_create("model:a", "writer");
        let cb4 = registry.get_or_create("store:memory", "planner");

        assert!(Arc::ptr_eq(&cb1, &cb2));
        assert!(!Arc::ptr_eq(&cb1, &cb3));
        assert!(!Arc::ptr_eq(&cb1, &cb4));
        assert_eq!(cb1.name(), "model:a@planner");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_registry_snapshot_sorted() {
        let registry = CircuitBreakerRegistry::new();
        registry.get_or_create("b", "x").force_open();
        registry.get_or_create("a", "x");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "a@x");
        assert_eq!(snapshot[1].state, CircuitState::Open);

        registry.reset_all();
        assert!(registry
            .snapshot()
            .iter()
            .all(|s| s.state == CircuitState::Closed));
    }
}
