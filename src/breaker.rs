//! Circuit breaker with a rolling error-rate window.
//!
//! The breaker guards one logical upstream call at a time; retries inside
//! that call are invisible to it. It has three states:
//!
//! | State | Behaviour |
//! |-------|-----------|
//! | `Closed` | Calls pass. Outcomes land in the rolling window. When the window holds at least `volume_threshold` calls and the failure rate exceeds `error_threshold_percentage`, the circuit opens. |
//! | `Open` | Calls fail with [`FetchError::UpstreamUnavailable`] without I/O. The first call after `reset_timeout_ms` becomes the half-open probe. |
//! | `HalfOpen` | Exactly one probe runs; everyone else fails fast. Probe success closes the circuit and clears the window; probe failure reopens it. |
//!
//! There are no timers: the open-to-half-open move happens on the next
//! acquire, by comparing against the time the circuit opened.
//!
//! The window is `rolling_buckets` fixed-width buckets covering
//! `rolling_window_ms`. Buckets older than the window are zeroed as time
//! advances.
//!
//! State and window live behind one `std::sync::Mutex`, which is only
//! held for bookkeeping and never across an `.await`.

use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;
use crate::error::FetchError;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "halfOpen",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the breaker, for health reports and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub enabled: bool,
    /// Successful calls in the rolling window.
    pub successes: u32,
    /// Failed calls in the rolling window.
    pub failures: u32,
    /// `failures / (successes + failures) * 100`, 0 for an empty window.
    pub error_percentage: f64,
}

type TransitionListener = Box<dyn Fn(BreakerState, BreakerState) + Send + Sync>;

// ============ Rolling window ============

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    successes: u32,
    failures: u32,
}

#[derive(Debug)]
struct RollingWindow {
    buckets: Vec<Bucket>,
    bucket_len: Duration,
    current: usize,
    current_start: Instant,
}

impl RollingWindow {
    fn new(buckets: u32, bucket_len: Duration, now: Instant) -> Self {
        Self {
            buckets: vec![Bucket::default(); buckets.max(1) as usize],
            bucket_len: bucket_len.max(Duration::from_millis(1)),
            current: 0,
            current_start: now,
        }
    }

    /// Rotate so the current bucket covers `now`, zeroing skipped buckets.
    fn advance(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.current_start);
        let steps = elapsed.as_nanos() / self.bucket_len.as_nanos();
        if steps == 0 {
            return;
        }

        let n = self.buckets.len();
        if steps >= n as u128 {
            self.reset(now);
            return;
        }
        for _ in 0..steps {
            self.current = (self.current + 1) % n;
            self.buckets[self.current] = Bucket::default();
        }
        // steps < n, so the product fits comfortably.
        self.current_start += self.bucket_len * steps as u32;
    }

    fn record(&mut self, success: bool, now: Instant) {
        self.advance(now);
        let bucket = &mut self.buckets[self.current];
        if success {
            bucket.successes = bucket.successes.saturating_add(1);
        } else {
            bucket.failures = bucket.failures.saturating_add(1);
        }
    }

    fn totals(&self) -> (u32, u32) {
        self.buckets.iter().fold((0, 0), |(s, f), b| {
            (s.saturating_add(b.successes), f.saturating_add(b.failures))
        })
    }

    fn reset(&mut self, now: Instant) {
        self.buckets.iter_mut().for_each(|b| *b = Bucket::default());
        self.current = 0;
        self.current_start = now;
    }
}

fn error_percentage(successes: u32, failures: u32) -> f64 {
    let total = u64::from(successes) + u64::from(failures);
    if total == 0 {
        0.0
    } else {
        f64::from(failures) / total as f64 * 100.0
    }
}

// ============ Breaker ============

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { probe_in_flight: bool },
}

impl Phase {
    fn public(&self) -> BreakerState {
        match self {
            Phase::Closed => BreakerState::Closed,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    window: RollingWindow,
}

type Transition = Option<(BreakerState, BreakerState)>;

/// Circuit breaker guarding calls to a single upstream.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
    listeners: RwLock<Vec<TransitionListener>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    /// Breaker disabled; nothing is recorded.
    Passthrough,
    Closed,
    Probe,
}

/// Admission ticket for one call.
///
/// Report the outcome with [`success`](Permit::success) or
/// [`failure`](Permit::failure). A half-open probe permit dropped without
/// an outcome is recorded as a failure so the breaker cannot wedge in
/// `HalfOpen`.
#[must_use = "report the call outcome through the permit"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    kind: PermitKind,
    finished: bool,
}

impl Permit<'_> {
    pub fn is_probe(&self) -> bool {
        self.kind == PermitKind::Probe
    }

    pub fn success(self) {
        self.finish(true, Instant::now());
    }

    pub fn failure(self) {
        self.finish(false, Instant::now());
    }

    fn finish(mut self, success: bool, now: Instant) {
        self.finished = true;
        self.breaker.complete_at(self.kind, success, now);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.finished && self.kind == PermitKind::Probe {
            self.breaker.complete_at(self.kind, false, Instant::now());
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let window = RollingWindow::new(
            config.rolling_buckets,
            config.bucket_duration(),
            Instant::now(),
        );
        Self {
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                window,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Register a callback fired with `(from, to)` on every state change.
    ///
    /// Callbacks run after the internal lock is released, so they may
    /// query the breaker.
    pub fn on_transition<F>(&self, listener: F)
    where
        F: Fn(BreakerState, BreakerState) + Send + Sync + 'static,
    {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(Box::new(listener)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(listener)),
        }
    }

    /// Current state. A disabled breaker always reports `Closed`.
    pub fn state(&self) -> BreakerState {
        if !self.config.enabled {
            return BreakerState::Closed;
        }
        self.lock().phase.public()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> BreakerSnapshot {
        let mut inner = self.lock();
        inner.window.advance(now);
        let (successes, failures) = inner.window.totals();
        BreakerSnapshot {
            state: if self.config.enabled {
                inner.phase.public()
            } else {
                BreakerState::Closed
            },
            enabled: self.config.enabled,
            successes,
            failures,
            error_percentage: error_percentage(successes, failures),
        }
    }

    /// Ask to run a call. Fails fast with [`FetchError::UpstreamUnavailable`]
    /// while open, or while another caller holds the half-open probe.
    pub fn try_acquire(&self) -> Result<Permit<'_>, FetchError> {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> Result<Permit<'_>, FetchError> {
        if !self.config.enabled {
            return Ok(self.permit(PermitKind::Passthrough));
        }

        let (result, transition) = {
            let mut inner = self.lock();
            match inner.phase {
                Phase::Closed => (Ok(PermitKind::Closed), None),
                Phase::Open { opened_at } => {
                    if now.saturating_duration_since(opened_at) >= self.config.reset_timeout() {
                        inner.phase = Phase::HalfOpen {
                            probe_in_flight: true,
                        };
                        (
                            Ok(PermitKind::Probe),
                            Some((BreakerState::Open, BreakerState::HalfOpen)),
                        )
                    } else {
                        (Err(FetchError::UpstreamUnavailable), None)
                    }
                }
                Phase::HalfOpen { probe_in_flight } => {
                    if probe_in_flight {
                        (Err(FetchError::UpstreamUnavailable), None)
                    } else {
                        inner.phase = Phase::HalfOpen {
                            probe_in_flight: true,
                        };
                        (Ok(PermitKind::Probe), None)
                    }
                }
            }
        };

        self.notify(transition);
        result.map(|kind| self.permit(kind))
    }

    /// Run `op` under the breaker: fail fast if not admitted, otherwise
    /// record the outcome. Every error counts as a failure.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let permit = self.try_acquire()?;
        match op().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(e)
            }
        }
    }

    fn permit(&self, kind: PermitKind) -> Permit<'_> {
        Permit {
            breaker: self,
            kind,
            finished: false,
        }
    }

    fn complete_at(&self, kind: PermitKind, success: bool, now: Instant) {
        if kind == PermitKind::Passthrough {
            return;
        }

        let transition = {
            let mut inner = self.lock();
            match (kind, inner.phase) {
                (PermitKind::Closed, Phase::Closed) => {
                    inner.window.record(success, now);
                    if !success && self.should_trip(&inner.window) {
                        inner.phase = Phase::Open { opened_at: now };
                        Some((BreakerState::Closed, BreakerState::Open))
                    } else {
                        None
                    }
                }
                (PermitKind::Probe, Phase::HalfOpen { .. }) => {
                    if success {
                        inner.phase = Phase::Closed;
                        inner.window.reset(now);
                        Some((BreakerState::HalfOpen, BreakerState::Closed))
                    } else {
                        inner.phase = Phase::Open { opened_at: now };
                        Some((BreakerState::HalfOpen, BreakerState::Open))
                    }
                }
                // Outcome of a call admitted under a phase that has since
                // changed; it no longer says anything about the current one.
                _ => None,
            }
        };

        self.notify(transition);
    }

    fn should_trip(&self, window: &RollingWindow) -> bool {
        let (successes, failures) = window.totals();
        let total = successes.saturating_add(failures);
        total > 0
            && total >= self.config.volume_threshold
            && error_percentage(successes, failures) > self.config.error_threshold_percentage
    }

    fn notify(&self, transition: Transition) {
        let Some((from, to)) = transition else {
            return;
        };

        match to {
            BreakerState::Open => tracing::error!(from = %from, "Circuit breaker opened"),
            BreakerState::HalfOpen => tracing::warn!(from = %from, "Circuit breaker half-open"),
            BreakerState::Closed => tracing::info!(from = %from, "Circuit breaker closed"),
        }

        let listeners = match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for listener in listeners.iter() {
            listener(from, to);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Bookkeeping never panics mid-update, so a poisoned guard still
        // holds a consistent state.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
