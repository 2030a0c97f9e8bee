//! Per-service circuit breakers.
//!
//! ```text
//! Closed   -> Open:     consecutive failures reach the threshold
//! Open     -> HalfOpen: first call after the recovery timeout (the probe)
//! HalfOpen -> Closed:   probe succeeds
//! HalfOpen -> Open:     probe fails, recovery timer restarts
//! ```

use crate::config::BreakerConfig;
use crate::core::CircuitState;
use crate::errors::CircuitOpenError;
use crate::utils::{millis, now_utc, Timestamp};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Serializable view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    /// Service name.
    pub service: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// When the last failure was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<Timestamp>,
    /// Calls admitted.
    pub total_requests: u64,
    /// Admitted calls that failed.
    pub total_failures: u64,
    /// Calls rejected without invocation.
    pub total_rejections: u64,
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Timestamp>,
    probe_in_flight: bool,
    total_requests: u64,
    total_failures: u64,
    total_rejections: u64,
}

/// The breaker guarding one service.
#[derive(Debug)]
pub struct ServiceBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl ServiceBreaker {
    fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    /// Service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current state.
    ///
    /// An open breaker whose recovery timeout has elapsed still reports
    /// `Open` until a call arrives and becomes the probe.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            service: self.service.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    /// Asks to make a call.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, CircuitOpenError> {
        let mut inner = self.inner.lock();
        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let recovered = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout());
                if !recovered {
                    return Err(self.reject(&mut inner));
                }
                inner.state = CircuitState::HalfOpen;
                info!(service = %self.service, "Circuit breaker half-open, admitting probe");
                true
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.reject(&mut inner));
                }
                true
            }
        };

        if probe {
            inner.probe_in_flight = true;
        }
        inner.total_requests += 1;
        Ok(BreakerPermit {
            breaker: Some(Arc::clone(self)),
            probe,
            settled: false,
        })
    }

    /// Operator action: close the breaker and forget the failure streak.
    ///
    /// Lifetime counters are kept.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        warn!(service = %self.service, "Circuit breaker reset by operator");
    }

    fn reject(&self, inner: &mut BreakerInner) -> CircuitOpenError {
        inner.total_rejections += 1;
        debug!(service = %self.service, state = %inner.state, "Circuit breaker rejected call");
        CircuitOpenError {
            service: self.service.clone(),
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen if probe => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
                info!(
                    service = %self.service,
                    total_requests = inner.total_requests,
                    "Circuit breaker closed (recovered)"
                );
            }
            CircuitState::Closed => inner.consecutive_failures = 0,
            // A call admitted before the breaker tripped; it proves nothing now.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.last_failure_at = Some(now_utc());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        service = %self.service,
                        consecutive_failures = inner.consecutive_failures,
                        failure_threshold = self.config.failure_threshold,
                        recovery_timeout_ms = millis(self.config.recovery_timeout()),
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen if probe => {
                inner.consecutive_failures += 1;
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                warn!(service = %self.service, "Circuit breaker probe failed, reopening");
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
            debug!(service = %self.service, "Probe abandoned, slot released");
        }
    }
}

/// Permission to make one call, obtained from a breaker.
///
/// Settle it with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). Dropping an unsettled permit
/// records nothing but frees the half-open probe slot, so a cancelled probe
/// cannot wedge the breaker.
#[derive(Debug)]
#[must_use = "a permit must be settled with record_success or record_failure"]
pub struct BreakerPermit {
    breaker: Option<Arc<ServiceBreaker>>,
    probe: bool,
    settled: bool,
}

impl BreakerPermit {
    /// A permit that is not tied to any breaker.
    pub fn bypass() -> Self {
        Self {
            breaker: None,
            probe: false,
            settled: true,
        }
    }

    /// Returns true if this call is the half-open probe.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Reports a successful call.
    pub fn record_success(mut self) {
        self.settled = true;
        if let Some(breaker) = &self.breaker {
            breaker.on_success(self.probe);
        }
    }

    /// Reports a failed call.
    pub fn record_failure(mut self) {
        self.settled = true;
        if let Some(breaker) = &self.breaker {
            breaker.on_failure(self.probe);
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.settled || !self.probe {
            return;
        }
        if let Some(breaker) = &self.breaker {
            breaker.release_probe();
        }
    }
}

/// Breakers for every named service, created lazily.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<ServiceBreaker>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns true if breakers gate calls at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Asks to call `service`.
    ///
    /// With the registry disabled every call gets a bypass permit.
    pub fn try_acquire(&self, service: &str) -> Result<BreakerPermit, CircuitOpenError> {
        if !self.config.enabled {
            return Ok(BreakerPermit::bypass());
        }
        self.breaker(service).try_acquire()
    }

    /// The breaker for `service`, created on first use.
    #[must_use]
    pub fn breaker(&self, service: &str) -> Arc<ServiceBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(ServiceBreaker::new(service, self.config.clone())));
        Arc::clone(entry.value())
    }

    /// Current state of `service`'s breaker; `Closed` if never used.
    #[must_use]
    pub fn state(&self, service: &str) -> CircuitState {
        self.breakers
            .get(service)
            .map_or(CircuitState::Closed, |b| b.value().state())
    }

    /// Snapshot of one breaker, if it exists.
    #[must_use]
    pub fn snapshot(&self, service: &str) -> Option<CircuitBreakerState> {
        self.breakers.get(service).map(|b| b.value().snapshot())
    }

    /// Snapshots of every breaker, sorted by service.
    #[must_use]
    pub fn report(&self) -> Vec<CircuitBreakerState> {
        let mut report: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        report.sort_by(|a, b| a.service.cmp(&b.service));
        report
    }

    /// Operator action: closes `service`'s breaker. Returns false if it never existed.
    pub fn reset(&self, service: &str) -> bool {
        match self.breakers.get(service) {
            Some(breaker) => {
                breaker.value().reset();
                true
            }
            None => false,
        }
    }
}
